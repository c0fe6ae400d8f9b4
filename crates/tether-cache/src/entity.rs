//! Entity kinds held by the cache.
//!
//! Every kind is its own struct. Apart from `id`, all fields are optional so
//! the same type doubles as a partial snapshot: a field that is `None` in an
//! update leaves the stored value untouched.

use std::fmt;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::EntityCache;
use crate::store::EntityStore;

/// Discriminant for the cached entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A guild (server).
    Guild,
    /// A channel, in a guild or private.
    Channel,
    /// A guild role.
    Role,
    /// A user account.
    User,
    /// A channel message.
    Message,
}

impl EntityKind {
    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guild => "guild",
            Self::Channel => "channel",
            Self::Role => "role",
            Self::User => "user",
            Self::Message => "message",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior shared by all cached entities.
pub trait Entity: Clone + fmt::Debug + DeserializeOwned + Send + Sync + 'static {
    /// Which kind this is.
    const KIND: EntityKind;

    /// Cache key.
    fn id(&self) -> &str;

    /// Shallow merge: every `Some` field of `patch` overwrites `self`.
    fn merge(&mut self, patch: Self);

    /// The store in `cache` that holds this kind.
    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>>;
}

fn overwrite<T>(slot: &mut Option<T>, patch: Option<T>) {
    if patch.is_some() {
        *slot = patch;
    }
}

/// A user account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Snowflake id.
    pub id: String,
    /// Account name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    /// Legacy four-digit tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
    /// Avatar hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Whether the account is a bot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<bool>,
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.username, patch.username);
        overwrite(&mut self.global_name, patch.global_name);
        overwrite(&mut self.discriminator, patch.discriminator);
        overwrite(&mut self.avatar, patch.avatar);
        overwrite(&mut self.bot, patch.bot);
    }

    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>> {
        &cache.users
    }
}

/// A guild.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guild {
    /// Snowflake id.
    pub id: String,
    /// Guild name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Icon hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Owner user id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Total member count (only sent on create).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u64>,
    /// True while the guild is in an outage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<bool>,
}

impl Entity for Guild {
    const KIND: EntityKind = EntityKind::Guild;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.name, patch.name);
        overwrite(&mut self.icon, patch.icon);
        overwrite(&mut self.owner_id, patch.owner_id);
        overwrite(&mut self.member_count, patch.member_count);
        overwrite(&mut self.unavailable, patch.unavailable);
    }

    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>> {
        &cache.guilds
    }
}

/// A channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Snowflake id.
    pub id: String,
    /// Owning guild, absent for private channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Channel type as sent on the wire.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
    /// Channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Channel topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Sort position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// Parent category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Most recent message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
}

impl Entity for Channel {
    const KIND: EntityKind = EntityKind::Channel;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.guild_id, patch.guild_id);
        overwrite(&mut self.kind, patch.kind);
        overwrite(&mut self.name, patch.name);
        overwrite(&mut self.topic, patch.topic);
        overwrite(&mut self.position, patch.position);
        overwrite(&mut self.parent_id, patch.parent_id);
        overwrite(&mut self.last_message_id, patch.last_message_id);
    }

    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>> {
        &cache.channels
    }
}

/// A guild role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Snowflake id.
    pub id: String,
    /// Owning guild. Not part of the wire role object, filled from the
    /// enclosing event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Role name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// RGB color.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    /// Sort position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
    /// Permission bitfield, string-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    /// Shown separately in the member list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hoist: Option<bool>,
    /// Whether anyone can mention it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentionable: Option<bool>,
}

impl Entity for Role {
    const KIND: EntityKind = EntityKind::Role;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.guild_id, patch.guild_id);
        overwrite(&mut self.name, patch.name);
        overwrite(&mut self.color, patch.color);
        overwrite(&mut self.position, patch.position);
        overwrite(&mut self.permissions, patch.permissions);
        overwrite(&mut self.hoist, patch.hoist);
        overwrite(&mut self.mentionable, patch.mentionable);
    }

    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>> {
        &cache.roles
    }
}

/// A channel message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake id.
    pub id: String,
    /// Channel the message was posted in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Guild, absent for private channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Author user id. The wire object nests the full author; the user
    /// itself is cached separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Creation time (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Last edit time (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_timestamp: Option<String>,
    /// Whether the message is pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&mut self, patch: Self) {
        overwrite(&mut self.channel_id, patch.channel_id);
        overwrite(&mut self.guild_id, patch.guild_id);
        overwrite(&mut self.author_id, patch.author_id);
        overwrite(&mut self.content, patch.content);
        overwrite(&mut self.timestamp, patch.timestamp);
        overwrite(&mut self.edited_timestamp, patch.edited_timestamp);
        overwrite(&mut self.pinned, patch.pinned);
    }

    fn slot(cache: &EntityCache) -> &RwLock<EntityStore<Self>> {
        &cache.messages
    }
}
