//! Applies entity-bearing dispatch events to the cache.
//!
//! Payloads that do not parse as the expected entity are skipped with a
//! warning; the event is still forwarded to handlers.

use serde_json::Value;
use tracing::{debug, warn};

use tether_cache::{Channel, Entity, EntityCache, Guild, Message, Role, User};

/// Update `cache` from one dispatch event. Returns whether the event name is
/// one the cache tracks.
pub fn apply(cache: &EntityCache, event: &str, data: &Value) -> bool {
    match event {
        "READY" => {
            if let Some(user) = data.get("user") {
                let _ = upsert::<User>(cache, user);
            }
            for guild in array(data, "guilds") {
                let _ = upsert::<Guild>(cache, guild);
            }
        }
        "GUILD_CREATE" => {
            let Some(guild) = upsert::<Guild>(cache, data) else {
                return true;
            };
            for channel in array(data, "channels") {
                let _ = upsert_in_guild::<Channel>(cache, channel, &guild.id);
            }
            for role in array(data, "roles") {
                let _ = upsert_in_guild::<Role>(cache, role, &guild.id);
            }
            for member in array(data, "members") {
                if let Some(user) = member.get("user") {
                    let _ = upsert::<User>(cache, user);
                }
            }
        }
        "GUILD_UPDATE" => {
            let _ = upsert::<Guild>(cache, data);
        }
        "GUILD_DELETE" => {
            // `unavailable: true` is an outage, not a removal.
            if data.get("unavailable").and_then(Value::as_bool) == Some(true) {
                let _ = upsert::<Guild>(cache, data);
            } else if let Some(id) = str_field(data, "id") {
                let _ = cache.remove::<Guild>(id);
            }
        }
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" | "THREAD_CREATE" | "THREAD_UPDATE" => {
            let _ = upsert::<Channel>(cache, data);
        }
        "CHANNEL_DELETE" | "THREAD_DELETE" => {
            if let Some(id) = str_field(data, "id") {
                let _ = cache.remove::<Channel>(id);
            }
        }
        "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
            if let (Some(role), Some(guild_id)) = (data.get("role"), str_field(data, "guild_id")) {
                let _ = upsert_in_guild::<Role>(cache, role, guild_id);
            }
        }
        "GUILD_ROLE_DELETE" => {
            if let Some(id) = str_field(data, "role_id") {
                let _ = cache.remove::<Role>(id);
            }
        }
        "MESSAGE_CREATE" | "MESSAGE_UPDATE" => {
            let author = data.get("author");
            if let Some(author) = author {
                let _ = upsert::<User>(cache, author);
            }
            if let Some(mut message) = parse::<Message>(data) {
                if message.author_id.is_none() {
                    message.author_id = author.and_then(|a| str_field(a, "id")).map(str::to_owned);
                }
                let id = message.id.clone();
                let _ = cache.upsert(&id, message);
            }
        }
        "MESSAGE_DELETE" => {
            if let Some(id) = str_field(data, "id") {
                let _ = cache.remove::<Message>(id);
            }
        }
        "MESSAGE_DELETE_BULK" => {
            for id in array(data, "ids").filter_map(Value::as_str) {
                let _ = cache.remove::<Message>(id);
            }
        }
        "USER_UPDATE" => {
            let _ = upsert::<User>(cache, data);
        }
        "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" => {
            if let Some(user) = data.get("user") {
                let _ = upsert::<User>(cache, user);
            }
        }
        _ => return false,
    }
    true
}

fn parse<T: Entity>(value: &Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(entity) => Some(entity),
        Err(error) => {
            warn!(kind = %T::KIND, %error, "skipping unparseable entity");
            None
        }
    }
}

fn upsert<T: Entity>(cache: &EntityCache, value: &Value) -> Option<T> {
    let entity = parse::<T>(value)?;
    let id = entity.id().to_owned();
    debug!(kind = %T::KIND, id = %id, "cache upsert");
    Some(cache.upsert(&id, entity))
}

/// Upsert a channel or role that arrived nested in a guild payload, which
/// omits `guild_id`.
fn upsert_in_guild<T: Entity + GuildScoped>(cache: &EntityCache, value: &Value, guild_id: &str) -> Option<T> {
    let mut entity = parse::<T>(value)?;
    entity.fill_guild_id(guild_id);
    let id = entity.id().to_owned();
    Some(cache.upsert(&id, entity))
}

trait GuildScoped {
    fn fill_guild_id(&mut self, guild_id: &str);
}

impl GuildScoped for Channel {
    fn fill_guild_id(&mut self, guild_id: &str) {
        if self.guild_id.is_none() {
            self.guild_id = Some(guild_id.to_owned());
        }
    }
}

impl GuildScoped for Role {
    fn fill_guild_id(&mut self, guild_id: &str) {
        if self.guild_id.is_none() {
            self.guild_id = Some(guild_id.to_owned());
        }
    }
}

fn array<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}
