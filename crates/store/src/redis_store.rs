//! Redis-backed statistics store.
//!
//! Key layout under the configured prefix `p`:
//! - `p:seq`: id sequence shared by slots, banners and groups
//! - `p:slots`: set of slot ids
//! - `p:banners`, `p:groups`: hash of id -> JSON entity
//! - `p:slot:{slot}:banners`: set of banner ids linked to a slot
//! - `p:stats:{slot}:{banner}:{group}`: hash with `impressions` and `clicks`
//!
//! Every structural change (adding or removing a relation, group, slot or
//! banner) is one Lua script, so it cannot interleave with another one.

use crate::{check_affected, StatisticsStore};
use async_trait::async_trait;
use banner_core::config::RedisConfig;
use banner_core::error::{StoreError, StoreResult};
use banner_core::types::{
    ActionKind, Banner, BannerArm, BannerId, Group, GroupId, Slot, SlotId,
};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

/// Increments one counter field only when the relation hash exists, so a
/// missing relation is never created implicitly.
const INCREMENT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('HINCRBY', KEYS[1], ARGV[1], 1)
  return 1
end
return 0
"#;

/// Key helpers shared by the structural scripts. `ARGV[1]` is the prefix.
/// Counters are created with `HSETNX` so an existing counter is never reset.
const LUA_KEYS: &str = r#"
local p = ARGV[1]
local function links(slot) return p .. ':slot:' .. slot .. ':banners' end
local function stats(slot, banner, group)
  return p .. ':stats:' .. slot .. ':' .. banner .. ':' .. group
end
local function create(key)
  redis.call('HSETNX', key, 'impressions', 0)
  redis.call('HSETNX', key, 'clicks', 0)
end
"#;

/// ARGV: prefix, slot, banner. Returns 1, 0 (already linked), -1 (no slot)
/// or -2 (no banner).
const ADD_RELATION_SCRIPT: &str = r#"
local slot, banner = ARGV[2], ARGV[3]
if redis.call('SISMEMBER', p .. ':slots', slot) == 0 then return -1 end
if redis.call('HEXISTS', p .. ':banners', banner) == 0 then return -2 end
if redis.call('SADD', links(slot), banner) == 0 then return 0 end
for _, group in ipairs(redis.call('HKEYS', p .. ':groups')) do
  create(stats(slot, banner, group))
end
return 1
"#;

/// ARGV: prefix, group, group JSON. Returns the number of counters ensured.
const ADD_GROUP_SCRIPT: &str = r#"
local group = ARGV[2]
redis.call('HSET', p .. ':groups', group, ARGV[3])
local ensured = 0
for _, slot in ipairs(redis.call('SMEMBERS', p .. ':slots')) do
  for _, banner in ipairs(redis.call('SMEMBERS', links(slot))) do
    create(stats(slot, banner, group))
    ensured = ensured + 1
  end
end
return ensured
"#;

/// ARGV: prefix, slot. Returns 1, or 0 when the slot does not exist.
const REMOVE_SLOT_SCRIPT: &str = r#"
local slot = ARGV[2]
if redis.call('SREM', p .. ':slots', slot) == 0 then return 0 end
local groups = redis.call('HKEYS', p .. ':groups')
for _, banner in ipairs(redis.call('SMEMBERS', links(slot))) do
  for _, group in ipairs(groups) do
    redis.call('DEL', stats(slot, banner, group))
  end
end
redis.call('DEL', links(slot))
return 1
"#;

/// ARGV: prefix, banner. Returns 1, or 0 when the banner does not exist.
const REMOVE_BANNER_SCRIPT: &str = r#"
local banner = ARGV[2]
if redis.call('HDEL', p .. ':banners', banner) == 0 then return 0 end
local groups = redis.call('HKEYS', p .. ':groups')
for _, slot in ipairs(redis.call('SMEMBERS', p .. ':slots')) do
  if redis.call('SREM', links(slot), banner) == 1 then
    for _, group in ipairs(groups) do
      redis.call('DEL', stats(slot, banner, group))
    end
  end
end
return 1
"#;

/// ARGV: prefix, group. Returns 1, or 0 when the group does not exist.
const REMOVE_GROUP_SCRIPT: &str = r#"
local group = ARGV[2]
if redis.call('HDEL', p .. ':groups', group) == 0 then return 0 end
for _, slot in ipairs(redis.call('SMEMBERS', p .. ':slots')) do
  for _, banner in ipairs(redis.call('SMEMBERS', links(slot))) do
    redis.call('DEL', stats(slot, banner, group))
  end
end
return 1
"#;

/// ARGV: prefix, slot, banner. Returns 1, or 0 when they are not linked.
const REMOVE_RELATION_SCRIPT: &str = r#"
local slot, banner = ARGV[2], ARGV[3]
if redis.call('SREM', links(slot), banner) == 0 then return 0 end
for _, group in ipairs(redis.call('HKEYS', p .. ':groups')) do
  redis.call('DEL', stats(slot, banner, group))
end
return 1
"#;

const SLOT_MISSING: i64 = -1;
const BANNER_MISSING: i64 = -2;

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn seq(&self) -> String {
        format!("{}:seq", self.prefix)
    }

    fn slots(&self) -> String {
        format!("{}:slots", self.prefix)
    }

    fn banners(&self) -> String {
        format!("{}:banners", self.prefix)
    }

    fn groups(&self) -> String {
        format!("{}:groups", self.prefix)
    }

    fn links(&self, slot_id: SlotId) -> String {
        format!("{}:slot:{slot_id}:banners", self.prefix)
    }

    fn stats(&self, slot_id: SlotId, banner_id: BannerId, group_id: GroupId) -> String {
        format!("{}:stats:{slot_id}:{banner_id}:{group_id}", self.prefix)
    }
}

fn field(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Show => "impressions",
        ActionKind::Click => "clicks",
    }
}

/// Structural changes run as one script each, so Redis applies the check,
/// the write and the cascade atomically.
struct Scripts {
    increment: redis::Script,
    add_relation: redis::Script,
    add_group: redis::Script,
    remove_slot: redis::Script,
    remove_banner: redis::Script,
    remove_group: redis::Script,
    remove_relation: redis::Script,
}

fn structural(body: &str) -> redis::Script {
    redis::Script::new(&format!("{LUA_KEYS}{body}"))
}

impl Scripts {
    fn new() -> Self {
        Self {
            increment: redis::Script::new(INCREMENT_SCRIPT),
            add_relation: structural(ADD_RELATION_SCRIPT),
            add_group: structural(ADD_GROUP_SCRIPT),
            remove_slot: structural(REMOVE_SLOT_SCRIPT),
            remove_banner: structural(REMOVE_BANNER_SCRIPT),
            remove_group: structural(REMOVE_GROUP_SCRIPT),
            remove_relation: structural(REMOVE_RELATION_SCRIPT),
        }
    }
}

fn relation_added(code: i64, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()> {
    match code {
        1 => Ok(()),
        0 => Err(StoreError::RelationExists { slot_id, banner_id }),
        SLOT_MISSING => Err(StoreError::SlotNotFound(slot_id)),
        BANNER_MISSING => Err(StoreError::BannerNotFound(banner_id)),
        other => Err(StoreError::Backend(format!(
            "unexpected add_relation result {other}"
        ))),
    }
}

fn removed(code: i64, missing: StoreError) -> StoreResult<()> {
    match code {
        1 => Ok(()),
        0 => Err(missing),
        other => Err(StoreError::Backend(format!("unexpected remove result {other}"))),
    }
}

/// Statistics store persisted in Redis.
pub struct RedisStore {
    conn: ConnectionManager,
    keys: Keys,
    scripts: Scripts,
}

impl RedisStore {
    /// Connect to Redis and verify the connection.
    pub async fn new(config: &RedisConfig) -> StoreResult<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str()).map_err(backend)?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Backend(format!("connection to {url} timed out")))?
            .map_err(backend)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            keys: Keys {
                prefix: config.key_prefix.clone(),
            },
            scripts: Scripts::new(),
        })
    }

    async fn next_id(&self) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        conn.incr(self.keys.seq(), 1).await.map_err(backend)
    }

    async fn slot_exists(&self, slot_id: SlotId) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        conn.sismember(self.keys.slots(), slot_id)
            .await
            .map_err(backend)
    }

    async fn linked_banners(&self, slot_id: SlotId) -> StoreResult<Vec<BannerId>> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<BannerId> = conn
            .smembers(self.keys.links(slot_id))
            .await
            .map_err(backend)?;
        ids.sort_unstable();
        Ok(ids)
    }

    async fn increment(
        &self,
        kind: ActionKind,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let affected: u64 = self
            .scripts
            .increment
            .key(self.keys.stats(slot_id, banner_id, group_id))
            .arg(field(kind))
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        check_affected(kind, affected, slot_id, banner_id, group_id)
    }
}

#[async_trait]
impl StatisticsStore for RedisStore {
    async fn fetch_statistics(
        &self,
        slot_id: SlotId,
        group_id: GroupId,
    ) -> StoreResult<Vec<BannerArm>> {
        if !self.slot_exists(slot_id).await? {
            return Err(StoreError::SlotNotFound(slot_id));
        }
        let mut conn = self.conn.clone();
        let group_exists: bool = conn
            .hexists(self.keys.groups(), group_id)
            .await
            .map_err(backend)?;
        if !group_exists {
            return Err(StoreError::GroupNotFound(group_id));
        }

        let banner_ids = self.linked_banners(slot_id).await?;
        if banner_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for &banner_id in &banner_ids {
            pipe.cmd("HMGET")
                .arg(self.keys.stats(slot_id, banner_id, group_id))
                .arg(field(ActionKind::Show))
                .arg(field(ActionKind::Click));
        }
        let rows: Vec<(Option<u64>, Option<u64>)> =
            pipe.query_async(&mut conn).await.map_err(backend)?;

        // A link removed between the two reads has no counters left.
        Ok(banner_ids
            .into_iter()
            .zip(rows)
            .filter_map(|(banner_id, (impressions, clicks))| {
                impressions.map(|i| BannerArm::new(banner_id, i, clicks.unwrap_or(0)))
            })
            .collect())
    }

    async fn record_show(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        self.increment(ActionKind::Show, slot_id, banner_id, group_id)
            .await
    }

    async fn record_click(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        self.increment(ActionKind::Click, slot_id, banner_id, group_id)
            .await
    }

    async fn add_slot(&self) -> StoreResult<Slot> {
        let slot = Slot {
            id: self.next_id().await?,
        };
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.keys.slots(), slot.id)
            .await
            .map_err(backend)?;
        debug!(slot_id = slot.id, "Slot added");
        Ok(slot)
    }

    async fn add_banner(&self, url: &str, description: &str) -> StoreResult<Banner> {
        let banner = Banner {
            id: self.next_id().await?,
            url: url.to_string(),
            description: description.to_string(),
        };
        let json = serde_json::to_string(&banner)?;
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(self.keys.banners(), banner.id, json)
            .await
            .map_err(backend)?;
        debug!(banner_id = banner.id, "Banner added");
        Ok(banner)
    }

    async fn add_group(&self, description: &str) -> StoreResult<Group> {
        let group = Group {
            id: self.next_id().await?,
            description: description.to_string(),
        };
        let json = serde_json::to_string(&group)?;
        let mut conn = self.conn.clone();
        let ensured: i64 = self
            .scripts
            .add_group
            .arg(&self.keys.prefix)
            .arg(group.id)
            .arg(json)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        debug!(group_id = group.id, counters = ensured, "Group added");
        Ok(group)
    }

    async fn add_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .scripts
            .add_relation
            .arg(&self.keys.prefix)
            .arg(slot_id)
            .arg(banner_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        relation_added(code, slot_id, banner_id)?;

        debug!(slot_id, banner_id, "Relation added");
        Ok(())
    }

    async fn remove_slot(&self, slot_id: SlotId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .scripts
            .remove_slot
            .arg(&self.keys.prefix)
            .arg(slot_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        removed(code, StoreError::SlotNotFound(slot_id))?;

        debug!(slot_id, "Slot removed");
        Ok(())
    }

    async fn remove_banner(&self, banner_id: BannerId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .scripts
            .remove_banner
            .arg(&self.keys.prefix)
            .arg(banner_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        removed(code, StoreError::BannerNotFound(banner_id))?;

        debug!(banner_id, "Banner removed");
        Ok(())
    }

    async fn remove_group(&self, group_id: GroupId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .scripts
            .remove_group
            .arg(&self.keys.prefix)
            .arg(group_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        removed(code, StoreError::GroupNotFound(group_id))?;

        debug!(group_id, "Group removed");
        Ok(())
    }

    async fn remove_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .scripts
            .remove_relation
            .arg(&self.keys.prefix)
            .arg(slot_id)
            .arg(banner_id)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        removed(code, StoreError::LinkNotFound { slot_id, banner_id })?;

        debug!(slot_id, banner_id, "Relation removed");
        Ok(())
    }

    async fn get_banner(&self, banner_id: BannerId) -> StoreResult<Banner> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .hget(self.keys.banners(), banner_id)
            .await
            .map_err(backend)?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::BannerNotFound(banner_id)),
        }
    }

    async fn all_banners(&self) -> StoreResult<Vec<Banner>> {
        let mut conn = self.conn.clone();
        let rows: Vec<String> = conn.hvals(self.keys.banners()).await.map_err(backend)?;
        let mut banners = rows
            .iter()
            .map(|json| serde_json::from_str::<Banner>(json))
            .collect::<Result<Vec<_>, _>>()?;
        banners.sort_by_key(|b| b.id);
        Ok(banners)
    }

    async fn all_groups(&self) -> StoreResult<Vec<Group>> {
        let mut conn = self.conn.clone();
        let rows: Vec<String> = conn.hvals(self.keys.groups()).await.map_err(backend)?;
        let mut groups = rows
            .iter()
            .map(|json| serde_json::from_str::<Group>(json))
            .collect::<Result<Vec<_>, _>>()?;
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys {
            prefix: "br".to_string(),
        };
        assert_eq!(keys.seq(), "br:seq");
        assert_eq!(keys.slots(), "br:slots");
        assert_eq!(keys.links(4), "br:slot:4:banners");
        assert_eq!(keys.stats(4, 7, 2), "br:stats:4:7:2");
    }

    #[test]
    fn test_counter_fields() {
        assert_eq!(field(ActionKind::Show), "impressions");
        assert_eq!(field(ActionKind::Click), "clicks");
    }

    #[test]
    fn test_relation_result_codes() {
        assert!(relation_added(1, 3, 4).is_ok());
        assert!(matches!(
            relation_added(0, 3, 4),
            Err(StoreError::RelationExists {
                slot_id: 3,
                banner_id: 4
            })
        ));
        assert!(matches!(relation_added(SLOT_MISSING, 3, 4), Err(StoreError::SlotNotFound(3))));
        assert!(matches!(
            relation_added(BANNER_MISSING, 3, 4),
            Err(StoreError::BannerNotFound(4))
        ));
        assert!(matches!(relation_added(7, 3, 4), Err(StoreError::Backend(_))));
    }

    #[test]
    fn test_remove_result_codes() {
        assert!(removed(1, StoreError::GroupNotFound(9)).is_ok());
        assert!(matches!(
            removed(0, StoreError::GroupNotFound(9)),
            Err(StoreError::GroupNotFound(9))
        ));
        assert!(matches!(
            removed(-1, StoreError::GroupNotFound(9)),
            Err(StoreError::Backend(_))
        ));
    }

    #[test]
    fn test_counter_creation_never_overwrites() {
        // Counters are only ever created through `create`, which uses HSETNX.
        assert!(LUA_KEYS.contains("'HSETNX', key, 'impressions', 0"));
        assert!(LUA_KEYS.contains("'HSETNX', key, 'clicks', 0"));
        for body in [ADD_RELATION_SCRIPT, ADD_GROUP_SCRIPT] {
            assert!(body.contains("create(stats("));
            assert!(!body.contains("'impressions'"));
        }
    }

    async fn live_store() -> RedisStore {
        let config = RedisConfig {
            urls: vec!["redis://127.0.0.1:6379".to_string()],
            connect_timeout_ms: 2000,
            key_prefix: format!("banner_rotation_test_{}", std::process::id()),
        };
        RedisStore::new(&config).await.unwrap()
    }

    /// Requires a local Redis: `cargo test -p banner-store -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_structural_scripts_keep_counters() {
        let store = live_store().await;
        let slot = store.add_slot().await.unwrap();
        let banner = store.add_banner("https://mybanner.com/1", "b1").await.unwrap();
        let group = store.add_group("g1").await.unwrap();
        store.add_relation(slot.id, banner.id).await.unwrap();
        store.record_show(slot.id, banner.id, group.id).await.unwrap();

        // Re-running group creation for the same group, as a concurrent
        // add_relation/add_group pair would, must not reset the counter.
        let mut conn = store.conn.clone();
        let _: i64 = store
            .scripts
            .add_group
            .arg(&store.keys.prefix)
            .arg(group.id)
            .arg(serde_json::to_string(&group).unwrap())
            .invoke_async(&mut conn)
            .await
            .unwrap();
        let arms = store.fetch_statistics(slot.id, group.id).await.unwrap();
        assert_eq!(arms, vec![BannerArm::new(banner.id, 1, 0)]);

        assert!(matches!(
            store.add_relation(slot.id, banner.id).await,
            Err(StoreError::RelationExists { .. })
        ));
        assert!(matches!(
            store.add_relation(slot.id + 1000, banner.id).await,
            Err(StoreError::SlotNotFound(_))
        ));

        store.remove_slot(slot.id).await.unwrap();
        let stats_left: bool = conn
            .exists(store.keys.stats(slot.id, banner.id, group.id))
            .await
            .unwrap();
        let links_left: bool = conn.exists(store.keys.links(slot.id)).await.unwrap();
        assert!(!stats_left && !links_left);
        assert!(matches!(
            store.remove_slot(slot.id).await,
            Err(StoreError::SlotNotFound(_))
        ));

        store.remove_banner(banner.id).await.unwrap();
        store.remove_group(group.id).await.unwrap();
        conn.del::<_, ()>(store.keys.seq()).await.unwrap();
    }
}
