//! Statistics store: slots, banners, groups and their per-relation
//! impression/click counters.
//!
//! Two backends share the [`StatisticsStore`] contract: an in-process
//! [`MemoryStore`] and a [`RedisStore`].

#![warn(clippy::unwrap_used)]

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use banner_core::error::{StoreError, StoreResult};
use banner_core::types::{
    ActionKind, Banner, BannerArm, BannerId, Group, GroupId, Slot, SlotId,
};
use tracing::error;

#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// All banner arms linked to `slot_id`, with the counters of `group_id`,
    /// ordered by banner id. A slot without banners yields an empty vec.
    async fn fetch_statistics(&self, slot_id: SlotId, group_id: GroupId)
        -> StoreResult<Vec<BannerArm>>;

    /// Add one impression to the relation's counter.
    async fn record_show(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()>;

    /// Add one click to the relation's counter.
    async fn record_click(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()>;

    async fn add_slot(&self) -> StoreResult<Slot>;
    async fn add_banner(&self, url: &str, description: &str) -> StoreResult<Banner>;
    async fn add_group(&self, description: &str) -> StoreResult<Group>;

    /// Link a banner to a slot. Counters start at zero for every group.
    async fn add_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()>;

    async fn remove_slot(&self, slot_id: SlotId) -> StoreResult<()>;
    async fn remove_banner(&self, banner_id: BannerId) -> StoreResult<()>;
    async fn remove_group(&self, group_id: GroupId) -> StoreResult<()>;
    async fn remove_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()>;

    async fn get_banner(&self, banner_id: BannerId) -> StoreResult<Banner>;
    async fn all_banners(&self) -> StoreResult<Vec<Banner>>;
    async fn all_groups(&self) -> StoreResult<Vec<Group>>;
}

/// Map the number of counters an increment touched onto the store contract:
/// none is a missing relation, anything but one is an integrity fault.
pub(crate) fn check_affected(
    kind: ActionKind,
    affected: u64,
    slot_id: SlotId,
    banner_id: BannerId,
    group_id: GroupId,
) -> StoreResult<()> {
    match affected {
        1 => {
            let counter = match kind {
                ActionKind::Show => "store.shows",
                ActionKind::Click => "store.clicks",
            };
            metrics::counter!(counter).increment(1);
            Ok(())
        }
        0 => Err(StoreError::RelationNotFound {
            slot_id,
            banner_id,
            group_id,
        }),
        _ => {
            error!(
                action = kind.as_str(),
                affected,
                slot_id,
                banner_id,
                group_id,
                "Counter increment affected more than one relation"
            );
            metrics::counter!("store.integrity_faults").increment(1);
            Err(StoreError::IntegrityFault {
                affected,
                slot_id,
                banner_id,
                group_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_affected() {
        assert!(check_affected(ActionKind::Show, 1, 1, 2, 3).is_ok());
        assert!(matches!(
            check_affected(ActionKind::Click, 0, 1, 2, 3),
            Err(StoreError::RelationNotFound {
                slot_id: 1,
                banner_id: 2,
                group_id: 3
            })
        ));
        assert!(matches!(
            check_affected(ActionKind::Click, 2, 1, 2, 3),
            Err(StoreError::IntegrityFault { affected: 2, .. })
        ));
    }
}
