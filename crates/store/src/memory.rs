//! In-process statistics store backed by DashMap.
//!
//! Counters are atomics, so show/click increments never take a lock.
//! Structural changes (adding or removing slots, banners, groups and links)
//! are serialized by a single mutex so that every link always has a counter
//! for every group.

use crate::{check_affected, StatisticsStore};
use async_trait::async_trait;
use banner_core::error::{StoreError, StoreResult};
use banner_core::types::{
    ActionKind, Banner, BannerArm, BannerId, Group, GroupId, Relation, Slot, SlotId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::{debug, info};

#[derive(Default)]
struct Counters {
    impressions: AtomicU64,
    clicks: AtomicU64,
}

impl Counters {
    fn counter(&self, kind: ActionKind) -> &AtomicU64 {
        match kind {
            ActionKind::Show => &self.impressions,
            ActionKind::Click => &self.clicks,
        }
    }
}

type CounterKey = (SlotId, BannerId, GroupId);

/// Thread-safe in-memory store for development and tests.
pub struct MemoryStore {
    next_id: AtomicI64,
    slots: DashMap<SlotId, Slot>,
    banners: DashMap<BannerId, Banner>,
    groups: DashMap<GroupId, Group>,
    links: DashMap<SlotId, BTreeSet<BannerId>>,
    counters: DashMap<CounterKey, Counters>,
    structure: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("Statistics store initialized (in-memory)");
        Self {
            next_id: AtomicI64::new(1),
            slots: DashMap::new(),
            banners: DashMap::new(),
            groups: DashMap::new(),
            links: DashMap::new(),
            counters: DashMap::new(),
            structure: Mutex::new(()),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn increment(
        &self,
        kind: ActionKind,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        let affected = match self.counters.get(&(slot_id, banner_id, group_id)) {
            Some(counters) => {
                counters.counter(kind).fetch_add(1, Ordering::Relaxed);
                1
            }
            None => 0,
        };
        check_affected(kind, affected, slot_id, banner_id, group_id)
    }

    /// Current counters of one relation, if it exists.
    pub fn relation(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> Option<Relation> {
        self.counters
            .get(&(slot_id, banner_id, group_id))
            .map(|c| Relation {
                slot_id,
                banner_id,
                group_id,
                impressions: c.impressions.load(Ordering::Relaxed),
                clicks: c.clicks.load(Ordering::Relaxed),
            })
    }

    pub fn relation_count(&self) -> usize {
        self.counters.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatisticsStore for MemoryStore {
    async fn fetch_statistics(
        &self,
        slot_id: SlotId,
        group_id: GroupId,
    ) -> StoreResult<Vec<BannerArm>> {
        if !self.slots.contains_key(&slot_id) {
            return Err(StoreError::SlotNotFound(slot_id));
        }
        if !self.groups.contains_key(&group_id) {
            return Err(StoreError::GroupNotFound(group_id));
        }

        let banner_ids: Vec<BannerId> = self
            .links
            .get(&slot_id)
            .map(|l| l.iter().copied().collect())
            .unwrap_or_default();

        // A link removed after the id list was taken is skipped.
        Ok(banner_ids
            .into_iter()
            .filter_map(|banner_id| self.relation(slot_id, banner_id, group_id))
            .map(BannerArm::from)
            .collect())
    }

    async fn record_show(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        self.increment(ActionKind::Show, slot_id, banner_id, group_id)
    }

    async fn record_click(
        &self,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    ) -> StoreResult<()> {
        self.increment(ActionKind::Click, slot_id, banner_id, group_id)
    }

    async fn add_slot(&self) -> StoreResult<Slot> {
        let _guard = self.structure.lock();
        let slot = Slot { id: self.next_id() };
        self.slots.insert(slot.id, slot);
        debug!(slot_id = slot.id, "Slot added");
        Ok(slot)
    }

    async fn add_banner(&self, url: &str, description: &str) -> StoreResult<Banner> {
        let _guard = self.structure.lock();
        let banner = Banner {
            id: self.next_id(),
            url: url.to_string(),
            description: description.to_string(),
        };
        self.banners.insert(banner.id, banner.clone());
        debug!(banner_id = banner.id, "Banner added");
        Ok(banner)
    }

    async fn add_group(&self, description: &str) -> StoreResult<Group> {
        let _guard = self.structure.lock();
        let group = Group {
            id: self.next_id(),
            description: description.to_string(),
        };
        self.groups.insert(group.id, group.clone());

        let links: Vec<(SlotId, BannerId)> = self
            .links
            .iter()
            .flat_map(|entry| {
                let slot_id = *entry.key();
                entry
                    .value()
                    .iter()
                    .map(move |&banner_id| (slot_id, banner_id))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (slot_id, banner_id) in links {
            self.counters
                .insert((slot_id, banner_id, group.id), Counters::default());
        }

        debug!(group_id = group.id, "Group added");
        Ok(group)
    }

    async fn add_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()> {
        let _guard = self.structure.lock();
        if !self.slots.contains_key(&slot_id) {
            return Err(StoreError::SlotNotFound(slot_id));
        }
        if !self.banners.contains_key(&banner_id) {
            return Err(StoreError::BannerNotFound(banner_id));
        }

        let inserted = self.links.entry(slot_id).or_default().insert(banner_id);
        if !inserted {
            return Err(StoreError::RelationExists { slot_id, banner_id });
        }

        let group_ids: Vec<GroupId> = self.groups.iter().map(|g| *g.key()).collect();
        for group_id in group_ids {
            self.counters
                .insert((slot_id, banner_id, group_id), Counters::default());
        }

        debug!(slot_id, banner_id, "Relation added");
        Ok(())
    }

    async fn remove_slot(&self, slot_id: SlotId) -> StoreResult<()> {
        let _guard = self.structure.lock();
        if self.slots.remove(&slot_id).is_none() {
            return Err(StoreError::SlotNotFound(slot_id));
        }
        self.links.remove(&slot_id);
        self.counters.retain(|(s, _, _), _| *s != slot_id);
        debug!(slot_id, "Slot removed");
        Ok(())
    }

    async fn remove_banner(&self, banner_id: BannerId) -> StoreResult<()> {
        let _guard = self.structure.lock();
        if self.banners.remove(&banner_id).is_none() {
            return Err(StoreError::BannerNotFound(banner_id));
        }
        for mut entry in self.links.iter_mut() {
            entry.value_mut().remove(&banner_id);
        }
        self.counters.retain(|(_, b, _), _| *b != banner_id);
        debug!(banner_id, "Banner removed");
        Ok(())
    }

    async fn remove_group(&self, group_id: GroupId) -> StoreResult<()> {
        let _guard = self.structure.lock();
        if self.groups.remove(&group_id).is_none() {
            return Err(StoreError::GroupNotFound(group_id));
        }
        self.counters.retain(|(_, _, g), _| *g != group_id);
        debug!(group_id, "Group removed");
        Ok(())
    }

    async fn remove_relation(&self, slot_id: SlotId, banner_id: BannerId) -> StoreResult<()> {
        let _guard = self.structure.lock();
        let removed = self
            .links
            .get_mut(&slot_id)
            .map(|mut l| l.remove(&banner_id))
            .unwrap_or(false);
        if !removed {
            return Err(StoreError::LinkNotFound { slot_id, banner_id });
        }
        self.counters
            .retain(|(s, b, _), _| !(*s == slot_id && *b == banner_id));
        debug!(slot_id, banner_id, "Relation removed");
        Ok(())
    }

    async fn get_banner(&self, banner_id: BannerId) -> StoreResult<Banner> {
        self.banners
            .get(&banner_id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::BannerNotFound(banner_id))
    }

    async fn all_banners(&self) -> StoreResult<Vec<Banner>> {
        let mut banners: Vec<Banner> = self.banners.iter().map(|r| r.value().clone()).collect();
        banners.sort_by_key(|b| b.id);
        Ok(banners)
    }

    async fn all_groups(&self) -> StoreResult<Vec<Group>> {
        let mut groups: Vec<Group> = self.groups.iter().map(|r| r.value().clone()).collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn seeded() -> (MemoryStore, Slot, Vec<Banner>, Group) {
        let store = MemoryStore::new();
        let group = store.add_group("group1").await.unwrap();
        let slot = store.add_slot().await.unwrap();
        let mut banners = Vec::new();
        for i in 1..=3 {
            let b = store
                .add_banner(&format!("https://mybanner.com/banner{i}"), &format!("banner{i}"))
                .await
                .unwrap();
            store.add_relation(slot.id, b.id).await.unwrap();
            banners.push(b);
        }
        (store, slot, banners, group)
    }

    #[tokio::test]
    async fn test_fetch_statistics_starts_at_zero() {
        let (store, slot, banners, group) = seeded().await;
        let arms = store.fetch_statistics(slot.id, group.id).await.unwrap();
        let ids: Vec<_> = arms.iter().map(|a| a.banner_id).collect();
        assert_eq!(ids, banners.iter().map(|b| b.id).collect::<Vec<_>>());
        assert!(arms.iter().all(|a| a.impressions == 0 && a.clicks == 0));
    }

    #[tokio::test]
    async fn test_group_added_after_relations_gets_counters() {
        let (store, slot, _, _) = seeded().await;
        let late = store.add_group("late").await.unwrap();
        assert_eq!(store.fetch_statistics(slot.id, late.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_slot_or_group() {
        let (store, slot, _, group) = seeded().await;
        assert!(matches!(
            store.fetch_statistics(999, group.id).await,
            Err(StoreError::SlotNotFound(999))
        ));
        assert!(matches!(
            store.fetch_statistics(slot.id, 999).await,
            Err(StoreError::GroupNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_empty_slot_is_not_an_error() {
        let store = MemoryStore::new();
        let group = store.add_group("g").await.unwrap();
        let slot = store.add_slot().await.unwrap();
        assert!(store.fetch_statistics(slot.id, group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_show_and_click_are_counted_per_group() {
        let (store, slot, banners, group) = seeded().await;
        let other = store.add_group("other").await.unwrap();
        let b = banners[1].id;

        store.record_show(slot.id, b, group.id).await.unwrap();
        store.record_show(slot.id, b, group.id).await.unwrap();
        store.record_click(slot.id, b, group.id).await.unwrap();

        let r = store.relation(slot.id, b, group.id).unwrap();
        assert_eq!((r.impressions, r.clicks), (2, 1));
        let r = store.relation(slot.id, b, other.id).unwrap();
        assert_eq!((r.impressions, r.clicks), (0, 0));
    }

    #[tokio::test]
    async fn test_record_on_missing_relation() {
        let (store, slot, _, group) = seeded().await;
        let unlinked = store.add_banner("https://x", "x").await.unwrap();
        assert!(matches!(
            store.record_click(slot.id, unlinked.id, group.id).await,
            Err(StoreError::RelationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_and_dangling_relations() {
        let (store, slot, banners, _) = seeded().await;
        assert!(matches!(
            store.add_relation(slot.id, banners[0].id).await,
            Err(StoreError::RelationExists { .. })
        ));
        assert!(matches!(
            store.add_relation(slot.id, 12345).await,
            Err(StoreError::BannerNotFound(12345))
        ));
        assert!(matches!(
            store.add_relation(12345, banners[0].id).await,
            Err(StoreError::SlotNotFound(12345))
        ));
    }

    #[tokio::test]
    async fn test_removals_cascade_to_counters() {
        let (store, slot, banners, group) = seeded().await;
        assert_eq!(store.relation_count(), 3);

        store.remove_relation(slot.id, banners[0].id).await.unwrap();
        assert_eq!(store.relation_count(), 2);
        assert!(store.relation(slot.id, banners[0].id, group.id).is_none());

        store.remove_banner(banners[1].id).await.unwrap();
        let arms = store.fetch_statistics(slot.id, group.id).await.unwrap();
        assert_eq!(arms.len(), 1);
        assert_eq!(arms[0].banner_id, banners[2].id);

        store.remove_group(group.id).await.unwrap();
        assert_eq!(store.relation_count(), 0);

        store.remove_slot(slot.id).await.unwrap();
        assert!(matches!(
            store.remove_slot(slot.id).await,
            Err(StoreError::SlotNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_listing_is_ordered() {
        let (store, _, banners, group) = seeded().await;
        assert_eq!(store.all_banners().await.unwrap(), banners);
        assert_eq!(store.all_groups().await.unwrap(), vec![group]);
        assert_eq!(store.get_banner(banners[2].id).await.unwrap(), banners[2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let (store, slot, banners, group) = seeded().await;
        let store = Arc::new(store);
        let (slot_id, banner_id, group_id) = (slot.id, banners[0].id, group.id);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..500 {
                    store.record_show(slot_id, banner_id, group_id).await.unwrap();
                    store.record_click(slot_id, banner_id, group_id).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let r = store.relation(slot_id, banner_id, group_id).unwrap();
        assert_eq!((r.impressions, r.clicks), (4000, 4000));
    }
}
