//! Rotation pipeline: fetches the statistics of a (slot, group) context,
//! lets the bandit pick a banner, and records show/click actions reported
//! later by the site.

use banner_core::error::{BanditError, RotationError, RotationResult};
use banner_core::types::{Action, ActionKind, Banner, GroupId, SlotId};
use banner_events::EventPublisher;
use banner_rl_engine::BanditStrategy;
use banner_store::StatisticsStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub struct RotationProcessor {
    store: Arc<dyn StatisticsStore>,
    bandit: Arc<dyn BanditStrategy>,
    publisher: Arc<dyn EventPublisher>,
}

impl RotationProcessor {
    pub fn new(
        store: Arc<dyn StatisticsStore>,
        bandit: Arc<dyn BanditStrategy>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            bandit,
            publisher,
        }
    }

    pub fn store(&self) -> &Arc<dyn StatisticsStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<dyn EventPublisher> {
        &self.publisher
    }

    /// Pick the banner to serve in `slot_id` for `group_id`.
    ///
    /// Selection does not count as a show; the site reports that separately.
    pub async fn choose_banner(&self, slot_id: SlotId, group_id: GroupId) -> RotationResult<Banner> {
        let start = Instant::now();
        metrics::counter!("rotation.requests").increment(1);

        let snapshot = self.store.fetch_statistics(slot_id, group_id).await?;

        let arm = match self.bandit.select(&snapshot) {
            Ok(arm) => arm,
            Err(BanditError::InsufficientData) => {
                metrics::counter!("rotation.no_banner").increment(1);
                debug!(slot_id, group_id, "No banner linked to slot");
                return Err(RotationError::NoBannerAvailable { slot_id, group_id });
            }
            Err(e) => {
                metrics::counter!("rotation.selection_errors").increment(1);
                warn!(
                    slot_id,
                    group_id,
                    arms = snapshot.len(),
                    strategy = self.bandit.name(),
                    error = %e,
                    "Banner selection failed"
                );
                return Err(e.into());
            }
        };

        let banner = self.store.get_banner(arm.banner_id).await?;

        metrics::counter!("rotation.selections").increment(1);
        metrics::histogram!("rotation.latency_us").record(start.elapsed().as_micros() as f64);
        debug!(
            slot_id,
            group_id,
            banner_id = banner.id,
            impressions = arm.impressions,
            clicks = arm.clicks,
            "Banner selected"
        );

        Ok(banner)
    }

    pub async fn show(&self, action: Action) -> RotationResult<()> {
        self.record(ActionKind::Show, action).await
    }

    pub async fn click(&self, action: Action) -> RotationResult<()> {
        self.record(ActionKind::Click, action).await
    }

    async fn record(&self, kind: ActionKind, action: Action) -> RotationResult<()> {
        let Action {
            slot_id,
            banner_id,
            group_id,
        } = action;

        match kind {
            ActionKind::Show => self.store.record_show(slot_id, banner_id, group_id).await?,
            ActionKind::Click => self.store.record_click(slot_id, banner_id, group_id).await?,
        }

        let published = match kind {
            ActionKind::Show => self.publisher.show(action).await,
            ActionKind::Click => self.publisher.click(action).await,
        };
        published.map_err(|e| {
            warn!(action = kind.as_str(), slot_id, banner_id, group_id, error = %e, "Failed to publish action");
            RotationError::Publish(e.to_string())
        })
    }
}
