use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type SlotId = i64;
pub type BannerId = i64;
pub type GroupId = i64;

/// One banner candidate inside a (slot, group) selection context.
///
/// `clicks <= impressions` is expected but not enforced; consumers only
/// read the ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BannerArm {
    pub banner_id: BannerId,
    pub impressions: u64,
    pub clicks: u64,
}

impl BannerArm {
    pub fn new(banner_id: BannerId, impressions: u64, clicks: u64) -> Self {
        Self {
            banner_id,
            impressions,
            clicks,
        }
    }

    /// Observed click-through rate. Zero impressions yield `0.0`.
    pub fn ctr(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.clicks as f64 / self.impressions as f64
        }
    }
}

/// A place on a site where banners are rotated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Banner {
    pub id: BannerId,
    pub url: String,
    pub description: String,
}

/// An audience segment, e.g. "young women" or "retirees".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub description: String,
}

/// Counters of one slot x banner x group link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Relation {
    pub slot_id: SlotId,
    pub banner_id: BannerId,
    pub group_id: GroupId,
    pub impressions: u64,
    pub clicks: u64,
}

impl From<Relation> for BannerArm {
    fn from(r: Relation) -> Self {
        BannerArm::new(r.banner_id, r.impressions, r.clicks)
    }
}

/// Show or click reported by a site for a served banner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    #[serde(rename = "slot")]
    pub slot_id: SlotId,
    #[serde(rename = "banner")]
    pub banner_id: BannerId,
    #[serde(rename = "group")]
    pub group_id: GroupId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Show,
    Click,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Show => "show",
            ActionKind::Click => "click",
        }
    }
}

/// Envelope published to the message broker for every recorded action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub event_id: Uuid,
    pub kind: ActionKind,
    #[serde(flatten)]
    pub action: Action,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ActionEvent {
    pub fn new(kind: ActionKind, action: Action, node_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            kind,
            action,
            node_id: node_id.into(),
            timestamp: Utc::now(),
        }
    }
}
