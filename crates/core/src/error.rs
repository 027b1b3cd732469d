use crate::types::{BannerId, GroupId, SlotId};
use thiserror::Error;

pub type BanditResult<T> = Result<T, BanditError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type RotationResult<T> = Result<T, RotationError>;

/// Failures of the arm-selection engine. Selection is synchronous and
/// side-effect free, so none of these are retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BanditError {
    #[error("insufficient data")]
    InsufficientData,

    #[error("every arm weight is zero, no arm can be drawn")]
    DegenerateWeights,

    #[error("weight {weight} at index {index} is not a finite non-negative number")]
    InvalidWeight { index: usize, weight: f64 },
}

/// Failures at the statistics store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("slot {0} not found")]
    SlotNotFound(SlotId),

    #[error("banner {0} not found")]
    BannerNotFound(BannerId),

    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error("relation not found: slot {slot_id}, banner {banner_id}, group {group_id}")]
    RelationNotFound {
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    },

    #[error("banner {banner_id} is not linked to slot {slot_id}")]
    LinkNotFound { slot_id: SlotId, banner_id: BannerId },

    #[error("relation already exists: slot {slot_id}, banner {banner_id}")]
    RelationExists { slot_id: SlotId, banner_id: BannerId },

    #[error("integrity fault: {affected} counters affected for slot {slot_id}, banner {banner_id}, group {group_id}")]
    IntegrityFault {
        affected: u64,
        slot_id: SlotId,
        banner_id: BannerId,
        group_id: GroupId,
    },

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Service-wide error. Store and selection errors are carried unmodified.
#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Selection error: {0}")]
    Selection(#[from] BanditError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("no banner available for slot {slot_id} and group {group_id}")]
    NoBannerAvailable { slot_id: SlotId, group_id: GroupId },

    #[error("Event publishing error: {0}")]
    Publish(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// True for the `*NotFound` family.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::SlotNotFound(_)
                | StoreError::BannerNotFound(_)
                | StoreError::GroupNotFound(_)
                | StoreError::RelationNotFound { .. }
                | StoreError::LinkNotFound { .. }
        )
    }
}
