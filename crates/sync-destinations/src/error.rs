/// Mirrors the subset of spec section 7's error kinds a destination adapter
/// can produce. `Transient` should cause the caller to re-throw so the bus
/// redelivers; the others resolve to a SKIPPED or FAILED outcome without
/// redelivery.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("feature gated to a higher tier: {0}")]
    TierRestricted(String),

    #[error("remote record not found: {0}")]
    NotFound(String),

    #[error("transient failure, retry: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("duplicate delivery: {0}")]
    Duplicate(String),
}

impl DestinationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DestinationError::Transient(_))
    }

    pub fn skip_reason(&self) -> &'static str {
        match self {
            DestinationError::ConfigMissing(_) => "config_missing",
            DestinationError::TierRestricted(_) => "tier_restricted",
            DestinationError::NotFound(_) => "not_found",
            DestinationError::Transient(_) => "transient",
            DestinationError::Permanent(_) => "permanent",
            DestinationError::Duplicate(_) => "duplicate",
        }
    }
}
