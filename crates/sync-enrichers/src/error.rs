/// Mirrors the subset of spec section 7's error kinds an enricher can
/// produce. `Transient` should cause the caller to re-throw so the bus
/// redelivers; the others are recorded as a FAILED/SKIPPED booster without
/// redelivery.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("feature gated to a higher tier: {0}")]
    TierRestricted(String),

    #[error("transient failure, retry: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl EnrichError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EnrichError::Transient(_))
    }
}
