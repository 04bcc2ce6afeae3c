use thiserror::Error;

/// Malformed session parameters, rejected before any service round-trip.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("quantity must be at least 1, got {0}")]
    QuantityTooSmall(u32),
    #[error("fairness_weight must be within 0.0..=1.0, got {0}")]
    FairnessWeightOutOfRange(f64),
    #[error("max_rounds must be at least 1, got {0}")]
    MaxRoundsTooSmall(u32),
    #[error("price {0} is not a finite non-negative number")]
    InvalidPrice(f64),
    #[error("min_price {min} exceeds max_price {max}")]
    InvertedPriceBounds { min: f64, max: f64 },
}
