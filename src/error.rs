//! Error types for pulse-phase
//!
//! The per-tick pipeline is total: insufficient data and numeric degeneracy
//! resolve to documented neutral defaults inside each component and never
//! surface as errors. The only hard-failure class is invalid configuration,
//! which indicates a programming error rather than a runtime data condition.

use thiserror::Error;

/// Errors that can occur when constructing or hosting the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid centroid configuration: {0}")]
    InvalidCentroids(String),

    #[error("Invalid hysteresis configuration: {0}")]
    InvalidHysteresis(String),

    #[error("Invalid extractor configuration: {0}")]
    InvalidExtractor(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to parse interval event: {0}")]
    ParseError(String),
}
