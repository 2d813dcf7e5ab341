//! Pulse Phase - Real-time phase-space engine for beat-to-beat heart intervals
//!
//! Pulse Phase turns a stream of inter-beat intervals into a per-tick state
//! record through a deterministic pipeline: rolling buffer → HRV feature
//! extraction → phase-space trajectory dynamics → soft mode classification →
//! temporal hysteresis → movement annotation.
//!
//! ## Modules
//!
//! - **Feature extraction**: entrainment, breath rate, amplitude, volatility
//! - **Trajectory dynamics**: velocity, curvature, stability, coherence in a 3D phase space
//! - **Mode resolution**: soft six-mode membership stabilized by hysteresis

pub mod annotation;
pub mod buffer;
pub mod classifier;
pub mod error;
pub mod features;
pub mod hysteresis;
pub mod pipeline;
pub mod record;
pub mod trajectory;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use buffer::{IntervalBuffer, SharedIntervalBuffer};
pub use error::EngineError;
pub use pipeline::{replay, EngineConfig, PhaseEngine};
pub use record::TickRecord;
pub use types::{IntervalSample, Mode, ModeStatus, RrEvent};

/// Engine version embedded in host-facing surfaces
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for downstream provenance
pub const PRODUCER_NAME: &str = "pulse-phase";
