//! # ss-core
//!
//! Shared vocabulary for the separation crates:
//! - Error taxonomy (`SepError`, `SepResult`)
//! - Named layer choices (`Nonlinear`, `NormKind`)
//! - Numeric constants

pub mod activation;
pub mod error;

pub use activation::{Nonlinear, NormKind, sigmoid, softmax_inplace};
pub use error::{SepError, SepResult, ensure_positive};

/// Guard added to denominators (centroids, norms, ratios)
pub const EPS: f32 = 1e-12;
