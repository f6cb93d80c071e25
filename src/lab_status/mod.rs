//! Lab status engine: classifies lab values against free-text reference
//! ranges and writes the result into extracted reports.
//!
//! Everything here is pure and deterministic. Nothing returns an error:
//! input that cannot be interpreted yields [`LabStatus::Unknown`] or is
//! passed through unchanged.

pub mod classify;
pub mod enrich;
pub mod magnitude;
pub mod reference;

pub use classify::*;
pub use enrich::*;
pub use magnitude::Magnitude;
pub use reference::ReferenceRange;
