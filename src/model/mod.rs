//! Per-sample simulation models
//!
//! [`HarvesterModel`] selects the operating point on the energy environment,
//! [`ConverterModel`] moves that energy through the storage capacitor to the
//! output, [`VirtualSource`] chains both. All models work on the quantized
//! registers in integer arithmetic and own their state for a single run.

pub mod converter;
pub mod harvester;
pub mod source;

pub use converter::{ConverterModel, ConverterState};
pub use harvester::{HarvesterModel, HarvesterState};
pub use source::{SourceStep, VirtualSource};
