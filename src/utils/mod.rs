//! Common helpers for the quantizer and the models
//!
//! - Fixed-point rounding, saturation and unit scaling
//! - Flat key/value records of configs and register structs

pub mod fixed_point;
pub mod records;

pub use fixed_point::{
    linear_bucket, log2_bucket, round_to_u32, round_to_u64, saturate_u32, saturate_u64,
};
pub use records::{from_flat_record, to_flat_record};
