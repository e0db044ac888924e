//! Shared utility modules used across strata components.

pub mod simd;
pub mod varint;
