//! Dense vector indexing.
//!
//! # Module Structure
//!
//! - `distance`: similarity metrics and index optimization modes
//! - `index`: flat and IVF indexes with id selectors
//! - `quantization`: 8-bit scalar quantizer for memory-efficient indexes
//! - `cache`: EWMA-evicted cache of decoded field indexes
//! - `posting`: per-document search hits
//! - `section`: the vector section (build, persist, search, merge)

pub mod cache;
pub mod distance;
pub mod index;
pub mod posting;
pub mod quantization;
pub mod section;

pub use self::cache::{CacheHandle, VectorIndexCache};
pub use self::distance::{IndexOptimization, VectorMetric};
pub use self::index::{IdSelector, Neighbor, VectorIndex};
pub use self::posting::{VecPosting, VecPostingsList};
pub use self::section::{VectorFieldData, VectorSearchParams, VectorSection};
