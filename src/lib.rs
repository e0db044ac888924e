//! # Strata
//!
//! Immutable, memory-mapped index segments.
//!
//! A segment is written once by [`SegmentBuilder`] (or by [`MergeEngine`]
//! from existing segments) and never modified. It carries:
//!
//! - stored fields, addressed by document number
//! - an inverted text section: FST term dictionaries, chunked postings and
//!   doc values
//! - a vector section: flat or IVF nearest-neighbour indexes
//! - a synonym section: per-field thesauri
//! - a footer with a CRC over the whole file
//!
//! Sections are pluggable through [`section::Section`] and an explicit
//! [`section::SectionRegistry`].

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod lexical;
pub mod merge;
pub mod section;
pub mod segment;
pub mod storage;
pub mod synonym;
pub mod util;
pub mod vector;

pub use config::{ChunkMode, SegmentConfig, VectorCacheConfig, VectorIndexConfig};
pub use document::{Document, Field, FieldOptions, IndexDocument, SynonymDefinition, TokenFreq, TokenLocation, VectorPayload};
pub use error::{Result, StrataError};
pub use merge::{CancelSignal, MergeEngine, MergeResult, MergeStats};
pub use segment::{BuildOutcome, Segment, SegmentBuilder};
pub use vector::{IndexOptimization, VectorMetric, VectorSearchParams};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
