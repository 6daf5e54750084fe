//! Shieldgate List Compiler
//!
//! This crate turns the externally delivered blobs into their compiled
//! forms: EasyList-style filter lists into [`sg_core::FilterRuleSet`]s, JSON
//! resource manifests into a [`ResourceLibrary`], and the tracker
//! relationship table into a [`TrackerTable`].

pub mod parser;
pub mod resources;
pub mod trackers;

pub use parser::{compile_filter_list, parse_filter_list, ParseError, ParsedList};
pub use resources::{ResourceError, ResourceLibrary};
pub use trackers::{TrackerTable, TrackerTableError};
