#![doc = "tis-extract-core: traversal and extraction engine for TIS artifact trees."]

//! This crate walks the TIS component tree breadth-first, prunes irrelevant
//! branches, extracts metadata from the artifacts it finds and checks them
//! against naming and path conventions.
//!
//! # Usage
//! Build an [`ExtractorConfig`], wrap an [`http::HttpTreeApi`] (or any other
//! [`contract::TreeApi`]) in an `Arc` and hand both to
//! [`Traversal::from_config`]. [`Traversal::run`] returns the per project and
//! software line result model with the latest artifact of every line.

pub mod aggregate;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod extract;
pub mod filter;
pub mod http;
pub mod model;
pub mod registry;
pub mod stats;
pub mod timestamps;
pub mod traverse;
pub mod validate;

pub use aggregate::{ResultModel, ResultSnapshot};
pub use checkpoint::Checkpoint;
pub use config::ExtractorConfig;
pub use error::{FetchError, TraversalError};
pub use model::{ArtifactRecord, Deviation, DeviationType};
pub use traverse::{RunState, Traversal, TraversalHandle, TraversalOutcome};
