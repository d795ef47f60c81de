//! Workflow domain module.
//!
//! A workflow is one remote submission, possibly holding several parallel
//! jobs. This module contains its status model and the record a session keeps
//! for each workflow it launched.
//!
//! # Module Structure
//!
//! - `model`: `WorkflowStatus`, `WorkflowRecord`, `OutputDescriptor`
//!   and the `WorkflowUpdate` delta produced by status refreshes

mod model;

pub use model::{OutputDescriptor, WorkflowRecord, WorkflowStatus, WorkflowUpdate};
