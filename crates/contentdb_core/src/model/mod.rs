//! Content model declarations, descriptors and the model registry.
//!
//! # Responsibility
//! - Define the typed shape of models and attributes.
//! - Merge models from application, admin and plugin sources into one
//!   uid-addressable registry.
//!
//! # Invariants
//! - Every model is identified by a stable, lower-case `uid`.
//! - Descriptors are shared as `Arc<ModelDescriptor>` and never mutated after
//!   registration.

pub mod attribute;
pub mod constants;
pub mod descriptor;
pub mod registry;
pub mod sources;
