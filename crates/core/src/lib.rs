//! Shared domain types for the ArtTic image generation server.
//!
//! This crate has no internal dependencies. It defines model families and
//! descriptors, the mode capability table, generation request validation,
//! resolution presets, the on-disk model catalog, and the read-only
//! pipeline status snapshot passed between the worker and the API.

pub mod capability;
pub mod catalog;
pub mod error;
pub mod generation;
pub mod messages;
pub mod model;
pub mod resolution;
pub mod status;
pub mod types;
