//! # freight-receive
//!
//! Converts a pulled container image into an immutable, content-addressed
//! artifact record for the freight platform.
//!
//! ## Pipeline
//!
//! ```text
//! pull image → per layer: cache lookup → (hit | package + commit)
//!            → assemble manifest → upload manifest → register artifact
//! ```
//!
//! Every reference in the output is a content-addressed URL, so downstream
//! consumers verify integrity by rehashing fetched bytes. Re-running the
//! pipeline for an unchanged image converts nothing and produces
//! byte-identical manifest bytes.
//!
//! ## Modules
//!
//! - `source`: image source boundary and OCI registry implementation
//! - `convert`: layer packaging boundary and squashfs implementation
//! - `layer`: layer cache over the blob store (two-phase commit)
//! - `builder`: per-layer orchestration into an image manifest
//! - `publisher`: manifest upload and artifact registration
//! - `controller`: control plane API client
//! - `manifest`: artifact data model

pub mod builder;
pub mod config;
pub mod controller;
pub mod convert;
pub mod layer;
pub mod manifest;
pub mod publisher;
pub mod source;
