//! # freight-blobstore
//!
//! Client library for the freight platform's HTTP blob store.
//!
//! The blob store is plain HTTP: objects are written with PUT to a fully
//! specified URL and read back with GET. Keys are either stable identifiers
//! or content digests; identical content always resolves to the same URL,
//! so re-writing an object that already exists is a harmless no-op.
//!
//! ## Modules
//!
//! - `client`: PUT/GET client with dial-level retry
//! - `digest`: content addressing (SHA-512 hex)

pub mod client;
pub mod digest;

pub use client::{BlobClient, RetryPolicy, StoreError};
pub use digest::{sha512_hex, sha512_hex_file};
