//! Storage module
//!
//! Content-addressed file storage for emergency documents.

pub mod document_store;

pub use document_store::DocumentStore;
