//! Error types for LifeNest
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to whatever shell embeds the core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Note not found: {0}")]
    NoteNotFound(String),

    #[error("Note is locked: {0}")]
    NoteLocked(String),

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Restore error: {0}")]
    Restore(String),

    #[error("Document store error: {0}")]
    DocumentStore(String),

    #[error("{0}")]
    Generic(String),
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
