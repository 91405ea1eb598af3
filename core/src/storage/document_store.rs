//! Content-addressed document storage
//!
//! Files are keyed by the SHA-256 of their content, so storing the same
//! scan twice keeps one copy. Layout uses two levels of hash prefixes:
//! hash "abcd1234..." lives at "documents/ab/cd/abcd1234...".

use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root directory if needed
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Document store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Store bytes and return their content hash
    pub async fn put(&self, data: &[u8]) -> Result<String> {
        let hash = content_hash(data);
        let path = self.path_for(&hash)?;

        if fs::try_exists(&path).await? {
            tracing::debug!("Document already stored: {}", hash);
            return Ok(hash);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crash never leaves a truncated file under the final name
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &path).await?;

        tracing::debug!("Stored document: {} ({} bytes)", hash, data.len());

        Ok(hash)
    }

    pub async fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash)?;

        if !fs::try_exists(&path).await? {
            return Err(AppError::DocumentStore(format!("Document not found: {}", hash)));
        }

        Ok(fs::read(&path).await?)
    }

    pub async fn contains(&self, hash: &str) -> Result<bool> {
        match self.path_for(hash) {
            Ok(path) => Ok(fs::try_exists(&path).await?),
            Err(_) => Ok(false),
        }
    }

    /// Remove stored bytes; missing hashes are ignored
    pub async fn remove(&self, hash: &str) -> Result<()> {
        let path = self.path_for(hash)?;

        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
            tracing::debug!("Removed document: {}", hash);
        }

        Ok(())
    }

    /// Every stored hash, for backups
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut hashes = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            if !fs::try_exists(&dir).await? {
                continue;
            }

            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if is_hash(name) {
                        hashes.push(name.to_string());
                    }
                }
            }
        }

        Ok(hashes)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &str) -> Result<PathBuf> {
        if !is_hash(hash) {
            return Err(AppError::DocumentStore(format!("Invalid document hash: {}", hash)));
        }
        Ok(self.root.join(&hash[0..2]).join(&hash[2..4]).join(hash))
    }
}

fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn is_hash(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
