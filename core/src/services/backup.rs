//! Backup service
//!
//! Creates consistent snapshots of the database and the emergency document store.
//! Packages backups as ZIP files with manifest and checksums.
//! All backups are encrypted with AES-256-GCM.

use crate::config::{DATABASE_FILE, DEFAULT_BACKUP_RETENTION_COUNT, MAX_BACKUP_RETENTION_COUNT};
use crate::crypto;
use crate::database::{Backup, Repository};
use crate::error::{AppError, Result};
use crate::storage::DocumentStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use zip::write::FileOptions;
use zip::ZipWriter;

const MANIFEST_FILE: &str = "manifest.json";
const DOCUMENTS_PREFIX: &str = "documents";

/// Setting key holding the number of backup files to keep
pub const RETENTION_SETTING: &str = "backup_retention_count";

/// Backup manifest structure
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: String,
    pub timestamp: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub checksum: String,
}

/// Backup service
#[derive(Clone)]
pub struct BackupService {
    repo: Repository,
    documents: DocumentStore,
    app_data_dir: PathBuf,
    backups_dir: PathBuf,
}

impl BackupService {
    pub fn new(repo: Repository, documents: DocumentStore, app_data_dir: PathBuf) -> Self {
        let backups_dir = app_data_dir.join("backups");
        Self {
            repo,
            documents,
            app_data_dir,
            backups_dir,
        }
    }

    pub fn get_backup_directory(&self) -> &Path {
        &self.backups_dir
    }

    /// Create an encrypted backup
    pub async fn create_backup(&self, password: &str) -> Result<PathBuf> {
        if password.is_empty() {
            return Err(AppError::Backup("Backup password must not be empty".to_string()));
        }

        tracing::info!("Creating encrypted backup");

        fs::create_dir_all(&self.backups_dir).await?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let backup_path = self.backups_dir.join(format!("backup_{}.enc", stamp));

        let mut manifest = BackupManifest {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            files: Vec::new(),
        };

        // Fold the WAL into the main file so the copy below is complete
        self.repo.checkpoint().await?;

        let mut entries: Vec<(String, Vec<u8>)> = Vec::new();

        let db_path = self.app_data_dir.join(DATABASE_FILE);
        if fs::try_exists(&db_path).await? {
            entries.push((DATABASE_FILE.to_string(), fs::read(&db_path).await?));
        }

        let hashes = self.documents.list_all().await?;
        for hash in &hashes {
            let data = self.documents.get(hash).await?;
            entries.push((document_archive_path(hash), data));
        }

        tracing::debug!("Collected database and {} documents", hashes.len());

        for (path, data) in &entries {
            manifest.files.push(FileEntry {
                path: path.clone(),
                size: data.len() as u64,
                checksum: calculate_checksum(data),
            });
        }

        let manifest_json = serde_json::to_string_pretty(&manifest)?;
        let manifest_checksum = calculate_checksum(manifest_json.as_bytes());

        let zip_data = build_archive(&entries, &manifest_json)?;

        tracing::info!("ZIP archive built ({} bytes), encrypting...", zip_data.len());

        let encrypted = crypto::encrypt(&zip_data, password)?;
        let encrypted_json = serde_json::to_vec(&encrypted)?;

        // Same write-then-rename as the document store
        let temp_path = backup_path.with_extension("enc.tmp");
        fs::write(&temp_path, &encrypted_json).await?;
        fs::rename(&temp_path, &backup_path).await?;

        let size = fs::metadata(&backup_path).await?.len() as i64;

        self.repo
            .record_backup(backup_path.to_string_lossy().as_ref(), size, &manifest_checksum)
            .await?;

        tracing::info!("Backup created: {:?} ({} bytes)", backup_path, size);

        self.apply_retention_policy().await?;

        Ok(backup_path)
    }

    /// Keep only the newest N backup files. Records stay for history.
    async fn apply_retention_policy(&self) -> Result<()> {
        let retention_count = self.get_retention_count().await?;

        // list_backups is already newest first
        let backups = self.repo.list_backups().await?;

        for backup in backups.iter().skip(retention_count) {
            if !Path::new(&backup.path).exists() {
                continue;
            }

            tracing::info!("Deleting old backup: {}", backup.path);
            if let Err(e) = fs::remove_file(&backup.path).await {
                tracing::warn!("Failed to delete backup file {}: {}", backup.path, e);
            }
        }

        Ok(())
    }

    async fn get_retention_count(&self) -> Result<usize> {
        match self.repo.get_setting(RETENTION_SETTING).await? {
            Some(value) => value
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| AppError::InvalidSettings(format!("Invalid retention count: {}", value))),
            None => Ok(DEFAULT_BACKUP_RETENTION_COUNT),
        }
    }

    pub async fn set_retention_count(&self, count: usize) -> Result<()> {
        if count == 0 || count > MAX_BACKUP_RETENTION_COUNT {
            return Err(AppError::InvalidSettings(format!(
                "Retention count must be between 1 and {}",
                MAX_BACKUP_RETENTION_COUNT
            )));
        }
        self.repo.set_setting(RETENTION_SETTING, &count.to_string()).await
    }

    /// List recorded backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<Backup>> {
        self.repo.list_backups().await
    }

    /// Restore from an encrypted backup.
    ///
    /// Every file is checksummed before anything on disk is touched. The
    /// running services keep their in-memory state; reopen the app state
    /// afterwards to pick up the restored data.
    pub async fn restore_backup(&self, backup_path: &Path, password: &str) -> Result<()> {
        tracing::info!("Restoring from backup: {:?}", backup_path);

        let encrypted_data = fs::read(backup_path).await?;
        let encrypted: crypto::EncryptedData = serde_json::from_slice(&encrypted_data)
            .map_err(|e| AppError::Restore(format!("Invalid backup file format: {}", e)))?;

        let zip_data = crypto::decrypt(&encrypted, password)?;

        let (manifest, files) = read_archive(zip_data)?;

        tracing::info!(
            "Backup version: {}, timestamp: {}, files: {}",
            manifest.version,
            manifest.timestamp,
            manifest.files.len()
        );

        let temp_restore_dir = self
            .backups_dir
            .join(format!("restore_temp_{}", Utc::now().timestamp_millis()));
        fs::create_dir_all(&temp_restore_dir).await?;

        for (path, contents) in &files {
            let temp_file_path = temp_restore_dir.join(path);
            if let Some(parent) = temp_file_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&temp_file_path, contents).await?;
        }

        tracing::info!("All files verified successfully, performing swap...");

        let backup_suffix = format!("_backup_{}", Utc::now().timestamp_millis());

        self.repo.checkpoint().await?;

        let db_path = self.app_data_dir.join(DATABASE_FILE);
        let db_backup_path = self
            .app_data_dir
            .join(format!("{}{}", DATABASE_FILE, backup_suffix));
        let restored_db_path = temp_restore_dir.join(DATABASE_FILE);

        if fs::try_exists(&restored_db_path).await? {
            if fs::try_exists(&db_path).await? {
                fs::rename(&db_path, &db_backup_path).await?;
            }
            fs::rename(&restored_db_path, &db_path).await?;
            remove_sidecar_files(&db_path).await;
            tracing::info!("Database restored");
        }

        let documents_dir = self.documents.root().to_path_buf();
        let documents_backup_dir = self
            .app_data_dir
            .join(format!("{}{}", DOCUMENTS_PREFIX, backup_suffix));
        let restored_documents_dir = temp_restore_dir.join(DOCUMENTS_PREFIX);

        if fs::try_exists(&documents_dir).await? {
            fs::rename(&documents_dir, &documents_backup_dir).await?;
        }

        if fs::try_exists(&restored_documents_dir).await? {
            fs::rename(&restored_documents_dir, &documents_dir).await?;
            tracing::info!("Documents restored");
        } else {
            fs::create_dir_all(&documents_dir).await?;
        }

        let _ = fs::remove_dir_all(&temp_restore_dir).await;

        // Keep the replaced data around briefly in case the restore gets inspected
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
            let _ = fs::remove_file(&db_backup_path).await;
            let _ = fs::remove_dir_all(&documents_backup_dir).await;
        });

        tracing::info!("Restore completed successfully");

        Ok(())
    }
}

fn document_archive_path(hash: &str) -> String {
    format!("{}/{}/{}/{}", DOCUMENTS_PREFIX, &hash[0..2], &hash[2..4], hash)
}

fn build_archive(entries: &[(String, Vec<u8>)], manifest_json: &str) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options =
        FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

    for (path, data) in entries {
        zip.start_file(path.as_str(), options)?;
        std::io::Write::write_all(&mut zip, data)?;
    }

    zip.start_file(MANIFEST_FILE, options)?;
    std::io::Write::write_all(&mut zip, manifest_json.as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

/// Read the manifest and every listed file, verifying checksums
fn read_archive(zip_data: Vec<u8>) -> Result<(BackupManifest, Vec<(PathBuf, Vec<u8>)>)> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data))?;

    let manifest = {
        let mut manifest_file = archive.by_name(MANIFEST_FILE)?;
        let mut manifest_data = String::new();
        std::io::Read::read_to_string(&mut manifest_file, &mut manifest_data)?;
        serde_json::from_str::<BackupManifest>(&manifest_data)?
    };

    let mut files = Vec::with_capacity(manifest.files.len());

    for entry in &manifest.files {
        if entry.path == MANIFEST_FILE {
            continue;
        }

        let relative = safe_relative_path(&entry.path)
            .ok_or_else(|| AppError::Restore(format!("Unsafe path in backup: {}", entry.path)))?;

        let contents = {
            let mut file = archive.by_name(&entry.path)?;
            let mut contents = Vec::new();
            std::io::Read::read_to_end(&mut file, &mut contents)?;
            contents
        };

        let actual_checksum = calculate_checksum(&contents);
        if actual_checksum != entry.checksum {
            return Err(AppError::Restore(format!(
                "Checksum mismatch for {}: expected {}, got {}",
                entry.path, entry.checksum, actual_checksum
            )));
        }

        tracing::debug!("Verified: {}", entry.path);
        files.push((relative, contents));
    }

    Ok((manifest, files))
}

/// Only plain relative components are allowed inside an archive
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    let plain = candidate
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    (plain && !path.is_empty()).then(|| candidate.to_path_buf())
}

/// Stale WAL/SHM files would be replayed over the restored database
async fn remove_sidecar_files(db_path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = db_path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = fs::remove_file(PathBuf::from(sidecar)).await;
    }
}

fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
