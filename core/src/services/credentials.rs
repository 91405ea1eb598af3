/// Credential Manager Service
/// Secure storage for the auto-backup password in the OS credential store
use crate::error::{AppError, Result};
use keyring::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SERVICE_NAME: &str = "LifeNest";
const AUTO_BACKUP_PASSWORD_KEY: &str = "auto_backup_password";

/// Where secrets live. The OS keyring in production, memory in tests.
pub trait SecretStore: Send + Sync {
    fn set(&self, key: &str, secret: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn delete(&self, key: &str) -> Result<()>;
}

pub struct KeyringSecretStore;

impl KeyringSecretStore {
    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key)
            .map_err(|e| AppError::Backup(format!("Failed to create keyring entry: {}", e)))
    }
}

impl SecretStore for KeyringSecretStore {
    fn set(&self, key: &str, secret: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(secret)
            .map_err(|e| AppError::Backup(format!("Failed to store password: {}", e)))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AppError::Backup(format!("Failed to retrieve password: {}", e))),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AppError::Backup(format!("Failed to delete password: {}", e))),
        }
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn secrets(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.secrets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SecretStore for MemorySecretStore {
    fn set(&self, key: &str, secret: &str) -> Result<()> {
        self.secrets().insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.secrets().remove(key);
        Ok(())
    }
}

/// Credential manager for secure password storage
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<dyn SecretStore>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Backed by the OS credential store
    pub fn system() -> Self {
        Self::new(Arc::new(KeyringSecretStore))
    }

    pub fn store_auto_backup_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(AppError::Backup("Backup password must not be empty".to_string()));
        }
        self.store.set(AUTO_BACKUP_PASSWORD_KEY, password)?;
        tracing::info!("Auto-backup password stored in credential manager");
        Ok(())
    }

    pub fn get_auto_backup_password(&self) -> Result<String> {
        self.store
            .get(AUTO_BACKUP_PASSWORD_KEY)?
            .ok_or_else(|| AppError::Backup("Auto-backup password not set".to_string()))
    }

    pub fn delete_auto_backup_password(&self) -> Result<()> {
        self.store.delete(AUTO_BACKUP_PASSWORD_KEY)?;
        tracing::info!("Auto-backup password deleted from credential manager");
        Ok(())
    }

    pub fn has_auto_backup_password(&self) -> bool {
        matches!(self.store.get(AUTO_BACKUP_PASSWORD_KEY), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_lifecycle() {
        let credentials = CredentialManager::new(Arc::new(MemorySecretStore::new()));

        assert!(!credentials.has_auto_backup_password());
        assert!(credentials.get_auto_backup_password().is_err());

        credentials.store_auto_backup_password("s3cret").unwrap();
        assert!(credentials.has_auto_backup_password());
        assert_eq!(credentials.get_auto_backup_password().unwrap(), "s3cret");

        credentials.delete_auto_backup_password().unwrap();
        credentials.delete_auto_backup_password().unwrap();
        assert!(!credentials.has_auto_backup_password());
    }

    #[test]
    fn test_empty_password_rejected() {
        let credentials = CredentialManager::new(Arc::new(MemorySecretStore::new()));

        assert!(credentials.store_auto_backup_password("").is_err());
        assert!(!credentials.has_auto_backup_password());
    }
}
