use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::defs::{BlobStore, CapabilityError, SecretStore};

/// Process-local key/value map backing both capability traits.
#[derive(Debug, Default)]
struct MemoryMap {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryMap {
    fn get(&self, capability: &'static str, key: &str) -> Result<Vec<u8>, CapabilityError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CapabilityError::unavailable(capability, "lock poisoned"))?;
        entries.get(key).cloned().ok_or_else(|| CapabilityError::not_found(capability, key))
    }

    fn put(&self, capability: &'static str, key: &str, value: &[u8]) -> Result<(), CapabilityError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CapabilityError::unavailable(capability, "lock poisoned"))?;
        entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    map: MemoryMap,
}

impl MemorySecretStore {
    pub fn with_secret(self, key: &str, value: &str) -> Self {
        // A fresh map cannot be poisoned.
        let _ = self.map.put("secret store", key, value.as_bytes());
        self
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CapabilityError> {
        self.map.get("secret store", key)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CapabilityError> {
        self.map.put("secret store", key, value)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    map: MemoryMap,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, CapabilityError> {
        self.map.get("blob store", key)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CapabilityError> {
        self.map.put("blob store", key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_secret_round_trip_and_missing_key() {
        let secrets = MemorySecretStore::default().with_secret("RAPID_API_KEY", "abc");
        assert_eq!(secrets.get_string("RAPID_API_KEY").await.unwrap(), "abc");
        assert_eq!(
            secrets.get("OTHER").await,
            Err(CapabilityError::not_found("secret store", "OTHER"))
        );
    }
}
