use super::{BlobError, BlobStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory store for tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, Option<String>)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().expect("blob mutex poisoned");
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn object(&self, key: &str) -> Option<(Vec<u8>, Option<String>)> {
        self.objects
            .lock()
            .expect("blob mutex poisoned")
            .get(key)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.objects
            .lock()
            .expect("blob mutex poisoned")
            .insert(key.to_string(), (body, content_type.map(String::from)));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self
            .objects
            .lock()
            .expect("blob mutex poisoned")
            .contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self
            .objects
            .lock()
            .expect("blob mutex poisoned")
            .remove(key)
            .is_some())
    }
}
