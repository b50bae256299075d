//! Simple in-memory storage type

use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tonic::{async_trait, Code, Status};
use tracing::info;

use crate::build::bazel::remote::execution::v2::Digest;

use super::{Result, StorageBackend, StorageBackendInstance};

struct MemoryStorageInner {
    memory_used: usize,
    memory_limit: usize,
    data: LruCache<Digest, Arc<[u8]>>,
}

pub struct MemoryStorage {
    content: Arc<Mutex<MemoryStorageInner>>,
}

const SIZE_DIGEST: usize = 40; /* sha256 + i64 */

impl MemoryStorage {
    pub fn instantiate(memory_limit: usize) -> StorageBackendInstance {
        let empty_digest = Digest {
            hash: sha256::digest(&b""[..]),
            size_bytes: 0,
        };
        // Preload the empty blob because Bazel assumes we always have it.
        let mut base_map = LruCache::unbounded();
        base_map.put(empty_digest, vec![].into());
        Arc::new(Self {
            content: Arc::new(Mutex::new(MemoryStorageInner {
                memory_used: SIZE_DIGEST,
                memory_limit,
                data: base_map,
            })),
        }) as StorageBackendInstance
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put_blob(&self, digest: &Digest, data: Vec<u8>) -> Result<()> {
        if data.len() as i64 != digest.size_bytes {
            return Err(Status::new(
                Code::InvalidArgument,
                "data does not match digest size",
            ));
        }
        if sha256::digest(data.as_slice()) != digest.hash {
            return Err(Status::new(
                Code::InvalidArgument,
                "digest inconsistency detected",
            ));
        }
        let data_len = data.len();
        let mut inner = self.content.lock().await;
        while inner.memory_limit < inner.memory_used + data_len {
            // Evict one item from the cache
            if inner.data.len() == 1 {
                return Err(Status::resource_exhausted("blob too large for cache"));
            }
            if let Some((digest, body)) = inner.data.pop_lru() {
                if body.is_empty() {
                    // Empty digest, reinsert
                    inner.data.put(digest, body);
                } else {
                    info!(
                        "Evicting {}/{} for LRU reasons",
                        digest.hash, digest.size_bytes
                    );
                    inner.memory_used -= SIZE_DIGEST + body.len();
                }
            }
        }
        if let Some(old) = inner.data.put(digest.clone(), data.into()) {
            inner.memory_used -= SIZE_DIGEST + old.len();
        }
        inner.memory_used += SIZE_DIGEST + data_len;
        Ok(())
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.content
            .lock()
            .await
            .data
            .get(digest)
            .map(|data| data.to_vec())
            .ok_or_else(|| Status::new(Code::NotFound, "not found"))
    }

    async fn contains(&self, digest: &Digest) -> Result<bool> {
        Ok(self.content.lock().await.data.get(digest).is_some())
    }
}

#[cfg(test)]
mod test {
    use crate::build::bazel::remote::execution::v2::Digest;

    use super::super::Result;
    use super::MemoryStorage;

    const MEGABYTE: usize = 1024 * 1024;

    fn hello_digest() -> Digest {
        Digest {
            hash: sha256::digest(&b"hello"[..]),
            size_bytes: 5,
        }
    }

    #[tokio::test]
    async fn new_storage_has_empty_digest() -> Result<()> {
        let memory = MemoryStorage::instantiate(MEGABYTE);
        let empty_digest = Digest {
            hash: sha256::digest(&b""[..]),
            size_bytes: 0,
        };
        assert!(memory.contains(&empty_digest).await?);
        Ok(())
    }

    #[tokio::test]
    async fn new_storage_doesnt_have_data() -> Result<()> {
        let memory = MemoryStorage::instantiate(MEGABYTE);
        assert!(!memory.contains(&hello_digest()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn can_insert_and_retrieve_data() -> Result<()> {
        let memory = MemoryStorage::instantiate(MEGABYTE);
        let digest = hello_digest();
        memory.put_blob(&digest, b"hello".to_vec()).await?;
        assert!(memory.contains(&digest).await?);
        assert_eq!(memory.get_blob(&digest).await?, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn inconsistent_digest_is_rejected() -> Result<()> {
        let memory = MemoryStorage::instantiate(MEGABYTE);
        let digest = hello_digest();
        assert!(memory.put_blob(&digest, b"olleh".to_vec()).await.is_err());
        assert!(memory.put_blob(&digest, b"hell".to_vec()).await.is_err());
        assert!(!memory.contains(&digest).await?);
        Ok(())
    }

    #[tokio::test]
    async fn old_blobs_are_evicted_under_pressure() -> Result<()> {
        // Room for the empty blob plus two of the three inserts.
        let memory = MemoryStorage::instantiate(130);
        for data in [b"first".to_vec(), b"secnd".to_vec(), b"third".to_vec()] {
            let digest = Digest {
                hash: sha256::digest(data.as_slice()),
                size_bytes: data.len() as i64,
            };
            memory.put_blob(&digest, data).await?;
        }
        let first_digest = Digest {
            hash: sha256::digest(&b"first"[..]),
            size_bytes: 5,
        };
        let third_digest = Digest {
            hash: sha256::digest(&b"third"[..]),
            size_bytes: 5,
        };
        assert!(!memory.contains(&first_digest).await?);
        assert!(memory.contains(&third_digest).await?);
        Ok(())
    }
}
