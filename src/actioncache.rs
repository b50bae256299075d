//! Action cache abstraction
//!
//! Maps action digests to ActionResults. A NOT_FOUND status from
//! `get_action_result` is the miss signal; callers above the asset layer
//! treat it as "not cached".

use tonic::{async_trait, Status};

use crate::build::bazel::remote::execution::v2::{ActionResult, Digest};

type Result<T, E = Status> = std::result::Result<T, E>;

#[async_trait]
pub trait ActionCacheStorage: Send + Sync {
    async fn get_action_result(&self, digest: &Digest) -> Result<ActionResult>;

    async fn update_action_result(
        &self,
        digest: &Digest,
        action_result: ActionResult,
    ) -> Result<ActionResult>;
}

pub type ActionCacheStorageInstance = Box<dyn ActionCacheStorage>;

pub mod disk;
pub mod memory;

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[tokio::test]
    async fn store_retrieve_action() -> Result<()> {
        let storage = MemoryStorage::instantiate(1024 * 1024);
        let action_storage = memory::MemoryActionStorage::instantiate(storage);
        let action_digest = Digest {
            hash: sha256::digest(&b"some action"[..]),
            size_bytes: 11,
        };
        let stored_result = action_storage
            .update_action_result(&action_digest, ActionResult::default())
            .await?;
        let retrieved_result = action_storage.get_action_result(&action_digest).await?;
        assert_eq!(stored_result, retrieved_result);
        Ok(())
    }

    #[tokio::test]
    async fn missing_action_is_not_found() -> Result<()> {
        let storage = MemoryStorage::instantiate(1024 * 1024);
        let action_storage = memory::MemoryActionStorage::instantiate(storage);
        let action_digest = Digest {
            hash: sha256::digest(&b"unknown action"[..]),
            size_bytes: 14,
        };
        let err = action_storage
            .get_action_result(&action_digest)
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
        Ok(())
    }
}
