//! Storage for CAS blobs
//!
//! The asset layer never streams blob content; it only reads and writes the
//! small protobuf messages making up encoded asset references. The backend
//! interface is therefore whole-blob put/get keyed by digest.

use std::sync::Arc;

use prost::Message;
use tonic::{async_trait, Status};

use crate::build::bazel::remote::execution::v2::Digest;

type Result<T, E = Status> = std::result::Result<T, E>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn put_blob(&self, digest: &Digest, data: Vec<u8>) -> Result<()>;

    async fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>>;

    async fn contains(&self, digest: &Digest) -> Result<bool>;
}

pub type StorageBackendInstance = Arc<dyn StorageBackend>;

/// Message-level convenience on top of any backend.
#[async_trait]
pub trait StorageBackendExt {
    /// Serialize a message and store it under its content digest.
    async fn store_message<M: Message>(&self, message: &M) -> Result<Digest>;

    async fn get_message<M: Message + Default>(&self, digest: &Digest) -> Result<M>;
}

#[async_trait]
impl<S: StorageBackend + ?Sized> StorageBackendExt for S {
    async fn store_message<M: Message>(&self, message: &M) -> Result<Digest> {
        let data = message.encode_to_vec();
        let digest = Digest {
            hash: sha256::digest(data.as_slice()),
            size_bytes: data.len() as i64,
        };
        self.put_blob(&digest, data).await?;
        Ok(digest)
    }

    async fn get_message<M: Message + Default>(&self, digest: &Digest) -> Result<M> {
        let data = self.get_blob(digest).await?;
        M::decode(&data[..]).map_err(|e| {
            Status::internal(format!(
                "{}/{} does not decode: {:?}",
                digest.hash, digest.size_bytes, e
            ))
        })
    }
}

pub mod disk;
pub mod memory;

#[cfg(test)]
mod test {
    use tonic::Code;

    use super::*;
    use crate::build::bazel::remote::execution::v2::Directory;

    #[tokio::test]
    async fn store_retrieve_message() -> Result<()> {
        let storage = memory::MemoryStorage::instantiate(1024 * 1024);
        let directory = Directory::default();
        let digest = storage.store_message(&directory).await?;
        assert!(storage.contains(&digest).await?);
        let retrieved: Directory = storage.get_message(&digest).await?;
        assert_eq!(directory, retrieved);
        Ok(())
    }

    #[tokio::test]
    async fn missing_message_is_not_found() -> Result<()> {
        let storage = memory::MemoryStorage::instantiate(1024 * 1024);
        let digest = Digest {
            hash: sha256::digest(&b"hello"[..]),
            size_bytes: 5,
        };
        let err = storage.get_message::<Directory>(&digest).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        Ok(())
    }
}
