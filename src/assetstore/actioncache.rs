//! Asset store backed by an action cache
//!
//! References are encoded as synthetic Actions (see the reference module)
//! and the mapping itself is stored as an ActionResult under the Action's
//! digest. Every message the ActionResult chain points at is written to the
//! CAS first, so a validating action cache will accept the entry as
//! referentially complete.

use std::sync::Arc;

use prost::Message;
use tonic::{async_trait, Status};
use tracing::debug;

use crate::{
    actioncache::ActionCacheStorageInstance,
    asset::{asset::AssetType, Asset, AssetReference},
    build::bazel::remote::execution::v2::{
        ActionResult, ExecutedActionMetadata, OutputDirectory, OutputFile,
    },
    instance::InstanceName,
    reference::{encode_asset_reference, unix_epoch_timestamp},
    storage::{StorageBackendExt, StorageBackendInstance},
};

use super::{AssetStore, AssetStoreInstance, Result};

/// Path given to the single output carrying the asset digest.
const OUTPUT_PATH: &str = "out";

pub struct ActionCacheAssetStore {
    action_cache: ActionCacheStorageInstance,
    storage: StorageBackendInstance,
    maximum_message_size_bytes: usize,
}

impl ActionCacheAssetStore {
    pub fn instantiate(
        action_cache: ActionCacheStorageInstance,
        storage: StorageBackendInstance,
        maximum_message_size_bytes: usize,
    ) -> AssetStoreInstance {
        Arc::new(Self {
            action_cache,
            storage,
            maximum_message_size_bytes,
        }) as AssetStoreInstance
    }

    /// Decode the Asset back out of an ActionResult. A directory output named
    /// "out" wins over a file output of the same name; an entry with neither
    /// is a decoding failure, which is distinct from a cache miss.
    fn action_result_to_asset(action_result: &ActionResult) -> Result<Asset> {
        let directory_digest = action_result
            .output_directories
            .iter()
            .find(|directory| directory.path == OUTPUT_PATH)
            .and_then(|directory| directory.root_directory_digest.as_ref())
            .filter(|digest| !digest.hash.is_empty());
        let (digest, asset_type) = match directory_digest {
            Some(digest) => (digest.clone(), AssetType::Directory),
            None => {
                let file_digest = action_result
                    .output_files
                    .iter()
                    .find(|file| file.path == OUTPUT_PATH)
                    .and_then(|file| file.digest.as_ref())
                    .filter(|digest| !digest.hash.is_empty());
                match file_digest {
                    Some(digest) => (digest.clone(), AssetType::Blob),
                    None => {
                        return Err(Status::internal(
                            "could not find an output digest (either directory or blob) in the action result",
                        ))
                    }
                }
            }
        };
        Ok(Asset {
            digest: Some(digest),
            // The action cache has no native expiry; entries read back out
            // of it never expire.
            expire_at: Some(unix_epoch_timestamp()),
            last_updated: action_result
                .execution_metadata
                .as_ref()
                .and_then(|metadata| metadata.queued_timestamp.clone()),
            r#type: asset_type as i32,
        })
    }
}

#[async_trait]
impl AssetStore for ActionCacheAssetStore {
    async fn get(
        &self,
        reference: &AssetReference,
        _instance_name: &InstanceName,
    ) -> Result<Asset> {
        let action_digest = encode_asset_reference(reference).action_digest();
        let action_result = self.action_cache.get_action_result(&action_digest).await?;
        if action_result.encoded_len() > self.maximum_message_size_bytes {
            return Err(Status::resource_exhausted(format!(
                "action result of {} bytes exceeds maximum message size of {} bytes",
                action_result.encoded_len(),
                self.maximum_message_size_bytes
            )));
        }
        Self::action_result_to_asset(&action_result)
    }

    async fn put(
        &self,
        reference: &AssetReference,
        data: &Asset,
        _instance_name: &InstanceName,
    ) -> Result<()> {
        let encoded = encode_asset_reference(reference);
        // Everything the cache entry points at must be in the CAS before
        // the ActionResult becomes visible.
        self.storage
            .store_message(&encoded.qualifier_reference)
            .await?;
        self.storage.store_message(&encoded.directory).await?;
        self.storage.store_message(&encoded.action).await?;
        self.storage.store_message(&encoded.command).await?;

        let mut action_result = ActionResult {
            execution_metadata: Some(ExecutedActionMetadata {
                queued_timestamp: data.last_updated.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };
        match AssetType::from_i32(data.r#type) {
            Some(AssetType::Directory) => {
                action_result.output_directories = vec![OutputDirectory {
                    path: OUTPUT_PATH.to_string(),
                    root_directory_digest: data.digest.clone(),
                    ..Default::default()
                }];
            }
            Some(AssetType::Blob) => {
                action_result.output_files = vec![OutputFile {
                    path: OUTPUT_PATH.to_string(),
                    digest: data.digest.clone(),
                    ..Default::default()
                }];
            }
            None => {
                return Err(Status::invalid_argument(format!(
                    "unknown asset type {}",
                    data.r#type
                )))
            }
        }

        let action_digest = encoded.action_digest();
        debug!(
            "Caching asset reference as action {}/{}",
            action_digest.hash, action_digest.size_bytes
        );
        self.action_cache
            .update_action_result(&action_digest, action_result)
            .await?;
        Ok(())
    }
}
