//! Asset-reference storage
//!
//! An `AssetStore` persists (URI set, qualifier set) → Asset mappings.
//! `GetRequest` and `PutRequest` adapt the multi-URI semantics of the wire
//! protocol onto the single-URI keys of the store: lookups walk the
//! candidate URIs until one sticks, writes fan out so later lookups can hit
//! on any individual URI of a pushed set.

use std::sync::Arc;

use prost_types::Timestamp;
use tonic::{async_trait, Status};

use crate::{
    asset::{asset::AssetType, Asset, AssetReference},
    build::bazel::remote::{asset::v1::Qualifier, execution::v2::Digest},
    instance::InstanceName,
    reference::{
        is_unix_epoch, new_asset, new_asset_reference, now_timestamp, timestamp_before,
    },
};

type Result<T, E = Status> = std::result::Result<T, E>;

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get(&self, reference: &AssetReference, instance_name: &InstanceName)
        -> Result<Asset>;

    async fn put(
        &self,
        reference: &AssetReference,
        data: &Asset,
        instance_name: &InstanceName,
    ) -> Result<()>;
}

pub type AssetStoreInstance = Arc<dyn AssetStore>;

/// A cache lookup over a list of candidate URIs.
pub struct GetRequest {
    pub instance_name: InstanceName,
    pub oldest_content_accepted: Option<Timestamp>,
    pub uris: Vec<String>,
    pub qualifiers: Vec<Qualifier>,
}

impl GetRequest {
    /// Walk the URIs in order and return the first cached entry passing the
    /// expiry and freshness filters, or `None` when nothing matches. Store
    /// errors count as "not here": one unavailable entry must not poison
    /// the lookup.
    pub async fn do_get(
        &self,
        store: &dyn AssetStore,
    ) -> Result<Option<(AssetReference, Digest)>> {
        let now = now_timestamp();
        for uri in &self.uris {
            let reference =
                new_asset_reference(vec![uri.clone()], self.qualifiers.clone());
            let asset = match store.get(&reference, &self.instance_name).await {
                Ok(asset) => asset,
                Err(_) => continue,
            };

            if let Some(expire_at) = &asset.expire_at {
                if !is_unix_epoch(expire_at) && timestamp_before(expire_at, &now) {
                    continue;
                }
            }

            if let Some(oldest) = &self.oldest_content_accepted {
                if !is_unix_epoch(oldest) {
                    let last_updated = asset.last_updated.unwrap_or_default();
                    if timestamp_before(&last_updated, oldest) {
                        continue;
                    }
                }
            }

            if let Some(digest) = asset.digest {
                return Ok(Some((reference, digest)));
            }
        }
        Ok(None)
    }
}

/// A cache write for a URI set.
pub struct PutRequest {
    pub instance_name: InstanceName,
    pub uris: Vec<String>,
    pub qualifiers: Vec<Qualifier>,
    pub expire_at: Option<Timestamp>,
    pub digest: Option<Digest>,
    pub asset_type: AssetType,
}

impl PutRequest {
    /// Write the canonical full-URI-set entry, then one entry per URI when
    /// the set has more than one. Any failure aborts the remainder.
    pub async fn do_put(&self, store: &dyn AssetStore) -> Result<()> {
        if self.uris.is_empty() {
            return Err(Status::invalid_argument("at least one URI is required"));
        }
        let digest = self
            .digest
            .clone()
            .ok_or_else(|| Status::invalid_argument("missing digest"))?;
        let data = new_asset(digest, self.asset_type, self.expire_at.clone());

        let reference = new_asset_reference(self.uris.clone(), self.qualifiers.clone());
        store.put(&reference, &data, &self.instance_name).await?;

        if self.uris.len() > 1 {
            for uri in &self.uris {
                let reference =
                    new_asset_reference(vec![uri.clone()], self.qualifiers.clone());
                store.put(&reference, &data, &self.instance_name).await?;
            }
        }
        Ok(())
    }
}

pub mod actioncache;
