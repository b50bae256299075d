//! Read-through caching fetcher

use tonic::{async_trait, Status};
use tracing::debug;

use crate::{
    asset::asset::AssetType,
    assetstore::{AssetStoreInstance, GetRequest, PutRequest},
    build::bazel::remote::asset::v1::{
        FetchBlobRequest, FetchBlobResponse, FetchDirectoryRequest, FetchDirectoryResponse,
    },
    google::rpc,
    instance::InstanceName,
    qualifiers::QualifierSet,
    reference::unix_epoch_timestamp,
    util::wrap_status,
};

use super::{Fetcher, FetcherInstance, Result};

/// Decorates an upstream fetcher with a read-through cache over an asset
/// store. Cache hits never touch the upstream; misses are fetched upstream
/// and written back under both the URI that served the content and the URI
/// set of the request.
pub struct CachingFetcher {
    fetcher: FetcherInstance,
    asset_store: AssetStoreInstance,
}

impl CachingFetcher {
    pub fn instantiate(fetcher: FetcherInstance, asset_store: AssetStoreInstance) -> FetcherInstance {
        Box::new(Self {
            fetcher,
            asset_store,
        }) as FetcherInstance
    }
}

fn ok_status(message: &str) -> rpc::Status {
    rpc::Status {
        code: rpc::Code::Ok as i32,
        message: message.to_string(),
        details: vec![],
    }
}

fn single_uri(mut uris: Vec<String>) -> Result<String> {
    match uris.len() {
        1 => Ok(uris.remove(0)),
        n => Err(Status::internal(format!(
            "matched asset reference has {} URIs, expected exactly one",
            n
        ))),
    }
}

#[async_trait]
impl Fetcher for CachingFetcher {
    async fn fetch_blob(&self, request: FetchBlobRequest) -> Result<FetchBlobResponse> {
        let instance_name = InstanceName::parse(&request.instance_name)?;

        let found = GetRequest {
            instance_name: instance_name.clone(),
            oldest_content_accepted: request.oldest_content_accepted.clone(),
            uris: request.uris.clone(),
            qualifiers: request.qualifiers.clone(),
        }
        .do_get(self.asset_store.as_ref())
        .await?;

        if let Some((matched, digest)) = found {
            let uri = single_uri(matched.uris)?;
            debug!("Blob fetch for {} served from the asset cache", uri);
            return Ok(FetchBlobResponse {
                status: Some(ok_status("Blob fetched successfully from asset cache")),
                uri,
                qualifiers: request.qualifiers,
                expires_at: None,
                blob_digest: Some(digest),
            });
        }

        // Cache miss, resolve through the wrapped fetcher.
        let response = self.fetcher.fetch_blob(request.clone()).await?;
        if response.status.as_ref().map(|s| s.code).unwrap_or(0) != 0 {
            // Upstream refused; hand the status through uncached.
            return Ok(response);
        }

        // Cache under the URI which actually served the content.
        PutRequest {
            instance_name: instance_name.clone(),
            uris: vec![response.uri.clone()],
            qualifiers: response.qualifiers.clone(),
            expire_at: Some(unix_epoch_timestamp()),
            digest: response.blob_digest.clone(),
            asset_type: AssetType::Blob,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "FetchBlob failed putting asset"))?;

        // And under the URI set the client asked for, so the same request
        // hits even when a mirror answered.
        PutRequest {
            instance_name,
            uris: request.uris,
            qualifiers: request.qualifiers,
            expire_at: Some(unix_epoch_timestamp()),
            digest: response.blob_digest.clone(),
            asset_type: AssetType::Blob,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "FetchBlob failed putting asset from request"))?;

        Ok(response)
    }

    async fn fetch_directory(
        &self,
        request: FetchDirectoryRequest,
    ) -> Result<FetchDirectoryResponse> {
        let instance_name = InstanceName::parse(&request.instance_name)?;

        let found = GetRequest {
            instance_name: instance_name.clone(),
            oldest_content_accepted: request.oldest_content_accepted.clone(),
            uris: request.uris.clone(),
            qualifiers: request.qualifiers.clone(),
        }
        .do_get(self.asset_store.as_ref())
        .await?;

        if let Some((matched, digest)) = found {
            let uri = single_uri(matched.uris)?;
            debug!("Directory fetch for {} served from the asset cache", uri);
            return Ok(FetchDirectoryResponse {
                status: Some(ok_status("Directory fetched successfully from asset cache")),
                uri,
                qualifiers: request.qualifiers,
                expires_at: None,
                root_directory_digest: Some(digest),
            });
        }

        // Cache miss. Unlike blobs, directory responses are cached without
        // inspecting the carried status.
        let response = self.fetcher.fetch_directory(request.clone()).await?;

        PutRequest {
            instance_name: instance_name.clone(),
            uris: vec![response.uri.clone()],
            qualifiers: response.qualifiers.clone(),
            expire_at: Some(unix_epoch_timestamp()),
            digest: response.root_directory_digest.clone(),
            asset_type: AssetType::Directory,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "FetchDirectory failed putting asset"))?;

        PutRequest {
            instance_name,
            uris: request.uris,
            qualifiers: request.qualifiers,
            expire_at: Some(unix_epoch_timestamp()),
            digest: response.root_directory_digest.clone(),
            asset_type: AssetType::Directory,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "FetchDirectory failed putting asset from request"))?;

        Ok(response)
    }

    fn check_qualifiers(&self, qualifiers: QualifierSet) -> QualifierSet {
        self.fetcher.check_qualifiers(qualifiers)
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use tonic::Code;

    use super::*;
    use crate::{
        actioncache::memory::MemoryActionStorage,
        assetstore::actioncache::ActionCacheAssetStore,
        build::bazel::remote::{asset::v1::Qualifier, execution::v2::Digest},
        qualifiers::qualifier_names,
        storage::memory::MemoryStorage,
    };

    const ORIGIN_URI: &str = "https://origin.example.com/x";
    const MIRROR_URI: &str = "https://mirror.example.com/x";

    fn blob_digest() -> Digest {
        Digest {
            hash: sha256::digest(&b"blob content"[..]),
            size_bytes: 12,
        }
    }

    /// Upstream stub returning a scripted response and counting calls.
    struct ScriptedFetcher {
        calls: Arc<AtomicUsize>,
        status_code: i32,
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch_blob(&self, request: FetchBlobRequest) -> Result<FetchBlobResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchBlobResponse {
                status: Some(rpc::Status {
                    code: self.status_code,
                    message: String::new(),
                    details: vec![],
                }),
                uri: MIRROR_URI.to_string(),
                qualifiers: request.qualifiers,
                expires_at: None,
                blob_digest: Some(blob_digest()),
            })
        }

        async fn fetch_directory(
            &self,
            request: FetchDirectoryRequest,
        ) -> Result<FetchDirectoryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchDirectoryResponse {
                status: Some(ok_status("")),
                uri: MIRROR_URI.to_string(),
                qualifiers: request.qualifiers,
                expires_at: None,
                root_directory_digest: Some(blob_digest()),
            })
        }

        fn check_qualifiers(&self, _qualifiers: QualifierSet) -> QualifierSet {
            QualifierSet::new()
        }
    }

    fn caching_fetcher(status_code: i32) -> (FetcherInstance, Arc<AtomicUsize>) {
        let storage = MemoryStorage::instantiate(1024 * 1024);
        let action_cache = MemoryActionStorage::instantiate(Arc::clone(&storage));
        let asset_store =
            ActionCacheAssetStore::instantiate(action_cache, storage, 16 * 1024 * 1024);
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = Box::new(ScriptedFetcher {
            calls: Arc::clone(&calls),
            status_code,
        }) as FetcherInstance;
        (CachingFetcher::instantiate(upstream, asset_store), calls)
    }

    fn blob_request() -> FetchBlobRequest {
        FetchBlobRequest {
            instance_name: String::new(),
            timeout: None,
            oldest_content_accepted: None,
            uris: vec![ORIGIN_URI.to_string()],
            qualifiers: vec![Qualifier {
                name: "test".to_string(),
                value: "test".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn miss_then_hit() -> Result<()> {
        let (fetcher, calls) = caching_fetcher(0);

        // First call goes upstream, which answers from a mirror.
        let first = fetcher.fetch_blob(blob_request()).await?;
        assert_eq!(first.uri, MIRROR_URI);
        assert_eq!(first.blob_digest, Some(blob_digest()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second identical call is served from the cache under the request
        // URI, without touching the upstream again.
        let second = fetcher.fetch_blob(blob_request()).await?;
        assert_eq!(second.uri, ORIGIN_URI);
        assert_eq!(second.blob_digest, Some(blob_digest()));
        assert_eq!(second.status.unwrap().code, rpc::Code::Ok as i32);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn response_uri_is_cached_too() -> Result<()> {
        let (fetcher, calls) = caching_fetcher(0);
        fetcher.fetch_blob(blob_request()).await?;

        let mut request = blob_request();
        request.uris = vec![MIRROR_URI.to_string()];
        let response = fetcher.fetch_blob(request).await?;
        assert_eq!(response.uri, MIRROR_URI);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn non_ok_upstream_status_is_not_cached() -> Result<()> {
        let (fetcher, calls) = caching_fetcher(rpc::Code::NotFound as i32);

        let first = fetcher.fetch_blob(blob_request()).await?;
        assert_eq!(first.status.as_ref().unwrap().code, rpc::Code::NotFound as i32);

        // Still a miss: the failed response must not have been cached.
        let second = fetcher.fetch_blob(blob_request()).await?;
        assert_eq!(second.status.unwrap().code, rpc::Code::NotFound as i32);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn directory_miss_then_hit() -> Result<()> {
        let (fetcher, calls) = caching_fetcher(0);
        let request = FetchDirectoryRequest {
            instance_name: String::new(),
            timeout: None,
            oldest_content_accepted: None,
            uris: vec![ORIGIN_URI.to_string()],
            qualifiers: Vec::new(),
        };

        let first = fetcher.fetch_directory(request.clone()).await?;
        assert_eq!(first.uri, MIRROR_URI);
        let second = fetcher.fetch_directory(request).await?;
        assert_eq!(second.uri, ORIGIN_URI);
        assert_eq!(second.root_directory_digest, Some(blob_digest()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_instance_name_is_rejected() {
        let (fetcher, calls) = caching_fetcher(0);
        let mut request = blob_request();
        request.instance_name = "blobs".to_string();
        let err = fetcher.fetch_blob(request).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn check_qualifiers_delegates_upstream() {
        let (fetcher, _calls) = caching_fetcher(0);
        let names = qualifier_names(&blob_request().qualifiers);
        // The scripted upstream claims to support everything.
        assert!(fetcher.check_qualifiers(names).is_empty());
    }
}
