//! Push side of the Remote Asset service
//!
//! Pre-declared (URI, qualifiers) → digest mappings are pushed by external
//! agents. Updates are only accepted for instances on a configured
//! allow-list; everything else is turned away before any backend work.

use std::collections::HashSet;

use tonic::{async_trait, Request, Response, Status};
use tracing::info;

use crate::{
    asset::asset::AssetType,
    assetstore::{AssetStoreInstance, PutRequest},
    build::bazel::remote::asset::v1::{
        push_server::Push, PushBlobRequest, PushBlobResponse, PushDirectoryRequest,
        PushDirectoryResponse,
    },
    instance::InstanceName,
    util::wrap_status,
};

type Result<T, E = Status> = std::result::Result<T, E>;

pub struct AssetPushServer {
    asset_store: AssetStoreInstance,
    allow_updates_for_instances: HashSet<InstanceName>,
}

impl AssetPushServer {
    pub fn new(
        asset_store: AssetStoreInstance,
        allow_updates_for_instances: HashSet<InstanceName>,
    ) -> Self {
        Self {
            asset_store,
            allow_updates_for_instances,
        }
    }

    fn instance_name(&self, name: &str) -> Result<InstanceName> {
        let instance_name = InstanceName::parse(name)?;
        if !self.allow_updates_for_instances.contains(&instance_name) {
            return Err(Status::permission_denied(format!(
                "this service does not accept updates for instance {:?}",
                name
            )));
        }
        Ok(instance_name)
    }
}

#[async_trait]
impl Push for AssetPushServer {
    async fn push_blob(
        &self,
        request: Request<PushBlobRequest>,
    ) -> Result<Response<PushBlobResponse>> {
        let request = request.into_inner();
        let instance_name = self
            .instance_name(&request.instance_name)
            .map_err(|e| wrap_status(e, "PushBlob failed validating instance name"))?;
        info!(
            "PushBlob of {} URI(s) for instance {:?}",
            request.uris.len(),
            instance_name.as_str()
        );

        PutRequest {
            instance_name,
            uris: request.uris,
            qualifiers: request.qualifiers,
            expire_at: request.expire_at,
            digest: request.blob_digest,
            asset_type: AssetType::Blob,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "PushBlob failed putting asset"))?;

        Ok(Response::new(PushBlobResponse {}))
    }

    async fn push_directory(
        &self,
        request: Request<PushDirectoryRequest>,
    ) -> Result<Response<PushDirectoryResponse>> {
        let request = request.into_inner();
        let instance_name = self
            .instance_name(&request.instance_name)
            .map_err(|e| wrap_status(e, "PushDirectory failed validating instance name"))?;
        info!(
            "PushDirectory of {} URI(s) for instance {:?}",
            request.uris.len(),
            instance_name.as_str()
        );

        PutRequest {
            instance_name,
            uris: request.uris,
            qualifiers: request.qualifiers,
            expire_at: request.expire_at,
            digest: request.root_directory_digest,
            asset_type: AssetType::Directory,
        }
        .do_put(self.asset_store.as_ref())
        .await
        .map_err(|e| wrap_status(e, "PushDirectory failed putting asset"))?;

        Ok(Response::new(PushDirectoryResponse {}))
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
        asset::{Asset, AssetReference},
        assetstore::AssetStore,
        reference::empty_digest,
    };

    /// Asset store stub counting writes.
    #[derive(Default)]
    struct CountingAssetStore {
        puts: AtomicUsize,
    }

    #[async_trait]
    impl AssetStore for CountingAssetStore {
        async fn get(
            &self,
            _reference: &AssetReference,
            _instance_name: &InstanceName,
        ) -> Result<Asset> {
            Err(Status::not_found("no such asset"))
        }

        async fn put(
            &self,
            _reference: &AssetReference,
            _data: &Asset,
            _instance_name: &InstanceName,
        ) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn push_server(
        allowed: &[&str],
    ) -> (AssetPushServer, Arc<CountingAssetStore>) {
        let store = Arc::new(CountingAssetStore::default());
        let allow_updates_for_instances = allowed
            .iter()
            .map(|name| InstanceName::parse(name).unwrap())
            .collect();
        (
            AssetPushServer::new(
                Arc::clone(&store) as AssetStoreInstance,
                allow_updates_for_instances,
            ),
            store,
        )
    }

    fn blob_request(instance_name: &str) -> PushBlobRequest {
        PushBlobRequest {
            instance_name: instance_name.to_string(),
            uris: vec!["https://example.com/example.txt".to_string()],
            qualifiers: Vec::new(),
            expire_at: None,
            blob_digest: Some(empty_digest()),
            references_blobs: Vec::new(),
            references_directories: Vec::new(),
        }
    }

    #[tokio::test]
    async fn push_to_allowed_instance_succeeds() {
        let (server, store) = push_server(&["main"]);
        server
            .push_blob(Request::new(blob_request("main")))
            .await
            .unwrap();
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn push_to_forbidden_instance_is_denied_without_writes() {
        let (server, store) = push_server(&["main"]);
        let err = server
            .push_blob(Request::new(blob_request("forbidden")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn push_directory_is_gated_by_the_same_allow_list() {
        let (server, store) = push_server(&["main"]);
        let request = PushDirectoryRequest {
            instance_name: "forbidden".to_string(),
            uris: vec!["https://example.com/tree".to_string()],
            qualifiers: Vec::new(),
            expire_at: None,
            root_directory_digest: Some(empty_digest()),
            references_blobs: Vec::new(),
            references_directories: Vec::new(),
        };
        let err = server
            .push_directory(Request::new(request))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn push_without_uris_is_invalid() {
        let (server, _store) = push_server(&["main"]);
        let mut request = blob_request("main");
        request.uris.clear();
        let err = server.push_blob(Request::new(request)).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
