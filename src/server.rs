//! Casset gRPC server

use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use prost::Message;
use tonic::{
    async_trait,
    codegen::http::{self, HeaderMap},
    metadata::MetadataMap,
    service::interceptor,
    transport::Server,
    Request, Response, Status,
};
use tracing::{info, span, Level, Span};

use crate::{
    assetstore::AssetStoreInstance,
    build::bazel::remote::{
        asset::v1::{
            fetch_server::{Fetch, FetchServer},
            push_server::PushServer,
            FetchBlobRequest, FetchBlobResponse, FetchDirectoryRequest, FetchDirectoryResponse,
        },
        execution::v2::{RequestMetadata, ToolDetails},
    },
    fetch::{caching::CachingFetcher, FetcherInstance},
    instance::InstanceName,
    push::AssetPushServer,
};

/// Serve the Fetch and Push services, wrapping the given upstream fetcher in
/// a read-through cache over the asset store.
pub async fn serve(
    dst: SocketAddr,
    asset_store: AssetStoreInstance,
    upstream: FetcherInstance,
    allow_updates_for_instances: HashSet<InstanceName>,
) -> anyhow::Result<()> {
    let fetcher = CachingFetcher::instantiate(upstream, Arc::clone(&asset_store));
    Server::builder()
        .trace_fn(tracing_span)
        .layer(interceptor(attach_metadata))
        .add_service(FetchServer::new(FetchService::new(fetcher)))
        .add_service(PushServer::new(AssetPushServer::new(
            asset_store,
            allow_updates_for_instances,
        )))
        .serve(dst)
        .await?;

    Ok(())
}

trait HeaderGet {
    fn get(&self, key: &str) -> Option<&[u8]>;
}

impl HeaderGet for HeaderMap {
    fn get(&self, key: &str) -> Option<&[u8]> {
        self.get(key).map(|v| v.as_bytes())
    }
}

impl HeaderGet for MetadataMap {
    fn get(&self, key: &str) -> Option<&[u8]> {
        self.get_bin(key).map(|v| v.as_ref())
    }
}

fn extract_metadata(headers: &impl HeaderGet) -> Option<RequestMetadata> {
    headers
        .get("build.bazel.remote.execution.v2.requestmetadata-bin")
        .and_then(|v| base64::decode(v).ok())
        .and_then(|v| RequestMetadata::decode(v.as_ref()).ok())
}

fn tracing_span(req: &http::Request<()>) -> Span {
    if let Some(metadata) = extract_metadata(req.headers()) {
        let metadata: RequestMetadata = metadata;
        let tool = metadata
            .tool_details
            .as_ref()
            .map(|tool_details| format!("{}/{}", tool_details.tool_name, tool_details.tool_version))
            .unwrap_or_else(|| "unknown".into());
        let invocation = metadata.tool_invocation_id;
        span!(Level::INFO, "", tool = ?tool, invocation = ?invocation)
    } else {
        Span::none()
    }
}

fn attach_metadata(mut req: Request<()>) -> Result<Request<()>, Status> {
    if let Some(metadata) = extract_metadata(req.metadata()) {
        req.extensions_mut().insert(Arc::new(metadata));
    } else {
        let metadata = RequestMetadata {
            tool_details: Some(ToolDetails {
                tool_name: "unknown".into(),
                tool_version: "0.0.0".into(),
            }),
            action_id: "".into(),
            tool_invocation_id: "unknown".into(),
            correlated_invocations_id: "unknown".into(),
            action_mnemonic: "unknown".into(),
            target_id: "unknown".into(),
            configuration_id: "unknown".into(),
        };
        req.extensions_mut().insert(Arc::new(metadata));
    }
    Ok(req)
}

fn get_metadata<T>(req: &Request<T>) -> Option<Arc<RequestMetadata>> {
    req.extensions().get::<Arc<RequestMetadata>>().map(Arc::clone)
}

/// Adapter exposing any Fetcher as the wire-level Fetch service.
pub struct FetchService {
    fetcher: FetcherInstance,
}

impl FetchService {
    pub fn new(fetcher: FetcherInstance) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Fetch for FetchService {
    async fn fetch_blob(
        &self,
        request: Request<FetchBlobRequest>,
    ) -> Result<Response<FetchBlobResponse>, Status> {
        if let Some(metadata) = get_metadata(&request) {
            info!(
                "Handling blob fetch for invocation {}",
                metadata.tool_invocation_id
            );
        }
        let response = self.fetcher.fetch_blob(request.into_inner()).await?;
        Ok(Response::new(response))
    }

    async fn fetch_directory(
        &self,
        request: Request<FetchDirectoryRequest>,
    ) -> Result<Response<FetchDirectoryResponse>, Status> {
        if let Some(metadata) = get_metadata(&request) {
            info!(
                "Handling directory fetch for invocation {}",
                metadata.tool_invocation_id
            );
        }
        let response = self.fetcher.fetch_directory(request.into_inner()).await?;
        Ok(Response::new(response))
    }
}
