//! Remote fetcher, delegates to another Fetch service

use std::sync::Arc;

use tokio::sync::Mutex;
use tonic::{async_trait, transport::Channel, Status};

use crate::{
    build::bazel::remote::asset::v1::{
        fetch_client::FetchClient, FetchBlobRequest, FetchBlobResponse, FetchDirectoryRequest,
        FetchDirectoryResponse,
    },
    qualifiers::QualifierSet,
};

use super::{Fetcher, FetcherInstance, Result};

pub struct RemoteFetcher {
    client: Arc<Mutex<FetchClient<Channel>>>,
}

impl RemoteFetcher {
    pub async fn instantiate(client_base: &str) -> Result<FetcherInstance> {
        let client = FetchClient::connect(client_base.to_string())
            .await
            .map_err(|e| Status::internal(format!("fetch connect failed: {:?}", e)))?;
        Ok(Box::new(Self {
            client: Arc::new(Mutex::new(client)),
        }) as FetcherInstance)
    }
}

#[async_trait]
impl Fetcher for RemoteFetcher {
    async fn fetch_blob(&self, request: FetchBlobRequest) -> Result<FetchBlobResponse> {
        let response = self.client.lock().await.fetch_blob(request).await?;
        Ok(response.into_inner())
    }

    async fn fetch_directory(
        &self,
        request: FetchDirectoryRequest,
    ) -> Result<FetchDirectoryResponse> {
        let response = self.client.lock().await.fetch_directory(request).await?;
        Ok(response.into_inner())
    }

    fn check_qualifiers(&self, _qualifiers: QualifierSet) -> QualifierSet {
        // Qualifier support is the remote side's call; assume everything and
        // let the fetch surface any refusal.
        QualifierSet::new()
    }
}
