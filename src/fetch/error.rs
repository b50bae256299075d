//! Fetcher for deployments without an upstream resolver

use tonic::{async_trait, Status};

use crate::{
    build::bazel::remote::asset::v1::{
        FetchBlobRequest, FetchBlobResponse, FetchDirectoryRequest, FetchDirectoryResponse,
    },
    qualifiers::QualifierSet,
};

use super::{Fetcher, FetcherInstance, Result};

/// Terminal fetcher which fails every fetch. Composed under the caching
/// fetcher it turns the service into a push-only cache: anything previously
/// pushed resolves, everything else is NOT_FOUND.
pub struct ErrorFetcher;

impl ErrorFetcher {
    pub fn instantiate() -> FetcherInstance {
        Box::new(Self) as FetcherInstance
    }

    fn not_found() -> Status {
        Status::not_found("asset not cached and no upstream fetcher is configured")
    }
}

#[async_trait]
impl Fetcher for ErrorFetcher {
    async fn fetch_blob(&self, _request: FetchBlobRequest) -> Result<FetchBlobResponse> {
        Err(Self::not_found())
    }

    async fn fetch_directory(
        &self,
        _request: FetchDirectoryRequest,
    ) -> Result<FetchDirectoryResponse> {
        Err(Self::not_found())
    }

    fn check_qualifiers(&self, qualifiers: QualifierSet) -> QualifierSet {
        // Nothing is supported because nothing is ever fetched.
        qualifiers
    }
}
