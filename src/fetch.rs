//! Fetchers resolve asset requests to content digests
//!
//! A `Fetcher` speaks the Remote Asset wire shapes directly. Concrete
//! variants either resolve upstream (remote), refuse (error), or decorate
//! another fetcher with read-through caching.

use tonic::{async_trait, Status};

use crate::{
    build::bazel::remote::asset::v1::{
        FetchBlobRequest, FetchBlobResponse, FetchDirectoryRequest, FetchDirectoryResponse,
    },
    qualifiers::QualifierSet,
};

type Result<T, E = Status> = std::result::Result<T, E>;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_blob(&self, request: FetchBlobRequest) -> Result<FetchBlobResponse>;

    async fn fetch_directory(
        &self,
        request: FetchDirectoryRequest,
    ) -> Result<FetchDirectoryResponse>;

    /// Report which of the given qualifier names this fetcher cannot honour.
    fn check_qualifiers(&self, qualifiers: QualifierSet) -> QualifierSet;
}

pub type FetcherInstance = Box<dyn Fetcher>;

pub mod caching;
pub mod error;
pub mod remote;
