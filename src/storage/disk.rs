//! On-disk storage backend

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tonic::{async_trait, Code, Status};

use crate::build::bazel::remote::execution::v2::Digest;

use super::{Result, StorageBackend, StorageBackendInstance};

pub struct OnDiskStorage {
    base: PathBuf,
}

impl OnDiskStorage {
    pub fn instantiate(base: &Path) -> std::io::Result<StorageBackendInstance> {
        let base = base.to_path_buf();
        std::fs::create_dir_all(&base)?;
        // The empty blob must always be present.
        drop(std::fs::File::create(base.join(format!(
            "{}-0",
            sha256::digest(&b""[..])
        )))?);
        Ok(Arc::new(Self { base }) as StorageBackendInstance)
    }

    fn path_for(&self, digest: &Digest) -> PathBuf {
        self.base
            .join(format!("{}-{}", digest.hash, digest.size_bytes))
    }

    fn temp_path_for(&self, digest: &Digest) -> PathBuf {
        self.base
            .join(format!("{}-{}.tmp", digest.hash, digest.size_bytes))
    }
}

fn map_io_error(err: std::io::Error) -> Status {
    match err.kind() {
        ErrorKind::NotFound => Status::new(Code::NotFound, "not found"),
        _ => Status::new(Code::Unknown, format!("unknown error: {:?}", err)),
    }
}

#[async_trait]
impl StorageBackend for OnDiskStorage {
    async fn put_blob(&self, digest: &Digest, data: Vec<u8>) -> Result<()> {
        if data.len() as i64 != digest.size_bytes {
            return Err(Status::new(
                Code::InvalidArgument,
                "data does not match digest size",
            ));
        }
        if sha256::digest(data.as_slice()) != digest.hash {
            return Err(Status::new(
                Code::InvalidArgument,
                "digest inconsistency detected",
            ));
        }
        let writing = self.temp_path_for(digest);
        let target = self.path_for(digest);
        fs::write(&writing, &data).await.map_err(map_io_error)?;
        fs::rename(&writing, &target).await.map_err(map_io_error)?;
        Ok(())
    }

    async fn get_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        fs::read(self.path_for(digest)).await.map_err(map_io_error)
    }

    async fn contains(&self, digest: &Digest) -> Result<bool> {
        match fs::metadata(self.path_for(digest)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Status::new(
                Code::Unknown,
                format!("unknown error: {:?}", e),
            )),
        }
    }
}
