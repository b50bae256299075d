use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use casset::{
    actioncache::{disk::OnDiskActionStorage, memory::MemoryActionStorage},
    assetstore::actioncache::ActionCacheAssetStore,
    build::bazel::remote::{
        asset::v1::{
            fetch_client::FetchClient, push_client::PushClient, FetchBlobRequest,
            FetchDirectoryRequest, PushBlobRequest, PushDirectoryRequest, Qualifier,
        },
        execution::v2::Digest,
    },
    fetch::{error::ErrorFetcher, remote::RemoteFetcher},
    instance::InstanceName,
    storage::{disk::OnDiskStorage, memory::MemoryStorage},
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Endpoint for client subcommands
    #[clap(long)]
    endpoint: Option<String>,
    #[clap(long)]
    instance: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the asset cache server
    Serve {
        #[clap(long, default_value_t = 50053)]
        port: u16,
        /// Persist the CAS and action cache under this directory instead of
        /// keeping them in memory
        #[clap(long)]
        storage_path: Option<PathBuf>,
        /// Endpoint of an upstream Fetch service to resolve cache misses
        #[clap(long)]
        upstream: Option<String>,
        /// Instance names pushes are accepted for (repeatable)
        #[clap(long = "allow-push")]
        allow_push: Vec<String>,
        #[clap(long, default_value_t = 16 * 1024 * 1024)]
        max_message_size: usize,
        /// Byte budget for the in-memory CAS
        #[clap(long, default_value_t = 256 * 1024 * 1024)]
        memory_limit: usize,
    },
    /// Look up (or fetch) a blob asset
    Fetch {
        uris: Vec<String>,
        #[clap(long = "qualifier")]
        qualifiers: Vec<String>,
        #[clap(long)]
        directory: bool,
    },
    /// Declare a (URI, qualifiers) -> digest mapping
    Push {
        /// Digest as hash/size
        digest: String,
        uris: Vec<String>,
        #[clap(long = "qualifier")]
        qualifiers: Vec<String>,
        #[clap(long)]
        directory: bool,
    },
}

struct Config {
    endpoint: String,
    instance_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config {
        endpoint: cli
            .endpoint
            .unwrap_or_else(|| "http://localhost:50053".into()),
        instance_name: cli.instance.unwrap_or_default(),
    };

    match cli.command {
        Command::Serve {
            port,
            storage_path,
            upstream,
            allow_push,
            max_message_size,
            memory_limit,
        } => {
            serve(
                port,
                storage_path,
                upstream,
                allow_push,
                max_message_size,
                memory_limit,
            )
            .await?
        }
        Command::Fetch {
            uris,
            qualifiers,
            directory,
        } => fetch(&config, uris, qualifiers, directory).await?,
        Command::Push {
            digest,
            uris,
            qualifiers,
            directory,
        } => push(&config, digest, uris, qualifiers, directory).await?,
    };

    Ok(())
}

async fn serve(
    port: u16,
    storage_path: Option<PathBuf>,
    upstream: Option<String>,
    allow_push: Vec<String>,
    max_message_size: usize,
    memory_limit: usize,
) -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let (storage, action_cache) = match &storage_path {
        Some(path) => {
            let storage = OnDiskStorage::instantiate(&path.join("cas"))
                .context("unable to set up on-disk storage")?;
            let action_cache =
                OnDiskActionStorage::instantiate(Arc::clone(&storage), path.join("actions"))
                    .context("unable to set up on-disk action cache")?;
            (storage, action_cache)
        }
        None => {
            let storage = MemoryStorage::instantiate(memory_limit);
            let action_cache = MemoryActionStorage::instantiate(Arc::clone(&storage));
            (storage, action_cache)
        }
    };
    let asset_store = ActionCacheAssetStore::instantiate(action_cache, storage, max_message_size);

    let upstream_fetcher = match &upstream {
        Some(endpoint) => RemoteFetcher::instantiate(endpoint)
            .await
            .map_err(|e| anyhow::anyhow!("unable to connect upstream fetcher: {}", e))?,
        None => ErrorFetcher::instantiate(),
    };

    let mut allow_updates_for_instances = HashSet::new();
    for name in &allow_push {
        allow_updates_for_instances.insert(
            InstanceName::parse(name)
                .map_err(|e| anyhow::anyhow!("bad --allow-push value: {}", e.message()))?,
        );
    }

    let dst: SocketAddr = ([0, 0, 0, 0], port).into();
    info!("Starting asset cache server on {}", dst);
    casset::server::serve(dst, asset_store, upstream_fetcher, allow_updates_for_instances).await
}

fn parse_qualifiers(qualifiers: &[String]) -> anyhow::Result<Vec<Qualifier>> {
    qualifiers
        .iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .with_context(|| format!("qualifier {:?} is not of the form name=value", pair))?;
            Ok(Qualifier {
                name: name.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

fn parse_digest(input: &str) -> anyhow::Result<Digest> {
    let (hash, size) = input
        .split_once('/')
        .context("digest is not of the form hash/size")?;
    Ok(Digest {
        hash: hash.to_string(),
        size_bytes: size.parse().context("digest size is not a number")?,
    })
}

async fn fetch(
    config: &Config,
    uris: Vec<String>,
    qualifiers: Vec<String>,
    directory: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(!uris.is_empty(), "at least one URI is required");
    let qualifiers = parse_qualifiers(&qualifiers)?;
    let mut client = FetchClient::connect(config.endpoint.clone()).await?;

    if directory {
        let response = client
            .fetch_directory(FetchDirectoryRequest {
                instance_name: config.instance_name.clone(),
                timeout: None,
                oldest_content_accepted: None,
                uris,
                qualifiers,
            })
            .await?
            .into_inner();
        match response.root_directory_digest {
            Some(digest) => println!(
                "{} -> directory {}/{}",
                response.uri, digest.hash, digest.size_bytes
            ),
            None => println!("no directory digest in response"),
        }
    } else {
        let response = client
            .fetch_blob(FetchBlobRequest {
                instance_name: config.instance_name.clone(),
                timeout: None,
                oldest_content_accepted: None,
                uris,
                qualifiers,
            })
            .await?
            .into_inner();
        match response.blob_digest {
            Some(digest) => println!(
                "{} -> blob {}/{}",
                response.uri, digest.hash, digest.size_bytes
            ),
            None => println!("no blob digest in response"),
        }
    }

    Ok(())
}

async fn push(
    config: &Config,
    digest: String,
    uris: Vec<String>,
    qualifiers: Vec<String>,
    directory: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(!uris.is_empty(), "at least one URI is required");
    let qualifiers = parse_qualifiers(&qualifiers)?;
    let digest = parse_digest(&digest)?;
    let mut client = PushClient::connect(config.endpoint.clone()).await?;

    if directory {
        client
            .push_directory(PushDirectoryRequest {
                instance_name: config.instance_name.clone(),
                uris,
                qualifiers,
                expire_at: None,
                root_directory_digest: Some(digest),
                references_blobs: vec![],
                references_directories: vec![],
            })
            .await?;
    } else {
        client
            .push_blob(PushBlobRequest {
                instance_name: config.instance_name.clone(),
                uris,
                qualifiers,
                expire_at: None,
                blob_digest: Some(digest),
                references_blobs: vec![],
                references_directories: vec![],
            })
            .await?;
    }
    println!("Pushed");

    Ok(())
}
