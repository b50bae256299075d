//! Asset-reference encoding
//!
//! An `AssetReference` is a (URI set, qualifier set) pair. To store it in an
//! action cache it is encoded as a chain of Remote Execution messages whose
//! leaf Action digest is the cache key. The encoding is pure and must be
//! byte-deterministic: qualifier order is taken as given, so callers that
//! want order-insensitive keys must canonicalize before encoding.

use std::time::SystemTime;

use prost::Message;
use prost_types::Timestamp;

use crate::{
    asset::{asset::AssetType, Asset, AssetReference},
    build::bazel::remote::{
        asset::v1::Qualifier,
        execution::v2::{Action, Command, Digest, Directory, FileNode},
    },
    qualifiers::CommandTranslator,
};

/// Name of the single file in the wrapper directory which carries the digest
/// of the qualifier-only reference. Part of the persisted key format.
const REFERENCE_FILE_NAME: &str = "AssetReference";

pub fn new_asset_reference(uris: Vec<String>, qualifiers: Vec<Qualifier>) -> AssetReference {
    AssetReference { uris, qualifiers }
}

/// Create an Asset stamped with the current wall clock. An absent or
/// epoch-zero `expire_at` means the asset never expires.
pub fn new_asset(digest: Digest, asset_type: AssetType, expire_at: Option<Timestamp>) -> Asset {
    Asset {
        digest: Some(digest),
        expire_at,
        last_updated: Some(now_timestamp()),
        r#type: asset_type as i32,
    }
}

pub fn new_blob_asset(digest: Digest, expire_at: Option<Timestamp>) -> Asset {
    new_asset(digest, AssetType::Blob, expire_at)
}

pub fn new_directory_asset(digest: Digest, expire_at: Option<Timestamp>) -> Asset {
    new_asset(digest, AssetType::Directory, expire_at)
}

/// Digest of a message's canonical serialized form.
pub fn proto_to_digest(message: &impl Message) -> Digest {
    let data = message.encode_to_vec();
    Digest {
        hash: sha256::digest(data.as_slice()),
        size_bytes: data.len() as i64,
    }
}

/// The well-known digest of the zero-length blob.
pub fn empty_digest() -> Digest {
    Digest {
        hash: sha256::digest(&b""[..]),
        size_bytes: 0,
    }
}

pub fn unix_epoch_timestamp() -> Timestamp {
    Timestamp {
        seconds: 0,
        nanos: 0,
    }
}

pub fn now_timestamp() -> Timestamp {
    Timestamp::from(SystemTime::now())
}

pub fn is_unix_epoch(timestamp: &Timestamp) -> bool {
    timestamp.seconds == 0 && timestamp.nanos == 0
}

pub fn timestamp_before(a: &Timestamp, b: &Timestamp) -> bool {
    (a.seconds, a.nanos) < (b.seconds, b.nanos)
}

/// The full message chain encoding an AssetReference. The digest of `action`
/// is the action-cache key; the other messages must be present in the CAS
/// for the cache entry to be referentially complete.
pub struct EncodedAssetReference {
    /// The reference stripped down to its qualifiers. Stored in the CAS so
    /// the qualifiers remain recoverable from the key material.
    pub qualifier_reference: AssetReference,
    /// Wrapper directory whose only entry names the qualifier reference.
    pub directory: Directory,
    pub command: Command,
    pub action: Action,
}

impl EncodedAssetReference {
    pub fn action_digest(&self) -> Digest {
        proto_to_digest(&self.action)
    }
}

/// Encode a reference into its Action chain.
///
/// Two shapes exist. When the reference has exactly one URI and its
/// qualifier set translates to a fetch Command, the Action is the one a
/// remote-execution worker would have cached for that fetch: the translated
/// Command over an empty input root. Anything else falls back to a generic
/// Command listing the URIs, rooted at the wrapper directory so the
/// qualifiers contribute to the key.
pub fn encode_asset_reference(reference: &AssetReference) -> EncodedAssetReference {
    let qualifier_reference = new_asset_reference(Vec::new(), reference.qualifiers.clone());
    let directory = Directory {
        files: vec![FileNode {
            name: REFERENCE_FILE_NAME.to_string(),
            digest: Some(proto_to_digest(&qualifier_reference)),
            ..Default::default()
        }],
        ..Default::default()
    };

    let translator = match reference.uris.as_slice() {
        [uri] => CommandTranslator::from_qualifiers(&reference.qualifiers)
            .map(|translator| translator.command_for_uri(uri)),
        _ => None,
    };
    let (command, input_root_digest) = match translator {
        Some(command) => (command, empty_digest()),
        None => (
            Command {
                arguments: reference.uris.clone(),
                output_paths: vec!["out".to_string()],
                ..Default::default()
            },
            proto_to_digest(&directory),
        ),
    };

    let action = Action {
        command_digest: Some(proto_to_digest(&command)),
        input_root_digest: Some(input_root_digest),
        ..Default::default()
    };

    EncodedAssetReference {
        qualifier_reference,
        directory,
        command,
        action,
    }
}
