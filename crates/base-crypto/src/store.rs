//! Persisted identity record.
//!
//! One JSON file in the data directory holds the gateway's static keypair and
//! the static keys of every peer that completed pairing:
//!
//! ```json
//! {
//!   "appNoiseStaticKeypair": { "private": "<b64>", "public": "<b64>" },
//!   "deviceNoiseStaticPubkeys": ["<b64>", "..."]
//! }
//! ```
//!
//! Reads go straight to disk so that trust decisions always reflect what is
//! persisted. Every read-modify-write runs under a single writer lock, and the
//! file is replaced atomically, so concurrent readers see either the old or
//! the new record.
//!
//! Trust lookups tolerate a damaged record. Writes never replace a record they
//! could not parse, so a damaged file is left for the operator to repair
//! instead of losing the gateway identity.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::identity::{PeerKey, StaticIdentity};

/// File name of the identity record inside the data directory.
pub const RECORD_FILE_NAME: &str = "base.json";

/// Identity store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identity record {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("identity record {path} holds an invalid keypair")]
    InvalidKeypair { path: PathBuf },

    #[error("failed to serialize identity record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Raw bytes stored as a standard base64 string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Base64Bytes(Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD
            .decode(s.as_bytes())
            .map(Base64Bytes)
            .map_err(serde::de::Error::custom)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKeypair {
    private: Base64Bytes,
    public: Base64Bytes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Record {
    #[serde(rename = "appNoiseStaticKeypair", default)]
    keypair: Option<StoredKeypair>,

    /// Kept as written so that an undecodable entry survives a rewrite.
    #[serde(
        rename = "deviceNoiseStaticPubkeys",
        default,
        deserialize_with = "null_as_empty"
    )]
    trusted_peers: Vec<String>,
}

impl Record {
    /// Decodable peer keys; bad entries are skipped.
    fn peers(&self) -> impl Iterator<Item = PeerKey> + '_ {
        self.trusted_peers.iter().filter_map(|entry| {
            let peer = STANDARD
                .decode(entry.as_bytes())
                .ok()
                .and_then(|bytes| PeerKey::from_slice(&bytes));
            if peer.is_none() {
                warn!("skipping malformed trusted peer entry {:?}", entry);
            }
            peer
        })
    }

    fn contains(&self, peer: &PeerKey) -> bool {
        self.peers().any(|stored| &stored == peer)
    }
}

/// Gateway identity and trusted peer set, persisted in the data directory.
///
/// Construct once at startup and share via `Arc`.
pub struct IdentityStore {
    dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IdentityStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let dir = data_dir.into();
        let path = dir.join(RECORD_FILE_NAME);
        Self {
            dir,
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the identity record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the gateway keypair, generating and persisting one if absent.
    ///
    /// A stored keypair is never replaced: a corrupt record or an invalid
    /// keypair is an error.
    pub async fn load_or_create_identity(&self) -> Result<StaticIdentity, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record().await?;

        if let Some(stored) = &record.keypair {
            return match StaticIdentity::from_parts(&stored.private.0, &stored.public.0) {
                Some(identity) => {
                    debug!("loaded gateway identity from {}", self.path.display());
                    Ok(identity)
                }
                None => {
                    error!("stored keypair in {} is invalid", self.path.display());
                    Err(StoreError::InvalidKeypair {
                        path: self.path.clone(),
                    })
                }
            };
        }

        let identity = StaticIdentity::generate();
        record.keypair = Some(StoredKeypair {
            private: Base64Bytes(identity.private_key().to_vec()),
            public: Base64Bytes(identity.public_key().to_vec()),
        });
        self.write_record(&record).await?;
        info!("generated new gateway identity at {}", self.path.display());

        Ok(identity)
    }

    /// Whether the peer has completed pairing before.
    ///
    /// A missing or unreadable record counts as "no trusted peers".
    pub async fn is_trusted(&self, peer: &PeerKey) -> bool {
        match self.read_record().await {
            Ok(record) => record.contains(peer),
            Err(err) => {
                warn!("treating peer {} as untrusted: {}", peer.short(), err);
                false
            }
        }
    }

    /// Persist a newly verified peer.
    ///
    /// Returns `false` if the peer was already present. A record that can't
    /// be parsed is left untouched and reported as an error.
    pub async fn add_trusted_peer(&self, peer: &PeerKey) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.read_record().await?;

        if record.contains(peer) {
            return Ok(false);
        }

        record.trusted_peers.push(STANDARD.encode(peer.as_bytes()));
        self.write_record(&record).await?;
        info!("added trusted peer {}", peer.short());

        Ok(true)
    }

    /// Snapshot of the persisted trusted peers, in insertion order.
    pub async fn trusted_peers(&self) -> Vec<PeerKey> {
        match self.read_record().await {
            Ok(record) => record.peers().collect(),
            Err(err) => {
                warn!("no trusted peers available: {}", err);
                Vec::new()
            }
        }
    }

    /// Read the record; a missing file is an empty record.
    async fn read_record(&self) -> Result<Record, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Record::default()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_record(&self, record: &Record) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(record)?;
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(write_err)?;

        // Restrict the directory before any secret lands in it
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(write_err)?;
        }

        // A stale temp file may carry looser permissions
        let tmp_path = self.path.with_extension("json.tmp");
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(write_err(source)),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await.map_err(write_err)?;
        file.write_all(&data).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}
