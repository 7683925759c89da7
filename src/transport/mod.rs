//! Storage transport abstraction
//!
//! A `Transport` is a flat, `/`-separated key space with atomic single-key
//! writes. The same cache and reporting code runs against a local directory or
//! a remote object-store bucket; the backend is picked per invocation.

pub mod local;
pub mod remote;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

pub use local::LocalTransport;
pub use remote::{RemoteConfig, RemoteTransport};

/// Metadata returned by `Transport::list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Invalid key '{0}': {1}")]
    InvalidKey(String, String),

    #[error("Storage I/O error for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote store returned HTTP {status} for '{key}': {message}")]
    Remote {
        key: String,
        status: u16,
        message: String,
    },

    #[error("Remote request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote transport configuration error: {0}")]
    Config(String),

    #[error("The {backend} backend cannot {operation} '{key}'")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
        key: String,
    },
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            TransportError::NotFound(key.to_string())
        } else {
            TransportError::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Uniform get/put/list/delete over a named key space.
///
/// Implementations must make `put` atomic per key: a concurrent reader sees
/// either the previous value or the new one, never a partial write. There is
/// no locking; concurrent writers to the same key resolve as last-write-wins.
pub trait Transport: Send + Sync {
    /// Short backend name for logs (`local` / `remote`)
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> TransportResult<Vec<u8>>;

    fn put(&self, key: &str, bytes: &[u8]) -> TransportResult<()>;

    fn exists(&self, key: &str) -> TransportResult<bool>;

    /// All keys starting with `prefix`, sorted by key
    fn list(&self, prefix: &str) -> TransportResult<Vec<ObjectInfo>>;

    /// Deleting a missing key is not an error
    fn delete(&self, key: &str) -> TransportResult<()>;

    /// Delete several keys, returning how many were removed
    fn delete_many(&self, keys: &[String]) -> TransportResult<usize> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(keys.len())
    }

    /// Whether `append` writes in place. Object stores have no append, and a
    /// read-modify-write would make a growing file quadratic to publish.
    fn supports_append(&self) -> bool {
        false
    }

    /// Append to an object, creating it when absent. Unlike `put` this is
    /// not atomic: readers may observe a partially appended tail.
    fn append(&self, key: &str, _bytes: &[u8]) -> TransportResult<()> {
        Err(TransportError::Unsupported {
            backend: self.name(),
            operation: "append to",
            key: key.to_string(),
        })
    }

    /// `get` that maps `NotFound` to `None`
    fn get_opt(&self, key: &str) -> TransportResult<Option<Vec<u8>>> {
        match self.get(key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Which backend to use for a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    Remote,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Local => write!(f, "local"),
            TransportKind::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "fs" | "file" => Ok(TransportKind::Local),
            "remote" | "s3" | "object" => Ok(TransportKind::Remote),
            other => Err(format!("unknown transport '{}' (expected local or remote)", other)),
        }
    }
}

/// Build a transport of the requested kind.
///
/// Remote configuration is read from the environment. If it is missing,
/// invalid, or the bucket cannot be reached, a warning is logged and the local
/// backend rooted at `local_root` is returned instead.
pub fn create_transport(kind: TransportKind, local_root: impl Into<PathBuf>) -> Arc<dyn Transport> {
    create_transport_with(kind, local_root, RemoteConfig::from_env)
}

/// Same as `create_transport` with an explicit source of remote configuration
pub fn create_transport_with<F>(
    kind: TransportKind,
    local_root: impl Into<PathBuf>,
    remote_config: F,
) -> Arc<dyn Transport>
where
    F: FnOnce() -> TransportResult<RemoteConfig>,
{
    let local_root = local_root.into();
    match kind {
        TransportKind::Local => Arc::new(LocalTransport::new(local_root)),
        TransportKind::Remote => match remote_config().and_then(RemoteTransport::connect) {
            Ok(remote) => {
                info!("☁️  Using remote storage: {}", remote.describe());
                Arc::new(remote)
            }
            Err(e) => {
                warn!(
                    "⚠️  Remote storage unavailable ({}), falling back to local storage at {}",
                    e,
                    local_root.display()
                );
                Arc::new(LocalTransport::new(local_root))
            }
        },
    }
}

/// Join key segments with `/`, ignoring empty segments and stray slashes
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reject keys that could escape the key space
pub(crate) fn validate_key(key: &str) -> TransportResult<()> {
    if key.is_empty() {
        return Err(TransportError::InvalidKey(key.to_string(), "empty key".to_string()));
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(TransportError::InvalidKey(
            key.to_string(),
            "keys must be relative and use '/' separators".to_string(),
        ));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(TransportError::InvalidKey(
            key.to_string(),
            "empty, '.' or '..' path segments are not allowed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key(&["cache", "results", "abc.json"]), "cache/results/abc.json");
        assert_eq!(join_key(&["/cache/", "", "x"]), "cache/x");
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("cache/data/abc.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("cache/../secret").is_err());
        assert!(validate_key("cache//x").is_err());
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("local".parse::<TransportKind>().unwrap(), TransportKind::Local);
        assert_eq!("REMOTE".parse::<TransportKind>().unwrap(), TransportKind::Remote);
        assert!("ftp".parse::<TransportKind>().is_err());
    }

    #[test]
    fn test_fallback_on_missing_remote_config() {
        let dir = tempfile::tempdir().unwrap();
        let transport = create_transport_with(TransportKind::Remote, dir.path(), || {
            Err(TransportError::Config("OPTIMIZER_REMOTE_BUCKET is not set".to_string()))
        });
        assert_eq!(transport.name(), "local");
        transport.put("a/b.txt", b"hello").unwrap();
        assert_eq!(transport.get("a/b.txt").unwrap(), b"hello");
    }
}
