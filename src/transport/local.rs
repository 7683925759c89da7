//! Local filesystem backend

use super::{validate_key, ObjectInfo, Transport, TransportError, TransportResult};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Marker for in-flight temp files; never returned by `list`
const TEMP_MARKER: &str = ".tmp-";

/// Keys map to paths under `root`. Writes go to a temp file in the target
/// directory and are renamed into place, so readers never see partial data.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> TransportResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    fn collect(&self, dir: &Path, prefix: &str, out: &mut Vec<ObjectInfo>) -> TransportResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TransportError::io(&dir.display().to_string(), e)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| TransportError::io(&dir.display().to_string(), e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| TransportError::io(&path.display().to_string(), e))?;

            if file_type.is_dir() {
                self.collect(&path, prefix, out)?;
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_MARKER) {
                continue;
            }

            let Some(key) = self.key_for(&path) else { continue };
            if !key.starts_with(prefix) {
                continue;
            }

            // A file can vanish between read_dir and metadata when another
            // worker deletes it; skip it like any other missing key.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(TransportError::io(&key, e)),
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            out.push(ObjectInfo {
                key,
                size: metadata.len(),
                modified,
            });
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn get(&self, key: &str) -> TransportResult<Vec<u8>> {
        let path = self.path_for(key)?;
        fs::read(&path).map_err(|e| TransportError::io(key, e))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> TransportResult<()> {
        let path = self.path_for(key)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| TransportError::io(key, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = parent.join(format!("{}{}-{}", TEMP_MARKER, file_name, Uuid::new_v4()));

        let write_result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(TransportError::io(key, e));
        }

        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn append(&self, key: &str, bytes: &[u8]) -> TransportResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TransportError::io(key, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| TransportError::io(key, e))?;
        file.write_all(bytes).map_err(|e| TransportError::io(key, e))?;
        debug!("Appended {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn exists(&self, key: &str) -> TransportResult<bool> {
        Ok(self.path_for(key)?.is_file())
    }

    fn list(&self, prefix: &str) -> TransportResult<Vec<ObjectInfo>> {
        // Only walk the deepest directory the prefix pins down
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };

        let mut objects = Vec::new();
        self.collect(&start, prefix, &mut objects)?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn delete(&self, key: &str) -> TransportResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::io(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());

        transport.put("cache/results/k1.json", b"{}").unwrap();
        assert_eq!(transport.get("cache/results/k1.json").unwrap(), b"{}");
        assert!(transport.exists("cache/results/k1.json").unwrap());
        assert!(dir.path().join("cache").join("results").join("k1.json").is_file());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());

        let err = transport.get("nope.json").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(transport.get_opt("nope.json").unwrap(), None);
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());

        transport.put("a/x.bin", b"first").unwrap();
        transport.put("a/x.bin", b"second").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path().join("a"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["x.bin".to_string()]);
        assert_eq!(transport.get("a/x.bin").unwrap(), b"second");
    }

    #[test]
    fn test_list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());

        transport.put("results/runs/b.csv", b"2").unwrap();
        transport.put("results/runs/a.csv", b"1").unwrap();
        transport.put("results/orders/a_orders.csv", b"3").unwrap();
        transport.put("logs/progress/a.json", b"4").unwrap();

        let runs = transport.list("results/runs/").unwrap();
        let keys: Vec<_> = runs.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["results/runs/a.csv", "results/runs/b.csv"]);

        let all_results = transport.list("results/").unwrap();
        assert_eq!(all_results.len(), 3);

        let partial = transport.list("results/runs/a").unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].size, 1);

        assert!(transport.list("missing/").unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());

        transport.put("k.json", b"1").unwrap();
        transport.delete("k.json").unwrap();
        transport.delete("k.json").unwrap();
        assert!(!transport.exists("k.json").unwrap());

        transport.put("m/1", b"1").unwrap();
        transport.put("m/2", b"2").unwrap();
        let removed = transport
            .delete_many(&["m/1".to_string(), "m/2".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(transport.list("m/").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());
        assert!(matches!(
            transport.put("../escape", b"x"),
            Err(TransportError::InvalidKey(_, _))
        ));
    }

    #[test]
    fn test_append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LocalTransport::new(dir.path());
        assert!(transport.supports_append());

        transport.append("results/runs/r.csv", b"a,b\n").unwrap();
        transport.append("results/runs/r.csv", b"1,2\n").unwrap();
        transport.append("results/runs/r.csv", b"3,4\n").unwrap();
        assert_eq!(transport.get("results/runs/r.csv").unwrap(), b"a,b\n1,2\n3,4\n");
        assert!(transport.append("../r.csv", b"x").is_err());
    }
}
