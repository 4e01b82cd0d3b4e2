use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::now_unix;
use crate::config::Category;

/// A writer that crashed mid-save leaves its tmp file behind; anything
/// older than this is reclaimed instead of blocking saves forever.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

pub type LocalManifest = BTreeMap<String, String>;
pub type RemoteManifest = BTreeMap<String, RemoteEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub md5: String,
    pub remote_id: String,
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("manifest serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("manifest is locked by another writer: {0}")]
    Locked(PathBuf),
}

/// Per-category hash manifests. These are reconciliation caches, never
/// sources of truth: a manifest that cannot be parsed is shunted to a
/// backup path and treated as empty, and every mapping is rebuildable from
/// a directory scan.
pub struct ManifestStore {
    root: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn local_path(&self, category: &Category) -> PathBuf {
        self.root.join(format!("{}.manifest.json", category.name()))
    }

    pub fn remote_path(&self, category: &Category) -> PathBuf {
        self.root.join(format!("{}.remote.json", category.name()))
    }

    pub fn load_local(&self, category: &Category) -> Result<LocalManifest, ManifestError> {
        self.load(&self.local_path(category))
    }

    pub fn load_remote(&self, category: &Category) -> Result<RemoteManifest, ManifestError> {
        self.load(&self.remote_path(category))
    }

    pub fn save_local(
        &self,
        category: &Category,
        manifest: &LocalManifest,
    ) -> Result<(), ManifestError> {
        self.save(&self.local_path(category), manifest)
    }

    pub fn save_remote(
        &self,
        category: &Category,
        manifest: &RemoteManifest,
    ) -> Result<(), ManifestError> {
        self.save(&self.remote_path(category), manifest)
    }

    fn load<T>(&self, path: &Path) -> Result<T, ManifestError>
    where
        T: Default + serde::de::DeserializeOwned,
    {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                // Keep the original bytes around; the cache is disposable,
                // the evidence is not.
                let backup = backup_path(path);
                if fs::rename(path, &backup).is_ok() {
                    eprintln!(
                        "[mediaboxd] unreadable manifest moved to {}",
                        backup.display()
                    );
                }
                Ok(T::default())
            }
        }
    }

    /// Temp file + exclusive creation + atomic rename: concurrent readers
    /// never observe a partial write, and a second concurrent writer gets
    /// `ManifestError::Locked` instead of clobbering the first.
    fn save<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), ManifestError> {
        fs::create_dir_all(&self.root)?;
        let tmp = tmp_path(path);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&tmp) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if !is_stale(&tmp) {
                    return Err(ManifestError::Locked(path.to_path_buf()));
                }
                fs::remove_file(&tmp)?;
                OpenOptions::new().write(true).create_new(true).open(&tmp)?
            }
            Err(err) => return Err(err.into()),
        };
        let result = (|| {
            file.write_all(&serde_json::to_vec_pretty(value)?)?;
            file.flush()?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        drop(file);
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut out = path.as_os_str().to_os_string();
    out.push(".tmp");
    PathBuf::from(out)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut out = path.as_os_str().to_os_string();
    out.push(format!(".corrupt-{}", now_unix()));
    PathBuf::from(out)
}

fn is_stale(tmp: &Path) -> bool {
    let Ok(meta) = fs::metadata(tmp) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    modified
        .elapsed()
        .map(|age| age >= STALE_LOCK_AGE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn category(name: &str) -> Category {
        Category::parse(name).unwrap()
    }

    #[test]
    fn local_manifest_round_trips() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = LocalManifest::new();
        manifest.insert("a.jpg".into(), "aa11".into());
        manifest.insert("b.jpg".into(), "bb22".into());

        store.save_local(&category("real"), &manifest).unwrap();
        let loaded = store.load_local(&category("real")).unwrap();

        assert_eq!(loaded, manifest);
    }

    #[test]
    fn remote_manifest_round_trips() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = RemoteManifest::new();
        manifest.insert(
            "a.jpg".into(),
            RemoteEntry {
                md5: "aa11".into(),
                remote_id: "obj-1".into(),
            },
        );

        store.save_remote(&category("real"), &manifest).unwrap();
        let loaded = store.load_remote(&category("real")).unwrap();

        assert_eq!(loaded, manifest);
    }

    #[test]
    fn missing_manifest_loads_empty() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(store.load_local(&category("real")).unwrap().is_empty());
        assert!(store.load_remote(&category("real")).unwrap().is_empty());
    }

    #[test]
    fn corrupt_manifest_loads_empty_and_keeps_backup() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let path = store.local_path(&category("real"));
        let original: &[u8] = &[0xff, 0xfe, b'{', b'o', b'o', b'p', b's'];
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(&path, original).unwrap();

        let loaded = store.load_local(&category("real")).unwrap();

        assert!(loaded.is_empty());
        assert!(!path.exists());
        let backup = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .find(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .contains(".corrupt-")
            })
            .expect("backup file exists");
        assert_eq!(fs::read(backup.path()).unwrap(), original);
    }

    #[test]
    fn save_refuses_when_tmp_is_held_by_live_writer() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let manifest = LocalManifest::new();
        let tmp = tmp_path(&store.local_path(&category("real")));
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(&tmp, b"in flight").unwrap();

        let err = store.save_local(&category("real"), &manifest).unwrap_err();

        assert!(matches!(err, ManifestError::Locked(_)));
    }

    #[test]
    fn save_replaces_previous_contents_atomically() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = LocalManifest::new();
        manifest.insert("a.jpg".into(), "aa11".into());
        store.save_local(&category("real"), &manifest).unwrap();

        manifest.insert("b.jpg".into(), "bb22".into());
        manifest.remove("a.jpg");
        store.save_local(&category("real"), &manifest).unwrap();

        let loaded = store.load_local(&category("real")).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("b.jpg").map(String::as_str), Some("bb22"));
        assert!(!tmp_path(&store.local_path(&category("real"))).exists());
    }
}
