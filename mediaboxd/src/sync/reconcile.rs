use std::collections::{HashMap, HashSet};

use mediabox_core::VaultError;

use super::engine::{BatchSummary, EngineError, SyncEngine};
use super::identity;
use super::manifest::{LocalManifest, RemoteEntry, RemoteManifest};
use super::pairs::PairEntry;
use super::paths;
use crate::config::Category;

/// Snapshot of one category directory: the freshly hashed manifest plus
/// the sanitized-name to on-disk-name mapping the manifest keys lose.
pub(super) struct LocalScan {
    pub manifest: LocalManifest,
    pub raw_names: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RemoteLocation {
    pub category: Category,
    pub name: String,
    pub remote_id: String,
}

/// Remote listings for every category, with a cross-category hash view so
/// content that already exists under the wrong folder is moved instead of
/// re-uploaded.
#[derive(Debug, Default)]
pub(super) struct RemoteCatalog {
    manifests: HashMap<String, RemoteManifest>,
    by_hash: HashMap<String, RemoteLocation>,
}

impl RemoteCatalog {
    fn insert(&mut self, category: &Category, name: String, entry: RemoteEntry) {
        self.by_hash
            .entry(entry.md5.clone())
            .or_insert_with(|| RemoteLocation {
                category: category.clone(),
                name: name.clone(),
                remote_id: entry.remote_id.clone(),
            });
        self.manifests
            .entry(category.name().to_string())
            .or_default()
            .insert(name, entry);
    }

    pub(super) fn manifest(&self, category: &Category) -> RemoteManifest {
        self.manifests
            .get(category.name())
            .cloned()
            .unwrap_or_default()
    }

    fn find_by_hash(&self, hash: &str) -> Option<&RemoteLocation> {
        self.by_hash.get(hash)
    }

    /// Re-homes the catalog entry for `hash` into `to`, mirroring a remote
    /// move. The object keeps its remote name.
    fn relocate(&mut self, hash: &str, to: &Category) {
        let Some(location) = self.by_hash.get_mut(hash) else {
            return;
        };
        let old_category = location.category.clone();
        let name = location.name.clone();
        location.category = to.clone();
        let Some(entry) = self
            .manifests
            .get_mut(old_category.name())
            .and_then(|manifest| manifest.remove(&name))
        else {
            return;
        };
        self.manifests
            .entry(to.name().to_string())
            .or_default()
            .insert(name, entry);
    }

    /// Write-through for an upload: replaces whatever the name pointed at.
    fn set_entry(&mut self, category: &Category, name: &str, entry: RemoteEntry) {
        self.by_hash
            .retain(|_, location| !(location.category == *category && location.name == name));
        self.by_hash.insert(
            entry.md5.clone(),
            RemoteLocation {
                category: category.clone(),
                name: name.to_string(),
                remote_id: entry.remote_id.clone(),
            },
        );
        self.manifests
            .entry(category.name().to_string())
            .or_default()
            .insert(name.to_string(), entry);
    }
}

enum Push {
    Done,
    Skipped,
}

impl SyncEngine {
    /// Full reconciliation over every configured category.
    pub async fn reconcile_all(&self) -> Result<BatchSummary, EngineError> {
        self.progress.begin("reconcile: listing remote folders");
        let result = self.reconcile_all_inner().await;
        self.finish_reconcile(&result);
        result
    }

    /// Reconciliation of a single category. The remote catalog still spans
    /// every category so cross-folder duplicates are detected.
    pub async fn reconcile_category(
        &self,
        category: &Category,
    ) -> Result<BatchSummary, EngineError> {
        self.progress
            .begin(&format!("reconcile: listing remote folders for {category}"));
        let result = async {
            let mut catalog = self.fetch_remote_catalog().await?;
            self.reconcile_category_with(category, &mut catalog).await
        }
        .await;
        self.finish_reconcile(&result);
        result
    }

    async fn reconcile_all_inner(&self) -> Result<BatchSummary, EngineError> {
        let categories: Vec<Category> = self.categories.iter().cloned().collect();
        let mut catalog = self.fetch_remote_catalog().await?;
        let mut total = BatchSummary::default();
        let count = categories.len().max(1);
        for (i, category) in categories.iter().enumerate() {
            self.progress
                .update(&format!("reconciling {category}"), ((i * 100) / count) as u8);
            let summary = self.reconcile_category_with(category, &mut catalog).await?;
            total.absorb(summary);
        }
        Ok(total)
    }

    fn finish_reconcile(&self, result: &Result<BatchSummary, EngineError>) {
        match result {
            Ok(summary) => {
                eprintln!(
                    "[mediaboxd] reconcile done: succeeded={} skipped={} failed={}",
                    summary.succeeded, summary.skipped, summary.failed
                );
                self.progress.finish(&format!(
                    "reconcile complete: {} succeeded, {} skipped, {} failed",
                    summary.succeeded, summary.skipped, summary.failed
                ));
            }
            Err(err) => {
                eprintln!("[mediaboxd] reconcile failed: {err}");
                self.progress.record_error(&err.to_string());
                self.progress.finish("reconcile failed");
            }
        }
    }

    /// Lists every category's remote folder to exhaustion and builds the
    /// cross-category hash view. Objects without a content hash cannot
    /// participate in identity decisions and are ignored.
    pub(super) async fn fetch_remote_catalog(&self) -> Result<RemoteCatalog, EngineError> {
        let mut catalog = RemoteCatalog::default();
        let categories: Vec<Category> = self.categories.iter().cloned().collect();
        for category in &categories {
            let folder_id = category.folder_id().to_string();
            let objects = self
                .retry_remote(|| self.client.list_objects_all(&folder_id, self.page_size))
                .await?;
            for object in objects {
                let Some(md5) = object.md5.clone() else {
                    eprintln!(
                        "[mediaboxd] remote object {} has no md5, ignoring",
                        object.id
                    );
                    continue;
                };
                let name = identity::sanitize(&object.name);
                if paths::safe_file_name(&name).is_err() {
                    eprintln!(
                        "[mediaboxd] remote object {} has unusable name {:?}, ignoring",
                        object.id, object.name
                    );
                    continue;
                }
                catalog.insert(
                    category,
                    name,
                    RemoteEntry {
                        md5: md5.to_ascii_lowercase(),
                        remote_id: object.id,
                    },
                );
            }
            self.yield_step("list", Some(category.name().to_string()))
                .await;
        }
        Ok(catalog)
    }

    /// Re-hashes a category directory and persists the fresh local
    /// manifest. The manifest is a cache; the scan is authoritative.
    pub(super) async fn refresh_local_manifest(
        &self,
        category: &Category,
    ) -> Result<LocalScan, EngineError> {
        let names = self.scan_category(category).await?;
        let media: Vec<String> = names
            .into_iter()
            .filter(|name| identity::is_media_name(name))
            .collect();
        let raw_names = Self::raw_name_map(&media);
        let mut manifest = LocalManifest::new();
        let total = media.len().max(1);
        for (i, name) in media.iter().enumerate() {
            let path = paths::media_path(&self.library_root, category, name)?;
            match identity::content_hash(&path).await {
                Ok(hash) => {
                    manifest.insert(identity::sanitize(name), hash);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    eprintln!("[mediaboxd] file vanished during scan: {}", path.display());
                }
                Err(err) => return Err(err.into()),
            }
            self.progress
                .detail(category.name(), (((i + 1) * 1000) / total) as u16);
            self.yield_step("scan", Some(name.clone())).await;
        }
        self.manifests.save_local(category, &manifest)?;
        Ok(LocalScan {
            manifest,
            raw_names,
        })
    }

    pub(super) async fn reconcile_category_with(
        &self,
        category: &Category,
        catalog: &mut RemoteCatalog,
    ) -> Result<BatchSummary, EngineError> {
        let scan = self.refresh_local_manifest(category).await?;
        let mut local = scan.manifest.clone();
        let remote = catalog.manifest(category);

        let mut local_only = Vec::new();
        let mut mismatched = Vec::new();
        for (name, hash) in &local {
            match remote.get(name) {
                None => local_only.push((name.clone(), hash.clone())),
                Some(entry) if entry.md5 != *hash => mismatched.push((name.clone(), hash.clone())),
                Some(_) => {}
            }
        }
        let remote_only: Vec<(String, RemoteEntry)> = remote
            .iter()
            .filter(|(name, _)| !local.contains_key(*name))
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        let local_hashes: HashSet<String> = local.values().cloned().collect();
        let total = (local_only.len() + remote_only.len() + mismatched.len()).max(1);
        let mut done = 0usize;
        let mut summary = BatchSummary::default();

        for (name, hash) in local_only {
            match self
                .push_local_only(category, &scan, &name, &hash, catalog)
                .await
            {
                Ok(Push::Done) => summary.succeeded += 1,
                Ok(Push::Skipped) => summary.skipped += 1,
                Err(EngineError::NotFound(context)) => {
                    eprintln!("[mediaboxd] push skipped: {context}");
                    summary.skipped += 1;
                }
                Err(err) => {
                    self.note_item_failure("push", category, &name, &err);
                    summary.failed += 1;
                }
            }
            done += 1;
            self.progress
                .detail(category.name(), ((done * 1000) / total) as u16);
            self.yield_step("reconcile", Some(name)).await;
        }

        for (name, entry) in remote_only {
            if local_hashes.contains(&entry.md5) {
                // The content already lives in this category under another
                // name; nothing to fetch.
                summary.skipped += 1;
            } else {
                match self.pull_remote_only(category, &name, &entry).await {
                    Ok(()) => {
                        local.insert(name.clone(), entry.md5.clone());
                        summary.succeeded += 1;
                    }
                    Err(err) => {
                        self.note_item_failure("pull", category, &name, &err);
                        summary.failed += 1;
                    }
                }
            }
            done += 1;
            self.progress
                .detail(category.name(), ((done * 1000) / total) as u16);
            self.yield_step("reconcile", Some(name)).await;
        }

        for (name, hash) in mismatched {
            // Same name on both sides, different content: the local hash is
            // canonical, so write it through to the remote store.
            let superseded = remote.get(&name).cloned();
            match self
                .push_upload(category, &scan, &name, &hash, superseded.as_ref(), catalog)
                .await
            {
                Ok(()) => summary.succeeded += 1,
                Err(EngineError::NotFound(context)) => {
                    eprintln!("[mediaboxd] push skipped: {context}");
                    summary.skipped += 1;
                }
                Err(err) => {
                    self.note_item_failure("push", category, &name, &err);
                    summary.failed += 1;
                }
            }
            done += 1;
            self.progress
                .detail(category.name(), ((done * 1000) / total) as u16);
            self.yield_step("reconcile", Some(name)).await;
        }

        self.manifests.save_local(category, &local)?;
        self.manifests
            .save_remote(category, &catalog.manifest(category))?;
        Ok(summary)
    }

    async fn push_local_only(
        &self,
        category: &Category,
        scan: &LocalScan,
        name: &str,
        hash: &str,
        catalog: &mut RemoteCatalog,
    ) -> Result<Push, EngineError> {
        if let Some(location) = catalog.find_by_hash(hash).cloned() {
            if location.category == *category {
                // Same content, same folder, different name.
                return Ok(Push::Skipped);
            }
            let from_folder = location.category.folder_id().to_string();
            let to_folder = category.folder_id().to_string();
            self.retry_remote(|| {
                self.client
                    .move_object(&location.remote_id, &from_folder, &to_folder)
            })
            .await?;
            catalog.relocate(hash, category);
            eprintln!(
                "[mediaboxd] remote move: {} from {} to {}",
                location.name, location.category, category
            );
            return Ok(Push::Done);
        }
        self.push_upload(category, scan, name, hash, None, catalog)
            .await?;
        Ok(Push::Done)
    }

    /// Uploads local content under `name`. When the upload replaces an
    /// existing object (`superseded`), the old object is deleted afterwards
    /// so the folder does not accumulate stale copies; a failed delete only
    /// lingers until the next pass.
    async fn push_upload(
        &self,
        category: &Category,
        scan: &LocalScan,
        name: &str,
        hash: &str,
        superseded: Option<&RemoteEntry>,
        catalog: &mut RemoteCatalog,
    ) -> Result<(), EngineError> {
        let raw = scan
            .raw_names
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string());
        let source = paths::media_path(&self.library_root, category, &raw)?;
        let folder_id = category.folder_id().to_string();
        let object = match self
            .retry_remote(|| self.client.upload_object(&folder_id, name, &source))
            .await
        {
            Ok(object) => object,
            Err(VaultError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(format!(
                    "local file missing: {}",
                    source.display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(old) = superseded
            && old.remote_id != object.id
        {
            if let Err(err) = self
                .retry_remote(|| self.client.delete_object(&old.remote_id))
                .await
            {
                eprintln!(
                    "[mediaboxd] failed to delete superseded object {}: {err}",
                    old.remote_id
                );
            }
        }
        catalog.set_entry(
            category,
            name,
            RemoteEntry {
                md5: hash.to_string(),
                remote_id: object.id,
            },
        );
        eprintln!("[mediaboxd] uploaded {name} into {category}");
        Ok(())
    }

    async fn pull_remote_only(
        &self,
        category: &Category,
        name: &str,
        entry: &RemoteEntry,
    ) -> Result<(), EngineError> {
        let target = paths::media_path(&self.library_root, category, name)?;
        self.retry_remote(|| {
            self.client
                .download_object_to_path(&entry.remote_id, &target, Some(&entry.md5))
        })
        .await?;

        // A download is the first local sighting of this item; record its
        // membership right away.
        let item_id = identity::item_id_for(name);
        self.index.set_category(&item_id, category).await?;
        self.lock_mirror().append(category, &item_id);
        self.lock_pairs().insert(PairEntry {
            item_id,
            media_name: name.to_string(),
            annotation_name: None,
            category: category.clone(),
        });
        eprintln!("[mediaboxd] downloaded {name} into {category}");
        Ok(())
    }

    fn note_item_failure(&self, action: &str, category: &Category, name: &str, err: &EngineError) {
        eprintln!("[mediaboxd] {action} failed: category={category} name={name} err={err}");
        self.progress
            .record_error(&format!("{action} {name}: {err}"));
    }
}
