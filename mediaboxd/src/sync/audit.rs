use std::collections::HashMap;

use super::engine::{EngineError, SyncEngine};
use super::identity;
use super::mirror::CategoryMirror;
use super::paths;
use crate::config::Category;

/// Index/filesystem/manifest disagreements surfaced by the audit pass.
/// Warnings are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyWarning {
    /// An indexed item has no file anywhere in the library.
    MissingFile { item_id: String, category: String },
    /// A file sat in a different directory than its index row; the index
    /// wins and the file was moved.
    RelocatedFile {
        item_id: String,
        from: String,
        to: String,
    },
    /// A manifest named a file that no longer exists; the entry was dropped.
    DanglingManifestEntry { category: String, name: String },
    /// A file on disk had no index row; membership was recorded.
    UnindexedFile { item_id: String, category: String },
    /// An index row references a category that is no longer configured.
    UnknownCategory { item_id: String, category: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub warnings: Vec<ConsistencyWarning>,
    pub repaired: usize,
}

impl SyncEngine {
    /// Idempotent consistency check. The relational index is the source of
    /// truth for membership: files found under the wrong category are
    /// moved to match it, unindexed files get a row, dangling manifest
    /// entries are dropped. What cannot be repaired is only reported.
    pub async fn audit(&self) -> Result<AuditReport, EngineError> {
        self.progress.begin("audit: scanning library");
        let result = self.audit_inner().await;
        match &result {
            Ok(report) => self.progress.finish(&format!(
                "audit complete: {} warnings, {} repaired",
                report.warnings.len(),
                report.repaired
            )),
            Err(err) => {
                self.progress.record_error(&err.to_string());
                self.progress.finish("audit failed");
            }
        }
        result
    }

    async fn audit_inner(&self) -> Result<AuditReport, EngineError> {
        let listings = self.scan_all().await?;
        let mut report = AuditReport::default();

        // item id -> (category, on-disk media name); first sighting wins,
        // extra copies are the duplicate pass's business.
        let mut disk: HashMap<String, (Category, String)> = HashMap::new();
        for (category, names) in &listings {
            for name in names {
                if !identity::is_media_name(name) {
                    continue;
                }
                disk.entry(identity::item_id_for(name))
                    .or_insert_with(|| (category.clone(), name.clone()));
            }
        }

        for (item_id, category_name) in self.index.all_rows().await? {
            let Some(expected) = self.categories.resolve(&category_name).cloned() else {
                eprintln!(
                    "[mediaboxd] audit: item {item_id} indexed under unconfigured category {category_name}"
                );
                report.warnings.push(ConsistencyWarning::UnknownCategory {
                    item_id,
                    category: category_name,
                });
                continue;
            };
            match disk.get(&item_id) {
                Some((found, _)) if *found == expected => {}
                Some((found, name)) => {
                    self.repair_location(&item_id, name, found, &expected).await?;
                    report.warnings.push(ConsistencyWarning::RelocatedFile {
                        item_id,
                        from: found.name().to_string(),
                        to: expected.name().to_string(),
                    });
                    report.repaired += 1;
                }
                None => {
                    eprintln!(
                        "[mediaboxd] audit: no file for indexed item {item_id} ({category_name})"
                    );
                    report.warnings.push(ConsistencyWarning::MissingFile {
                        item_id,
                        category: category_name,
                    });
                }
            }
            self.yield_step("audit", None).await;
        }

        for (item_id, (category, _)) in &disk {
            if self.index.get_category(item_id).await?.is_none() {
                self.index.set_category(item_id, category).await?;
                report.warnings.push(ConsistencyWarning::UnindexedFile {
                    item_id: item_id.clone(),
                    category: category.name().to_string(),
                });
                report.repaired += 1;
            }
        }

        // Manifests are caches: entries with no backing file are dropped.
        for (category, names) in &listings {
            let on_disk: std::collections::HashSet<String> = names
                .iter()
                .filter(|name| identity::is_media_name(name))
                .map(|name| identity::sanitize(name))
                .collect();
            let mut manifest = self.manifests.load_local(category)?;
            let dangling: Vec<String> = manifest
                .keys()
                .filter(|name| !on_disk.contains(*name))
                .cloned()
                .collect();
            if dangling.is_empty() {
                continue;
            }
            for name in dangling {
                manifest.remove(&name);
                report.warnings.push(ConsistencyWarning::DanglingManifestEntry {
                    category: category.name().to_string(),
                    name,
                });
                report.repaired += 1;
            }
            self.manifests.save_local(category, &manifest)?;
        }

        // Repairs may have shuffled files; rebuild the in-process caches
        // from the stores they mirror.
        *self.lock_mirror() = CategoryMirror::rebuild(self.index.all_rows().await?);
        self.rebuild_pairs().await?;
        Ok(report)
    }

    async fn repair_location(
        &self,
        item_id: &str,
        name: &str,
        found: &Category,
        expected: &Category,
    ) -> Result<(), EngineError> {
        eprintln!(
            "[mediaboxd] audit: moving {name} from {found} to {expected} to match index row {item_id}"
        );
        let source = paths::media_path(&self.library_root, found, name)?;
        let target = paths::media_path(&self.library_root, expected, name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        }
        let annotation = format!("{}.txt", identity::item_id_for(name));
        let annotation_source = paths::media_path(&self.library_root, found, &annotation)?;
        if tokio::fs::try_exists(&annotation_source).await? {
            let annotation_target = paths::media_path(&self.library_root, expected, &annotation)?;
            tokio::fs::rename(&annotation_source, &annotation_target).await?;
        }
        Ok(())
    }
}
