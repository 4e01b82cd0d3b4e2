use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use time::OffsetDateTime;
use time::macros::format_description;

use super::engine::{EngineError, SyncEngine};
use super::identity;
use super::pairs::PairCache;
use super::paths;
use crate::config::Category;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedFile {
    pub category: Category,
    pub name: String,
    pub quarantined_to: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupeReport {
    pub groups: usize,
    pub quarantined: Vec<QuarantinedFile>,
}

impl SyncEngine {
    /// Global duplicate finder: groups every media file across every
    /// category by content hash, keeps one canonical copy per hash and
    /// moves the rest into a timestamped quarantine run directory. Nothing
    /// is deleted, so the pass is reversible by hand.
    pub async fn quarantine_duplicates(&self) -> Result<DedupeReport, EngineError> {
        self.progress.begin("dedupe: hashing library");
        let result = self.quarantine_duplicates_inner().await;
        match &result {
            Ok(report) => self.progress.finish(&format!(
                "dedupe complete: {} duplicate groups, {} files quarantined",
                report.groups,
                report.quarantined.len()
            )),
            Err(err) => {
                self.progress.record_error(&err.to_string());
                self.progress.finish("dedupe failed");
            }
        }
        result
    }

    async fn quarantine_duplicates_inner(&self) -> Result<DedupeReport, EngineError> {
        let categories: Vec<Category> = self.categories.iter().cloned().collect();

        // BTreeMap keeps group iteration deterministic.
        let mut by_hash: BTreeMap<String, Vec<(Category, String)>> = BTreeMap::new();
        let total_categories = categories.len().max(1);
        for (i, category) in categories.iter().enumerate() {
            self.progress.update(
                "dedupe: hashing library",
                ((i * 50) / total_categories) as u8,
            );
            for name in self.scan_category(category).await? {
                if !identity::is_media_name(&name) {
                    continue;
                }
                let path = paths::media_path(&self.library_root, category, &name)?;
                match identity::content_hash(&path).await {
                    Ok(hash) => by_hash
                        .entry(hash)
                        .or_default()
                        .push((category.clone(), name.clone())),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        eprintln!("[mediaboxd] file vanished during scan: {}", path.display());
                    }
                    Err(err) => return Err(err.into()),
                }
                self.yield_step("dedupe-scan", Some(name)).await;
            }
        }

        let run_stamp = OffsetDateTime::now_utc()
            .format(format_description!("[year][month][day]-[hour][minute][second]"))?;
        let mut report = DedupeReport::default();
        let mut touched: HashSet<String> = HashSet::new();

        self.progress.update("dedupe: quarantining duplicates", 50);
        for (_, mut group) in by_hash {
            if group.len() < 2 {
                continue;
            }
            report.groups += 1;
            group.sort_by_key(|(category, name)| canonical_rank(category, name));
            for (category, name) in group.into_iter().skip(1) {
                let quarantined_to = self
                    .quarantine_file(&run_stamp, &category, &name)
                    .await?;
                eprintln!(
                    "[mediaboxd] duplicate quarantined: {name} from {category} to {}",
                    quarantined_to.display()
                );
                touched.insert(category.name().to_string());
                report.quarantined.push(QuarantinedFile {
                    category,
                    name,
                    quarantined_to,
                });
                self.yield_step("dedupe", None).await;
            }
        }

        // Quarantining changed the directories; refresh the affected
        // manifests from disk and rebuild the pair cache.
        for category in &categories {
            if touched.contains(category.name()) {
                self.refresh_local_manifest(category).await?;
            }
        }
        if !touched.is_empty() {
            self.rebuild_pairs().await?;
        }
        Ok(report)
    }

    async fn quarantine_file(
        &self,
        run_stamp: &str,
        category: &Category,
        name: &str,
    ) -> Result<PathBuf, EngineError> {
        let source = paths::media_path(&self.library_root, category, name)?;
        let mut target = paths::quarantine_path(&self.quarantine_root, run_stamp, category, name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&target).await? {
            target = target.with_file_name(format!("{}.{}", name, super::now_unix()));
        }
        tokio::fs::rename(&source, &target).await?;
        Ok(target)
    }

    pub(super) async fn rebuild_pairs(&self) -> Result<(), EngineError> {
        let listings = self.scan_all().await?;
        let cache = PairCache::rebuild(
            listings
                .iter()
                .map(|(category, names)| (category, names.clone())),
        );
        *self.lock_pairs() = cache;
        Ok(())
    }
}

/// Canonical copy selection: shortest sanitized name, then lexicographic,
/// preferring a file whose on-disk name is already canonical.
fn canonical_rank(category: &Category, name: &str) -> (usize, String, bool, String, String) {
    let sanitized = identity::sanitize(name);
    (
        sanitized.len(),
        sanitized.clone(),
        name != sanitized,
        name.to_string(),
        category.name().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> Category {
        Category::parse(name).unwrap()
    }

    #[test]
    fn canonical_rank_prefers_shortest_then_lexicographic() {
        let real = category("real");
        let mut names = vec![
            (real.clone(), "bb.jpg".to_string()),
            (real.clone(), "a-long-name.jpg".to_string()),
            (real.clone(), "aa.jpg".to_string()),
        ];
        names.sort_by_key(|(c, n)| canonical_rank(c, n));
        assert_eq!(names[0].1, "aa.jpg");
        assert_eq!(names[1].1, "bb.jpg");
        assert_eq!(names[2].1, "a-long-name.jpg");
    }

    #[test]
    fn canonical_rank_prefers_already_canonical_names() {
        let real = category("real");
        let mut names = vec![
            (real.clone(), "A.JPG".to_string()),
            (real.clone(), "a.jpg".to_string()),
        ];
        names.sort_by_key(|(c, n)| canonical_rank(c, n));
        assert_eq!(names[0].1, "a.jpg");
    }
}
