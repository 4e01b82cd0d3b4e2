use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use mediabox_core::{VaultClient, VaultError};
use thiserror::Error;

use super::backoff::{Backoff, RetryPolicy};
use super::index::{FolderIndex, IndexError};
use super::manifest::{ManifestError, ManifestStore};
use super::mirror::CategoryMirror;
use super::pairs::PairCache;
use super::paths::{self, PathError};
use super::progress::{ProgressChannel, ProgressSnapshot, StepEvent};
use crate::config::{Category, CategorySet, EngineConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("api error: {0}")]
    Api(#[from] VaultError),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp format error: {0}")]
    Stamp(#[from] time::error::Format),
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Final accounting of a batch pass. Per-item failures land here instead
/// of aborting the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn absorb(&mut self, other: BatchSummary) {
        self.succeeded += other.succeeded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// One engine instance per collection. Owns the remote client, the
/// relational index, the manifest store, and the in-process caches (pair
/// cache, category mirror, progress record) so independent collections can
/// coexist in one process.
pub struct SyncEngine {
    pub(super) client: VaultClient,
    pub(super) index: FolderIndex,
    pub(super) manifests: ManifestStore,
    pub(super) categories: CategorySet,
    pub(super) library_root: PathBuf,
    pub(super) quarantine_root: PathBuf,
    pub(super) retry: RetryPolicy,
    pub(super) page_size: u32,
    pub(super) pairs: Mutex<PairCache>,
    pub(super) mirror: Mutex<CategoryMirror>,
    pub(super) progress: ProgressChannel,
}

impl SyncEngine {
    pub fn new(
        client: VaultClient,
        index: FolderIndex,
        manifests: ManifestStore,
        categories: CategorySet,
        library_root: PathBuf,
        quarantine_root: PathBuf,
    ) -> Self {
        Self {
            client,
            index,
            manifests,
            categories,
            library_root,
            quarantine_root,
            retry: RetryPolicy::default(),
            page_size: 200,
            pairs: Mutex::new(PairCache::default()),
            mirror: Mutex::new(CategoryMirror::default()),
            progress: ProgressChannel::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = match &config.api_base {
            Some(base) => VaultClient::with_base_url(base, &config.token)?,
            None => VaultClient::new(&config.token)?,
        };
        let retry = RetryPolicy::new(
            config.retry_attempts,
            Backoff::new(config.retry_base, config.retry_max, true),
        );
        let index = FolderIndex::open_at(&config.db_path)
            .await?
            .with_retry_policy(retry);
        let manifests = ManifestStore::new(&config.manifest_root);
        Ok(Self::new(
            client,
            index,
            manifests,
            config.categories.clone(),
            config.library_root.clone(),
            config.quarantine_root.clone(),
        )
        .with_retry_policy(retry)
        .with_page_size(config.page_size))
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn progress_channel(&self) -> &ProgressChannel {
        &self.progress
    }

    /// Membership query for the serving layer. A row whose category is no
    /// longer configured resolves to absent rather than failing the caller.
    pub async fn category_of(&self, item_id: &str) -> Result<Option<Category>, EngineError> {
        let Some(name) = self.index.get_category(item_id).await? else {
            return Ok(None);
        };
        match self.categories.resolve(&name) {
            Some(category) => Ok(Some(category.clone())),
            None => {
                eprintln!("[mediaboxd] item {item_id} is indexed under unconfigured category {name}");
                Ok(None)
            }
        }
    }

    pub async fn flagged_count(&self, category: &Category, flag: &str) -> Result<i64, EngineError> {
        Ok(self.index.count_flagged(category, flag).await?)
    }

    pub async fn set_flag(
        &self,
        item_id: &str,
        flag: &str,
        checked: bool,
    ) -> Result<(), EngineError> {
        Ok(self.index.set_flag(item_id, flag, checked).await?)
    }

    pub async fn set_annotation(
        &self,
        item_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        Ok(self.index.set_annotation(item_id, field, value).await?)
    }

    pub async fn annotation(
        &self,
        item_id: &str,
        field: &str,
    ) -> Result<Option<String>, EngineError> {
        Ok(self.index.get_annotation(item_id, field).await?)
    }

    /// Slow startup path, intended to run once in a spawned task. Rebuilds
    /// the pair cache from a directory scan, then the mirror: from the
    /// relational store when it already holds rows, otherwise from the scan
    /// with the result written back so the expensive path runs at most once
    /// per collection.
    pub async fn bootstrap(&self) -> Result<usize, EngineError> {
        self.progress.begin("bootstrap: scanning library");
        for category in self.categories.iter() {
            tokio::fs::create_dir_all(paths::category_dir(&self.library_root, category)).await?;
        }
        tokio::fs::create_dir_all(&self.quarantine_root).await?;

        let listings = self.scan_all().await?;
        let cache = PairCache::rebuild(
            listings
                .iter()
                .map(|(category, names)| (category, names.clone())),
        );
        let item_count = cache.len();

        let mirror = if !self.index.is_empty().await? {
            CategoryMirror::rebuild(self.index.all_rows().await?)
        } else {
            self.progress
                .update("bootstrap: seeding membership index", 50);
            let mut seeded = CategoryMirror::default();
            for (category, names) in &listings {
                for name in names {
                    if !super::identity::is_media_name(name) {
                        continue;
                    }
                    let item_id = super::identity::item_id_for(name);
                    // set_category carries the retry-on-contention policy.
                    self.index.set_category(&item_id, category).await?;
                    seeded.append(category, &item_id);
                    self.yield_step("bootstrap", Some(name.clone())).await;
                }
            }
            seeded
        };

        *self.lock_pairs() = cache;
        *self.lock_mirror() = mirror;
        self.progress
            .finish(&format!("bootstrap complete: {item_count} items"));
        eprintln!("[mediaboxd] bootstrap complete: {item_count} items");
        Ok(item_count)
    }

    /// Items currently mirrored for a category, without touching the store.
    pub fn mirrored_items(&self, category: &Category) -> Vec<String> {
        self.lock_mirror().items(category).to_vec()
    }

    pub(super) async fn scan_all(&self) -> Result<Vec<(Category, Vec<String>)>, EngineError> {
        let mut listings = Vec::with_capacity(self.categories.len());
        for category in self.categories.iter() {
            let names = self.scan_category(category).await?;
            listings.push((category.clone(), names));
        }
        Ok(listings)
    }

    /// Raw file names (media and annotations) in a category directory,
    /// sorted for deterministic passes. Internal artifacts are skipped.
    pub(super) async fn scan_category(
        &self,
        category: &Category,
    ) -> Result<Vec<String>, EngineError> {
        let dir = paths::category_dir(&self.library_root, category);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(".tmp") || name.ends_with(".partial") {
                continue;
            }
            if super::identity::is_media_name(&name) || super::identity::is_annotation_name(&name)
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Bounded retry wrapper for remote calls. A server-provided
    /// `Retry-After` overrides the computed backoff; non-retryable errors
    /// surface immediately. Errors stay per item; callers isolate them.
    pub(super) async fn retry_remote<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T, VaultError>
    where
        Fut: Future<Output = Result<T, VaultError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.is_retryable()
                        && attempt.saturating_add(1) < self.retry.max_attempts() =>
                {
                    let delay = err
                        .retry_after_secs()
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.delay(attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One unit of work finished: notify any subscribed observer and yield
    /// so a concurrent poller gets scheduled.
    pub(super) async fn yield_step(&self, pass: &'static str, item: Option<String>) {
        self.progress.step(StepEvent { pass, item });
        tokio::task::yield_now().await;
    }

    pub(super) fn lock_pairs(&self) -> std::sync::MutexGuard<'_, PairCache> {
        self.pairs.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub(super) fn lock_mirror(&self) -> std::sync::MutexGuard<'_, CategoryMirror> {
        self.mirror.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Sanitized-name to on-disk-name mapping for one category, derived
    /// from a scan listing.
    pub(super) fn raw_name_map(names: &[String]) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(names.len());
        for name in names {
            // Last writer wins, matching manifest refresh order over the
            // same sorted listing.
            map.insert(super::identity::sanitize(name), name.clone());
        }
        map
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
