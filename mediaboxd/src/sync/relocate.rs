use super::engine::{EngineError, SyncEngine};
use super::identity;
use super::paths;
use crate::config::Category;

impl SyncEngine {
    /// Relocates a batch of items. Per-item failures are isolated: a
    /// missing item or a stuck row never aborts the rest of the batch. The
    /// return value is the number of items actually moved.
    pub async fn move_items(
        &self,
        item_ids: &[String],
        from: &Category,
        to: &Category,
    ) -> Result<usize, EngineError> {
        self.progress.begin(&format!(
            "moving {} items from {from} to {to}",
            item_ids.len()
        ));
        let total = item_ids.len().max(1);
        let mut moved = 0usize;
        for (i, item_id) in item_ids.iter().enumerate() {
            match self.move_item(item_id, from, to).await {
                Ok(()) => moved += 1,
                Err(EngineError::NotFound(context)) => {
                    eprintln!("[mediaboxd] move skipped: {context}");
                }
                Err(err) => {
                    eprintln!("[mediaboxd] move failed: item={item_id} err={err}");
                    self.progress.record_error(&format!("move {item_id}: {err}"));
                }
            }
            self.progress.update(
                &format!("moving items from {from} to {to}"),
                (((i + 1) * 100) / total) as u8,
            );
            self.yield_step("move", Some(item_id.clone())).await;
        }
        self.progress
            .finish(&format!("moved {moved} of {} items", item_ids.len()));
        Ok(moved)
    }

    /// One cross-category relocation. The relational index is written
    /// first and is never rolled back: if the physical file turns out to
    /// be missing the index is allowed to run ahead of the filesystem
    /// until the next reconciliation pass repairs the difference.
    pub async fn move_item(
        &self,
        item_id: &str,
        from: &Category,
        to: &Category,
    ) -> Result<(), EngineError> {
        let entry = self
            .lock_pairs()
            .get(item_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no cached pair for item {item_id}")))?;

        // 1. Relational store, retried on lock contention.
        self.index.set_category(item_id, to).await?;

        // 2. Mirror, after the store. Both halves are idempotent.
        {
            let mut mirror = self.lock_mirror();
            mirror.remove(from, item_id);
            mirror.append(to, item_id);
        }
        self.lock_pairs().set_category(item_id, to);

        if from == to {
            return Ok(());
        }

        // 3. Physical file, annotation companion included.
        let source = paths::media_path(&self.library_root, from, &entry.media_name)?;
        let target = paths::media_path(&self.library_root, to, &entry.media_name)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::rename(&source, &target).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(format!(
                    "source file missing: {}",
                    source.display()
                )));
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(annotation) = &entry.annotation_name {
            let annotation_source = paths::media_path(&self.library_root, from, annotation)?;
            let annotation_target = paths::media_path(&self.library_root, to, annotation)?;
            if let Err(err) = tokio::fs::rename(&annotation_source, &annotation_target).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                return Err(err.into());
            }
        }

        // 4. Both local manifests.
        let key = identity::sanitize(&entry.media_name);
        let mut from_manifest = self.manifests.load_local(from)?;
        let carried = from_manifest.remove(&key);
        let hash = match carried {
            Some(hash) => hash,
            None => identity::content_hash(&target).await?,
        };
        let mut to_manifest = self.manifests.load_local(to)?;
        to_manifest.insert(key, hash);
        self.manifests.save_local(from, &from_manifest)?;
        self.manifests.save_local(to, &to_manifest)?;

        eprintln!("[mediaboxd] moved {item_id} from {from} to {to}");
        Ok(())
    }
}
