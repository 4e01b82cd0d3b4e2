use std::collections::HashMap;

use super::identity;
use crate::config::Category;

/// One media file plus its optional companion annotation, keyed by the
/// derived item id they share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairEntry {
    pub item_id: String,
    pub media_name: String,
    pub annotation_name: Option<String>,
    pub category: Category,
}

/// Filename-to-item cache rebuilt from directory scans. Purely an
/// in-process convenience; the folder index remains the source of truth
/// for membership.
#[derive(Debug, Default)]
pub struct PairCache {
    by_id: HashMap<String, PairEntry>,
}

impl PairCache {
    /// Builds the cache from raw directory listings. Media files become
    /// entries; annotation files attach to the media entry in the same
    /// category that shares their stem, and are dropped otherwise.
    pub fn rebuild<'a>(
        listings: impl IntoIterator<Item = (&'a Category, Vec<String>)>,
    ) -> Self {
        let mut cache = Self::default();
        let mut annotations: Vec<(Category, String)> = Vec::new();
        for (category, names) in listings {
            for name in names {
                if identity::is_media_name(&name) {
                    cache.insert(PairEntry {
                        item_id: identity::item_id_for(&name),
                        media_name: name,
                        annotation_name: None,
                        category: category.clone(),
                    });
                } else if identity::is_annotation_name(&name) {
                    annotations.push((category.clone(), name));
                }
            }
        }
        for (category, name) in annotations {
            let item_id = identity::item_id_for(&name);
            if let Some(entry) = cache.by_id.get_mut(&item_id)
                && entry.category == category
            {
                entry.annotation_name = Some(name);
            }
        }
        cache
    }

    pub fn insert(&mut self, entry: PairEntry) {
        self.by_id.insert(entry.item_id.clone(), entry);
    }

    pub fn get(&self, item_id: &str) -> Option<&PairEntry> {
        self.by_id.get(item_id)
    }

    pub fn remove(&mut self, item_id: &str) -> Option<PairEntry> {
        self.by_id.remove(item_id)
    }

    pub fn set_category(&mut self, item_id: &str, category: &Category) -> bool {
        match self.by_id.get_mut(item_id) {
            Some(entry) => {
                entry.category = category.clone();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PairEntry> {
        self.by_id.values()
    }
}
