use std::collections::HashMap;

use crate::config::Category;

/// In-memory mirror of the folder-membership index: category name to the
/// ordered item ids it currently holds. The relational store is written
/// first and always wins; this mirror exists so list queries never touch
/// the database on the hot path.
#[derive(Debug, Default)]
pub struct CategoryMirror {
    by_category: HashMap<String, Vec<String>>,
}

impl CategoryMirror {
    pub fn rebuild(rows: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut mirror = Self::default();
        for (item_id, category) in rows {
            mirror.append_raw(&category, &item_id);
        }
        mirror
    }

    /// Idempotent: appending an id already present in the category is a
    /// no-op, so replayed moves never produce duplicates.
    pub fn append(&mut self, category: &Category, item_id: &str) {
        self.append_raw(category.name(), item_id);
    }

    /// Idempotent: removing an absent id is a no-op.
    pub fn remove(&mut self, category: &Category, item_id: &str) {
        if let Some(items) = self.by_category.get_mut(category.name()) {
            items.retain(|existing| existing != item_id);
        }
    }

    pub fn items(&self, category: &Category) -> &[String] {
        self.by_category
            .get(category.name())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, category: &Category, item_id: &str) -> bool {
        self.items(category).iter().any(|id| id == item_id)
    }

    pub fn clear(&mut self) {
        self.by_category.clear();
    }

    fn append_raw(&mut self, category: &str, item_id: &str) {
        let items = self.by_category.entry(category.to_string()).or_default();
        if !items.iter().any(|existing| existing == item_id) {
            items.push(item_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> Category {
        Category::parse(name).unwrap()
    }

    #[test]
    fn append_and_remove_are_idempotent() {
        let mut mirror = CategoryMirror::default();
        let real = category("real");

        mirror.append(&real, "item-1");
        mirror.append(&real, "item-1");
        assert_eq!(mirror.items(&real), ["item-1"]);

        mirror.remove(&real, "item-1");
        mirror.remove(&real, "item-1");
        assert!(mirror.items(&real).is_empty());
    }

    #[test]
    fn same_category_move_leaves_no_duplicates() {
        let mut mirror = CategoryMirror::default();
        let real = category("real");
        mirror.append(&real, "item-1");
        mirror.append(&real, "item-2");

        // A move from "real" to "real" replays remove-then-append.
        mirror.remove(&real, "item-1");
        mirror.append(&real, "item-1");

        let items = mirror.items(&real);
        assert_eq!(items.iter().filter(|id| *id == "item-1").count(), 1);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn rebuild_groups_rows_by_category() {
        let mirror = CategoryMirror::rebuild([
            ("item-1".to_string(), "real".to_string()),
            ("item-2".to_string(), "bad".to_string()),
            ("item-3".to_string(), "real".to_string()),
            ("item-1".to_string(), "real".to_string()),
        ]);

        assert_eq!(mirror.items(&category("real")), ["item-1", "item-3"]);
        assert_eq!(mirror.items(&category("bad")), ["item-2"]);
        assert!(!mirror.contains(&category("bad"), "item-1"));
    }
}
