use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Category;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("file name is empty")]
    Empty,
    #[error("file name contains unsupported component: {0:?}")]
    UnsupportedComponent(String),
}

/// Rejects names that would escape a category directory. Remote object
/// names are untrusted input.
pub fn safe_file_name(name: &str) -> Result<&str, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(PathError::UnsupportedComponent(name.to_string()));
    }
    Ok(name)
}

pub fn category_dir(library_root: &Path, category: &Category) -> PathBuf {
    library_root.join(category.name())
}

pub fn media_path(
    library_root: &Path,
    category: &Category,
    name: &str,
) -> Result<PathBuf, PathError> {
    Ok(category_dir(library_root, category).join(safe_file_name(name)?))
}

pub fn quarantine_path(
    quarantine_root: &Path,
    run_stamp: &str,
    category: &Category,
    name: &str,
) -> Result<PathBuf, PathError> {
    Ok(quarantine_root
        .join(run_stamp)
        .join(category.name())
        .join(safe_file_name(name)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str) -> Category {
        Category::parse(name).unwrap()
    }

    #[test]
    fn maps_names_under_category_dir() {
        let root = PathBuf::from("/library");
        let path = media_path(&root, &category("real"), "a.jpg").unwrap();
        assert_eq!(path, PathBuf::from("/library/real/a.jpg"));
    }

    #[test]
    fn rejects_traversal_names() {
        let root = PathBuf::from("/library");
        assert!(matches!(
            media_path(&root, &category("real"), "../escape.jpg"),
            Err(PathError::UnsupportedComponent(_))
        ));
        assert!(matches!(
            media_path(&root, &category("real"), ""),
            Err(PathError::Empty)
        ));
        assert!(matches!(
            media_path(&root, &category("real"), ".."),
            Err(PathError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn quarantine_paths_are_grouped_by_run_and_category() {
        let root = PathBuf::from("/quarantine");
        let path = quarantine_path(&root, "20240101-120000", &category("real"), "a.jpg").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/quarantine/20240101-120000/real/a.jpg")
        );
    }
}
