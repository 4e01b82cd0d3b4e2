use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

const DEFAULT_RECONCILE_SECS: u64 = 300;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 250;
const DEFAULT_RETRY_MAX_MS: u64 = 10_000;
const DEFAULT_PAGE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid category name: {0:?}")]
    InvalidCategory(String),
    #[error("no categories configured")]
    NoCategories,
    #[error("duplicate category name: {0:?}")]
    DuplicateCategory(String),
    #[error("home directory is unavailable")]
    MissingHomeDir,
}

/// A validated collection partition. Category names are resolved to this
/// type once at configuration load; nothing downstream re-validates raw
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    name: String,
    folder_id: String,
}

impl Category {
    /// Accepts `name` or `name=remote_folder_id`. Names are limited to
    /// lowercase `[a-z0-9_-]` so they stay valid as directory names and
    /// manifest file stems.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let (name, folder_id) = match input.split_once('=') {
            Some((name, folder)) => (name.trim(), Some(folder.trim())),
            None => (input.trim(), None),
        };
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidCategory(input.to_string()));
        }
        let folder_id = match folder_id {
            Some(folder) if !folder.is_empty() => folder.to_string(),
            Some(_) => return Err(ConfigError::InvalidCategory(input.to_string())),
            None => name.to_string(),
        };
        Ok(Self {
            name: name.to_string(),
            folder_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the remote folder backing this category.
    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut categories: Vec<Category> = Vec::new();
        for part in input.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let category = Category::parse(part)?;
            if categories.iter().any(|c| c.name() == category.name()) {
                return Err(ConfigError::DuplicateCategory(category.name().to_string()));
            }
            categories.push(category);
        }
        if categories.is_empty() {
            return Err(ConfigError::NoCategories);
        }
        Ok(Self { categories })
    }

    pub fn resolve(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub library_root: PathBuf,
    pub manifest_root: PathBuf,
    pub quarantine_root: PathBuf,
    pub db_path: PathBuf,
    pub api_base: Option<String>,
    pub token: String,
    pub categories: CategorySet,
    pub reconcile_interval: Duration,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub page_size: u32,
}

impl EngineConfig {
    /// Reads `MEDIABOX_*` variables. A missing token, library directory, or
    /// category list is fatal here; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::MissingHomeDir)?;
        let library_root = std::env::var("MEDIABOX_LIBRARY_DIR")
            .map(|value| expand_with_home(&value, &home))
            .map_err(|_| ConfigError::MissingVar("MEDIABOX_LIBRARY_DIR"))?;
        let manifest_root = std::env::var("MEDIABOX_MANIFEST_DIR")
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|_| library_root.join(".manifests"));
        let quarantine_root = std::env::var("MEDIABOX_QUARANTINE_DIR")
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|_| library_root.join(".quarantine"));
        let db_path = std::env::var("MEDIABOX_DB_PATH")
            .map(|value| expand_with_home(&value, &home))
            .map(Ok)
            .unwrap_or_else(|_| default_db_path())?;
        let token =
            std::env::var("MEDIABOX_TOKEN").map_err(|_| ConfigError::MissingVar("MEDIABOX_TOKEN"))?;
        let api_base = std::env::var("MEDIABOX_API_BASE").ok();
        let categories = CategorySet::parse(
            &std::env::var("MEDIABOX_CATEGORIES")
                .map_err(|_| ConfigError::MissingVar("MEDIABOX_CATEGORIES"))?,
        )?;
        let reconcile_interval = Duration::from_secs(read_u64_env(
            "MEDIABOX_RECONCILE_SECS",
            DEFAULT_RECONCILE_SECS,
        ));
        let retry_attempts = read_u64_env(
            "MEDIABOX_RETRY_ATTEMPTS",
            u64::from(DEFAULT_RETRY_ATTEMPTS),
        ) as u32;
        let retry_base = Duration::from_millis(read_u64_env(
            "MEDIABOX_RETRY_BASE_MS",
            DEFAULT_RETRY_BASE_MS,
        ));
        let retry_max = Duration::from_millis(read_u64_env(
            "MEDIABOX_RETRY_MAX_MS",
            DEFAULT_RETRY_MAX_MS,
        ));
        let page_size =
            read_u64_env("MEDIABOX_PAGE_SIZE", u64::from(DEFAULT_PAGE_SIZE)).max(1) as u32;

        Ok(Self {
            library_root,
            manifest_root,
            quarantine_root,
            db_path,
            api_base,
            token,
            categories,
            reconcile_interval,
            retry_attempts,
            retry_base,
            retry_max,
            page_size,
        })
    }
}

fn default_db_path() -> Result<PathBuf, ConfigError> {
    let mut path = dirs::data_dir().ok_or(ConfigError::MissingHomeDir)?;
    path.push("mediabox");
    path.push("index.db");
    Ok(path)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        home.join(rest)
    } else if value == "~" {
        home.to_path_buf()
    } else {
        PathBuf::from(value)
    }
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_accepts_plain_name() {
        let category = Category::parse("real").unwrap();
        assert_eq!(category.name(), "real");
        assert_eq!(category.folder_id(), "real");
    }

    #[test]
    fn category_parse_accepts_folder_override() {
        let category = Category::parse("real=fid-123").unwrap();
        assert_eq!(category.name(), "real");
        assert_eq!(category.folder_id(), "fid-123");
    }

    #[test]
    fn category_parse_rejects_uppercase_and_empty() {
        assert!(matches!(
            Category::parse("Real"),
            Err(ConfigError::InvalidCategory(_))
        ));
        assert!(matches!(
            Category::parse(""),
            Err(ConfigError::InvalidCategory(_))
        ));
        assert!(matches!(
            Category::parse("real="),
            Err(ConfigError::InvalidCategory(_))
        ));
    }

    #[test]
    fn category_set_resolves_by_name() {
        let set = CategorySet::parse("real,bad=fid-b, review").unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.resolve("bad").unwrap().folder_id(), "fid-b");
        assert!(set.resolve("missing").is_none());
    }

    #[test]
    fn category_set_rejects_duplicates_and_empty() {
        assert!(matches!(
            CategorySet::parse("real,real"),
            Err(ConfigError::DuplicateCategory(_))
        ));
        assert!(matches!(
            CategorySet::parse(" , "),
            Err(ConfigError::NoCategories)
        ));
    }

    #[test]
    fn expands_tilde_paths() {
        let home = PathBuf::from("/tmp/home-user");
        assert_eq!(
            expand_with_home("~/media", &home),
            PathBuf::from("/tmp/home-user/media")
        );
        assert_eq!(
            expand_with_home("/abs/media", &home),
            PathBuf::from("/abs/media")
        );
    }
}
