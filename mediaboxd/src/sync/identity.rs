use std::io;
use std::path::Path;

use md5::Context as Md5Context;
use tokio::io::AsyncReadExt;

const HASH_CHUNK_SIZE: usize = 64 * 1024;

const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "mp4", "webm"];
const ANNOTATION_EXTENSION: &str = "txt";

/// Canonical form of a filename: lowercased, with filesystem-unsafe
/// characters and whitespace folded to `_`. Idempotent.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_whitespace() || c.is_control() {
                '_'
            } else {
                match c {
                    '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                    other => other,
                }
            }
        })
        .collect()
}

/// Stable item id shared by a media file and its companion annotation:
/// the sanitized filename without its extension.
pub fn item_id_for(name: &str) -> String {
    let sanitized = sanitize(name);
    match sanitized.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => sanitized,
    }
}

pub fn is_media_name(name: &str) -> bool {
    extension_of(name)
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_annotation_name(name: &str) -> bool {
    extension_of(name)
        .map(|ext| ext == ANNOTATION_EXTENSION)
        .unwrap_or(false)
}

fn extension_of(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// Streaming md5 over fixed-size chunks; lowercase hex digest. This is the
/// only notion of "same file" in the engine, independent of name and
/// location.
pub async fn content_hash(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = Md5Context::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}
