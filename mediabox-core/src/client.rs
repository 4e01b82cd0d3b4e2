use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use md5::Context as Md5Context;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.mediabox.example";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
    #[error("download integrity check failed: expected {expected_md5}, got {actual_md5}")]
    IntegrityMismatch {
        expected_md5: String,
        actual_md5: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct VaultClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl VaultClient {
    pub fn new(token: impl Into<String>) -> Result<Self, VaultError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, VaultError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// One page of a folder listing. `page_token` of `None` starts from the
    /// beginning; the returned `next_page_token` is `None` on the last page.
    pub async fn list_objects(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: Option<u32>,
    ) -> Result<ObjectPage, VaultError> {
        let mut url = self.endpoint(&format!("/v1/folders/{folder_id}/objects"))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(token) = page_token {
                query.append_pair("page_token", token);
            }
            if let Some(size) = page_size {
                query.append_pair("page_size", &size.to_string());
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Follows page tokens to exhaustion. A listing is not complete until
    /// the server stops handing out a token.
    pub async fn list_objects_all(
        &self,
        folder_id: &str,
        page_size: u32,
    ) -> Result<Vec<RemoteObject>, VaultError> {
        let page_size = page_size.max(1);
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_objects(folder_id, token.as_deref(), Some(page_size))
                .await?;
            objects.extend(page.objects);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Streams `source` into the folder under `name` and returns the stored
    /// object's metadata.
    pub async fn upload_object(
        &self,
        folder_id: &str,
        name: &str,
        source: &Path,
    ) -> Result<RemoteObject, VaultError> {
        let mut url = self.endpoint(&format!("/v1/folders/{folder_id}/objects"))?;
        url.query_pairs_mut().append_pair("name", name);
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", "application/octet-stream")
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Streams the object's content to `<target>.partial`, verifies the md5
    /// when one is expected, then renames into place so readers never see a
    /// half-written file.
    pub async fn download_object_to_path(
        &self,
        object_id: &str,
        target: &Path,
        expected_md5: Option<&str>,
    ) -> Result<(), VaultError> {
        let url = self.endpoint(&format!("/v1/objects/{object_id}/content"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(target);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut md5 = expected_md5.map(|_| Md5Context::new());

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            if let Some(ctx) = md5.as_mut() {
                ctx.consume(&chunk);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let (Some(expected), Some(ctx)) = (expected_md5, md5) {
            let actual_md5 = format!("{:x}", ctx.compute());
            if actual_md5 != expected.to_ascii_lowercase() {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(VaultError::IntegrityMismatch {
                    expected_md5: expected.to_ascii_lowercase(),
                    actual_md5,
                });
            }
        }

        tokio::fs::rename(partial, target).await?;
        Ok(())
    }

    pub async fn move_object(
        &self,
        object_id: &str,
        from_folder: &str,
        to_folder: &str,
    ) -> Result<RemoteObject, VaultError> {
        let url = self.endpoint(&format!("/v1/objects/{object_id}/move"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&MoveRequest {
                from_folder,
                to_folder,
            })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_object(&self, object_id: &str) -> Result<(), VaultError> {
        let url = self.endpoint(&format!("/v1/objects/{object_id}"))?;
        let response = self
            .http
            .delete(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, VaultError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, VaultError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> VaultError {
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        VaultError::Api {
            status,
            body,
            retry_after,
        }
    }
}

impl VaultError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            VaultError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// Server-requested delay before the next attempt, when one was given.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            VaultError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(std::time::SystemTime::now())
        .ok()
        .map(|d| d.as_secs())
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct MoveRequest<'a> {
    from_folder: &'a str,
    to_folder: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_are_classified() {
        let rate_limited = VaultError::Api {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
            retry_after: Some(3),
        };
        assert_eq!(
            rate_limited.classification(),
            Some(ApiErrorClass::RateLimit)
        );
        assert!(rate_limited.is_retryable());
        assert_eq!(rate_limited.retry_after_secs(), Some(3));

        let auth = VaultError::Api {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
            retry_after: None,
        };
        assert_eq!(auth.classification(), Some(ApiErrorClass::Auth));
        assert!(!auth.is_retryable());

        let server = VaultError::Api {
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
            retry_after: None,
        };
        assert!(server.is_retryable());
    }

    #[test]
    fn partial_path_keeps_original_extension() {
        assert_eq!(
            partial_path(Path::new("/tmp/a.jpg")),
            PathBuf::from("/tmp/a.jpg.partial")
        );
        assert_eq!(
            partial_path(Path::new("/tmp/noext")),
            PathBuf::from("/tmp/noext.partial")
        );
    }
}
