//! Fetching release material over HTTP(S) or from the local filesystem.
//!
//! Small documents (manifest, signature, provenance) are read into memory
//! and the artifact is streamed into a caller-supplied file. Both are
//! capped in size.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::InstallError;

/// Errors from a single fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The resource does not exist.
    #[error("{url}: not found")]
    NotFound {
        /// Requested URL.
        url: String,
    },

    /// The response is larger than allowed.
    #[error("{url}: response exceeds {limit} bytes")]
    TooLarge {
        /// Requested URL.
        url: String,
        /// Size cap.
        limit: u64,
    },

    /// The transfer failed.
    #[error("{url}: {detail}")]
    Transport {
        /// Requested URL.
        url: String,
        /// What went wrong.
        detail: String,
    },

    /// Writing fetched bytes to the local sink failed.
    #[error("failed to write fetched data: {0}")]
    Sink(#[source] std::io::Error),
}

impl FetchError {
    /// The URL involved, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::NotFound { url } | Self::TooLarge { url, .. } | Self::Transport { url, .. } => {
                Some(url)
            }
            Self::Sink(_) => None,
        }
    }
}

/// A source of release material.
#[expect(
    async_fn_in_trait,
    reason = "fetchers are used as generic parameters, never as trait objects"
)]
pub trait Fetcher {
    /// Fetch `url` into memory, failing if it exceeds `limit` bytes.
    async fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError>;

    /// Stream `url` into `sink`, failing once more than `limit` bytes
    /// arrive. Returns the number of bytes written.
    async fn fetch_to_file(
        &self,
        url: &str,
        sink: &mut File,
        limit: u64,
    ) -> Result<u64, FetchError>;
}

/// HTTP(S) fetcher backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher that identifies itself as `user_agent`.
    pub fn new(user_agent: &str) -> Result<Self, InstallError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| InstallError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Send a GET and refuse error statuses and declared lengths over `limit`.
    async fn get(&self, url: &str, limit: u64) -> Result<reqwest::Response, FetchError> {
        tracing::debug!(url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(url, &e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Transport {
                url: url.to_owned(),
                detail: format!("HTTP {status}"),
            });
        }
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large(url, limit));
        }
        Ok(response)
    }
}

fn too_large(url: &str, limit: u64) -> FetchError {
    FetchError::TooLarge {
        url: url.to_owned(),
        limit,
    }
}

fn transport(url: &str, e: &reqwest::Error) -> FetchError {
    FetchError::Transport {
        url: url.to_owned(),
        detail: e.to_string(),
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError> {
        let mut response = self.get(url, limit).await?;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, &e))? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(too_large(url, limit));
            }
            body.extend_from_slice(&chunk);
        }
        tracing::debug!(url, bytes = body.len(), "fetched");
        Ok(body)
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        sink: &mut File,
        limit: u64,
    ) -> Result<u64, FetchError> {
        let mut response = self.get(url, limit).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| transport(url, &e))? {
            written += chunk.len() as u64;
            if written > limit {
                return Err(too_large(url, limit));
            }
            sink.write_all(&chunk).map_err(FetchError::Sink)?;
        }
        sink.flush().map_err(FetchError::Sink)?;
        tracing::debug!(url, bytes = written, "downloaded");
        Ok(written)
    }
}

/// Fetcher for `file://` URLs and plain paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFetcher;

impl LocalFetcher {
    fn open(url: &str) -> Result<File, FetchError> {
        File::open(local_path(url)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FetchError::NotFound {
                    url: url.to_owned(),
                }
            } else {
                FetchError::Transport {
                    url: url.to_owned(),
                    detail: e.to_string(),
                }
            }
        })
    }
}

impl Fetcher for LocalFetcher {
    async fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError> {
        let file = Self::open(url)?;
        let mut body = Vec::new();
        file.take(limit.saturating_add(1))
            .read_to_end(&mut body)
            .map_err(|e| FetchError::Transport {
                url: url.to_owned(),
                detail: e.to_string(),
            })?;
        if body.len() as u64 > limit {
            return Err(too_large(url, limit));
        }
        Ok(body)
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        sink: &mut File,
        limit: u64,
    ) -> Result<u64, FetchError> {
        let file = Self::open(url)?;
        let written = std::io::copy(&mut file.take(limit.saturating_add(1)), sink)
            .map_err(FetchError::Sink)?;
        if written > limit {
            return Err(too_large(url, limit));
        }
        sink.flush().map_err(FetchError::Sink)?;
        Ok(written)
    }
}

/// Dispatches on URL scheme: `http`/`https` go to [`HttpFetcher`],
/// everything else to [`LocalFetcher`].
#[derive(Debug, Clone)]
pub struct SchemeFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl SchemeFetcher {
    /// Create a dispatching fetcher.
    pub const fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            local: LocalFetcher,
        }
    }
}

impl Fetcher for SchemeFetcher {
    async fn fetch_bytes(&self, url: &str, limit: u64) -> Result<Vec<u8>, FetchError> {
        if is_http(url) {
            self.http.fetch_bytes(url, limit).await
        } else {
            self.local.fetch_bytes(url, limit).await
        }
    }

    async fn fetch_to_file(
        &self,
        url: &str,
        sink: &mut File,
        limit: u64,
    ) -> Result<u64, FetchError> {
        if is_http(url) {
            self.http.fetch_to_file(url, sink, limit).await
        } else {
            self.local.fetch_to_file(url, sink, limit).await
        }
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// The last path segment of `url`, ignoring any query or fragment.
pub fn artifact_file_name(url: &str) -> Option<String> {
    let path = strip_query(url);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_owned())
}

/// `url` with its last path segment replaced by `name`.
pub fn sibling_url(url: &str, name: &str) -> String {
    let path = strip_query(url);
    if is_http(path) || path.starts_with("file://") {
        return match path.rfind('/') {
            Some(idx) => format!("{}{name}", &path[..=idx]),
            None => name.to_owned(),
        };
    }
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name).to_string_lossy().into_owned(),
        _ => name.to_owned(),
    }
}
