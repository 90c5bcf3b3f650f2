//! Transfer of remote calendar files.
//!
//! Remote resources keep a private local cache file. A `Transport` copies the
//! remote file into the cache (download) and the cache back to the remote
//! location (upload).

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use crate::error::{ResourceError, ResourceResult};

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` into the file `dest`.
    async fn download(&self, url: &Url, dest: &Path) -> ResourceResult<()>;

    /// Store the file `src` at `url`.
    async fn upload(&self, src: &Path, url: &Url) -> ResourceResult<()>;
}

/// HTTP(S) and WebDAV transport: GET to download, PUT to upload.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// webdav(s):// URLs are plain HTTP(S) on the wire.
    fn wire_url(url: &Url) -> Url {
        let scheme = match url.scheme() {
            "webdav" => "http",
            "webdavs" => "https",
            _ => return url.clone(),
        };
        let rest = &url.as_str()[url.scheme().len()..];
        Url::parse(&format!("{scheme}{rest}")).unwrap_or_else(|_| url.clone())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &Url, dest: &Path) -> ResourceResult<()> {
        let response = self
            .client
            .get(Self::wire_url(url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ResourceError::Transfer(e.to_string()))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ResourceError::Transfer(e.to_string()))?;

        tokio::fs::write(dest, &body).await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, url: &Url) -> ResourceResult<()> {
        let body = tokio::fs::read(src).await?;

        self.client
            .put(Self::wire_url(url))
            .header("Content-Type", "text/calendar")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ResourceError::Transfer(e.to_string()))?;

        Ok(())
    }
}
