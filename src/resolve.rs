//! URL resolution (§4.B): normalizing share/release URLs to a direct,
//! range-capable download URL before the Range Client ever opens them.
//!
//! The core only requires that a resolver either return a URL on which
//! [`HttpRangeReader::new`](crate::io::HttpRangeReader::new) succeeds, or
//! fall back to the original URL. Provider-specific scraping strategies
//! that need a headless browser (share-link resolution, e.g. an OneDrive
//! web-UI flow) are explicitly out of scope for this crate —
//! [`UrlResolver`] exists so such a resolver can be plugged in externally
//! without the core depending on it.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Strategy for turning a user-supplied URL into one the Range Client can
/// open directly.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Resolve `url`, returning a direct-download URL. Implementations
    /// must never fail outright — on any internal error they should fall
    /// back to returning the original URL unchanged, since the Range
    /// Client's own probe is the authoritative check.
    async fn resolve(&self, url: &str) -> String;
}

/// Release-style redirect resolver (§4.B strategy 1).
///
/// Follows HTTP redirects via a HEAD request and verifies the final URL
/// still honors range requests with a `bytes=0-0` probe; falls back to
/// the original URL if either step fails. This covers hosts like GitHub
/// Releases, where the public URL 302s to a signed, time-limited
/// download link that does support ranges.
pub struct RedirectResolver {
    client: Client,
}

impl RedirectResolver {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for RedirectResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UrlResolver for RedirectResolver {
    async fn resolve(&self, url: &str) -> String {
        let head = match self.client.head(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(%url, error = %e, "redirect resolution HEAD failed, using original URL");
                return url.to_string();
            }
        };

        let resolved = head.url().to_string();

        let probe = match self
            .client
            .get(&resolved)
            .header("Range", "bytes=0-0")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                debug!(%resolved, error = %e, "range probe on resolved URL failed, using original URL");
                return url.to_string();
            }
        };

        if probe.status() == reqwest::StatusCode::PARTIAL_CONTENT
            || probe.status() == reqwest::StatusCode::OK
        {
            if resolved != url {
                debug!(%url, %resolved, "resolved URL supports range requests");
            }
            resolved
        } else {
            debug!(%resolved, status = %probe.status(), "resolved URL rejected range probe, using original URL");
            url.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn falls_back_to_original_on_unreachable_host() {
        let resolver = RedirectResolver::new();
        let original = "http://127.0.0.1:1/does-not-exist.zip";
        let resolved = resolver.resolve(original).await;
        assert_eq!(resolved, original);
    }
}
