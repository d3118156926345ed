//! Remote file fetching.
//!
//! Users can register a file by URL instead of sending bytes. The URL is
//! validated before any connection is made, and the transfer is bounded in
//! both bytes and wall-clock time, with partial data discarded on failure.

use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::{debug, warn};
use url::{Host, Url};

use crate::config::FetchConfig;
use crate::{FilegateError, Result};

/// Result of a successful fetch.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    /// Filename derived from the URL path (unsanitized).
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Source of remote file bytes.
///
/// A trait seam so the registration flow can be tested without a network.
pub trait UrlFetcher {
    fn fetch(
        &self,
        url: &str,
        max_bytes: u64,
    ) -> impl std::future::Future<Output = Result<FetchedFile>> + Send;
}

/// Reject URLs that must never be fetched.
///
/// Only http and https schemes are accepted, and hosts that point into the
/// local network are refused. Validation happens before any connection, so a
/// hostile URL costs nothing.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| FilegateError::Fetch(format!("invalid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(FilegateError::Fetch(format!(
                "unsupported URL scheme: {other}"
            )))
        }
    }

    if url.path().to_lowercase().ends_with(".torrent") {
        return Err(FilegateError::Fetch("torrent files are not fetched".to_string()));
    }

    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.to_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(FilegateError::Fetch("host not allowed".to_string()));
            }
        }
        Some(Host::Ipv4(addr)) => {
            if is_forbidden_v4(addr) {
                return Err(FilegateError::Fetch("host not allowed".to_string()));
            }
        }
        Some(Host::Ipv6(addr)) => {
            if is_forbidden_v6(addr) {
                return Err(FilegateError::Fetch("host not allowed".to_string()));
            }
        }
        None => return Err(FilegateError::Fetch("URL has no host".to_string())),
    }

    Ok(url)
}

fn is_forbidden_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
}

fn is_forbidden_v6(addr: Ipv6Addr) -> bool {
    // fc00::/7 unique-local, fe80::/10 link-local
    addr.is_loopback()
        || addr.is_unspecified()
        || (addr.segments()[0] & 0xfe00) == 0xfc00
        || (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// Last path segment of a URL, used as the original filename.
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "download.bin".to_string())
}

/// Fetcher backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .connect_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| FilegateError::Fetch(e.to_string()))?;

        Ok(Self { client })
    }
}

impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, raw_url: &str, max_bytes: u64) -> Result<FetchedFile> {
        let url = validate_url(raw_url)?;
        let file_name = filename_from_url(&url);
        debug!("Fetching {} (cap {} bytes)", url, max_bytes);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FilegateError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FilegateError::Fetch(format!(
                "server returned {}",
                response.status()
            )));
        }

        // A declared size over the cap fails before any body is read.
        if let Some(declared) = response.content_length() {
            if declared > max_bytes {
                return Err(FilegateError::SizeTooLarge {
                    size: declared,
                    limit: max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Stream the body so an undeclared oversize transfer stops at the
        // cap instead of filling memory.
        let mut bytes = Vec::new();
        let mut response = response;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FilegateError::Fetch(e.to_string()))?
        {
            if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                warn!("Aborting fetch of {}: body exceeds {} bytes", url, max_bytes);
                return Err(FilegateError::SizeTooLarge {
                    size: bytes.len() as u64 + chunk.len() as u64,
                    limit: max_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(FilegateError::Fetch("empty response body".to_string()));
        }

        Ok(FetchedFile {
            file_name,
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_http_and_https() {
        assert!(validate_url("http://example.com/file.pdf").is_ok());
        assert!(validate_url("https://cdn.example.com/a/b/c.zip").is_ok());
    }

    #[test]
    fn test_rejects_non_http_schemes() {
        for url in [
            "ftp://example.com/file.bin",
            "file:///etc/passwd",
            "magnet:?xt=urn:btih:deadbeef",
            "javascript:alert(1)",
        ] {
            assert!(validate_url(url).is_err(), "accepted {url}");
        }
    }

    #[test]
    fn test_rejects_local_hosts() {
        for url in [
            "http://localhost/x",
            "http://sub.localhost/x",
            "http://127.0.0.1/x",
            "http://127.8.9.10/x",
            "http://0.0.0.0/x",
            "http://10.1.2.3/x",
            "http://172.16.0.1/x",
            "http://192.168.1.1/x",
            "http://169.254.1.1/x",
            "http://[::1]/x",
            "http://[fe80::1]/x",
            "http://[fd00::1]/x",
        ] {
            assert!(validate_url(url).is_err(), "accepted {url}");
        }
    }

    #[test]
    fn test_rejects_torrent_paths() {
        assert!(validate_url("https://example.com/linux.torrent").is_err());
        assert!(validate_url("https://example.com/Linux.TORRENT").is_err());
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.com/files/report.pdf?v=2").unwrap();
        assert_eq!(filename_from_url(&url), "report.pdf");

        let bare = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_from_url(&bare), "download.bin");
    }
}
