//! # Bing API Client
//!
//! Handles communication with the Bing Homepage Image Archive API to fetch
//! daily image metadata and download the actual images.
//!
//! ## API Endpoint
//! ```text
//! https://www.bing.com/HPImageArchive.aspx?format=js&idx=0&n=1&uhd=1&uhdwidth=<w>&uhdheight=<h>&mkt=<market>
//! ```
//!
//! Parameters:
//! - `format=js`: Return JSON response
//! - `idx=0`: Start from today's image
//! - `n=1`: Number of images to return
//! - `uhd=1`, `uhdwidth`, `uhdheight`: Request a specific high-resolution rendition
//! - `mkt=<market>`: Regional market code (e.g., "en-US")
//!
//! ## Image URLs
//! The API usually returns a path relative to the Bing origin
//! (`/th?id=OHR.Name_UHD.jpg&...`). Absolute URLs are used as-is.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Resolution;
use crate::error::{Result, UpdateError};

/// Origin of the Bing image service.
pub const BING_ORIGIN: &str = "https://www.bing.com";

/// Environment variable that overrides [`BING_ORIGIN`].
pub const API_ORIGIN_ENV: &str = "BING_DAILY_API_ORIGIN";

/// Path of the image archive endpoint on the origin.
const ARCHIVE_PATH: &str = "/HPImageArchive.aspx";

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Used when the image URL carries no usable file name.
const FALLBACK_FILE_NAME: &str = "image.jpg";

/// Metadata for today's featured image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Absolute download URL
    pub url: String,
    /// Feature date token (format: YYYYMMDD)
    pub start_date: String,
    pub title: Option<String>,
    pub copyright: Option<String>,
    /// Absolute "learn more" page for the image
    pub copyright_link: Option<String>,
}

/// Source of the daily image and its bytes.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetches today's image for the given resolution and market.
    ///
    /// `Ok(None)` means the service returned no image today.
    async fn fetch_todays_image(
        &self,
        resolution: &Resolution,
        market: &str,
    ) -> Result<Option<ImageDescriptor>>;

    /// Downloads the image at an absolute URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Raw API response from Bing.
#[derive(Debug, Deserialize)]
struct BingApiResponse {
    #[serde(default)]
    images: Vec<BingImageData>,
}

/// Raw image data as returned by the Bing API.
#[derive(Debug, Deserialize)]
struct BingImageData {
    url: String,
    #[serde(rename = "startdate", default)]
    start_date: String,
    title: Option<String>,
    copyright: Option<String>,
    #[serde(rename = "copyrightlink")]
    copyright_link: Option<String>,
}

/// HTTP client for the Bing image archive.
#[derive(Debug, Clone)]
pub struct BingClient {
    client: reqwest::Client,
    origin: Url,
}

impl BingClient {
    /// Client for `$BING_DAILY_API_ORIGIN`, or [`BING_ORIGIN`].
    pub fn from_env() -> Result<Self> {
        let origin = std::env::var(API_ORIGIN_ENV).unwrap_or_else(|_| BING_ORIGIN.to_string());
        Self::with_origin(&origin)
    }

    pub fn with_origin(origin: &str) -> Result<Self> {
        let origin = Url::parse(origin)
            .map_err(|e| UpdateError::Network(format!("invalid service origin {origin}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| UpdateError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, origin })
    }

    /// Builds the archive request URL for the given settings.
    pub fn archive_url(&self, resolution: &Resolution, market: &str) -> Result<Url> {
        let mut url = self
            .origin
            .join(ARCHIVE_PATH)
            .map_err(|e| UpdateError::Network(format!("invalid archive URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("format", "js")
            .append_pair("idx", "0")
            .append_pair("n", "1")
            .append_pair("uhd", "1")
            .append_pair("uhdwidth", &resolution.width.to_string())
            .append_pair("uhdheight", &resolution.height.to_string())
            .append_pair("mkt", market);
        Ok(url)
    }

    async fn get_bytes(&self, url: &str, what: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, what))?
            .error_for_status()
            .map_err(|e| {
                let status = e.status().map(|s| s.to_string()).unwrap_or_default();
                UpdateError::Network(format!("{what} returned {status}"))
            })?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, what))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageSource for BingClient {
    async fn fetch_todays_image(
        &self,
        resolution: &Resolution,
        market: &str,
    ) -> Result<Option<ImageDescriptor>> {
        let url = self.archive_url(resolution, market)?;
        debug!(%url, "requesting image archive");
        let body = self.get_bytes(url.as_str(), "Bing API").await?;
        parse_archive(&body, &self.origin)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.get_bytes(url, "Image download").await?;

        // An HTML error page can come back with a 200; check magic bytes.
        // JPEG starts with FF D8 FF, PNG starts with 89 50 4E 47
        if !looks_like_image(&bytes) {
            return Err(UpdateError::Network(
                "Downloaded content is not a valid image (may be an error page)".to_string(),
            ));
        }
        Ok(bytes)
    }
}

fn transport_error(e: reqwest::Error, what: &str) -> UpdateError {
    if e.is_timeout() {
        UpdateError::Network(format!("{what} timed out - check your internet connection"))
    } else {
        UpdateError::Network(format!("{what} failed: {e}"))
    }
}

fn looks_like_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xD8, 0xFF]) || bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47])
}

/// Parses an archive response body and returns its first entry.
pub fn parse_archive(body: &[u8], origin: &Url) -> Result<Option<ImageDescriptor>> {
    let response: BingApiResponse = serde_json::from_slice(body)
        .map_err(|e| UpdateError::Parse(format!("Failed to parse Bing response: {e}")))?;

    let Some(entry) = response.images.into_iter().next() else {
        return Ok(None);
    };

    let url = resolve_image_url(origin, &entry.url)?;
    Ok(Some(ImageDescriptor {
        url: url.to_string(),
        start_date: entry.start_date,
        title: entry.title.filter(|t| !t.is_empty()),
        copyright: entry.copyright.filter(|c| !c.is_empty()),
        copyright_link: entry
            .copyright_link
            .and_then(|link| resolve_image_url(origin, &link).ok())
            .filter(|link| matches!(link.scheme(), "http" | "https"))
            .map(String::from),
    }))
}

/// Resolves an entry URL against the service origin unless it already
/// carries a scheme.
pub fn resolve_image_url(origin: &Url, raw: &str) -> Result<Url> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .join(raw)
            .map_err(|e| UpdateError::Parse(format!("invalid image URL {raw}: {e}"))),
        Err(e) => Err(UpdateError::Parse(format!("invalid image URL {raw}: {e}"))),
    }
}

/// File name the service gave the image.
///
/// Bing serves images as `/th?id=<name>`, so the `id` query parameter wins
/// over the last path segment.
pub fn origin_file_name(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_FILE_NAME.to_string();
    };

    let from_id = parsed
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned());
    let from_path = || {
        parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .map(str::to_string)
    };

    from_id
        .filter(|name| !name.is_empty())
        .or_else(from_path)
        .filter(|name| !name.is_empty())
        .map(|name| name.replace(['/', '\\'], "_"))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse(BING_ORIGIN).expect("origin")
    }

    #[test]
    fn archive_url_carries_all_parameters() {
        let client = BingClient::with_origin(BING_ORIGIN).expect("client");
        let url = client
            .archive_url(&Resolution::qhd_1440p(), "de-DE")
            .expect("url");

        assert_eq!(url.path(), "/HPImageArchive.aspx");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let expected = [
            ("format", "js"),
            ("idx", "0"),
            ("n", "1"),
            ("uhd", "1"),
            ("uhdwidth", "2560"),
            ("uhdheight", "1440"),
            ("mkt", "de-DE"),
        ];
        for (key, value) in expected {
            assert!(
                pairs.contains(&(key.to_string(), value.to_string())),
                "missing {key}={value} in {url}"
            );
        }
    }

    #[test]
    fn relative_urls_get_the_service_origin() {
        let url = resolve_image_url(&origin(), "/th?id=abc").expect("resolve");
        assert_eq!(url.as_str(), "https://www.bing.com/th?id=abc");
    }

    #[test]
    fn absolute_urls_are_kept() {
        let raw = "https://cdn.example.com/images/pic.jpg";
        let url = resolve_image_url(&origin(), raw).expect("resolve");
        assert_eq!(url.as_str(), raw);
    }

    #[test]
    fn origin_file_name_prefers_id_parameter() {
        assert_eq!(origin_file_name("https://www.bing.com/th?id=abc"), "abc");
        assert_eq!(
            origin_file_name("https://www.bing.com/th?id=OHR.Lake_EN-US123_UHD.jpg&rf=x.jpg&pid=hp"),
            "OHR.Lake_EN-US123_UHD.jpg"
        );
        assert_eq!(origin_file_name("https://cdn.example.com/a/b/pic.jpg"), "pic.jpg");
        assert_eq!(origin_file_name("https://cdn.example.com/"), "image.jpg");
        assert_eq!(origin_file_name("https://x.test/th?id=a/b"), "a_b");
    }

    #[test]
    fn parse_returns_first_entry() {
        let body = br#"{
            "images": [
                { "url": "/th?id=first", "startdate": "20240601", "title": "Lake",
                  "copyright": "Lake (c) Someone", "copyrightlink": "https://example.com" },
                { "url": "/th?id=second", "startdate": "20240531" }
            ]
        }"#;

        let image = parse_archive(body, &origin()).expect("parse").expect("image");
        assert_eq!(image.url, "https://www.bing.com/th?id=first");
        assert_eq!(image.start_date, "20240601");
        assert_eq!(image.title.as_deref(), Some("Lake"));
        assert_eq!(image.copyright.as_deref(), Some("Lake (c) Someone"));
        assert_eq!(image.copyright_link.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn copyright_link_is_made_absolute_or_dropped() {
        let body = br#"{ "images": [ { "url": "/th?id=x", "startdate": "20240601",
                        "copyrightlink": "/search?q=Lake" } ] }"#;
        let image = parse_archive(body, &origin()).expect("parse").expect("image");
        assert_eq!(
            image.copyright_link.as_deref(),
            Some("https://www.bing.com/search?q=Lake")
        );

        let body = br#"{ "images": [ { "url": "/th?id=x", "startdate": "20240601",
                        "copyrightlink": "javascript:void(0)" } ] }"#;
        let image = parse_archive(body, &origin()).expect("parse").expect("image");
        assert!(image.copyright_link.is_none());
    }

    #[test]
    fn parse_tolerates_missing_optional_fields() {
        let body = br#"{ "images": [ { "url": "/th?id=x", "startdate": "20240601", "title": "" } ] }"#;
        let image = parse_archive(body, &origin()).expect("parse").expect("image");
        assert!(image.title.is_none());
        assert!(image.copyright.is_none());
    }

    #[test]
    fn empty_image_list_is_not_an_error() {
        assert_eq!(parse_archive(br#"{ "images": [] }"#, &origin()).expect("parse"), None);
        assert_eq!(parse_archive(br#"{}"#, &origin()).expect("parse"), None);
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        for body in [&b"<html>busy</html>"[..], br#"{ "images": "nope" }"#] {
            let err = parse_archive(body, &origin()).expect_err("should fail");
            assert!(matches!(err, UpdateError::Parse(_)), "got {err:?}");
        }
    }

    /// Serves one canned HTTP response on a loopback port and returns its origin.
    async fn serve_once(status: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.expect("read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.expect("write head");
            socket.write_all(&body).await.expect("write body");
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}")
    }

    /// Client for a loopback origin that ignores any proxy in the environment.
    fn local_client(origin: &str) -> BingClient {
        let mut client = BingClient::with_origin(origin).expect("client");
        client.client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("http client");
        client
    }

    #[tokio::test]
    async fn error_status_is_a_network_error() {
        let origin = serve_once("503 Service Unavailable", "text/plain", b"busy".to_vec()).await;

        let err = local_client(&origin)
            .download(&format!("{origin}/th?id=abc"))
            .await
            .expect_err("503 should fail");

        match err {
            UpdateError::Network(message) => assert!(message.contains("503"), "{message}"),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn html_page_with_ok_status_is_rejected() {
        let page = b"<html><body>Service busy</body></html>".to_vec();
        let origin = serve_once("200 OK", "text/html", page).await;

        let err = local_client(&origin)
            .download(&format!("{origin}/th?id=abc"))
            .await
            .expect_err("html should fail");

        assert!(matches!(err, UpdateError::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn jpeg_download_returns_bytes() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
        let origin = serve_once("200 OK", "image/jpeg", jpeg.clone()).await;

        let bytes = local_client(&origin)
            .download(&format!("{origin}/th?id=abc"))
            .await
            .expect("download");

        assert_eq!(bytes, jpeg);
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let origin = format!("http://{}", listener.local_addr().expect("local addr"));
        drop(listener);

        let err = local_client(&origin)
            .download(&format!("{origin}/th?id=abc"))
            .await
            .expect_err("nothing is listening");

        assert!(matches!(err, UpdateError::Network(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn archive_entry_resolves_against_configured_origin() {
        let body = br#"{ "images": [ { "url": "/th?id=OHR.Lake_UHD.jpg", "startdate": "20240601",
                         "title": "Lake" } ] }"#;
        let origin = serve_once("200 OK", "application/json", body.to_vec()).await;

        let image = local_client(&origin)
            .fetch_todays_image(&Resolution::default(), "en-US")
            .await
            .expect("fetch")
            .expect("image");

        assert_eq!(image.url, format!("{origin}/th?id=OHR.Lake_UHD.jpg"));
        assert_eq!(image.title.as_deref(), Some("Lake"));
    }

    #[test]
    fn magic_bytes_distinguish_images_from_pages() {
        assert!(looks_like_image(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(looks_like_image(&[0x89, 0x50, 0x4E, 0x47, 0x0D]));
        assert!(!looks_like_image(b"<!DOCTYPE html>"));
        assert!(!looks_like_image(&[0xFF]));
    }
}
