use async_process::{Command, Stdio};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use songbird::input::{HttpRequest, Input};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::{ResolvedStream, StreamResolver};
use crate::error::MusicError;

/// Procesos de yt-dlp simultáneos como máximo
const MAX_CONCURRENT_EXTRACTIONS: usize = 4;

/// Resolves page URLs to direct audio streams with the `yt-dlp` binary.
pub struct YtDlpResolver {
    http: reqwest::Client,
    binary: String,
    rate_limiter: Semaphore,
}

/// The subset of `--dump-single-json` output we use.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    #[serde(default)]
    http_headers: HashMap<String, String>,
    #[serde(default)]
    entries: Option<Vec<YtDlpInfo>>,
}

/// Direct media location picked from the extractor output.
#[derive(Debug, PartialEq)]
struct MediaSource {
    title: String,
    url: String,
    headers: HashMap<String, String>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Result<Self, MusicError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MusicError::Resolution(format!("HTTP client unavailable: {}", e)))?;

        Ok(Self {
            http,
            binary: binary.into(),
            rate_limiter: Semaphore::new(MAX_CONCURRENT_EXTRACTIONS),
        })
    }

    async fn extract(&self, url: &str) -> Result<YtDlpInfo, MusicError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| MusicError::Resolution("extractor shut down".to_string()))?;

        debug!("🔧 Ejecutando {} para {}", self.binary, url);
        let output = Command::new(&self.binary)
            .args([
                "--dump-single-json",
                "--no-playlist",
                "--playlist-items",
                "1",
                "-f",
                "bestaudio",
                "--source-address",
                "0.0.0.0",
                "--no-warnings",
                "--quiet",
            ])
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MusicError::Resolution(format!("could not run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para {}: {}", url, stderr.trim());
            return Err(MusicError::Resolution(extractor_message(&stderr)));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| MusicError::Resolution(format!("unreadable extractor output: {}", e)))
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    type Stream = Input;

    async fn resolve(&self, url: &str) -> Result<ResolvedStream<Input>, MusicError> {
        validate_url(url)?;

        let info = self.extract(url).await?;
        let source = select_entry(info, url)?;
        info!("✅ Stream obtenido: {}", source.title);

        let request = HttpRequest::new_with_headers(
            self.http.clone(),
            source.url,
            header_map(&source.headers),
        );

        Ok(ResolvedStream {
            title: source.title,
            stream: Input::from(request),
        })
    }
}

/// Solo se aceptan URLs http(s)
fn validate_url(url: &str) -> Result<Url, MusicError> {
    let invalid = || MusicError::Resolution("not a valid URL".to_string());
    let parsed = Url::parse(url.trim()).map_err(|_| invalid())?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(invalid()),
    }
}

/// Takes the first entry of a playlist-shaped result, or the result itself.
fn select_entry(info: YtDlpInfo, requested: &str) -> Result<MediaSource, MusicError> {
    let info = match info.entries {
        Some(entries) => entries
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::Resolution("no playable entries".to_string()))?,
        None => info,
    };

    let url = info
        .url
        .ok_or_else(|| MusicError::Resolution("no audio stream found".to_string()))?;

    Ok(MediaSource {
        title: info
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| requested.to_string()),
        url,
        headers: info.http_headers,
    })
}

fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            Some((name, value))
        })
        .collect()
}

/// Last `ERROR:` line from yt-dlp's stderr, which is what users should see.
fn extractor_message(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:"))
        .map(|message| message.trim().to_string())
        .unwrap_or_else(|| "yt-dlp could not extract the stream".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(json: &str) -> YtDlpInfo {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_single_video() {
        let info = parse(
            r#"{
                "title": "Song",
                "url": "https://media.example/audio.webm",
                "http_headers": {"User-Agent": "Mozilla/5.0"},
                "duration": 215
            }"#,
        );

        let source = select_entry(info, "https://example.com/watch").unwrap();
        assert_eq!(source.title, "Song");
        assert_eq!(source.url, "https://media.example/audio.webm");
        assert_eq!(source.headers.get("User-Agent").map(String::as_str), Some("Mozilla/5.0"));
    }

    #[test]
    fn test_playlist_uses_first_entry() {
        let info = parse(
            r#"{
                "title": "Mix",
                "entries": [
                    {"title": "First", "url": "https://media.example/1"},
                    {"title": "Second", "url": "https://media.example/2"}
                ]
            }"#,
        );

        let source = select_entry(info, "https://example.com/list").unwrap();
        assert_eq!(source.title, "First");
        assert_eq!(source.url, "https://media.example/1");
    }

    #[test]
    fn test_empty_playlist_fails() {
        let info = parse(r#"{"title": "Mix", "entries": []}"#);
        assert_eq!(
            select_entry(info, "https://example.com/list"),
            Err(MusicError::Resolution("no playable entries".to_string()))
        );
    }

    #[test]
    fn test_missing_stream_url_fails() {
        let info = parse(r#"{"title": "Song"}"#);
        assert_eq!(
            select_entry(info, "https://example.com/watch"),
            Err(MusicError::Resolution("no audio stream found".to_string()))
        );
    }

    #[test]
    fn test_title_falls_back_to_request_url() {
        let info = parse(r#"{"url": "https://media.example/a", "title": " "}"#);
        let source = select_entry(info, "https://example.com/watch?v=1").unwrap();
        assert_eq!(source.title, "https://example.com/watch?v=1");
    }

    #[test]
    fn test_rejects_non_http_urls() {
        for url in ["not a url", "ftp://example.com/a.mp3", "file:///etc/passwd", ""] {
            assert_eq!(
                validate_url(url).unwrap_err(),
                MusicError::Resolution("not a valid URL".to_string()),
                "{}",
                url
            );
        }
        assert!(validate_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
    }

    #[test]
    fn test_invalid_headers_are_skipped() {
        let headers = HashMap::from([
            ("Accept".to_string(), "*/*".to_string()),
            ("Bad Header".to_string(), "x".to_string()),
        ]);

        let map = header_map(&headers);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("accept").and_then(|v| v.to_str().ok()), Some("*/*"));
    }

    #[test]
    fn test_extractor_message_picks_last_error() {
        let stderr = "WARNING: something\nERROR: first\nERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(extractor_message(stderr), "[youtube] abc: Video unavailable");
        assert_eq!(extractor_message(""), "yt-dlp could not extract the stream");
    }

    #[tokio::test]
    async fn test_resolve_rejects_invalid_url_without_spawning() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp").unwrap();
        let result = resolver.resolve("nope").await;
        assert_eq!(
            result.map(|resolved| resolved.title).unwrap_err(),
            MusicError::Resolution("not a valid URL".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_resolution_error() {
        let resolver = YtDlpResolver::new("/nonexistent/yt-dlp").unwrap();
        let result = resolver.resolve("https://example.com/watch").await;
        assert!(matches!(result, Err(MusicError::Resolution(msg)) if msg.starts_with("could not run")));
    }
}
