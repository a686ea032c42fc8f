//! Result payload fetching.
//!
//! Copies a prediction result file from an http(s) URL, a `file://` URL or a
//! plain path into a scoped temporary file, then parses its `data` object
//! into a subject → probability map. The temporary file is removed when it
//! drops, whether the transfer, the parse or the whole fetch succeeds.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{FetchError, ParseError, ResultsError};

/// Subject id → predicted probability, as read from a result payload.
pub type ResultPayload = BTreeMap<String, f64>;

/// Timeout for a single payload download.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a payload lives.
#[derive(Debug, Clone, PartialEq)]
enum Location {
    Remote(Url),
    Local(PathBuf),
}

fn resolve_location(location: &str) -> Result<Location, FetchError> {
    match Url::parse(location) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Location::Remote(url)),
            "file" => url
                .to_file_path()
                .map(Location::Local)
                .map_err(|_| FetchError::UnsupportedScheme {
                    location: location.to_string(),
                    scheme: "file".to_string(),
                }),
            other => Err(FetchError::UnsupportedScheme {
                location: location.to_string(),
                scheme: other.to_string(),
            }),
        },
        // Not a URL at all: treat it as a filesystem path.
        Err(_) => Ok(Location::Local(PathBuf::from(location))),
    }
}

/// Produces the parsed payload behind a results location.
#[async_trait]
pub trait ResultSource: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<ResultPayload, ResultsError>;
}

/// Downloads and parses prediction result payloads.
#[derive(Debug, Clone)]
pub struct ResultFetcher {
    client: Client,
    scratch_dir: Option<PathBuf>,
}

impl Default for ResultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultFetcher {
    /// Creates a fetcher using the system temp directory for scratch files.
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(DEFAULT_FETCH_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            scratch_dir: None,
        }
    }

    /// Places scratch files in `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Fetches the payload at `location` and returns its `data` mapping.
    pub async fn fetch(&self, location: &str) -> Result<ResultPayload, ResultsError> {
        let scratch = self.scratch_file()?;

        match resolve_location(location)? {
            Location::Remote(url) => self.download(url, &scratch).await?,
            Location::Local(path) => {
                let bytes = tokio::fs::copy(&path, scratch.path())
                    .await
                    .map_err(FetchError::Io)?;
                debug!(path = %path.display(), bytes, "Copied local result payload");
            }
        }

        let raw = tokio::fs::read(scratch.path()).await.map_err(FetchError::Io)?;
        let payload = parse_payload(&raw)?;

        info!(
            location = %location,
            subjects = payload.len(),
            "Fetched prediction results"
        );

        Ok(payload)
    }

    fn scratch_file(&self) -> Result<NamedTempFile, FetchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("prediction-results-").suffix(".json");

        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    /// Streams the response body into `scratch` chunk by chunk.
    async fn download(&self, url: Url, scratch: &NamedTempFile) -> Result<(), FetchError> {
        let url_str = url.to_string();
        let mut response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| FetchError::Request {
                    url: url_str.clone(),
                    source,
                })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url_str,
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(scratch.path())
            .await?;
        let mut written = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| FetchError::Request {
                url: url_str.clone(),
                source,
            })?
        {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;

        debug!(url = %url_str, bytes = written, "Downloaded result payload");
        Ok(())
    }
}

#[async_trait]
impl ResultSource for ResultFetcher {
    async fn fetch(&self, location: &str) -> Result<ResultPayload, ResultsError> {
        ResultFetcher::fetch(self, location).await
    }
}

/// Parses a result payload, returning its `data` object as probabilities.
pub fn parse_payload(raw: &[u8]) -> Result<ResultPayload, ParseError> {
    let document: Value = serde_json::from_slice(raw)?;
    let data = document
        .get("data")
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingData)?;

    let mut payload = ResultPayload::new();
    for (subject_id, value) in data {
        let probability = value.as_f64().ok_or_else(|| ParseError::NotANumber {
            subject_id: subject_id.clone(),
            value: value.to_string(),
        })?;

        if !(0.0..=1.0).contains(&probability) {
            return Err(ParseError::OutOfRange {
                subject_id: subject_id.clone(),
                value: probability,
            });
        }

        payload.insert(subject_id.clone(), probability);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_payload_reads_data() {
        let raw = br#"{"data": {"s1": 0.95, "s2": 0.5, "s3": 1, "s4": 0}, "schema": "x"}"#;
        let payload = parse_payload(raw).expect("payload should parse");

        assert_eq!(payload.len(), 4);
        assert!((payload["s1"] - 0.95).abs() < f64::EPSILON);
        assert!((payload["s3"] - 1.0).abs() < f64::EPSILON);
        assert!((payload["s4"] - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_payload_invalid_json() {
        let err = parse_payload(b"not json").unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_parse_payload_missing_data() {
        let err = parse_payload(br#"{"results": {}}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingData));

        let err = parse_payload(br#"{"data": [0.1, 0.2]}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingData));
    }

    #[test]
    fn test_parse_payload_rejects_bad_probabilities() {
        let err = parse_payload(br#"{"data": {"s1": "high"}}"#).unwrap_err();
        assert!(matches!(err, ParseError::NotANumber { .. }));

        let err = parse_payload(br#"{"data": {"s1": 1.2}}"#).unwrap_err();
        assert!(matches!(err, ParseError::OutOfRange { .. }));
    }

    #[test]
    fn test_resolve_location() {
        assert!(matches!(
            resolve_location("https://example.org/results.json"),
            Ok(Location::Remote(_))
        ));
        assert_eq!(
            resolve_location("/tmp/results.json").expect("path should resolve"),
            Location::Local(PathBuf::from("/tmp/results.json"))
        );
        assert_eq!(
            resolve_location("file:///tmp/results.json").expect("file url should resolve"),
            Location::Local(PathBuf::from("/tmp/results.json"))
        );
        assert!(matches!(
            resolve_location("ftp://example.org/results.json"),
            Err(FetchError::UnsupportedScheme { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_local_file_cleans_up_scratch() {
        let source_dir = TempDir::new().expect("should create temp dir");
        let scratch_dir = TempDir::new().expect("should create temp dir");
        let source = source_dir.path().join("results.json");
        std::fs::write(&source, r#"{"data": {"s1": 0.9, "s2": 0.1}}"#)
            .expect("should write payload");

        let fetcher = ResultFetcher::new().with_scratch_dir(scratch_dir.path());
        let payload = fetcher
            .fetch(source.to_str().expect("utf-8 path"))
            .await
            .expect("fetch should succeed");

        assert_eq!(payload.len(), 2);
        let leftovers = std::fs::read_dir(scratch_dir.path())
            .expect("scratch dir readable")
            .count();
        assert_eq!(leftovers, 0, "scratch file should be removed after fetch");
    }

    #[tokio::test]
    async fn test_fetch_parse_failure_cleans_up_scratch() {
        let source_dir = TempDir::new().expect("should create temp dir");
        let scratch_dir = TempDir::new().expect("should create temp dir");
        let source = source_dir.path().join("broken.json");
        std::fs::write(&source, "{ truncated").expect("should write payload");

        let fetcher = ResultFetcher::new().with_scratch_dir(scratch_dir.path());
        let err = fetcher
            .fetch(source.to_str().expect("utf-8 path"))
            .await
            .unwrap_err();

        assert!(matches!(err, ResultsError::Parse(ParseError::InvalidJson(_))));
        let leftovers = std::fs::read_dir(scratch_dir.path())
            .expect("scratch dir readable")
            .count();
        assert_eq!(leftovers, 0, "scratch file should be removed after failure");
    }

    #[tokio::test]
    async fn test_fetch_missing_local_file_is_fetch_error() {
        let fetcher = ResultFetcher::new();
        let err = fetcher
            .fetch("/definitely/not/here/results.json")
            .await
            .unwrap_err();

        assert!(matches!(err, ResultsError::Fetch(FetchError::Io(_))));
    }

    /// Serves `body` once over plain HTTP and returns the listening address.
    async fn serve_once(body: &'static str) -> std::net::SocketAddr {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind listener");
        let addr = listener.local_addr().expect("listener address");

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("should accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.expect("should read request");
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket
                .write_all(response.as_bytes())
                .await
                .expect("should write response");
            socket.shutdown().await.ok();
        });

        addr
    }

    #[tokio::test]
    async fn test_fetch_remote_streams_into_scratch_and_cleans_up() {
        let addr = serve_once(r#"{"data": {"s1": 0.9, "s2": 0.2, "s3": 0.81}}"#).await;
        let scratch_dir = TempDir::new().expect("should create temp dir");

        let fetcher = ResultFetcher::new().with_scratch_dir(scratch_dir.path());
        let payload = fetcher
            .fetch(&format!("http://{}/results.json", addr))
            .await
            .expect("remote fetch should succeed");

        assert_eq!(payload.len(), 3);
        assert!((payload["s3"] - 0.81).abs() < f64::EPSILON);
        let leftovers = std::fs::read_dir(scratch_dir.path())
            .expect("scratch dir readable")
            .count();
        assert_eq!(leftovers, 0, "scratch file should be removed after download");
    }
}
