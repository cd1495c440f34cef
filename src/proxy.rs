//! Streaming pass-through to Anilibria hosts and CDNs.

use std::{io, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::task;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::debug;

use crate::playlist;

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

const PIPE_CAPACITY: usize = 64 * 1024;

/// Request headers that must not be forwarded upstream.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "accept-encoding",
    "content-length",
];

/// Response headers that describe the upstream hop rather than the payload.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

pub fn https_url(host: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("https://{host}{path}")
    } else {
        format!("https://{host}/{path}")
    }
}

pub fn forwardable_request_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !SKIPPED_REQUEST_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect()
}

pub fn is_forwardable_response_header(name: &str, content_encoded: bool) -> bool {
    let name = name.to_ascii_lowercase();
    if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
        return false;
    }
    // ureq transparently decodes gzip, so the upstream length no longer applies.
    !(content_encoded && (name == "content-encoding" || name == "content-length"))
}

#[derive(Clone)]
pub struct StreamProxy {
    agent: ureq::Agent,
}

impl Default for StreamProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamProxy {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout_read(Duration::from_secs(60))
            .build();
        Self { agent }
    }

    /// Forwards `method` to `url` with the client's headers (minus `Host` and
    /// hop-by-hop headers) and streams the upstream response back verbatim.
    /// Dropping the returned body closes the upstream connection.
    pub async fn forward(&self, method: Method, url: String, headers: &HeaderMap) -> Result<Response> {
        let agent = self.agent.clone();
        let request_headers = forwardable_request_headers(headers);
        let target = url.clone();
        let upstream = task::spawn_blocking(move || open(&agent, method.as_str(), &target, &request_headers))
            .await
            .context("proxy task join error")??;

        let status = StatusCode::from_u16(upstream.status())
            .with_context(|| format!("invalid upstream status from {url}"))?;
        let content_encoded = upstream.header("content-encoding").is_some();
        let mut response_headers = HeaderMap::new();
        for name in upstream.headers_names() {
            if !is_forwardable_response_header(&name, content_encoded) {
                continue;
            }
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in upstream.all(&name) {
                if let Ok(value) = HeaderValue::from_str(value) {
                    response_headers.append(header_name.clone(), value);
                }
            }
        }
        debug!(%url, %status, "proxying upstream response");

        let (reader_half, writer_half) = tokio::io::duplex(PIPE_CAPACITY);
        let mut bridge = SyncIoBridge::new(writer_half);
        let reader = upstream.into_reader();
        task::spawn_blocking(move || {
            let mut reader = reader;
            // Either side ending terminates the copy; a client that went away
            // surfaces here as a broken pipe and drops the upstream reader.
            if let Err(err) = io::copy(&mut reader, &mut bridge) {
                debug!(%url, error = %err, "proxy stream ended early");
            }
            let _ = bridge.shutdown();
        });

        let mut response = Body::from_stream(ReaderStream::new(reader_half)).into_response();
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    /// Fetches a playlist and points its absolute URLs back at this server.
    pub async fn fetch_and_rewrite_playlist(&self, url: String, origin: &str) -> Result<String> {
        let agent = self.agent.clone();
        let body = task::spawn_blocking(move || -> Result<String> {
            let response = agent
                .get(&url)
                .call()
                .with_context(|| format!("fetching playlist {url}"))?;
            response
                .into_string()
                .with_context(|| format!("reading playlist {url}"))
        })
        .await
        .context("playlist task join error")??;
        Ok(playlist::rewrite(&body, origin))
    }
}

/// Response for a rewritten playlist body.
pub fn playlist_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

fn open(
    agent: &ureq::Agent,
    method: &str,
    url: &str,
    headers: &[(String, String)],
) -> Result<ureq::Response> {
    let mut request = agent.request(method, url);
    for (name, value) in headers {
        request = request.set(name, value);
    }
    match request.call() {
        Ok(response) => Ok(response),
        // Error statuses are mirrored to the client like any other response.
        Err(ureq::Error::Status(_, response)) => Ok(response),
        Err(err) => Err(anyhow!(err).context(format!("connecting to {url}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_and_hop_headers_are_not_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("shim.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::RANGE, HeaderValue::from_static("bytes=0-"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("Infuse"));

        let forwarded = forwardable_request_headers(&headers);
        let names: Vec<_> = forwarded.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"range"));
        assert!(names.contains(&"user-agent"));
    }

    #[test]
    fn response_filter_drops_hop_headers_and_stale_lengths() {
        assert!(is_forwardable_response_header("Content-Type", false));
        assert!(is_forwardable_response_header("content-length", false));
        assert!(!is_forwardable_response_header("Transfer-Encoding", false));
        assert!(!is_forwardable_response_header("content-length", true));
        assert!(!is_forwardable_response_header("Content-Encoding", true));
    }

    #[test]
    fn https_url_joins_paths() {
        assert_eq!(
            https_url("cache.libria.fun", "/videos/1.m3u8"),
            "https://cache.libria.fun/videos/1.m3u8"
        );
        assert_eq!(https_url("host", "a.jpg"), "https://host/a.jpg");
    }
}
