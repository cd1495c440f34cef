//! HLS playlist rewriting.
//!
//! Absolute segment and sub-playlist URLs are turned into
//! `/content/{scheme}/{host}/{ext}?path=...` so that every follow-up fetch goes
//! through this server. The path is carried as URL-safe base64 to survive
//! query encoding untouched.

use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;

pub const CONTENT_PREFIX: &str = "/content";

static ABSOLUTE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?)://([^/\s?#@]+)/([^\s?#]+)\.([A-Za-z0-9]+)$").unwrap()
});

/// Pieces of a rewritten line, as they appear in the proxy route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTarget {
    pub scheme: String,
    pub host: String,
    pub ext: String,
    pub encoded_path: String,
}

impl RewriteTarget {
    /// Splits an absolute `scheme://host/path.ext` URL. Anything else
    /// (relative URIs, tags, URLs with a query or userinfo) yields `None`.
    pub fn from_url(url: &str) -> Option<Self> {
        let captures = ABSOLUTE_URL.captures(url)?;
        Some(Self {
            scheme: captures[1].to_owned(),
            host: captures[2].to_owned(),
            ext: captures[4].to_owned(),
            encoded_path: URL_SAFE.encode(&captures[3]),
        })
    }

    pub fn proxy_url(&self, origin: &str) -> String {
        format!(
            "{origin}{CONTENT_PREFIX}/{}/{}/{}?path={}",
            self.scheme,
            self.host,
            self.ext,
            utf8_percent_encode(&self.encoded_path, NON_ALPHANUMERIC)
        )
    }
}

/// Rewrites every absolute URL line of `body`. `origin` is prefixed to the
/// generated paths; an empty origin keeps them root-relative.
pub fn rewrite(body: &str, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    let mut output = String::with_capacity(body.len());
    for line in body.split_inclusive('\n') {
        let content = line.trim_end_matches(['\r', '\n']);
        let ending = &line[content.len()..];
        match RewriteTarget::from_url(content.trim()) {
            Some(target) => {
                output.push_str(&target.proxy_url(origin));
                output.push_str(ending);
            }
            None => output.push_str(line),
        }
    }
    output
}

/// Rebuilds the original absolute URL from the proxy route parameters.
/// `encoded_path` is the already percent-decoded query value.
pub fn reverse(scheme: &str, host: &str, ext: &str, encoded_path: &str) -> Result<String> {
    if scheme != "http" && scheme != "https" {
        bail!("unsupported scheme {scheme:?}");
    }
    if host.is_empty() || host.contains(['/', '?', '#', '@']) {
        bail!("invalid host {host:?}");
    }
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        bail!("invalid extension {ext:?}");
    }
    let path = URL_SAFE
        .decode(encoded_path)
        .context("decoding playlist path")?;
    let path = String::from_utf8(path).context("playlist path is not UTF-8")?;
    Ok(format!("{scheme}://{host}/{path}.{ext}"))
}
