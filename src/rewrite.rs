use std::borrow::Cow;

use hyper::Uri;
use regex::{NoExpand, Regex};

use crate::config::EndpointsConfig;

/// Path under the gateway that stands in for the upstream default authorization server.
const ISSUER_PATH: &str = "/oauth2/default";

#[derive(Debug)]
pub enum EndpointError {
    InvalidUrl {
        field: &'static str,
        value: String,
        source: hyper::http::uri::InvalidUri,
    },
    MissingAuthority {
        field: &'static str,
        value: String,
    },
    Pattern {
        field: &'static str,
        source: regex::Error,
    },
}

impl EndpointError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidUrl { .. } => "invalid_url",
            Self::MissingAuthority { .. } => "missing_authority",
            Self::Pattern { .. } => "pattern",
        }
    }
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUrl { field, value, .. } => {
                write!(f, "endpoint `{field}` is not a valid URL: `{value}`")
            }
            Self::MissingAuthority { field, value } => {
                write!(f, "endpoint `{field}` needs a scheme and host: `{value}`")
            }
            Self::Pattern { field, .. } => {
                write!(f, "build rewrite pattern for endpoint `{field}`")
            }
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidUrl { source, .. } => Some(source),
            Self::Pattern { source, .. } => Some(source),
            Self::MissingAuthority { .. } => None,
        }
    }
}

/// Validated endpoint URLs plus the patterns that map upstream and CDN
/// occurrences onto the gateway.
#[derive(Debug, Clone)]
pub struct Endpoints {
    proxy: String,
    upstream_authority: String,
    cdn_authority: String,
    upstream_pattern: Regex,
    cdn_pattern: Regex,
}

impl Endpoints {
    pub fn from_config(config: &EndpointsConfig) -> Result<Self, EndpointError> {
        Self::new(&config.proxy, &config.proxied, &config.cdn)
    }

    pub fn new(proxy: &str, proxied: &str, cdn: &str) -> Result<Self, EndpointError> {
        authority_of("proxy", proxy)?;
        let upstream_authority = authority_of("proxied", proxied)?;
        let cdn_authority = authority_of("cdn", cdn)?;

        // JS string escapers emit `:`, `/` and punctuation in the host as
        // `\xHH` or `\u00HH`; `/` may also appear as `\/`.
        let upstream_pattern = Regex::new(&format!(
            "(?i)https?{}{}{{1,4}}{}",
            escapable_byte(b':'),
            escapable_byte(b'/'),
            escapable_text(&upstream_authority)
        ))
        .map_err(|source| EndpointError::Pattern {
            field: "proxied",
            source,
        })?;
        let cdn_pattern = Regex::new(&format!(
            "(?i)(?:https{})?{}{{2}}{}",
            escapable_byte(b':'),
            escapable_byte(b'/'),
            escapable_text(&cdn_authority)
        ))
        .map_err(|source| EndpointError::Pattern {
            field: "cdn",
            source,
        })?;

        Ok(Self {
            proxy: proxy.trim_end_matches('/').to_owned(),
            upstream_authority,
            cdn_authority,
            upstream_pattern,
            cdn_pattern,
        })
    }

    /// Gateway base URL without a trailing slash.
    pub fn proxy_url(&self) -> &str {
        &self.proxy
    }

    pub fn upstream_authority(&self) -> &str {
        &self.upstream_authority
    }

    pub fn cdn_authority(&self) -> &str {
        &self.cdn_authority
    }

    /// Issuer claimed by tokens the gateway re-signs.
    pub fn issuer(&self) -> String {
        format!("{}{ISSUER_PATH}", self.proxy)
    }

    /// Replaces every upstream and CDN base URL in `text` with the gateway URL.
    pub fn rewrite<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let upstream = self
            .upstream_pattern
            .replace_all(text, NoExpand(&self.proxy));
        let rewritten = match self.cdn_pattern.replace_all(&upstream, NoExpand(&self.proxy)) {
            Cow::Owned(rewritten) => Some(rewritten),
            Cow::Borrowed(_) => None,
        };
        match rewritten {
            Some(rewritten) => Cow::Owned(rewritten),
            None => upstream,
        }
    }
}

/// Regex matching `text` with every non-alphanumeric byte optionally JS-escaped.
fn escapable_text(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() * 4);
    for ch in text.chars() {
        match u8::try_from(ch) {
            Ok(byte) if byte.is_ascii() && !byte.is_ascii_alphanumeric() => {
                pattern.push_str(&escapable_byte(byte));
            }
            _ => pattern.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern
}

fn escapable_byte(byte: u8) -> String {
    let literal = regex::escape(char::from(byte).encode_utf8(&mut [0; 4]));
    let backslashed = if byte == b'/' { r"|\/" } else { "" };
    format!(r"(?:{literal}{backslashed}|\x{byte:02x}|\u00{byte:02x})")
}

fn authority_of(field: &'static str, value: &str) -> Result<String, EndpointError> {
    let uri: Uri = value.parse().map_err(|source| EndpointError::InvalidUrl {
        field,
        value: value.to_owned(),
        source,
    })?;
    match (uri.scheme(), uri.authority()) {
        (Some(_), Some(authority)) => Ok(authority.as_str().to_owned()),
        _ => Err(EndpointError::MissingAuthority {
            field,
            value: value.to_owned(),
        }),
    }
}
