use anyhow::Context as _;
use hyper::{
    HeaderMap, Method,
    header::{HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};

/// Browser request as seen by the gateway, before or after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub method: Method,
    /// Path and query, without scheme or authority.
    pub url: String,
    pub headers: HeaderMap,
}

impl InboundRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        crate::query::split_url(&self.url).0
    }

    /// Text value of a header; `None` when absent or not visible ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }
}

/// Response exactly as recorded in a fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Response rebuilt for the live session.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Sets `name` to a computed value; values that cannot form a header are dropped
/// with a debug log rather than failing the request.
pub(crate) fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => {
            tracing::debug!(header = name, "skipping unrepresentable header value: {err}");
        }
    }
}

/// JSON projection of a request, used by the inspection CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFixture {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// JSON projection of a response, used by the inspection CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFixture {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: String,
}

fn default_status() -> u16 {
    200
}

impl TryFrom<RequestFixture> for InboundRequest {
    type Error = anyhow::Error;

    fn try_from(fixture: RequestFixture) -> Result<Self, Self::Error> {
        let method = Method::from_bytes(fixture.method.as_bytes())
            .with_context(|| format!("invalid request method `{}`", fixture.method))?;
        Ok(Self {
            method,
            url: fixture.url,
            headers: header_map_from_pairs(&fixture.headers)?,
        })
    }
}

impl From<&InboundRequest> for RequestFixture {
    fn from(request: &InboundRequest) -> Self {
        Self {
            method: request.method.as_str().to_owned(),
            url: request.url.clone(),
            headers: header_map_to_pairs(&request.headers),
        }
    }
}

impl TryFrom<ResponseFixture> for CachedResponse {
    type Error = anyhow::Error;

    fn try_from(fixture: ResponseFixture) -> Result<Self, Self::Error> {
        Ok(Self {
            status: fixture.status,
            headers: header_map_from_pairs(&fixture.headers)?,
            body: fixture.body,
        })
    }
}

impl From<&ReplayResponse> for ResponseFixture {
    fn from(response: &ReplayResponse) -> Self {
        Self {
            status: response.status,
            headers: header_map_to_pairs(&response.headers),
            body: response.body.clone(),
        }
    }
}

pub fn header_map_from_pairs(pairs: &[(String, String)]) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name `{name}`"))?;
        let header_value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header `{name}`"))?;
        headers.append(header_name, header_value);
    }
    Ok(headers)
}

/// Flattens a header map into sorted `(name, value)` pairs; binary values are
/// rendered lossily.
pub fn header_map_to_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_owned(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
}
