//! Canonical request form used as the fixture lookup key.
//!
//! Every value that differs between browsers or sessions without changing the
//! upstream response is removed or pinned. Values the response depends on
//! (`state`, `nonce`, session cookies) are lifted into a [`SessionExtract`] so
//! reconstruction can put the live values back.

use std::sync::OnceLock;

use hyper::{
    HeaderMap, Method,
    header::{self, HeaderValue},
};
use regex::Regex;

use crate::{
    diagnostics,
    message::{InboundRequest, set_header},
    query::{self, decode_component, encode_component},
    session::{Flow, Mode, NONCE_PLACEHOLDER, STATE_PLACEHOLDER, SessionExtract},
};

pub const CANONICAL_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const HTML_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const VOLATILE_HEADERS: &[&str] = &[
    "upgrade-insecure-requests",
    "x-okta-user-agent-extended",
    "if-none-match",
    "if-modified-since",
    "expect",
    "referer",
];
const API_PREFIX: &str = "/api/v1";
const AUTHN_PREFIX: &str = "/api/v1/authn";
const SESSION_ME_SEGMENT: &str = "/sessions/me";
const REDIRECT_CALLBACK_PREFIX: &str = "/oauth2/v1/authorize/redirect";
const TOKEN_PREFIX: &str = "/oauth2/default/v1/token";
const USERINFO_SEGMENT: &str = "/oauth2/default/v1/userinfo";
const PREFLIGHT_DROPPED_HEADERS: &[&str] = &["accept", "origin"];

/// Playback-only request overrides.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSettings {
    /// Bearer token the userinfo fixture was recorded with.
    pub userinfo_access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub request: InboundRequest,
    pub session: SessionExtract,
}

/// Returns the canonical form of `request` and the session values it carried.
///
/// The input is left untouched. Never fails: header values that cannot be
/// represented after rewriting are dropped.
pub fn normalize(request: &InboundRequest, mode: Mode, playback: &PlaybackSettings) -> Normalized {
    let mut normalized = request.clone();
    let headers = &mut normalized.headers;

    for name in VOLATILE_HEADERS {
        headers.remove(*name);
    }

    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(CANONICAL_USER_AGENT),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    let accept = canonical_accept(request.header_str("accept").unwrap_or_default());
    headers.insert(header::ACCEPT, HeaderValue::from_static(accept));

    let preflight = headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
    if preflight {
        normalize_preflight(headers);
    } else if request.path().starts_with(API_PREFIX) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
    }

    let cookie = scrub_cookie(&joined_cookie(&request.headers));
    headers.remove(header::COOKIE);
    set_header(headers, "cookie", &cookie);

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

    let session = apply_flow(&mut normalized, mode, playback, cookie);

    diagnostics::log_text_change("normalize", "url", &request.url, &normalized.url);
    diagnostics::log_header_diff("normalize", &request.url, &request.headers, &normalized.headers);
    tracing::debug!(
        method = %request.method,
        flow = session.flow.as_str(),
        mode = mode.as_str(),
        "request normalized"
    );

    Normalized {
        request: normalized,
        session,
    }
}

/// Classifies a request by method and URL shape; the first matching rule wins.
pub fn classify(method: &Method, url: &str, mode: Mode) -> Flow {
    let (path, _) = query::split_url(url);
    if url.contains("authorize?") {
        Flow::Authorize
    } else if path.starts_with(AUTHN_PREFIX) {
        Flow::PrimaryAuthn
    } else if *method == Method::DELETE && path.contains(SESSION_ME_SEGMENT) {
        Flow::SessionDelete
    } else if path.starts_with(REDIRECT_CALLBACK_PREFIX) {
        Flow::RedirectCallback
    } else if path.starts_with(TOKEN_PREFIX) {
        Flow::Token
    } else if !mode.is_record() && path.contains(USERINFO_SEGMENT) {
        Flow::Userinfo
    } else {
        Flow::Other
    }
}

fn apply_flow(
    request: &mut InboundRequest,
    mode: Mode,
    playback: &PlaybackSettings,
    cookie: String,
) -> SessionExtract {
    let flow = classify(&request.method, &request.url, mode);
    let mut session = SessionExtract::for_flow(flow);

    match flow {
        Flow::Authorize => {
            session.state = query::query_param(&request.url, "state");
            session.nonce = query::query_param(&request.url, "nonce");
            session.response_mode = query::query_param(&request.url, "response_mode");

            let url = query::map_param_values(&request.url, "state", |_| {
                STATE_PLACEHOLDER.to_owned()
            });
            let url = query::map_param_values(&url, "nonce", |_| NONCE_PLACEHOLDER.to_owned());
            request.url = query::map_param_values(&url, "scope", canonical_scope);

            request.headers.remove(header::COOKIE);
            session.cookie = Some(cookie);
        }
        Flow::PrimaryAuthn => {
            request.headers.remove(header::COOKIE);
            session.cookie = Some(cookie);
        }
        Flow::SessionDelete => {
            session.cookie = Some(cookie);
        }
        Flow::Userinfo => match playback.userinfo_access_token.as_deref() {
            Some(token) => set_header(
                &mut request.headers,
                "authorization",
                &format!("Bearer {token}"),
            ),
            None => tracing::warn!(
                "userinfo playback without a configured recorded access token; fixture lookup will likely miss"
            ),
        },
        Flow::RedirectCallback | Flow::Token | Flow::Other => {}
    }

    session
}

fn canonical_accept(accept: &str) -> &'static str {
    if accept.contains("text/html") {
        HTML_ACCEPT
    } else if accept.contains("json") {
        "application/json"
    } else {
        "*/*"
    }
}

fn normalize_preflight(headers: &mut HeaderMap) {
    if headers
        .get(header::CONTENT_LENGTH)
        .is_some_and(|value| value.as_bytes() == b"0")
    {
        headers.remove(header::CONTENT_LENGTH);
    }

    if !headers.contains_key(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        return;
    }
    let requested = headers
        .get_all(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let canonical = canonical_request_headers(&requested);
    set_header(headers, "access-control-request-headers", &canonical);
}

/// Lowercased, sorted, comma-space joined; `accept`/`origin` and blanks removed.
fn canonical_request_headers(requested: &str) -> String {
    let mut names: Vec<String> = requested
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty() && !PREFLIGHT_DROPPED_HEADERS.contains(&name.as_str()))
        .collect();
    names.sort_unstable();
    names.join(", ")
}

fn joined_cookie(headers: &HeaderMap) -> String {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Drops AppDynamics `ADRUM*` cookies, which change on every page load.
///
/// Only pairs whose name starts with `ADRUM` go; the separator in front of a
/// dropped pair goes with it.
fn scrub_cookie(cookie: &str) -> String {
    adrum_regex()
        .replace_all(cookie, "")
        .trim_matches(|ch: char| ch == ';' || ch.is_whitespace())
        .to_owned()
}

fn adrum_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)(?:^|;)\s*ADRUM[^;]*").expect("ADRUM cookie regex should compile")
    })
}

/// Sorts the space-separated scope values so clients that order them
/// differently share one fixture.
fn canonical_scope(raw: &str) -> String {
    let decoded = decode_component(raw);
    let mut scopes: Vec<&str> = decoded.split_whitespace().collect();
    scopes.sort_unstable();
    scopes
        .into_iter()
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("%20")
}
