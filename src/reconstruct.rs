//! Rebuilds a recorded response for the live browser session.
//!
//! URLs are pointed back at the gateway, the callback `state` is restored, and
//! any ID/access tokens the flow hands out are re-issued under the gateway key
//! with the live nonce and the gateway issuer.
//!
//! Token locations:
//! - JSON bodies (declared `application/json`, or parseable as a JSON object):
//!   the top-level `id_token` / `access_token` string fields.
//! - Anything else: the first match of
//!   `"(id_token|access_token)"\s*:\s*"<jwt>"` (JSON-looking text), or for the
//!   `okta_post_message` page, `\b(id_token|access_token)\s*=\s*['"]<jwt>['"]`
//!   (script assignments such as `data.id_token = '...'`). `<jwt>` is three
//!   base64url segments joined by `.`.

use std::sync::OnceLock;

use hyper::{
    HeaderMap,
    header::{self, HeaderValue},
};
use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    context::GatewayContext,
    diagnostics,
    message::{CachedResponse, ReplayResponse},
    query::encode_component,
    session::{Flow, Mode, STATE_PLACEHOLDER, SessionExtract},
    token::{ClaimsPatch, SigningKey, TokenError, swap_token},
    token_hash::access_token_hash,
};

const ID_TOKEN: &str = "id_token";
const ACCESS_TOKEN: &str = "access_token";

#[derive(Debug)]
pub enum ReconstructError {
    /// The flow promises a token the recorded body does not contain.
    MissingMarker { flow: Flow, marker: &'static str },
    /// A value observed on the authorize request is needed but was never supplied.
    MissingSessionValue { flow: Flow, field: &'static str },
    InvalidJsonBody(serde_json::Error),
    Token {
        field: &'static str,
        source: TokenError,
    },
}

impl ReconstructError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingMarker { .. } => "missing_marker",
            Self::MissingSessionValue { .. } => "missing_session_value",
            Self::InvalidJsonBody(_) => "invalid_json_body",
            Self::Token { source, .. } => source.kind(),
        }
    }
}

impl std::fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMarker { flow, marker } => write!(
                f,
                "recorded {} response does not contain `{marker}`",
                flow.as_str()
            ),
            Self::MissingSessionValue { flow, field } => write!(
                f,
                "{} response needs the session `{field}` but none was captured",
                flow.as_str()
            ),
            Self::InvalidJsonBody(_) => write!(f, "parse recorded JSON response body"),
            Self::Token { field, .. } => write!(f, "re-issue `{field}`"),
        }
    }
}

impl std::error::Error for ReconstructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidJsonBody(source) => Some(source),
            Self::Token { source, .. } => Some(source),
            Self::MissingMarker { .. } | Self::MissingSessionValue { .. } => None,
        }
    }
}

/// Produces the response sent to the browser from a recorded one.
///
/// `session` must be the extract of the request that matched `cached`, completed
/// with the authorize-time values (see [`crate::session::FlowState`]).
pub fn reconstruct(
    cached: &CachedResponse,
    session: &SessionExtract,
    context: &GatewayContext,
    mode: Mode,
) -> Result<ReplayResponse, ReconstructError> {
    let mut headers = rebuild_headers(&cached.headers, session, context)?;

    let mut body = context.endpoints.rewrite(&cached.body).into_owned();
    match session.flow {
        Flow::Authorize if session.uses_post_message() => {
            let mut tokens = TextTokens::new(body, script_token_regex());
            reissue_post_message_tokens(&mut tokens, session, context)?;
            body = tokens.into_body();
        }
        Flow::Token => {
            body = reissue_token_response(body, &cached.headers, session, context, mode)?;
        }
        _ => {}
    }

    if headers.contains_key(header::CONTENT_LENGTH) {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    diagnostics::log_header_diff("reconstruct", session.flow.as_str(), &cached.headers, &headers);
    let body_rewritten = body != cached.body;
    tracing::debug!(
        flow = session.flow.as_str(),
        mode = mode.as_str(),
        status = cached.status,
        body_rewritten,
        "response reconstructed"
    );

    Ok(ReplayResponse {
        status: cached.status,
        headers,
        body,
    })
}

fn rebuild_headers(
    cached: &HeaderMap,
    session: &SessionExtract,
    context: &GatewayContext,
) -> Result<HeaderMap, ReconstructError> {
    let placeholder = format!("state={STATE_PLACEHOLDER}");
    let mut headers = HeaderMap::with_capacity(cached.len());

    for (name, value) in cached {
        if name == header::ETAG || name == header::LAST_MODIFIED {
            continue;
        }
        let Ok(text) = value.to_str() else {
            headers.append(name.clone(), value.clone());
            continue;
        };

        let mut rewritten = context.endpoints.rewrite(text).into_owned();
        if name == header::LOCATION && session.is_redirect_callback() && rewritten.contains(&placeholder)
        {
            let state = session
                .state
                .as_deref()
                .ok_or(ReconstructError::MissingSessionValue {
                    flow: session.flow,
                    field: "state",
                })?;
            let restored = rewritten.replace(&placeholder, &format!("state={}", encode_component(state)));
            diagnostics::log_text_change("reconstruct", "location", &rewritten, &restored);
            rewritten = restored;
        }

        match HeaderValue::from_str(&rewritten) {
            Ok(rewritten) => headers.append(name.clone(), rewritten),
            Err(_) => headers.append(name.clone(), value.clone()),
        };
    }

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(headers)
}

/// Implicit-flow page: both script-embedded tokens are re-issued independently.
fn reissue_post_message_tokens(
    tokens: &mut impl TokenSlots,
    session: &SessionExtract,
    context: &GatewayContext,
) -> Result<(), ReconstructError> {
    let issuer = context.endpoints.issuer();
    let nonce = required_nonce(session)?;
    let patch = ClaimsPatch {
        nonce,
        issuer: &issuer,
        at_hash: None,
    };

    reissue(tokens, ID_TOKEN, &patch, &context.signing_key, session.flow)?;
    reissue(tokens, ACCESS_TOKEN, &patch, &context.signing_key, session.flow)?;
    Ok(())
}

/// Token endpoint: while recording only the ID token needs the gateway issuer;
/// in playback the access token is re-signed too and the ID token re-bound to it.
fn reissue_token_pair(
    tokens: &mut impl TokenSlots,
    session: &SessionExtract,
    context: &GatewayContext,
    mode: Mode,
) -> Result<(), ReconstructError> {
    let issuer = context.endpoints.issuer();
    let nonce = required_nonce(session)?;
    let key = &context.signing_key;

    let at_hash = match mode {
        Mode::Record => None,
        Mode::Playback => {
            let patch = ClaimsPatch {
                nonce,
                issuer: &issuer,
                at_hash: None,
            };
            let access_token = reissue(tokens, ACCESS_TOKEN, &patch, key, session.flow)?;
            Some(access_token_hash(&access_token))
        }
    };

    let patch = ClaimsPatch {
        nonce,
        issuer: &issuer,
        at_hash: at_hash.as_deref(),
    };
    reissue(tokens, ID_TOKEN, &patch, key, session.flow)?;
    Ok(())
}

fn reissue_token_response(
    body: String,
    cached_headers: &HeaderMap,
    session: &SessionExtract,
    context: &GatewayContext,
    mode: Mode,
) -> Result<String, ReconstructError> {
    let declared_json = cached_headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("json"));

    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(document)) => {
            let mut tokens = JsonTokens(document);
            reissue_token_pair(&mut tokens, session, context, mode)?;
            serde_json::to_string(&tokens.0).map_err(ReconstructError::InvalidJsonBody)
        }
        Err(err) if declared_json => Err(ReconstructError::InvalidJsonBody(err)),
        _ => {
            let mut tokens = TextTokens::new(body, json_text_token_regex());
            reissue_token_pair(&mut tokens, session, context, mode)?;
            Ok(tokens.into_body())
        }
    }
}

fn required_nonce(session: &SessionExtract) -> Result<&str, ReconstructError> {
    session
        .nonce
        .as_deref()
        .ok_or(ReconstructError::MissingSessionValue {
            flow: session.flow,
            field: "nonce",
        })
}

/// Swaps the token stored under `field` in place and returns the new token.
fn reissue(
    tokens: &mut impl TokenSlots,
    field: &'static str,
    patch: &ClaimsPatch<'_>,
    key: &SigningKey,
    flow: Flow,
) -> Result<String, ReconstructError> {
    let recorded = tokens
        .get(field)
        .ok_or(ReconstructError::MissingMarker { flow, marker: field })?;
    let reissued =
        swap_token(&recorded, patch, key).map_err(|source| ReconstructError::Token { field, source })?;
    tokens.set(field, &reissued);
    Ok(reissued)
}

/// Where a response body keeps its tokens.
trait TokenSlots {
    fn get(&self, field: &str) -> Option<String>;
    fn set(&mut self, field: &str, token: &str);
}

struct JsonTokens(Map<String, Value>);

impl TokenSlots for JsonTokens {
    fn get(&self, field: &str) -> Option<String> {
        self.0.get(field).and_then(Value::as_str).map(str::to_owned)
    }

    fn set(&mut self, field: &str, token: &str) {
        self.0.insert(field.to_owned(), Value::from(token));
    }
}

struct TextTokens {
    body: String,
    pattern: &'static Regex,
}

impl TextTokens {
    fn new(body: String, pattern: &'static Regex) -> Self {
        Self { body, pattern }
    }

    fn locate(&self, field: &str) -> Option<std::ops::Range<usize>> {
        self.pattern
            .captures_iter(&self.body)
            .find(|captures| captures.name("field").is_some_and(|m| m.as_str() == field))
            .and_then(|captures| captures.name("token"))
            .map(|token| token.range())
    }

    fn into_body(self) -> String {
        self.body
    }
}

impl TokenSlots for TextTokens {
    fn get(&self, field: &str) -> Option<String> {
        self.locate(field).map(|range| self.body[range].to_owned())
    }

    fn set(&mut self, field: &str, token: &str) {
        if let Some(range) = self.locate(field) {
            self.body.replace_range(range, token);
        }
    }
}

fn script_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r#"\b(?P<field>id_token|access_token)\s*=\s*['"](?P<token>[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+)['"]"#,
        )
        .expect("script token regex should compile")
    })
}

fn json_text_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r#""(?P<field>id_token|access_token)"\s*:\s*"(?P<token>[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+)""#,
        )
        .expect("JSON text token regex should compile")
    })
}
