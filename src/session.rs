use serde::{Deserialize, Serialize};

/// Placeholder the authorize URL carries instead of the live `state` value.
pub const STATE_PLACEHOLDER: &str = "STATE";
/// Placeholder the authorize URL carries instead of the live `nonce` value.
pub const NONCE_PLACEHOLDER: &str = "NONCE";
/// `response_mode` under which the authorize response embeds tokens in a script.
pub const POST_MESSAGE_RESPONSE_MODE: &str = "okta_post_message";

/// Whether upstream traffic is being recorded or fixtures are being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Record,
    Playback,
}

impl Mode {
    pub fn from_record_flag(record: bool) -> Self {
        if record { Self::Record } else { Self::Playback }
    }

    pub fn is_record(self) -> bool {
        matches!(self, Self::Record)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Playback => "playback",
        }
    }
}

/// Request shape recognised by the normalizer. Exactly one applies per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Authorize,
    PrimaryAuthn,
    SessionDelete,
    RedirectCallback,
    Token,
    Userinfo,
    #[default]
    Other,
}

impl Flow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::PrimaryAuthn => "primary_authn",
            Self::SessionDelete => "session_delete",
            Self::RedirectCallback => "redirect_callback",
            Self::Token => "token",
            Self::Userinfo => "userinfo",
            Self::Other => "other",
        }
    }
}

/// Session-specific values pulled out of one request so the matching response
/// can be rebuilt for the live browser session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionExtract {
    #[serde(default)]
    pub flow: Flow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl SessionExtract {
    pub fn for_flow(flow: Flow) -> Self {
        Self {
            flow,
            ..Self::default()
        }
    }

    pub fn is_authorize_request(&self) -> bool {
        self.flow == Flow::Authorize
    }

    pub fn is_redirect_callback(&self) -> bool {
        self.flow == Flow::RedirectCallback
    }

    pub fn is_token_request(&self) -> bool {
        self.flow == Flow::Token
    }

    pub fn uses_post_message(&self) -> bool {
        self.response_mode.as_deref() == Some(POST_MESSAGE_RESPONSE_MODE)
    }
}

/// Authorize-time values a browser session carries into its later requests.
///
/// The redirect callback and token exchange arrive as separate requests whose
/// extracts hold no `state`/`nonce` of their own. The embedding server keeps
/// one `FlowState` per browser session, feeds every extract through
/// [`FlowState::observe`], and completes later extracts before reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowState {
    response_mode: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
}

impl FlowState {
    /// Remembers the values of an authorize extract; other flows are ignored.
    pub fn observe(&mut self, extract: &SessionExtract) {
        if !extract.is_authorize_request() {
            return;
        }
        self.response_mode = extract.response_mode.clone();
        self.state = extract.state.clone();
        self.nonce = extract.nonce.clone();
    }

    /// Fills values the extract lacks from the last observed authorize request.
    pub fn complete(&self, mut extract: SessionExtract) -> SessionExtract {
        if extract.state.is_none() {
            extract.state = self.state.clone();
        }
        if extract.nonce.is_none() {
            extract.nonce = self.nonce.clone();
        }
        if extract.response_mode.is_none() {
            extract.response_mode = self.response_mode.clone();
        }
        extract
    }
}

#[cfg(test)]
mod tests {
    use super::{Flow, FlowState, Mode, SessionExtract};

    fn authorize_extract(state: &str, nonce: &str) -> SessionExtract {
        SessionExtract {
            flow: Flow::Authorize,
            response_mode: Some("okta_post_message".to_owned()),
            state: Some(state.to_owned()),
            nonce: Some(nonce.to_owned()),
            cookie: Some(String::new()),
        }
    }

    #[test]
    fn flow_markers_are_mutually_exclusive() {
        let token = SessionExtract::for_flow(Flow::Token);
        assert!(token.is_token_request());
        assert!(!token.is_authorize_request());
        assert!(!token.is_redirect_callback());

        let callback = SessionExtract::for_flow(Flow::RedirectCallback);
        assert!(callback.is_redirect_callback());
        assert!(!callback.is_token_request());
    }

    #[test]
    fn flow_state_completes_later_requests_from_authorize_values() {
        let mut flow_state = FlowState::default();
        flow_state.observe(&authorize_extract("s-1", "n-1"));
        flow_state.observe(&SessionExtract::for_flow(Flow::PrimaryAuthn));

        let completed = flow_state.complete(SessionExtract::for_flow(Flow::Token));
        assert_eq!(completed.flow, Flow::Token);
        assert_eq!(completed.state.as_deref(), Some("s-1"));
        assert_eq!(completed.nonce.as_deref(), Some("n-1"));
        assert!(completed.uses_post_message());
    }

    #[test]
    fn flow_state_keeps_values_already_present() {
        let mut flow_state = FlowState::default();
        flow_state.observe(&authorize_extract("old", "old"));

        let completed = flow_state.complete(authorize_extract("new-state", "new-nonce"));
        assert_eq!(completed.state.as_deref(), Some("new-state"));
        assert_eq!(completed.nonce.as_deref(), Some("new-nonce"));
    }

    #[test]
    fn mode_maps_record_flag() {
        assert_eq!(Mode::from_record_flag(true), Mode::Record);
        assert_eq!(Mode::from_record_flag(false), Mode::Playback);
        assert!(Mode::Record.is_record());
        assert_eq!(Mode::Playback.as_str(), "playback");
    }

    #[test]
    fn session_extract_serializes_without_absent_fields() {
        let json = serde_json::to_string(&SessionExtract::for_flow(Flow::RedirectCallback))
            .expect("extract should serialize");
        assert_eq!(json, r#"{"flow":"redirect_callback"}"#);
    }
}
