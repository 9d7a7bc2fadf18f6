use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, bail};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Map, Value};

/// Lifetime given to every re-signed token, counted from the moment of signing.
pub const REISSUED_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug)]
pub enum TokenError {
    Structure { segments: usize },
    Header(jsonwebtoken::errors::Error),
    PayloadEncoding(base64::DecodeError),
    PayloadJson(serde_json::Error),
    PayloadNotObject,
    UnsupportedAlgorithm { algorithm: Algorithm, key: KeyFamily },
    Sign(jsonwebtoken::errors::Error),
}

impl TokenError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structure { .. } => "token_structure",
            Self::Header(_) => "token_header",
            Self::PayloadEncoding(_) => "token_payload_encoding",
            Self::PayloadJson(_) => "token_payload_json",
            Self::PayloadNotObject => "token_payload_not_object",
            Self::UnsupportedAlgorithm { .. } => "token_unsupported_algorithm",
            Self::Sign(_) => "token_sign",
        }
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structure { segments } => {
                write!(f, "token has {segments} segments; expected 3")
            }
            Self::Header(_) => write!(f, "decode token header"),
            Self::PayloadEncoding(_) => write!(f, "decode token payload as base64url"),
            Self::PayloadJson(_) => write!(f, "parse token payload as JSON"),
            Self::PayloadNotObject => write!(f, "token payload is not a JSON object"),
            Self::UnsupportedAlgorithm { algorithm, key } => write!(
                f,
                "token algorithm {algorithm:?} cannot be signed with the {} gateway key",
                key.as_str()
            ),
            Self::Sign(_) => write!(f, "sign token"),
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Header(source) | Self::Sign(source) => Some(source),
            Self::PayloadEncoding(source) => Some(source),
            Self::PayloadJson(source) => Some(source),
            Self::Structure { .. } | Self::PayloadNotObject | Self::UnsupportedAlgorithm { .. } => {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rsa => "RSA",
            Self::Ec => "EC",
            Self::Ed => "EdDSA",
        }
    }

    fn signs(self, algorithm: Algorithm) -> bool {
        match self {
            Self::Rsa => matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
            Self::Ec => matches!(algorithm, Algorithm::ES256 | Algorithm::ES384),
            Self::Ed => matches!(algorithm, Algorithm::EdDSA),
        }
    }
}

/// The gateway's fixed private key and the `kid` its public half is published under.
#[derive(Clone)]
pub struct SigningKey {
    family: KeyFamily,
    encoding: EncodingKey,
    kid: String,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("family", &self.family)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Loads a PKCS#8 PEM private key, detecting RSA, EC or Ed25519.
    pub fn from_pem(pem: &[u8], kid: impl Into<String>) -> anyhow::Result<Self> {
        let kid = kid.into();
        if kid.trim().is_empty() {
            bail!("signing key `kid` cannot be empty");
        }

        let (family, encoding) = if let Ok(encoding) = EncodingKey::from_rsa_pem(pem) {
            (KeyFamily::Rsa, encoding)
        } else if let Ok(encoding) = EncodingKey::from_ec_pem(pem) {
            (KeyFamily::Ec, encoding)
        } else {
            let encoding = EncodingKey::from_ed_pem(pem)
                .context("signing key is not an RSA, EC or Ed25519 PEM private key")?;
            (KeyFamily::Ed, encoding)
        };

        Ok(Self {
            family,
            encoding,
            kid,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }
}

/// Claims overwritten when a token is re-issued for the live session.
#[derive(Debug, Clone, Copy)]
pub struct ClaimsPatch<'a> {
    pub nonce: &'a str,
    pub issuer: &'a str,
    /// Set only when a fresh access-token hash was computed.
    pub at_hash: Option<&'a str>,
}

/// Header and claims of a compact JWS, decoded without checking its signature.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    pub header: Header,
    pub claims: Map<String, Value>,
}

pub fn decode_unverified(token: &str) -> Result<DecodedToken, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = segments.as_slice() else {
        return Err(TokenError::Structure {
            segments: segments.len(),
        });
    };

    let header = jsonwebtoken::decode_header(token).map_err(TokenError::Header)?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(TokenError::PayloadEncoding)?;
    let claims = match serde_json::from_slice(&payload).map_err(TokenError::PayloadJson)? {
        Value::Object(claims) => claims,
        _ => return Err(TokenError::PayloadNotObject),
    };

    Ok(DecodedToken { header, claims })
}

/// Re-issues `token` under the gateway key with the patched claims and a fresh `exp`.
pub fn swap_token(
    token: &str,
    patch: &ClaimsPatch<'_>,
    key: &SigningKey,
) -> Result<String, TokenError> {
    swap_token_at(token, patch, key, unix_now_secs())
}

pub(crate) fn swap_token_at(
    token: &str,
    patch: &ClaimsPatch<'_>,
    key: &SigningKey,
    now_unix_secs: i64,
) -> Result<String, TokenError> {
    let DecodedToken {
        mut header,
        mut claims,
    } = decode_unverified(token)?;

    if !key.family.signs(header.alg) {
        return Err(TokenError::UnsupportedAlgorithm {
            algorithm: header.alg,
            key: key.family,
        });
    }
    header.kid = Some(key.kid.clone());

    claims.insert("nonce".to_owned(), Value::from(patch.nonce));
    claims.insert("iss".to_owned(), Value::from(patch.issuer));
    if let Some(at_hash) = patch.at_hash {
        claims.insert("at_hash".to_owned(), Value::from(at_hash));
    }
    claims.insert(
        "exp".to_owned(),
        Value::from(now_unix_secs.saturating_add(REISSUED_TOKEN_TTL_SECS)),
    );

    let reissued =
        jsonwebtoken::encode(&header, &claims, &key.encoding).map_err(TokenError::Sign)?;
    tracing::debug!(
        kid = %key.kid,
        algorithm = ?header.alg,
        at_hash = patch.at_hash.is_some(),
        "re-signed token"
    );
    Ok(reissued)
}

fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::Value;

    use super::SigningKey;

    pub(crate) const GATEWAY_KEY_PEM: &str = include_str!("../tests/fixtures/gateway_key.pem");
    pub(crate) const GATEWAY_PUBLIC_PEM: &str =
        include_str!("../tests/fixtures/gateway_key.pub.pem");
    pub(crate) const UPSTREAM_KEY_PEM: &str = include_str!("../tests/fixtures/upstream_key.pem");
    pub(crate) const GATEWAY_KID: &str = "gateway-kid";

    pub(crate) fn gateway_key() -> SigningKey {
        SigningKey::from_pem(GATEWAY_KEY_PEM.as_bytes(), GATEWAY_KID)
            .expect("fixture key should load")
    }

    /// Token as the real identity provider would have issued it.
    pub(crate) fn upstream_token(claims: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some("upstream-kid".to_owned());
        let key = EncodingKey::from_rsa_pem(UPSTREAM_KEY_PEM.as_bytes())
            .expect("upstream fixture key should load");
        jsonwebtoken::encode(&header, &claims, &key).expect("upstream token should encode")
    }

    /// Verifies against the gateway public key and returns the claims.
    pub(crate) fn verify_gateway_token(token: &str) -> Value {
        let key = jsonwebtoken::DecodingKey::from_rsa_pem(GATEWAY_PUBLIC_PEM.as_bytes())
            .expect("gateway public key should load");
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        jsonwebtoken::decode::<Value>(token, &key, &validation)
            .expect("token should verify with gateway key")
            .claims
    }
}
