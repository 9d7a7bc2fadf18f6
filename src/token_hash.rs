use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest as _, Sha256};

/// OIDC `at_hash` for an access token: base64url of the left half of its SHA-256.
///
/// Only correct for tokens signed with a SHA-256 based algorithm (RS256, PS256,
/// ES256), which is what the gateway key issues for the flows it re-signs.
pub fn access_token_hash(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::access_token_hash;

    #[test]
    fn matches_oidc_core_example() {
        assert_eq!(
            access_token_hash("jHkWEdUXMU1BwAsC4vtUsZwnNvTIxEl0z9K3vx5KF0Y"),
            "77QmUPtjPfzWtF2AnpK9RQ"
        );
    }

    #[test]
    fn hash_is_half_digest_without_padding() {
        let hash = access_token_hash("anything");
        assert_eq!(hash.len(), 22);
        assert!(!hash.contains('='));
    }
}
