use sha2::{Digest as _, Sha256};

use crate::{message::InboundRequest, query::split_url};

/// Fixture lookup key for a normalized request.
///
/// SHA-256 over length-prefixed dimensions:
/// - `method`: uppercased (ASCII)
/// - `path`: as-is
/// - `query`: raw `name=value` pairs (no percent-decoding), sorted by name then value,
///   repeated keys preserved
/// - `headers`: every header, lowercased names, raw value bytes, sorted by name then value
///
/// Callers pass the output of [`crate::normalize::normalize`]; hashing a raw browser
/// request yields a key that will not repeat across sessions.
pub fn match_key(request: &InboundRequest) -> String {
    let mut hasher = Sha256::new();

    hash_tagged_str(
        &mut hasher,
        b"method",
        &request.method.as_str().to_ascii_uppercase(),
    );

    let (path, query) = split_url(&request.url);
    hash_tagged_str(&mut hasher, b"path", path);

    let params = query_params_sorted(query);
    hash_len_prefixed(&mut hasher, b"query");
    hash_len_prefixed(&mut hasher, params.len().to_string().as_bytes());
    for (name, value) in params {
        hash_len_prefixed(&mut hasher, name.as_bytes());
        hash_len_prefixed(&mut hasher, value.as_bytes());
    }

    let headers = headers_sorted(&request.headers);
    hash_len_prefixed(&mut hasher, b"headers");
    hash_len_prefixed(&mut hasher, headers.len().to_string().as_bytes());
    for (name, value) in headers {
        hash_len_prefixed(&mut hasher, name.as_bytes());
        hash_len_prefixed(&mut hasher, value);
    }

    hex_encode(&hasher.finalize())
}

fn query_params_sorted(query: Option<&str>) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let Some(query) = query else { return out };

    for segment in query.split('&') {
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
        out.push((name, value));
    }

    out.sort_unstable();
    out
}

fn headers_sorted(headers: &hyper::HeaderMap) -> Vec<(&str, &[u8])> {
    // `HeaderName` is always stored lowercase.
    let mut out: Vec<(&str, &[u8])> = headers
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes()))
        .collect();
    out.sort_unstable();
    out
}

fn hash_tagged_str(hasher: &mut Sha256, tag: &[u8], value: &str) {
    hash_len_prefixed(hasher, tag);
    hash_len_prefixed(hasher, value.as_bytes());
}

fn hash_len_prefixed(hasher: &mut Sha256, value: &[u8]) {
    hasher.update(u64::try_from(value.len()).unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(value);
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[(byte >> 4) as usize]));
        out.push(char::from(HEX[(byte & 0x0f) as usize]));
    }
    out
}
