//! Query-string helpers that keep every untouched pair byte-for-byte.

/// Splits `path?query` into its path and optional query.
pub(crate) fn split_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}

/// Raw `key=value` pairs of a query; pairs without `=` are skipped.
fn raw_pairs(query: &str) -> impl Iterator<Item = (&str, &str)> {
    query.split('&').filter_map(|pair| pair.split_once('='))
}

/// First value of `name` in the url's query, percent-decoded.
pub(crate) fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = split_url(url);
    raw_pairs(query?)
        .find(|(key, _)| decode_component(key) == name)
        .map(|(_, value)| decode_component(value))
}

/// Rewrites the raw value of every `name` pair through `replace`, leaving other
/// pairs and their order untouched.
pub(crate) fn map_param_values<F>(url: &str, name: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> String,
{
    let (path, Some(query)) = split_url(url) else {
        return url.to_owned();
    };

    let pairs: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if decode_component(key) == name => {
                format!("{key}={}", replace(value))
            }
            _ => pair.to_owned(),
        })
        .collect();
    format!("{path}?{}", pairs.join("&"))
}

/// Form-style decoding: `+` is a space, malformed `%` escapes stay literal and
/// invalid UTF-8 is replaced.
pub(crate) fn decode_component(value: &str) -> String {
    let mut decoded = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        rest = tail;
        match byte {
            b'+' => decoded.push(b' '),
            b'%' => match tail.get(..2).and_then(escaped_byte) {
                Some(unescaped) => {
                    decoded.push(unescaped);
                    rest = &tail[2..];
                }
                None => decoded.push(b'%'),
            },
            _ => decoded.push(byte),
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn escaped_byte(hex: &[u8]) -> Option<u8> {
    if !hex.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
pub(crate) fn encode_component(value: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
            continue;
        }
        encoded.push('%');
        encoded.push(char::from(HEX[(byte >> 4) as usize]));
        encoded.push(char::from(HEX[(byte & 0x0F) as usize]));
    }
    encoded
}
