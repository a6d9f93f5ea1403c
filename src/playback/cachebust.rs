//! Cache-busting for playlist manifest requests

/// Substring identifying HLS playlist manifests
const MANIFEST_PATTERN: &str = "m3u8";
/// Query parameter carrying the random token
const CACHEBUST_PARAM: &str = "cachebust";

/// Append a random `cachebust` parameter to manifest URIs
///
/// Other URIs are returned unchanged.
pub fn rewrite_uri(uri: &str) -> String {
    rewrite_uri_with(uri, &format!("{:08x}", rand::random::<u32>()))
}

fn rewrite_uri_with(uri: &str, token: &str) -> String {
    if !uri.contains(MANIFEST_PATTERN) {
        return uri.to_string();
    }

    let (base, fragment) = match uri.find('#') {
        Some(i) => uri.split_at(i),
        None => (uri, ""),
    };
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}{CACHEBUST_PARAM}={token}{fragment}")
}
