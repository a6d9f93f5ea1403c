//! `Link` header parsing and WHEP extension discovery
//!
//! WHEP servers advertise their auxiliary endpoints through one or more
//! `Link` headers on the offer response:
//!
//! ```text
//! Link: <host/api/sse/abc>; rel="urn:ietf:params:whep:ext:core:server-sent-events"; events="layers"
//! Link: <host/api/layer/abc>; rel="urn:ietf:params:whep:ext:core:layer"
//! ```
//!
//! Entries may also be comma-joined into a single header value.

use std::collections::HashMap;

use reqwest::Url;
use tracing::debug;

/// One link-value from a `Link` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    /// Target exactly as advertised
    pub target: String,
    /// Target resolved against the signaling endpoint
    pub url: Url,
    /// Target attributes other than `rel` (lower-cased names, unquoted values)
    pub params: HashMap<String, String>,
}

/// Relation type → link entry, derived once per session
#[derive(Debug, Clone, Default)]
pub struct LinkDirectory {
    entries: HashMap<String, LinkEntry>,
}

/// Outcome of looking up the two WHEP relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDiscovery {
    /// Both the layer and the events endpoint are known
    Complete { layer: Url, events: Url },
    /// At least one relation is missing; the caller decides whether to go on
    Degraded {
        layer: Option<Url>,
        events: Option<Url>,
        missing: Vec<String>,
    },
}

impl LinkDiscovery {
    pub fn is_complete(&self) -> bool {
        matches!(self, LinkDiscovery::Complete { .. })
    }

    pub fn layer_url(&self) -> Option<&Url> {
        match self {
            LinkDiscovery::Complete { layer, .. } => Some(layer),
            LinkDiscovery::Degraded { layer, .. } => layer.as_ref(),
        }
    }

    pub fn events_url(&self) -> Option<&Url> {
        match self {
            LinkDiscovery::Complete { events, .. } => Some(events),
            LinkDiscovery::Degraded { events, .. } => events.as_ref(),
        }
    }
}

impl LinkDirectory {
    /// Parse every `Link` header value, resolving targets against `base`
    ///
    /// Malformed link-values are skipped. When several links carry the same
    /// relation the first one wins.
    pub fn parse<'a, I>(values: I, base: &Url) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = HashMap::new();

        for value in values {
            for segment in split_unquoted(value, ',') {
                let Some((target, mut params)) = parse_link_value(segment) else {
                    debug!("Skipping malformed link-value: {}", segment.trim());
                    continue;
                };
                let Some(url) = resolve_target(&target, base) else {
                    debug!("Skipping unresolvable link target: {}", target);
                    continue;
                };
                let Some(rel) = params.remove("rel") else {
                    continue;
                };

                let entry = LinkEntry {
                    target,
                    url,
                    params,
                };
                for relation in rel.split_ascii_whitespace() {
                    entries
                        .entry(relation.to_string())
                        .or_insert_with(|| entry.clone());
                }
            }
        }

        Self { entries }
    }

    pub fn get(&self, relation: &str) -> Option<&LinkEntry> {
        self.entries.get(relation)
    }

    pub fn url(&self, relation: &str) -> Option<&Url> {
        self.get(relation).map(|entry| &entry.url)
    }

    pub fn relations(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the layer and events relations
    pub fn discover(&self, layer_relation: &str, events_relation: &str) -> LinkDiscovery {
        let layer = self.url(layer_relation).cloned();
        let events = self.url(events_relation).cloned();

        match (layer, events) {
            (Some(layer), Some(events)) => LinkDiscovery::Complete { layer, events },
            (layer, events) => {
                let mut missing = Vec::new();
                if layer.is_none() {
                    missing.push(layer_relation.to_string());
                }
                if events.is_none() {
                    missing.push(events_relation.to_string());
                }
                LinkDiscovery::Degraded {
                    layer,
                    events,
                    missing,
                }
            }
        }
    }
}

/// Resolve an advertised target to an absolute URL
///
/// Absolute `http(s)` targets are kept, `//authority/path` and `/path` are
/// resolved against `base`, and anything else is read as `authority/path`
/// with the scheme of `base`.
pub fn resolve_target(target: &str, base: &Url) -> Option<Url> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(target) {
        if matches!(url.scheme(), "http" | "https") {
            return Some(url);
        }
    }

    if target.starts_with('/') {
        // Covers both "/path" and "//authority/path"
        return base.join(target).ok();
    }

    Url::parse(&format!("{}://{}", base.scheme(), target)).ok()
}

/// Split `input` on `sep`, ignoring separators inside `<...>` or quotes
fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_angle = false;
    let mut in_quote = false;
    let mut escaped = false;

    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' if !in_angle => in_quote = !in_quote,
            '<' if !in_quote => in_angle = true,
            '>' if !in_quote => in_angle = false,
            c if c == sep && !in_angle && !in_quote => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);

    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Parse `<target>; name=value; name="quoted value"`
fn parse_link_value(segment: &str) -> Option<(String, HashMap<String, String>)> {
    let segment = segment.trim();
    let rest = segment.strip_prefix('<')?;
    let end = rest.find('>')?;
    let target = rest[..end].trim().to_string();

    let mut params = HashMap::new();
    for param in split_unquoted(&rest[end + 1..], ';') {
        let param = param.trim();
        let (name, value) = match param.split_once('=') {
            Some((name, value)) => (name.trim(), unquote(value.trim())),
            None => (param, String::new()),
        };
        if name.is_empty() {
            continue;
        }
        // Only the first occurrence of a parameter counts
        params
            .entry(name.to_ascii_lowercase())
            .or_insert(value);
    }

    Some((target, params))
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
