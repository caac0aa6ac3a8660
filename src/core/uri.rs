//! URI splitting shared by the proxy URL merge and non-HTTP egress logging.
//!
//! Splitting is deliberately loose: it accepts templates such as `http:` or `urn:postgres`
//! that a strict URI parser would reject, and only fails on input that cannot name a
//! resource at all (empty scheme, malformed authority, control characters).
use std::str::FromStr;

use http::uri::Authority;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("missing protocol scheme [{0}]")]
    MissingScheme(String),

    #[error("invalid authority [{authority}] in [{uri}]")]
    InvalidAuthority { uri: String, authority: String },

    #[error("invalid control character in [{0}]")]
    ControlCharacter(String),
}

/// Components of a URI or URI template. Absent parts are empty strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UriParts<'a> {
    pub scheme: &'a str,
    /// `host[:port]` when the URI carries a `//` authority.
    pub authority: &'a str,
    /// Remainder after `scheme:` when no `//` or `/` follows, e.g. `postgres` in `urn:postgres`.
    pub opaque: &'a str,
    pub path: &'a str,
    pub query: &'a str,
}

impl<'a> UriParts<'a> {
    pub fn split(uri: &'a str) -> Result<Self, UriError> {
        if uri.chars().any(|c| c.is_ascii_control()) {
            return Err(UriError::ControlCharacter(uri.to_string()));
        }
        let uri_no_fragment = uri.split_once('#').map_or(uri, |(head, _)| head);

        let (scheme, rest) = split_scheme(uri_no_fragment)
            .ok_or_else(|| UriError::MissingScheme(uri.to_string()))?;
        let (rest, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut parts = UriParts {
            scheme,
            query,
            ..Default::default()
        };

        if let Some(after) = rest.strip_prefix("//") {
            let (authority, path) = match after.find('/') {
                Some(idx) => after.split_at(idx),
                None => (after, ""),
            };
            if !authority.is_empty() && Authority::from_str(authority).is_err() {
                return Err(UriError::InvalidAuthority {
                    uri: uri.to_string(),
                    authority: authority.to_string(),
                });
            }
            parts.authority = authority;
            parts.path = path;
        } else if !scheme.is_empty() && !rest.starts_with('/') {
            parts.opaque = rest;
        } else {
            parts.path = rest;
        }
        Ok(parts)
    }

    /// Host without the port, or empty.
    pub fn host(&self) -> &'a str {
        let authority = self
            .authority
            .rsplit_once('@')
            .map_or(self.authority, |(_, host)| host);
        if authority.starts_with('[') {
            return authority.split_inclusive(']').next().unwrap_or(authority);
        }
        authority.split_once(':').map_or(authority, |(host, _)| host)
    }
}

/// Returns `None` when the input starts with `:`. Input without a valid scheme prefix is
/// returned whole with an empty scheme.
fn split_scheme(uri: &str) -> Option<(&str, &str)> {
    for (idx, c) in uri.char_indices() {
        match c {
            'a'..='z' | 'A'..='Z' => {}
            '0'..='9' | '+' | '-' | '.' if idx > 0 => {}
            ':' if idx == 0 => return None,
            ':' => return Some((&uri[..idx], &uri[idx + 1..])),
            _ => return Some(("", uri)),
        }
    }
    Some(("", uri))
}

/// Split a URI or URN into `(scheme, host, path)` for log records.
///
/// `urn:postgres:query.access-log` yields `("urn", "postgres", "query.access-log")`. A value
/// that cannot be split yields the error text as the scheme.
pub fn parse_uri(uri: &str) -> (String, String, String) {
    if uri.is_empty() {
        return Default::default();
    }
    let parts = match UriParts::split(uri) {
        Ok(parts) => parts,
        Err(e) => return (e.to_string(), String::new(), String::new()),
    };
    if parts.scheme.eq_ignore_ascii_case("urn") && parts.authority.is_empty() {
        let mut segments = parts.opaque.split(':');
        let host = segments.next().unwrap_or_default();
        let path = segments.next().unwrap_or_default();
        return (parts.scheme.to_ascii_lowercase(), host.into(), path.into());
    }
    (
        parts.scheme.to_ascii_lowercase(),
        parts.authority.to_string(),
        parts.path.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scheme_only_template() {
        let parts = UriParts::split("http:").unwrap();
        assert_eq!(parts.scheme, "http");
        assert!(parts.authority.is_empty());
        assert!(parts.path.is_empty());
        assert!(parts.query.is_empty());
    }

    #[test]
    fn test_split_full_url() {
        let parts = UriParts::split("https://localhost:8080/basePath/resource?first=false#frag")
            .unwrap();
        assert_eq!(parts.scheme, "https");
        assert_eq!(parts.authority, "localhost:8080");
        assert_eq!(parts.host(), "localhost");
        assert_eq!(parts.path, "/basePath/resource");
        assert_eq!(parts.query, "first=false");
    }

    #[test]
    fn test_split_rejects_bad_input() {
        assert!(matches!(
            UriParts::split(":8080"),
            Err(UriError::MissingScheme(_))
        ));
        assert!(matches!(
            UriParts::split("http://bad host/"),
            Err(UriError::InvalidAuthority { .. })
        ));
        assert!(matches!(
            UriParts::split("http://host/\n"),
            Err(UriError::ControlCharacter(_))
        ));
    }

    #[test]
    fn test_parse_uri_url() {
        assert_eq!(
            parse_uri("www.google.com"),
            ("".into(), "".into(), "www.google.com".into())
        );
        assert_eq!(
            parse_uri("https://www.google.com"),
            ("https".into(), "www.google.com".into(), "".into())
        );
        assert_eq!(
            parse_uri("https://www.google.com/search?q=test"),
            ("https".into(), "www.google.com".into(), "/search".into())
        );
    }

    #[test]
    fn test_parse_uri_urn() {
        assert_eq!(parse_uri("urn"), ("".into(), "".into(), "urn".into()));
        assert_eq!(
            parse_uri("urn:postgres"),
            ("urn".into(), "postgres".into(), "".into())
        );
        assert_eq!(
            parse_uri("urn:postgres:query.access-log"),
            ("urn".into(), "postgres".into(), "query.access-log".into())
        );
    }
}
