//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact, wildcard subdomain, or any; case-insensitive)
//! - Match path (segment-aware prefix or exact; case-sensitive)
//! - Report how specific a match is so the router can rank candidates
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec), ports are ignored
//! - Path matching is case-sensitive
//! - No regex to guarantee O(n) matching

/// Host condition of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Matches every host.
    Any,
    /// Matches one host exactly.
    Exact(String),
    /// Matches strict subdomains of the stored suffix (`*.example.com`).
    Wildcard(String),
}

impl HostPattern {
    /// Parse `example.com`, `*.example.com`, or nothing (any host).
    pub fn parse(pattern: Option<&str>) -> Self {
        match pattern.map(str::trim) {
            None | Some("") | Some("*") => HostPattern::Any,
            Some(p) => match p.strip_prefix("*.") {
                Some(suffix) => HostPattern::Wildcard(suffix.to_lowercase()),
                None => HostPattern::Exact(p.to_lowercase()),
            },
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = normalize_host(host);
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(expected) => host == *expected,
            HostPattern::Wildcard(suffix) => host
                .strip_suffix(suffix.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
                .is_some_and(|label| !label.is_empty()),
        }
    }

    /// Exact beats wildcard beats any; longer wildcard suffixes are more specific.
    pub fn specificity(&self) -> (u8, usize) {
        match self {
            HostPattern::Any => (0, 0),
            HostPattern::Wildcard(suffix) => (1, suffix.len()),
            HostPattern::Exact(host) => (2, host.len()),
        }
    }
}

/// Lowercase a Host header value and drop any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        // IPv6 literal: keep the brackets, drop what follows them.
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.to_lowercase()
}

/// Path condition of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Matches the base itself and anything below it (`/api/*` → base `/api`).
    Prefix(String),
    /// Matches one path exactly.
    Exact(String),
}

impl PathPattern {
    /// Parse `/api/*` (prefix), `/*` (everything) or `/health` (exact).
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix('*') {
            Some(base) => PathPattern::Prefix(base.trim_end_matches('/').to_string()),
            None => PathPattern::Exact(pattern.to_string()),
        }
    }

    /// Length of the matched portion of `path`, or `None` when it does not match.
    pub fn match_len(&self, path: &str) -> Option<usize> {
        match self {
            PathPattern::Exact(expected) => (path == expected).then_some(expected.len()),
            PathPattern::Prefix(base) => {
                let rest = path.strip_prefix(base.as_str())?;
                (rest.is_empty() || rest.starts_with('/')).then_some(base.len())
            }
        }
    }

    /// Exact patterns outrank a prefix of the same length.
    pub fn is_exact(&self) -> bool {
        matches!(self, PathPattern::Exact(_))
    }

    /// The part of `path` after the matched portion.
    pub fn remainder<'a>(&self, path: &'a str) -> &'a str {
        let matched = self.match_len(path).unwrap_or(0);
        &path[matched..]
    }
}
