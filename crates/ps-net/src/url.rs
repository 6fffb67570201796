//! Navigation-target normalization and the forced-TLS upgrade policy.

use url::Url;

/// Domains that are known to serve HTTPS for every subdomain.
///
/// Shipped as configuration data: the policy object is built from these
/// patterns once and carried by value afterwards.
const FORCED_TLS_DOMAINS: [&str; 5] = [
    "*.wikipedia.org",
    "*.twitter.com",
    "*.github.com",
    "*.facebook.com",
    "*.torproject.org",
];

/// Single host pattern, either exact (`example.org`) or wildcard
/// (`*.example.org`, which also matches the bare domain).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    domain: String,
    any_subdomain: bool,
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_prefix("*.") {
            Some(domain) => Self {
                domain: domain.to_ascii_lowercase(),
                any_subdomain: true,
            },
            None => Self {
                domain: pattern.to_ascii_lowercase(),
                any_subdomain: false,
            },
        }
    }

    /// Anchored match against a lowercased hostname: the bare domain, or
    /// any dot-separated subdomain chain when the pattern is a wildcard.
    pub fn matches(&self, host: &str) -> bool {
        if host == self.domain {
            return true;
        }

        if !self.any_subdomain {
            return false;
        }

        host.len() > self.domain.len()
            && host.ends_with(&self.domain)
            && host.as_bytes()[host.len() - self.domain.len() - 1] == b'.'
    }
}

/// Allowlist driving the `http:` to `https:` upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePolicy {
    patterns: Vec<HostPattern>,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self::from_patterns(&FORCED_TLS_DOMAINS)
    }
}

impl UpgradePolicy {
    pub fn from_patterns(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .map(|pattern| HostPattern::parse(pattern))
                .collect(),
        }
    }

    pub fn should_upgrade(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.patterns.iter().any(|pattern| pattern.matches(&host))
    }
}

/// Normalizes a raw navigation string into a canonical URL.
///
/// A missing `scheme://` prefix is repaired with `http://` before
/// parsing. Unparsable input yields `None`; the caller decides how to
/// surface that to the user. `http:` URLs whose host matches the
/// upgrade policy come back with the scheme rewritten to `https:`; all
/// other components are left untouched.
pub fn normalize_target(input: &str, policy: &UpgradePolicy) -> Option<String> {
    let candidate = if has_scheme_prefix(input) {
        input.to_owned()
    } else {
        format!("http://{input}")
    };

    let mut parsed = Url::parse(&candidate).ok()?;

    if parsed.scheme() == "http"
        && parsed
            .host_str()
            .is_some_and(|host| policy.should_upgrade(host))
    {
        // Infallible for http -> https; ignore the unit error.
        let _ = parsed.set_scheme("https");
    }

    Some(parsed.to_string())
}

/// True when the input already names a scheme (`word://` prefix).
pub fn has_scheme_prefix(input: &str) -> bool {
    let Some((scheme, _)) = input.split_once("://") else {
        return false;
    };

    !scheme.is_empty()
        && scheme
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_')
}
