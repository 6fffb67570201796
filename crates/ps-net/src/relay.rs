//! Relay-wrapped fetch-URL construction.

use ps_core::RelayError;
use ps_core::RelayResult;
use url::Url;

use crate::url::has_scheme_prefix;

/// Composes relay fetch URLs from resource references.
///
/// The endpoint template is the write-once relay configuration; the
/// resolved absolute target is percent-encoded as a single opaque value
/// and appended to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayUrlBuilder {
    endpoint: String,
}

impl RelayUrlBuilder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolves a reference against the current document URL.
    ///
    /// Absolute references pass through unchanged; `//host/...`
    /// inherits the base scheme; `/path` inherits scheme and host;
    /// anything else is joined under the base document's directory.
    pub fn resolve(&self, reference: &str, base_url: &str) -> RelayResult<String> {
        if has_scheme_prefix(reference) {
            let absolute = Url::parse(reference).map_err(|error| {
                RelayError::new(
                    "relay.reference_invalid",
                    format!("failed to parse absolute reference `{reference}`: {error}"),
                )
            })?;
            return Ok(absolute.to_string());
        }

        let base = Url::parse(base_url).map_err(|error| {
            tracing::error!(base_url, %error, "relay base URL is malformed");
            RelayError::new(
                "relay.base_invalid",
                format!("cannot resolve against malformed base `{base_url}`: {error}"),
            )
        })?;

        let resolved = if let Some(rest) = reference.strip_prefix("//") {
            let rebuilt = format!("{}://{rest}", base.scheme());
            Url::parse(&rebuilt).map_err(|error| {
                RelayError::new(
                    "relay.reference_invalid",
                    format!("failed to parse scheme-relative reference `{reference}`: {error}"),
                )
            })?
        } else {
            base.join(reference).map_err(|error| {
                RelayError::new(
                    "relay.reference_invalid",
                    format!("failed to join `{reference}` onto `{base_url}`: {error}"),
                )
            })?
        };

        Ok(resolved.to_string())
    }

    /// Builds the final relay-wrapped fetch URL for a reference.
    pub fn relay_url(&self, reference: &str, base_url: &str) -> RelayResult<String> {
        let absolute = self.resolve(reference, base_url)?;
        Ok(self.wrap(&absolute))
    }

    /// Wraps an already-absolute URL without resolving it.
    pub fn wrap(&self, absolute_url: &str) -> String {
        format!("{}{}", self.endpoint, urlencoding::encode(absolute_url))
    }
}

#[cfg(test)]
mod tests {
    use super::RelayUrlBuilder;

    const BASE: &str = "https://a.com/x/y?q";

    fn builder() -> RelayUrlBuilder {
        RelayUrlBuilder::new("https://relay.test/fetch?url=")
    }

    #[test]
    fn absolute_reference_passes_through() {
        let resolved = builder().resolve("http://b.com/z", BASE);
        assert_eq!(resolved, Ok("http://b.com/z".to_owned()));
    }

    #[test]
    fn scheme_relative_reference_inherits_base_scheme() {
        let resolved = builder().resolve("//b.com/z", BASE);
        assert_eq!(resolved, Ok("https://b.com/z".to_owned()));
    }

    #[test]
    fn root_relative_reference_inherits_scheme_and_host() {
        let resolved = builder().resolve("/z", BASE);
        assert_eq!(resolved, Ok("https://a.com/z".to_owned()));
    }

    #[test]
    fn bare_reference_joins_under_base_directory() {
        let resolved = builder().resolve("z", BASE);
        assert_eq!(resolved, Ok("https://a.com/x/z".to_owned()));
    }

    #[test]
    fn malformed_base_is_a_configuration_error() {
        let resolved = builder().resolve("/z", "not a url");
        assert!(resolved.is_err());
        if let Err(error) = resolved {
            assert_eq!(error.code, "relay.base_invalid");
        }
    }

    #[test]
    fn relay_url_percent_encodes_the_target() {
        let relayed = builder().relay_url("/z", BASE);
        assert_eq!(
            relayed,
            Ok("https://relay.test/fetch?url=https%3A%2F%2Fa.com%2Fz".to_owned())
        );
    }

    #[test]
    fn query_and_fragment_survive_encoding() {
        let relayed = builder().wrap("https://a.com/z?k=v#top");
        assert_eq!(
            relayed,
            "https://relay.test/fetch?url=https%3A%2F%2Fa.com%2Fz%3Fk%3Dv%23top"
        );
    }
}
