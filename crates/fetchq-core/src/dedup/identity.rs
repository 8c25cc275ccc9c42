//! Pluggable identity extraction.
//!
//! An identity key names the underlying content independently of the locator
//! spelling (e.g. a video id), so two different URLs for the same content are
//! caught by the dedup gate. How ids are derived per platform is configuration,
//! not code.

use url::Url;

use crate::config::IdentityRuleConfig;

/// Derives an optional identity key from a locator.
pub trait IdentityExtractor: Send + Sync {
    fn identity_key(&self, locator: &str) -> Option<String>;
}

impl<F> IdentityExtractor for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn identity_key(&self, locator: &str) -> Option<String> {
        self(locator)
    }
}

/// Extractor that never yields a key (dedup by hash only).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIdentity;

impl IdentityExtractor for NoIdentity {
    fn identity_key(&self, _locator: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IdentitySource {
    QueryParam(String),
    PathSegmentAfter(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentityRule {
    host: String,
    label: String,
    source: IdentitySource,
}

impl IdentityRule {
    fn matches_host(&self, host: &str) -> bool {
        host == self.host
            || host
                .strip_suffix(self.host.as_str())
                .is_some_and(|rest| rest.ends_with('.'))
    }

    fn value(&self, url: &Url) -> Option<String> {
        let value = match &self.source {
            IdentitySource::QueryParam(param) => url
                .query_pairs()
                .find(|(k, _)| k == param.as_str())
                .map(|(_, v)| v.into_owned()),
            IdentitySource::PathSegmentAfter(prefix) => url
                .path()
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.split('/').find(|s| !s.is_empty()))
                .map(str::to_string),
        }?;
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    }
}

/// Extractor driven by `[[identity]]` config rules; first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleIdentity {
    rules: Vec<IdentityRule>,
}

impl RuleIdentity {
    pub fn from_config(rules: &[IdentityRuleConfig]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|r| {
                let host = r.host.trim().trim_start_matches("www.").to_lowercase();
                let source = match (&r.query_param, &r.path_prefix) {
                    (Some(param), _) => IdentitySource::QueryParam(param.clone()),
                    (None, Some(prefix)) => IdentitySource::PathSegmentAfter(prefix.clone()),
                    (None, None) => return None,
                };
                let label = r.label.clone().unwrap_or_else(|| host.clone());
                Some(IdentityRule {
                    host,
                    label,
                    source,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl IdentityExtractor for RuleIdentity {
    fn identity_key(&self, locator: &str) -> Option<String> {
        let url = Url::parse(locator.trim()).ok()?;
        let host = url.host_str()?.to_lowercase();
        self.rules
            .iter()
            .filter(|r| r.matches_host(&host))
            .find_map(|r| r.value(&url).map(|v| format!("{}:{}", r.label, v)))
    }
}
