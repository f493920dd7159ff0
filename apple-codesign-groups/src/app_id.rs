// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application identifiers.
//!
//! An application identifier (the `application-identifier` entitlement)
//! has the form `TEAMID.BUNDLEID`. The team prefix is alphanumeric. The
//! bundle identifier may itself contain dots and, in provisioning profiles,
//! may end in a `*` wildcard.

use {once_cell::sync::Lazy, regex::Regex, std::fmt::Display};

static APP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]+)\.(.+)$").expect("app id regex is valid"));

/// A parsed `TEAMID.BUNDLEID` application identifier.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct AppId {
    team_id: String,
    bundle_id: String,
}

impl AppId {
    /// Parse an application identifier string.
    ///
    /// Returns `None` if the value doesn't have an alphanumeric team prefix
    /// followed by a dot and a non-empty remainder.
    pub fn parse(value: &str) -> Option<Self> {
        let captures = APP_ID_RE.captures(value)?;

        Some(Self {
            team_id: captures.get(1)?.as_str().to_string(),
            bundle_id: captures.get(2)?.as_str().to_string(),
        })
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// The bundle identifier portion, possibly a wildcard pattern.
    pub fn bundle_id_pattern(&self) -> &str {
        &self.bundle_id
    }

    /// The bundle identifier, if it names a concrete bundle.
    ///
    /// A bare `*` is a wildcard that doesn't identify anything.
    pub fn bundle_id(&self) -> Option<&str> {
        if self.bundle_id == "*" {
            None
        } else {
            Some(&self.bundle_id)
        }
    }

    /// Whether the bundle identifier portion is a wildcard pattern.
    pub fn is_wildcard(&self) -> bool {
        self.bundle_id.ends_with('*')
    }
}

impl Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.team_id, self.bundle_id)
    }
}

/// Extract the bundle identifier from a `TEAMID.BUNDLEID` string.
///
/// Returns the empty string if the value is not a resolvable application
/// identifier.
pub fn bundle_id_from_app_id(app_id: &str) -> String {
    AppId::parse(app_id)
        .and_then(|id| id.bundle_id().map(|s| s.to_string()))
        .unwrap_or_default()
}

/// Whether a profile's bundle identifier pattern covers a concrete bundle identifier.
///
/// Patterns without a trailing `*` must match exactly. A trailing `*`
/// matches any bundle identifier starting with the text before it, so
/// `com.example.*` covers `com.example.app` and a bare `*` covers everything.
pub fn bundle_id_pattern_matches(pattern: &str, bundle_id: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => bundle_id.starts_with(prefix),
        None => pattern == bundle_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_id_extraction() {
        assert_eq!(
            bundle_id_from_app_id("01TeaM02ID.com.company.app"),
            "com.company.app"
        );
        assert_eq!(bundle_id_from_app_id("ABC123.app"), "app");
        assert_eq!(bundle_id_from_app_id("1-TEAM02ID.com.company.app"), "");
        assert_eq!(bundle_id_from_app_id("ABC123.*"), "");
        assert_eq!(bundle_id_from_app_id("ABC123."), "");
        assert_eq!(bundle_id_from_app_id("ABC123"), "");
        assert_eq!(bundle_id_from_app_id(".com.company.app"), "");
        assert_eq!(bundle_id_from_app_id(""), "");
    }

    #[test]
    fn parse_wildcard() {
        let id = AppId::parse("ABC123.com.company.*").unwrap();
        assert_eq!(id.team_id(), "ABC123");
        assert!(id.is_wildcard());
        assert_eq!(id.bundle_id(), Some("com.company.*"));
        assert_eq!(id.to_string(), "ABC123.com.company.*");

        let id = AppId::parse("ABC123.*").unwrap();
        assert!(id.is_wildcard());
        assert_eq!(id.bundle_id(), None);
    }

    #[test]
    fn pattern_matching() {
        assert!(bundle_id_pattern_matches("io.bitrise.app", "io.bitrise.app"));
        assert!(!bundle_id_pattern_matches("io.bitrise.app", "io.bitrise.app2"));
        assert!(bundle_id_pattern_matches("io.bitrise.*", "io.bitrise.app"));
        assert!(!bundle_id_pattern_matches("io.bitrise.*", "io.other.app"));
        assert!(bundle_id_pattern_matches("*", "anything"));
    }
}
