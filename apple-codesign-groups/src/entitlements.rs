// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Entitlements documents and capability matching.

Entitlements are an open key-value document (a plist dictionary) keyed by
capability identifiers. A target (an app or extension) declares the
entitlements it requires. A provisioning profile declares the entitlements
it grants. A profile can sign a target when it grants every required
capability that has to be provisioned through the developer portal.

Some entitlements (e.g. `com.apple.security.app-sandbox` on macOS) are
honored from the code signature alone and never show up in profiles. They
are ignored when comparing, which is what makes the comparison aware of
the profile's platform.
*/

use {
    crate::profile::Platform,
    plist::{Dictionary, Value},
    serde::{Deserialize, Serialize},
    std::collections::BTreeSet,
};

/// Entitlement keys iOS profiles must grant for a target to use them.
const IOS_PROFILE_CAPABILITIES: &[&str] = &[
    "aps-environment",
    "com.apple.developer.applesignin",
    "com.apple.developer.associated-domains",
    "com.apple.developer.authentication-services.autofill-credential-provider",
    "com.apple.developer.ClassKit-environment",
    "com.apple.developer.default-data-protection",
    "com.apple.developer.devicecheck.appattest-environment",
    "com.apple.developer.game-center",
    "com.apple.developer.healthkit",
    "com.apple.developer.healthkit.access",
    "com.apple.developer.homekit",
    "com.apple.developer.icloud-container-identifiers",
    "com.apple.developer.icloud-services",
    "com.apple.developer.in-app-payments",
    "com.apple.developer.networking.HotspotConfiguration",
    "com.apple.developer.networking.multipath",
    "com.apple.developer.networking.networkextension",
    "com.apple.developer.networking.vpn.api",
    "com.apple.developer.networking.wifi-info",
    "com.apple.developer.nfc.readersession.formats",
    "com.apple.developer.pass-type-identifiers",
    "com.apple.developer.siri",
    "com.apple.developer.ubiquity-container-identifiers",
    "com.apple.developer.ubiquity-kvstore-identifier",
    "com.apple.developer.usernotifications.communication",
    "com.apple.developer.usernotifications.time-sensitive",
    "com.apple.external-accessory.wireless-configuration",
    "com.apple.security.application-groups",
    "inter-app-audio",
];

/// Entitlement keys macOS profiles must grant for a target to use them.
const MACOS_PROFILE_CAPABILITIES: &[&str] = &[
    "com.apple.developer.aps-environment",
    "com.apple.developer.applesignin",
    "com.apple.developer.associated-domains",
    "com.apple.developer.game-center",
    "com.apple.developer.icloud-container-identifiers",
    "com.apple.developer.icloud-services",
    "com.apple.developer.in-app-payments",
    "com.apple.developer.networking.networkextension",
    "com.apple.developer.networking.vpn.api",
    "com.apple.developer.pass-type-identifiers",
    "com.apple.developer.ubiquity-container-identifiers",
    "com.apple.developer.ubiquity-kvstore-identifier",
];

/// Whether an entitlement key has to be granted by a profile on a platform.
pub fn is_profile_capability(platform: Platform, key: &str) -> bool {
    match platform {
        Platform::Ios => IOS_PROFILE_CAPABILITIES.contains(&key),
        Platform::MacOs => MACOS_PROFILE_CAPABILITIES.contains(&key),
    }
}

/// An entitlements document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Entitlements(Dictionary);

impl From<Dictionary> for Entitlements {
    fn from(d: Dictionary) -> Self {
        Self(d)
    }
}

impl Entitlements {
    /// Construct an instance from a plist value.
    ///
    /// Returns `None` if the value isn't a dictionary.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_dictionary().cloned().map(Self)
    }

    pub fn as_dictionary(&self) -> &Dictionary {
        &self.0
    }

    pub fn insert(&mut self, key: impl ToString, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Obtain a boolean entitlement. Missing or non-boolean values are false.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(Value::Boolean(true)))
    }

    /// The `application-identifier` entitlement.
    ///
    /// macOS profiles use `com.apple.application-identifier`.
    pub fn application_identifier(&self) -> Option<&str> {
        self.0
            .get("application-identifier")
            .or_else(|| self.0.get("com.apple.application-identifier"))
            .and_then(|v| v.as_string())
    }

    /// The team identifier entitlement.
    pub fn team_identifier(&self) -> Option<&str> {
        self.0
            .get("com.apple.developer.team-identifier")
            .and_then(|v| v.as_string())
    }

    /// Compute required capabilities a profile's entitlements don't grant.
    ///
    /// `self` is the target's required document. Only keys that have to be
    /// provisioned on `platform` are considered. The result is sorted.
    pub fn missing_from(&self, profile: &Entitlements, platform: Platform) -> Vec<String> {
        self.keys()
            .filter(|key| is_profile_capability(platform, key))
            .filter(|key| !profile.contains_key(key))
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>()
    }
}
