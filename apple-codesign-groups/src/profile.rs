// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning profile metadata.

use {
    crate::{
        app_id::{bundle_id_pattern_matches, AppId},
        certificate::{sha1_fingerprint_hex, CertificateInfo},
        entitlements::Entitlements,
        error::CodeSignGroupError,
    },
    chrono::{DateTime, Utc},
    once_cell::sync::Lazy,
    plist::{Dictionary, Value},
    regex::Regex,
    serde::{Deserialize, Serialize},
    std::{
        fmt::{Display, Formatter},
        io::Cursor,
        str::FromStr,
        time::SystemTime,
    },
};

static XCODE_MANAGED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(iOS|tvOS|watchOS|visionOS|Mac|Mac Catalyst) Team .*Provisioning Profile")
        .expect("managed profile regex is valid")
});

/// Whether a profile name follows the naming convention of Xcode managed profiles.
///
/// Xcode names the profiles it generates `XC <app id>` or e.g.
/// `iOS Team Provisioning Profile: <bundle id>`.
pub fn is_xcode_managed_name(name: &str) -> bool {
    name.starts_with("XC") || XCODE_MANAGED_RE.is_match(name)
}

/// The platform a provisioning profile targets.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Platform {
    #[serde(rename = "ios")]
    Ios,
    #[serde(rename = "macos")]
    MacOs,
}

impl Default for Platform {
    fn default() -> Self {
        Self::Ios
    }
}

impl Platform {
    /// File extension of provisioning profiles for this platform.
    pub fn profile_extension(&self) -> &'static str {
        match self {
            Self::Ios => "mobileprovision",
            Self::MacOs => "provisionprofile",
        }
    }

    /// Resolve the platform from a profile's `Platform` list.
    ///
    /// Profiles without a recognized entry are macOS profiles.
    fn from_platform_list(values: Option<&Vec<Value>>) -> Self {
        let ios = values
            .map(|values| {
                values.iter().filter_map(|v| v.as_string()).any(|v| {
                    matches!(v, "iOS" | "tvOS" | "watchOS" | "xrOS" | "visionOS")
                })
            })
            .unwrap_or(false);

        if ios {
            Self::Ios
        } else {
            Self::MacOs
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ios => "ios",
            Self::MacOs => "macos",
        })
    }
}

impl FromStr for Platform {
    type Err = CodeSignGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "macos" | "osx" => Ok(Self::MacOs),
            _ => Err(CodeSignGroupError::UnknownPlatform(s.to_string())),
        }
    }
}

/// A distribution channel.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ExportMethod {
    #[serde(rename = "app-store")]
    AppStore,
    #[serde(rename = "ad-hoc")]
    AdHoc,
    #[serde(rename = "enterprise")]
    Enterprise,
    #[serde(rename = "development")]
    Development,
    #[serde(rename = "developer-id")]
    DeveloperId,
}

impl ExportMethod {
    /// Obtain the string values that variants are recognized as.
    pub fn str_names() -> &'static [&'static str] {
        &[
            "app-store",
            "ad-hoc",
            "enterprise",
            "development",
            "developer-id",
        ]
    }
}

impl Display for ExportMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::AppStore => "app-store",
            Self::AdHoc => "ad-hoc",
            Self::Enterprise => "enterprise",
            Self::Development => "development",
            Self::DeveloperId => "developer-id",
        })
    }
}

impl FromStr for ExportMethod {
    type Err = CodeSignGroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app-store" => Ok(Self::AppStore),
            "ad-hoc" => Ok(Self::AdHoc),
            "enterprise" => Ok(Self::Enterprise),
            "development" => Ok(Self::Development),
            "developer-id" => Ok(Self::DeveloperId),
            _ => Err(CodeSignGroupError::UnknownExportMethod(s.to_string())),
        }
    }
}

fn date_field(dict: &Dictionary, key: &'static str) -> Result<DateTime<Utc>, CodeSignGroupError> {
    let date = dict
        .get(key)
        .and_then(|v| v.as_date())
        .ok_or(CodeSignGroupError::ProfileMissingField(key))?;

    Ok(DateTime::<Utc>::from(SystemTime::from(date)))
}

fn string_field(dict: &Dictionary, key: &'static str) -> Result<String, CodeSignGroupError> {
    dict.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or(CodeSignGroupError::ProfileMissingField(key))
}

/// A snapshot of an installed provisioning profile.
#[derive(Clone, Debug)]
pub struct ProvisioningProfileInfo {
    pub uuid: String,
    pub name: String,
    pub team_name: String,
    pub team_id: String,
    /// The `application-identifier` entitlement.
    pub app_id: String,
    /// Bundle identifier portion of the application identifier.
    ///
    /// May end in a `*` wildcard.
    pub bundle_id: String,
    pub export_method: ExportMethod,
    pub provisioned_devices: Vec<String>,
    /// DER encoded certificates the profile allows to sign with it.
    pub developer_certificates: Vec<Vec<u8>>,
    /// SHA-1 fingerprints of [Self::developer_certificates].
    pub developer_certificate_fingerprints: Vec<String>,
    pub creation_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    pub entitlements: Entitlements,
    pub provisions_all_devices: bool,
    pub platform: Platform,
}

impl Display for ProvisioningProfileInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) [{}, {}, team {}, expires {}]",
            self.name,
            self.uuid,
            self.app_id,
            self.export_method,
            self.team_id,
            self.expiration_date
        )
    }
}

impl ProvisioningProfileInfo {
    /// Construct an instance from the property list embedded in a profile.
    ///
    /// The data can be XML or binary plist. It is the content that was
    /// signed, not the CMS envelope around it.
    pub fn from_plist_data(data: &[u8]) -> Result<Self, CodeSignGroupError> {
        let value =
            Value::from_reader(Cursor::new(data)).map_err(CodeSignGroupError::ProfilePlist)?;

        let dict = value
            .as_dictionary()
            .ok_or(CodeSignGroupError::ProfileMissingField("root dictionary"))?;

        Self::from_dictionary(dict)
    }

    /// Construct an instance from a parsed profile dictionary.
    pub fn from_dictionary(dict: &Dictionary) -> Result<Self, CodeSignGroupError> {
        let uuid = string_field(dict, "UUID")?;
        let name = string_field(dict, "Name")?;
        let team_name = dict
            .get("TeamName")
            .and_then(|v| v.as_string())
            .unwrap_or_default()
            .to_string();

        let entitlements = dict
            .get("Entitlements")
            .and_then(Entitlements::from_value)
            .ok_or(CodeSignGroupError::ProfileMissingField("Entitlements"))?;

        let app_id = entitlements
            .application_identifier()
            .ok_or(CodeSignGroupError::ProfileMissingField(
                "application-identifier",
            ))?
            .to_string();

        let parsed_app_id = AppId::parse(&app_id);

        let team_id = dict
            .get("TeamIdentifier")
            .and_then(|v| v.as_array())
            .and_then(|values| values.iter().find_map(|v| v.as_string()))
            .or_else(|| entitlements.team_identifier())
            .map(|s| s.to_string())
            .or_else(|| parsed_app_id.as_ref().map(|id| id.team_id().to_string()))
            .ok_or(CodeSignGroupError::ProfileMissingField("TeamIdentifier"))?;

        let bundle_id = parsed_app_id
            .map(|id| id.bundle_id_pattern().to_string())
            .unwrap_or_default();

        let provisioned_devices = dict
            .get("ProvisionedDevices")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_string())
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
            });

        let provisions_all_devices = matches!(
            dict.get("ProvisionsAllDevices"),
            Some(Value::Boolean(true))
        );

        let developer_certificates = dict
            .get("DeveloperCertificates")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_data())
                    .map(|d| d.to_vec())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let developer_certificate_fingerprints = developer_certificates
            .iter()
            .map(|der| sha1_fingerprint_hex(der))
            .collect::<Vec<_>>();

        let platform = Platform::from_platform_list(dict.get("Platform").and_then(|v| v.as_array()));

        let export_method = derive_export_method(
            platform,
            provisioned_devices.is_some(),
            provisions_all_devices,
            &entitlements,
        );

        Ok(Self {
            uuid,
            name,
            team_name,
            team_id,
            app_id,
            bundle_id,
            export_method,
            provisioned_devices: provisioned_devices.unwrap_or_default(),
            developer_certificates,
            developer_certificate_fingerprints,
            creation_date: date_field(dict, "CreationDate")?,
            expiration_date: date_field(dict, "ExpirationDate")?,
            entitlements,
            provisions_all_devices,
            platform,
        })
    }

    /// Whether `now` is strictly before the expiration date.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expiration_date
    }

    pub fn is_xcode_managed(&self) -> bool {
        is_xcode_managed_name(&self.name)
    }

    /// Whether the profile's bundle identifier covers a concrete bundle identifier.
    pub fn matches_bundle_id(&self, bundle_id: &str) -> bool {
        !self.bundle_id.is_empty() && bundle_id_pattern_matches(&self.bundle_id, bundle_id)
    }

    /// Whether the bundle identifier is a wildcard pattern.
    pub fn is_wildcard(&self) -> bool {
        self.bundle_id.ends_with('*')
    }

    /// Whether this profile lists the certificate among its developer certificates.
    pub fn includes_certificate(&self, cert: &CertificateInfo) -> bool {
        self.developer_certificate_fingerprints
            .iter()
            .any(|fp| fp.eq_ignore_ascii_case(&cert.sha1_fingerprint))
    }
}

/// Derive the distribution method of a profile from its document.
///
/// Profiles without a device list are store or enterprise (developer-id on
/// macOS) profiles. Profiles with a device list are development profiles
/// when they allow debugger attachment and ad-hoc profiles otherwise. macOS
/// has no ad-hoc distribution.
fn derive_export_method(
    platform: Platform,
    has_devices: bool,
    provisions_all_devices: bool,
    entitlements: &Entitlements,
) -> ExportMethod {
    match (platform, has_devices) {
        (Platform::Ios, false) if provisions_all_devices => ExportMethod::Enterprise,
        (Platform::Ios, false) => ExportMethod::AppStore,
        (Platform::Ios, true) if entitlements.get_bool("get-task-allow") => {
            ExportMethod::Development
        }
        (Platform::Ios, true) => ExportMethod::AdHoc,
        (Platform::MacOs, false) if provisions_all_devices => ExportMethod::DeveloperId,
        (Platform::MacOs, false) => ExportMethod::AppStore,
        (Platform::MacOs, true) => ExportMethod::Development,
    }
}
