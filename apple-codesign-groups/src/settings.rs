// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Where local signing state lives and what a resolution asks for.

use {
    crate::{
        entitlements::Entitlements,
        error::CodeSignGroupError,
        profile::{ExportMethod, Platform},
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::BTreeMap,
        path::{Path, PathBuf},
    },
};

/// A macOS keychain preferences domain.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeychainDomain {
    User,
    System,
    Common,
    Dynamic,
}

impl TryFrom<&str> for KeychainDomain {
    type Error = String;

    fn try_from(v: &str) -> Result<Self, Self::Error> {
        match v {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "common" => Ok(Self::Common),
            "dynamic" => Ok(Self::Dynamic),
            _ => Err(format!(
                "{} is not a valid keychain domain; use user, system, common, or dynamic",
                v
            )),
        }
    }
}

/// A file holding signing certificates.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum CertificateSource {
    /// PEM encoded certificates. May hold several.
    Pem { path: PathBuf },
    /// A single DER encoded certificate.
    Der { path: PathBuf },
    /// A PKCS#12 export holding certificates and their private keys.
    Pkcs12 { path: PathBuf, password: String },
}

impl CertificateSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Pem { path } | Self::Der { path } | Self::Pkcs12 { path, .. } => path,
        }
    }
}

/// The default directory provisioning profiles are installed to.
pub fn default_profiles_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join("Library")
            .join("MobileDevice")
            .join("Provisioning Profiles")
    })
}

/// Locations of the local certificate and profile inventory.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoreSettings {
    pub profiles_dir: PathBuf,
    #[serde(default)]
    pub certificate_sources: Vec<CertificateSource>,
    /// Keychain to enumerate certificates from. Only honored on macOS.
    #[serde(default)]
    pub keychain_domain: Option<KeychainDomain>,
}

impl StoreSettings {
    /// Construct an instance reading profiles from a directory.
    pub fn new(profiles_dir: impl AsRef<Path>) -> Self {
        Self {
            profiles_dir: profiles_dir.as_ref().to_path_buf(),
            certificate_sources: vec![],
            keychain_domain: None,
        }
    }

    /// Construct an instance using the default profiles directory.
    pub fn from_home_dir() -> Result<Self, CodeSignGroupError> {
        let dir = default_profiles_dir().ok_or_else(|| {
            CodeSignGroupError::CliGeneralError("unable to resolve home directory".to_string())
        })?;

        Ok(Self::new(dir))
    }

    pub fn certificate_source(mut self, source: CertificateSource) -> Self {
        self.certificate_sources.push(source);
        self
    }

    pub fn keychain_domain(mut self, domain: KeychainDomain) -> Self {
        self.keychain_domain = Some(domain);
        self
    }
}

fn default_true() -> bool {
    true
}

/// A request to resolve signing material for a set of bundle identifiers.
///
/// `bundle_ids` maps every target's bundle identifier to the entitlements
/// it requires.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResolveRequest {
    pub bundle_ids: BTreeMap<String, Entitlements>,
    pub export_method: ExportMethod,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub team_id: Option<String>,
    /// `Some(true)` keeps only Xcode managed profiles. `Some(false)` keeps
    /// only profiles that aren't managed.
    #[serde(default)]
    pub xcode_managed: Option<bool>,
    #[serde(default)]
    pub exclude_profile_names: Vec<String>,
    #[serde(default = "default_true")]
    pub prefer_non_xcode_managed: bool,
}

impl ResolveRequest {
    pub fn new(export_method: ExportMethod) -> Self {
        Self {
            bundle_ids: BTreeMap::new(),
            export_method,
            platform: Platform::default(),
            team_id: None,
            xcode_managed: None,
            exclude_profile_names: vec![],
            prefer_non_xcode_managed: true,
        }
    }

    pub fn bundle_id(mut self, bundle_id: impl ToString, entitlements: Entitlements) -> Self {
        self.bundle_ids.insert(bundle_id.to_string(), entitlements);
        self
    }

    /// Load a request from a file.
    ///
    /// Files ending in `.json` are parsed as JSON. Everything else is YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CodeSignGroupError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_slice(&data)
                .map_err(|e| CodeSignGroupError::SettingsParse(path.to_path_buf(), e.to_string()))
        } else {
            serde_yaml::from_slice(&data)
                .map_err(|e| CodeSignGroupError::SettingsParse(path.to_path_buf(), e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Result, indoc::indoc};

    #[test]
    fn yaml_request() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("request.yaml");
        std::fs::write(
            &path,
            indoc! {"
                bundle_ids:
                  io.bitrise.app:
                    aps-environment: production
                  io.bitrise.app.widget: {}
                export_method: app-store
                team_id: ABC123
            "},
        )?;

        let request = ResolveRequest::from_path(&path)?;
        assert_eq!(request.export_method, ExportMethod::AppStore);
        assert_eq!(request.platform, Platform::Ios);
        assert_eq!(request.team_id.as_deref(), Some("ABC123"));
        assert_eq!(request.xcode_managed, None);
        assert!(request.prefer_non_xcode_managed);
        assert_eq!(
            request.bundle_ids.keys().collect::<Vec<_>>(),
            vec!["io.bitrise.app", "io.bitrise.app.widget"]
        );
        assert!(request.bundle_ids["io.bitrise.app"].contains_key("aps-environment"));

        Ok(())
    }

    #[test]
    fn json_request() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("request.json");
        std::fs::write(
            &path,
            r#"{
                "bundle_ids": {"io.bitrise.mac": {}},
                "export_method": "developer-id",
                "platform": "macos",
                "xcode_managed": false,
                "exclude_profile_names": ["Old Profile"],
                "prefer_non_xcode_managed": false
            }"#,
        )?;

        let request = ResolveRequest::from_path(&path)?;
        assert_eq!(request.export_method, ExportMethod::DeveloperId);
        assert_eq!(request.platform, Platform::MacOs);
        assert_eq!(request.xcode_managed, Some(false));
        assert_eq!(request.exclude_profile_names, vec!["Old Profile".to_string()]);
        assert!(!request.prefer_non_xcode_managed);

        Ok(())
    }

    #[test]
    fn bad_request_names_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("request.yaml");
        std::fs::write(&path, "export_method: sideload\nbundle_ids: {}\n")?;

        assert!(matches!(
            ResolveRequest::from_path(&path),
            Err(CodeSignGroupError::SettingsParse(p, _)) if p == path
        ));

        Ok(())
    }

    #[test]
    fn certificate_sources() -> Result<()> {
        let settings: StoreSettings = serde_yaml::from_str(indoc! {"
            profiles_dir: /tmp/profiles
            certificate_sources:
              - format: pem
                path: /tmp/dev.pem
              - format: pkcs12
                path: /tmp/dist.p12
                password: secret
            keychain_domain: user
        "})?;

        assert_eq!(settings.profiles_dir, PathBuf::from("/tmp/profiles"));
        assert_eq!(
            settings.certificate_sources,
            vec![
                CertificateSource::Pem {
                    path: "/tmp/dev.pem".into()
                },
                CertificateSource::Pkcs12 {
                    path: "/tmp/dist.p12".into(),
                    password: "secret".into()
                }
            ]
        );
        assert_eq!(settings.certificate_sources[1].path(), Path::new("/tmp/dist.p12"));
        assert_eq!(settings.keychain_domain, Some(KeychainDomain::User));

        Ok(())
    }

    #[test]
    fn keychain_domain_names() {
        assert_eq!(KeychainDomain::try_from("system"), Ok(KeychainDomain::System));
        assert!(KeychainDomain::try_from("other").is_err());
    }
}
