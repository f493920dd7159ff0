// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Installed provisioning profiles.

Provisioning profiles are installed as individual files in a directory
(`~/Library/MobileDevice/Provisioning Profiles` by default). Each file is a
CMS `SignedData` structure wrapping a property list. The file stem is the
profile's UUID and the extension is `mobileprovision` for iOS profiles and
`provisionprofile` for macOS profiles.

Every lookup re-reads the directory. Any profile that fails to decode
aborts the lookup with an error.
*/

use {
    crate::{
        error::CodeSignGroupError,
        profile::{Platform, ProvisioningProfileInfo},
    },
    cryptographic_message_syntax::SignedData,
    log::{debug, info},
    std::path::{Path, PathBuf},
};

/// Extracts the signed property list from a provisioning profile file.
pub trait ProfileDecoder {
    /// Obtain the property list content of profile file data.
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String>;
}

/// A [ProfileDecoder] that unwraps the CMS envelope.
///
/// The signature is not verified.
#[derive(Clone, Copy, Debug, Default)]
pub struct CmsProfileDecoder;

impl ProfileDecoder for CmsProfileDecoder {
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let signed_data = SignedData::parse_ber(data).map_err(|e| format!("{}", e))?;

        signed_data
            .signed_content()
            .map(|content| content.to_vec())
            .ok_or_else(|| "CMS structure has no signed content".to_string())
    }
}

/// Whether a path has a provisioning profile file extension.
fn is_profile_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("mobileprovision") | Some("provisionprofile")
    )
}

/// Provisioning profiles installed in a directory.
pub struct ProfileStore<D: ProfileDecoder = CmsProfileDecoder> {
    dir: PathBuf,
    decoder: D,
}

impl ProfileStore<CmsProfileDecoder> {
    /// Construct an instance reading profiles from a directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_decoder(dir, CmsProfileDecoder)
    }
}

impl<D: ProfileDecoder> ProfileStore<D> {
    pub fn with_decoder(dir: impl AsRef<Path>, decoder: D) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            decoder,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decode a single profile file.
    pub fn read_profile(&self, path: &Path) -> Result<ProvisioningProfileInfo, CodeSignGroupError> {
        let data = std::fs::read(path)?;

        let plist = self
            .decoder
            .decode(&data)
            .map_err(|message| CodeSignGroupError::ProfileDecode {
                path: path.to_path_buf(),
                message,
            })?;

        ProvisioningProfileInfo::from_plist_data(&plist).map_err(|e| {
            CodeSignGroupError::ProfileDecode {
                path: path.to_path_buf(),
                message: format!("{}", e),
            }
        })
    }

    /// Paths of profile files in the directory, sorted.
    ///
    /// A missing directory has no profiles.
    pub fn profile_paths(&self) -> Result<Vec<PathBuf>, CodeSignGroupError> {
        if !self.dir.exists() {
            debug!("profile directory {} does not exist", self.dir.display());
            return Ok(vec![]);
        }

        let mut paths = vec![];
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();

            if path.is_file() && is_profile_path(&path) {
                paths.push(path);
            }
        }

        paths.sort();

        Ok(paths)
    }

    /// Decode every installed profile.
    pub fn profiles(&self) -> Result<Vec<ProvisioningProfileInfo>, CodeSignGroupError> {
        let paths = self.profile_paths()?;
        info!(
            "reading {} provisioning profiles from {}",
            paths.len(),
            self.dir.display()
        );

        paths
            .iter()
            .map(|path| {
                debug!("decoding {}", path.display());
                self.read_profile(path)
            })
            .collect::<Result<Vec<_>, _>>()
    }

    /// Find profiles whose `application-identifier` equals `app_id` exactly.
    ///
    /// Wildcard profiles only match their literal identifier. No match
    /// yields an empty list.
    pub fn by_app_id(
        &self,
        app_id: &str,
    ) -> Result<Vec<ProvisioningProfileInfo>, CodeSignGroupError> {
        Ok(self
            .profiles()?
            .into_iter()
            .filter(|profile| profile.app_id == app_id)
            .collect::<Vec<_>>())
    }

    /// Find the profile with a UUID.
    ///
    /// The iOS file name is tried before the macOS one.
    pub fn by_uuid(&self, uuid: &str) -> Result<ProvisioningProfileInfo, CodeSignGroupError> {
        for platform in [Platform::Ios, Platform::MacOs] {
            let path = self
                .dir
                .join(format!("{}.{}", uuid, platform.profile_extension()));

            if path.exists() {
                return self.read_profile(&path);
            }
        }

        Err(CodeSignGroupError::ProfileNotFound(uuid.to_string()))
    }
}

/// Select the profiles that can provision a bundle identifier.
///
/// Profiles naming the bundle identifier exactly come before wildcard
/// profiles. Input order is retained otherwise.
pub fn candidates_for_bundle_id(
    profiles: &[ProvisioningProfileInfo],
    bundle_id: &str,
) -> Vec<ProvisioningProfileInfo> {
    let (mut exact, wildcard): (Vec<_>, Vec<_>) = profiles
        .iter()
        .filter(|profile| profile.matches_bundle_id(bundle_id))
        .cloned()
        .partition(|profile| !profile.is_wildcard());

    exact.extend(wildcard);

    exact
}

#[cfg(test)]
pub(crate) mod testutil {
    use {
        super::*,
        crate::profile::testutil::ProfileFixture,
        cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder},
        x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair},
    };

    /// Write a CMS signed profile into a directory.
    pub fn write_profile(
        dir: &Path,
        fixture: &ProfileFixture,
        extension: &str,
        signer: &(CapturedX509Certificate, InMemorySigningKeyPair),
    ) -> PathBuf {
        let cms = SignedDataBuilder::default()
            .certificate(signer.0.clone())
            .content_inline(fixture.to_xml())
            .signer(SignerBuilder::new(&signer.1, signer.0.clone()))
            .build_der()
            .unwrap();

        let path = dir.join(format!("{}.{}", fixture.uuid, extension));
        std::fs::write(&path, cms).unwrap();

        path
    }
}
