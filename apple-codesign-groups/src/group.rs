// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Candidate and final pairings of certificates with provisioning profiles.

use {
    crate::{
        certificate::CertificateInfo, profile::ProvisioningProfileInfo,
        profile_store::candidates_for_bundle_id,
    },
    log::debug,
    std::collections::BTreeMap,
};

/// A certificate and the profiles still acceptable for each bundle identifier.
///
/// Every bundle identifier maps to at least one profile.
#[derive(Clone, Debug)]
pub struct SelectableCodeSignGroup {
    pub certificate: CertificateInfo,
    pub bundle_id_profiles: BTreeMap<String, Vec<ProvisioningProfileInfo>>,
}

impl SelectableCodeSignGroup {
    /// Keep the profiles satisfying a predicate.
    ///
    /// Returns `None` if any bundle identifier is left without profiles.
    pub fn retain_profiles(
        self,
        keep: impl Fn(&str, &ProvisioningProfileInfo) -> bool,
    ) -> Option<Self> {
        let mut bundle_id_profiles = BTreeMap::new();

        for (bundle_id, profiles) in self.bundle_id_profiles {
            let profiles = profiles
                .into_iter()
                .filter(|profile| keep(&bundle_id, profile))
                .collect::<Vec<_>>();

            if profiles.is_empty() {
                return None;
            }

            bundle_id_profiles.insert(bundle_id, profiles);
        }

        Some(Self {
            certificate: self.certificate,
            bundle_id_profiles,
        })
    }

    /// Whether every bundle identifier has exactly one profile.
    pub fn is_unambiguous(&self) -> bool {
        self.bundle_id_profiles
            .values()
            .all(|profiles| profiles.len() == 1)
    }

    /// Total number of candidate profiles across bundle identifiers.
    pub fn profile_count(&self) -> usize {
        self.bundle_id_profiles.values().map(|p| p.len()).sum()
    }

    /// Convert into a final group if every bundle identifier has one profile.
    pub fn into_code_sign_group(self) -> Result<CodeSignGroup, Self> {
        if !self.is_unambiguous() {
            return Err(self);
        }

        Ok(CodeSignGroup {
            certificate: self.certificate,
            installer_certificate: None,
            bundle_id_profiles: self
                .bundle_id_profiles
                .into_iter()
                .filter_map(|(bundle_id, mut profiles)| {
                    profiles.pop().map(|profile| (bundle_id, profile))
                })
                .collect(),
        })
    }
}

/// A resolved signing assignment.
#[derive(Clone, Debug)]
pub struct CodeSignGroup {
    pub certificate: CertificateInfo,
    /// Certificate for signing installer packages. macOS only.
    pub installer_certificate: Option<CertificateInfo>,
    pub bundle_id_profiles: BTreeMap<String, ProvisioningProfileInfo>,
}

/// Builds candidate groups from certificates and profiles.
pub struct SelectableGroupBuilder<'a> {
    certificates: &'a [CertificateInfo],
    profiles: &'a [ProvisioningProfileInfo],
}

impl<'a> SelectableGroupBuilder<'a> {
    pub fn new(
        certificates: &'a [CertificateInfo],
        profiles: &'a [ProvisioningProfileInfo],
    ) -> Self {
        Self {
            certificates,
            profiles,
        }
    }

    /// Pair each code signing certificate with the profiles for each bundle identifier.
    ///
    /// A profile is a candidate for a bundle identifier under a certificate
    /// when its bundle identifier covers it and it embeds the certificate.
    /// Certificates lacking candidates for any bundle identifier yield no
    /// group. Installer certificates never yield groups.
    pub fn build<'b>(
        &self,
        bundle_ids: impl IntoIterator<Item = &'b str>,
    ) -> Vec<SelectableCodeSignGroup> {
        let bundle_ids = bundle_ids.into_iter().collect::<Vec<_>>();

        let candidates = bundle_ids
            .iter()
            .map(|bundle_id| {
                (
                    bundle_id.to_string(),
                    candidates_for_bundle_id(self.profiles, bundle_id),
                )
            })
            .collect::<Vec<_>>();

        let mut groups = vec![];

        'certs: for cert in self.certificates {
            if cert.kind().is_installer() {
                continue;
            }

            let mut bundle_id_profiles = BTreeMap::new();

            for (bundle_id, profiles) in &candidates {
                let profiles = profiles
                    .iter()
                    .filter(|profile| profile.includes_certificate(cert))
                    .cloned()
                    .collect::<Vec<_>>();

                if profiles.is_empty() {
                    debug!(
                        "certificate {} has no provisioning profile for {}",
                        cert.common_name, bundle_id
                    );
                    continue 'certs;
                }

                bundle_id_profiles.insert(bundle_id.clone(), profiles);
            }

            if bundle_id_profiles.is_empty() {
                continue;
            }

            groups.push(SelectableCodeSignGroup {
                certificate: cert.clone(),
                bundle_id_profiles,
            });
        }

        groups
    }
}
