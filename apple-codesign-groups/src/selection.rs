// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reduction of filtered candidates to a final signing assignment.

[GroupSelector] only resolves when filtering left exactly one group holding
exactly one profile per bundle identifier. Anything else is reported as
ambiguous or unresolved. [select_preferred] is a separate policy that
callers may apply to ambiguous candidates. [resolve] chains everything
together for a [ResolveRequest].
*/

use {
    crate::{
        certificate::{CertificateInfo, CertificateKind},
        filter::{Elimination, FilterPipeline, FilterReport},
        group::{CodeSignGroup, SelectableCodeSignGroup, SelectableGroupBuilder},
        profile::{ExportMethod, Platform, ProvisioningProfileInfo},
        settings::ResolveRequest,
        validity::ValidCertificateInfo,
    },
    log::{info, warn},
    std::collections::BTreeMap,
};

/// Result of selecting among filtered groups.
#[derive(Clone, Debug)]
pub enum Resolution {
    /// A single unambiguous assignment.
    Resolved(CodeSignGroup),
    /// Several candidates remain. The caller has to disambiguate.
    Ambiguous(Vec<SelectableCodeSignGroup>),
    /// Nothing remains. The string explains why.
    Unresolved(String),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&CodeSignGroup> {
        match self {
            Self::Resolved(group) => Some(group),
            _ => None,
        }
    }
}

/// Describe why filtering left nothing.
fn unresolved_reason(eliminated: &[Elimination]) -> String {
    if eliminated.is_empty() {
        return "no signing certificate has provisioning profiles for every bundle identifier"
            .to_string();
    }

    let mut counts = BTreeMap::new();
    for elimination in eliminated {
        *counts.entry(elimination.filter).or_insert(0usize) += 1;
    }

    format!(
        "all {} candidate groups were eliminated ({})",
        eliminated.len(),
        counts
            .iter()
            .map(|(filter, count)| format!("{}: {}", filter, count))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Picks the installer certificate to pair with a macOS group.
fn installer_certificate_for(
    certificate: &CertificateInfo,
    platform: Platform,
    export_method: ExportMethod,
    installer_certificates: &[CertificateInfo],
) -> Option<CertificateInfo> {
    let kind = match (platform, export_method) {
        (Platform::MacOs, ExportMethod::AppStore) => CertificateKind::MacInstaller,
        (Platform::MacOs, ExportMethod::DeveloperId) => CertificateKind::DeveloperIdInstaller,
        _ => return None,
    };

    let installer = installer_certificates
        .iter()
        .filter(|cert| cert.kind() == kind && cert.team_id == certificate.team_id)
        .max_by_key(|cert| cert.not_after)
        .cloned();

    if installer.is_none() {
        warn!(
            "no {} certificate for team {}; installer packages cannot be signed",
            kind, certificate.team_id
        );
    }

    installer
}

/// Turns filtered groups into a [Resolution].
#[derive(Clone, Debug)]
pub struct GroupSelector {
    platform: Platform,
    export_method: ExportMethod,
    installer_certificates: Vec<CertificateInfo>,
}

impl GroupSelector {
    pub fn new(platform: Platform, export_method: ExportMethod) -> Self {
        Self {
            platform,
            export_method,
            installer_certificates: vec![],
        }
    }

    /// Certificates eligible as the installer certificate of a resolved group.
    ///
    /// Only certificates of an installer kind are retained.
    #[must_use]
    pub fn installer_certificates(
        mut self,
        certificates: impl IntoIterator<Item = CertificateInfo>,
    ) -> Self {
        self.installer_certificates.extend(
            certificates
                .into_iter()
                .filter(|cert| cert.kind().is_installer()),
        );
        self
    }

    /// Select from the outcome of a pipeline run.
    pub fn select(&self, report: FilterReport) -> Resolution {
        let FilterReport {
            mut survivors,
            eliminated,
        } = report;

        match survivors.len() {
            0 => Resolution::Unresolved(unresolved_reason(&eliminated)),
            1 => match survivors.remove(0).into_code_sign_group() {
                Ok(mut group) => {
                    group.installer_certificate = installer_certificate_for(
                        &group.certificate,
                        self.platform,
                        self.export_method,
                        &self.installer_certificates,
                    );

                    Resolution::Resolved(group)
                }
                Err(group) => Resolution::Ambiguous(vec![group]),
            },
            _ => Resolution::Ambiguous(survivors),
        }
    }
}

/// Pick the first item with the greatest key.
fn first_max_by_key<T, K: Ord>(items: Vec<T>, key: impl Fn(&T) -> K) -> Option<T> {
    items.into_iter().fold(None, |best, item| match best {
        Some(best) if key(&best) >= key(&item) => Some(best),
        _ => Some(item),
    })
}

/// Narrow ambiguous candidates by preference.
///
/// When `prefer_non_xcode_managed` is set, bundle identifiers having
/// profiles not managed by Xcode drop their managed profiles. Each bundle
/// identifier then keeps its latest expiring profile. Finally the group
/// whose certificate expires last is kept. Ties keep the earlier candidate.
pub fn select_preferred(
    groups: Vec<SelectableCodeSignGroup>,
    prefer_non_xcode_managed: bool,
) -> Vec<SelectableCodeSignGroup> {
    let narrowed = groups
        .into_iter()
        .map(|group| {
            let bundle_id_profiles = group
                .bundle_id_profiles
                .into_iter()
                .map(|(bundle_id, profiles)| {
                    let profiles = if prefer_non_xcode_managed
                        && profiles.iter().any(|p| !p.is_xcode_managed())
                    {
                        profiles
                            .into_iter()
                            .filter(|p| !p.is_xcode_managed())
                            .collect::<Vec<_>>()
                    } else {
                        profiles
                    };

                    let profiles = first_max_by_key(profiles, |p: &ProvisioningProfileInfo| {
                        p.expiration_date
                    })
                    .into_iter()
                    .collect::<Vec<_>>();

                    (bundle_id, profiles)
                })
                .collect();

            SelectableCodeSignGroup {
                certificate: group.certificate,
                bundle_id_profiles,
            }
        })
        .collect::<Vec<_>>();

    first_max_by_key(narrowed, |group| group.certificate.not_after)
        .into_iter()
        .collect()
}

/// The outcome of a full resolution.
#[derive(Clone, Debug)]
pub struct ResolveOutcome {
    pub resolution: Resolution,
    /// Groups removed by filters.
    pub eliminated: Vec<Elimination>,
    /// Whether the preference policy was needed to resolve.
    pub used_preference: bool,
}

/// Resolve signing material for a request.
///
/// Certificates are classified first, so only valid ones that aren't
/// duplicates take part. Installer certificates among them are only used
/// for pairing with macOS groups. The preference policy is applied when
/// filtering leaves ambiguity.
pub fn resolve(
    certificates: &[CertificateInfo],
    profiles: &[ProvisioningProfileInfo],
    request: &ResolveRequest,
) -> ResolveOutcome {
    let certificates = ValidCertificateInfo::classify(certificates.iter().cloned()).valid;

    let groups = SelectableGroupBuilder::new(&certificates, profiles)
        .build(request.bundle_ids.keys().map(|s| s.as_str()));
    info!(
        "built {} candidate groups for {} bundle identifiers",
        groups.len(),
        request.bundle_ids.len()
    );

    let report = FilterPipeline::from_request(request).run_with_report(groups);
    let eliminated = report.eliminated.clone();

    let selector = GroupSelector::new(request.platform, request.export_method)
        .installer_certificates(certificates.iter().cloned());

    let resolution = selector.select(report);

    let (resolution, used_preference) = match resolution {
        Resolution::Ambiguous(groups) => {
            info!(
                "{} candidate groups with {} profiles remain; applying preference policy",
                groups.len(),
                groups.iter().map(|g| g.profile_count()).sum::<usize>()
            );

            let preferred = select_preferred(groups, request.prefer_non_xcode_managed);

            (
                selector.select(FilterReport {
                    survivors: preferred,
                    eliminated: vec![],
                }),
                true,
            )
        }
        resolution => (resolution, false),
    };

    match &resolution {
        Resolution::Resolved(group) => {
            info!("resolved signing certificate {}", group.certificate.common_name)
        }
        Resolution::Ambiguous(groups) => {
            warn!("{} candidate groups remain ambiguous", groups.len())
        }
        Resolution::Unresolved(reason) => warn!("unable to resolve: {}", reason),
    }

    ResolveOutcome {
        resolution,
        eliminated,
        used_preference,
    }
}
