// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Narrowing of candidate groups.

A [GroupFilter] takes ownership of a [SelectableCodeSignGroup] and either
hands back a group with the same bundle identifiers and equal or fewer
profiles per bundle identifier, or rejects it by returning `None`. A
[FilterPipeline] folds a group through its filters in order and stops at
the first rejection.
*/

use {
    crate::{
        certificate::CertificateInfo,
        entitlements::Entitlements,
        group::SelectableCodeSignGroup,
        profile::{is_xcode_managed_name, ExportMethod},
        settings::ResolveRequest,
    },
    chrono::{DateTime, Utc},
    log::{debug, info},
    std::collections::BTreeMap,
};

/// A step narrowing candidate groups.
pub trait GroupFilter {
    /// Name used when reporting eliminated groups.
    fn name(&self) -> &'static str;

    /// Narrow a group, or reject it by returning `None`.
    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup>;
}

/// Keeps profiles granting every entitlement their bundle identifier requires.
///
/// Bundle identifiers without requirements accept every profile.
#[derive(Clone, Debug, Default)]
pub struct EntitlementsFilter {
    required: BTreeMap<String, Entitlements>,
}

impl EntitlementsFilter {
    pub fn new(required: BTreeMap<String, Entitlements>) -> Self {
        Self { required }
    }
}

impl GroupFilter for EntitlementsFilter {
    fn name(&self) -> &'static str {
        "entitlements"
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        group.retain_profiles(|bundle_id, profile| match self.required.get(bundle_id) {
            Some(required) => {
                let missing = required.missing_from(&profile.entitlements, profile.platform);

                if missing.is_empty() {
                    true
                } else {
                    debug!(
                        "profile {} lacks entitlements for {}: {}",
                        profile.name,
                        bundle_id,
                        missing.join(", ")
                    );
                    false
                }
            }
            None => true,
        })
    }
}

/// Keeps profiles of a distribution method.
#[derive(Clone, Copy, Debug)]
pub struct ExportMethodFilter(pub ExportMethod);

impl GroupFilter for ExportMethodFilter {
    fn name(&self) -> &'static str {
        "export-method"
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        group.retain_profiles(|_, profile| profile.export_method == self.0)
    }
}

/// Keeps groups whose certificate belongs to a team.
///
/// Profiles aren't inspected.
#[derive(Clone, Debug)]
pub struct TeamFilter(pub String);

impl GroupFilter for TeamFilter {
    fn name(&self) -> &'static str {
        "team"
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        if group.certificate.team_id == self.0 {
            Some(group)
        } else {
            None
        }
    }
}

/// Keeps profiles that are (or aren't) managed by Xcode.
#[derive(Clone, Copy, Debug)]
pub struct XcodeManagedFilter {
    pub managed: bool,
}

impl GroupFilter for XcodeManagedFilter {
    fn name(&self) -> &'static str {
        if self.managed {
            "xcode-managed"
        } else {
            "not-xcode-managed"
        }
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        group.retain_profiles(|_, profile| is_xcode_managed_name(&profile.name) == self.managed)
    }
}

/// Drops profiles with given names.
#[derive(Clone, Debug, Default)]
pub struct ExcludeProfileNameFilter(pub Vec<String>);

impl GroupFilter for ExcludeProfileNameFilter {
    fn name(&self) -> &'static str {
        "exclude-profile-name"
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        group.retain_profiles(|_, profile| !self.0.iter().any(|name| name == &profile.name))
    }
}

/// Drops expired profiles.
#[derive(Clone, Copy, Debug)]
pub struct ValidProfileFilter {
    now: DateTime<Utc>,
}

impl Default for ValidProfileFilter {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

impl ValidProfileFilter {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl GroupFilter for ValidProfileFilter {
    fn name(&self) -> &'static str {
        "valid-profile"
    }

    fn narrow(&self, group: SelectableCodeSignGroup) -> Option<SelectableCodeSignGroup> {
        group.retain_profiles(|_, profile| profile.is_valid_at(self.now))
    }
}

/// A group removed by a pipeline.
#[derive(Clone, Debug)]
pub struct Elimination {
    pub certificate: CertificateInfo,
    /// [GroupFilter::name] of the rejecting filter.
    pub filter: &'static str,
}

/// Outcome of running a pipeline.
#[derive(Clone, Debug, Default)]
pub struct FilterReport {
    pub survivors: Vec<SelectableCodeSignGroup>,
    pub eliminated: Vec<Elimination>,
}

/// An ordered sequence of filters.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn GroupFilter>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter.
    #[must_use]
    pub fn filter(mut self, filter: impl GroupFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Construct the standard pipeline for a request.
    ///
    /// Expired profiles are dropped first, followed by the team, export
    /// method, entitlements, Xcode management and excluded name filters.
    pub fn from_request(request: &ResolveRequest) -> Self {
        let mut pipeline = Self::new().filter(ValidProfileFilter::default());

        if let Some(team_id) = &request.team_id {
            pipeline = pipeline.filter(TeamFilter(team_id.clone()));
        }

        pipeline = pipeline
            .filter(ExportMethodFilter(request.export_method))
            .filter(EntitlementsFilter::new(request.bundle_ids.clone()));

        if let Some(managed) = request.xcode_managed {
            pipeline = pipeline.filter(XcodeManagedFilter { managed });
        }

        if !request.exclude_profile_names.is_empty() {
            pipeline = pipeline.filter(ExcludeProfileNameFilter(
                request.exclude_profile_names.clone(),
            ));
        }

        pipeline
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Fold a group through every filter.
    ///
    /// On rejection, the name of the rejecting filter is returned.
    pub fn narrow(
        &self,
        group: SelectableCodeSignGroup,
    ) -> Result<SelectableCodeSignGroup, &'static str> {
        self.filters
            .iter()
            .try_fold(group, |group, filter| filter.narrow(group).ok_or(filter.name()))
    }

    /// Run groups through the pipeline, keeping the survivors.
    pub fn run(
        &self,
        groups: impl IntoIterator<Item = SelectableCodeSignGroup>,
    ) -> Vec<SelectableCodeSignGroup> {
        self.run_with_report(groups).survivors
    }

    /// Run groups through the pipeline, recording which filter eliminated what.
    pub fn run_with_report(
        &self,
        groups: impl IntoIterator<Item = SelectableCodeSignGroup>,
    ) -> FilterReport {
        let mut report = FilterReport::default();

        for group in groups {
            let certificate = group.certificate.clone();

            match self.narrow(group) {
                Ok(group) => report.survivors.push(group),
                Err(filter) => {
                    info!(
                        "{} filter eliminated group for certificate {}",
                        filter, certificate.common_name
                    );
                    report.eliminated.push(Elimination {
                        certificate,
                        filter,
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            certificate::testutil::generate_certificate,
            group::SelectableGroupBuilder,
            profile::{testutil::ProfileFixture, ProvisioningProfileInfo},
        },
        plist::Value,
    };

    fn signing_cert(name: &str, team: &str) -> (CertificateInfo, Vec<u8>) {
        let (cert, _, _) = generate_certificate(name, team, "Team");
        let der = cert.constructed_data().to_vec();

        (CertificateInfo::from_certificate(cert, None).unwrap(), der)
    }

    fn uuids(group: &SelectableCodeSignGroup, bundle_id: &str) -> Vec<String> {
        group.bundle_id_profiles[bundle_id]
            .iter()
            .map(|p| p.uuid.clone())
            .collect()
    }

    fn all_uuids(groups: &[SelectableCodeSignGroup]) -> Vec<Vec<Vec<String>>> {
        groups
            .iter()
            .map(|g| g.bundle_id_profiles.keys().map(|k| uuids(g, k)).collect())
            .collect()
    }

    /// A certificate with app and widget profiles of several kinds.
    fn fixture() -> (CertificateInfo, Vec<ProvisioningProfileInfo>) {
        let (cert, der) = signing_cert("Apple Distribution: A (ABC123)", "ABC123");

        let profiles = vec![
            ProfileFixture::new("app-store", "App Store", "ABC123.io.bitrise.app")
                .entitlement("aps-environment")
                .certificate(&der)
                .to_info(),
            ProfileFixture::new("app-dev", "XC iOS: io.bitrise.app", "ABC123.io.bitrise.app")
                .development()
                .entitlement("aps-environment")
                .certificate(&der)
                .to_info(),
            ProfileFixture::new("app-plain", "Plain", "ABC123.io.bitrise.app")
                .certificate(&der)
                .to_info(),
            ProfileFixture::new("widget-store", "Widget", "ABC123.io.bitrise.app.widget")
                .certificate(&der)
                .to_info(),
            ProfileFixture::new(
                "widget-managed",
                "iOS Team Store Provisioning Profile: io.bitrise.app.widget",
                "ABC123.io.bitrise.app.widget",
            )
            .certificate(&der)
            .to_info(),
        ];

        (cert, profiles)
    }

    fn groups(
        cert: &CertificateInfo,
        profiles: &[ProvisioningProfileInfo],
    ) -> Vec<SelectableCodeSignGroup> {
        let certs = vec![cert.clone()];
        SelectableGroupBuilder::new(&certs, profiles)
            .build(["io.bitrise.app", "io.bitrise.app.widget"])
    }

    fn push_required() -> BTreeMap<String, Entitlements> {
        let mut required = Entitlements::default();
        required.insert("aps-environment", Value::String("production".into()));

        let mut map = BTreeMap::new();
        map.insert("io.bitrise.app".to_string(), required);
        map
    }

    #[test]
    fn entitlements_narrow_and_idempotent() {
        let (cert, profiles) = fixture();
        let filter = EntitlementsFilter::new(push_required());

        let once = filter.narrow(groups(&cert, &profiles).remove(0)).unwrap();
        assert_eq!(uuids(&once, "io.bitrise.app"), vec!["app-store", "app-dev"]);
        assert_eq!(
            uuids(&once, "io.bitrise.app.widget"),
            vec!["widget-store", "widget-managed"]
        );

        let twice = filter.narrow(once.clone()).unwrap();
        assert_eq!(all_uuids(&[twice]), all_uuids(&[once]));
    }

    #[test]
    fn entitlements_reject_when_empty() {
        let (cert, profiles) = fixture();

        let mut required = Entitlements::default();
        required.insert("com.apple.developer.healthkit", Value::Boolean(true));
        let mut map = BTreeMap::new();
        map.insert("io.bitrise.app.widget".to_string(), required);

        assert!(EntitlementsFilter::new(map)
            .narrow(groups(&cert, &profiles).remove(0))
            .is_none());
    }

    #[test]
    fn export_method_narrows() {
        let (cert, profiles) = fixture();

        let group = ExportMethodFilter(ExportMethod::AppStore)
            .narrow(groups(&cert, &profiles).remove(0))
            .unwrap();
        assert_eq!(uuids(&group, "io.bitrise.app"), vec!["app-store", "app-plain"]);

        // The widget has no development profile.
        assert!(ExportMethodFilter(ExportMethod::Development)
            .narrow(groups(&cert, &profiles).remove(0))
            .is_none());
    }

    #[test]
    fn team_mismatch_discards_group() {
        let (cert, profiles) = fixture();
        let group = groups(&cert, &profiles).remove(0);

        assert!(TeamFilter("XYZ999".into()).narrow(group.clone()).is_none());

        let kept = TeamFilter("ABC123".into()).narrow(group.clone()).unwrap();
        assert_eq!(all_uuids(&[kept]), all_uuids(&[group]));
    }

    #[test]
    fn xcode_managed() {
        let (cert, profiles) = fixture();

        let group = XcodeManagedFilter { managed: false }
            .narrow(groups(&cert, &profiles).remove(0))
            .unwrap();
        assert_eq!(uuids(&group, "io.bitrise.app"), vec!["app-store", "app-plain"]);
        assert_eq!(uuids(&group, "io.bitrise.app.widget"), vec!["widget-store"]);

        let group = XcodeManagedFilter { managed: true }
            .narrow(groups(&cert, &profiles).remove(0))
            .unwrap();
        assert_eq!(uuids(&group, "io.bitrise.app"), vec!["app-dev"]);
        assert_eq!(uuids(&group, "io.bitrise.app.widget"), vec!["widget-managed"]);
    }

    #[test]
    fn exclude_by_name() {
        let (cert, profiles) = fixture();

        let group = ExcludeProfileNameFilter(vec!["Plain".into(), "Widget".into()])
            .narrow(groups(&cert, &profiles).remove(0))
            .unwrap();
        assert_eq!(uuids(&group, "io.bitrise.app"), vec!["app-store", "app-dev"]);
        assert_eq!(uuids(&group, "io.bitrise.app.widget"), vec!["widget-managed"]);
    }

    #[test]
    fn expired_profiles_dropped() {
        let (cert, der) = signing_cert("Apple Distribution: A (ABC123)", "ABC123");
        let now = Utc::now();

        let profiles = vec![
            ProfileFixture::new("old", "Old", "ABC123.io.bitrise.app")
                .expires(now - chrono::Duration::days(1))
                .certificate(&der)
                .to_info(),
            ProfileFixture::new("new", "New", "ABC123.io.bitrise.app")
                .certificate(&der)
                .to_info(),
        ];

        let certs = vec![cert];
        let group = SelectableGroupBuilder::new(&certs, &profiles)
            .build(["io.bitrise.app"])
            .remove(0);

        let narrowed = ValidProfileFilter::at(now).narrow(group.clone()).unwrap();
        assert_eq!(uuids(&narrowed, "io.bitrise.app"), vec!["new"]);

        assert!(ValidProfileFilter::at(now + chrono::Duration::days(1000))
            .narrow(group)
            .is_none());
    }

    #[test]
    fn disjoint_filters_commute() {
        let (cert, profiles) = fixture();

        // Each filter only narrows one of the bundle identifiers.
        let entitlements = || EntitlementsFilter::new(push_required());
        let exclude = || ExcludeProfileNameFilter(vec!["Widget".into()]);

        let forward = FilterPipeline::new()
            .filter(entitlements())
            .filter(exclude())
            .run(groups(&cert, &profiles));
        let backward = FilterPipeline::new()
            .filter(exclude())
            .filter(entitlements())
            .run(groups(&cert, &profiles));

        assert_eq!(forward.len(), 1);
        assert_eq!(all_uuids(&forward), all_uuids(&backward));
    }

    #[test]
    fn pipeline_reports_eliminating_filter() {
        let (cert, profiles) = fixture();
        let (other_cert, other_der) = signing_cert("Apple Distribution: B (XYZ999)", "XYZ999");

        let mut profiles = profiles;
        for profile in profiles.iter_mut() {
            profile.developer_certificates.push(other_der.clone());
            profile
                .developer_certificate_fingerprints
                .push(other_cert.sha1_fingerprint.clone());
        }

        let certs = vec![cert.clone(), other_cert.clone()];
        let groups = SelectableGroupBuilder::new(&certs, &profiles)
            .build(["io.bitrise.app", "io.bitrise.app.widget"]);
        assert_eq!(groups.len(), 2);

        let pipeline = FilterPipeline::new()
            .filter(TeamFilter("ABC123".into()))
            .filter(ExportMethodFilter(ExportMethod::AppStore));
        assert_eq!(pipeline.names(), vec!["team", "export-method"]);

        let report = pipeline.run_with_report(groups.clone());
        assert_eq!(report.survivors.len(), 1);
        assert_eq!(
            report.survivors[0].certificate.sha1_fingerprint,
            cert.sha1_fingerprint
        );
        assert_eq!(report.eliminated.len(), 1);
        assert_eq!(report.eliminated[0].filter, "team");
        assert_eq!(
            report.eliminated[0].certificate.sha1_fingerprint,
            other_cert.sha1_fingerprint
        );

        let rejected = FilterPipeline::new()
            .filter(ExportMethodFilter(ExportMethod::AdHoc))
            .filter(TeamFilter("NOPE".into()))
            .run_with_report(groups);
        assert!(rejected.survivors.is_empty());
        assert!(rejected.eliminated.iter().all(|e| e.filter == "export-method"));
    }

    #[test]
    fn request_pipeline() {
        let mut request = ResolveRequest::new(ExportMethod::AppStore);
        assert_eq!(
            FilterPipeline::from_request(&request).names(),
            vec!["valid-profile", "export-method", "entitlements"]
        );

        request.team_id = Some("ABC123".into());
        request.xcode_managed = Some(false);
        request.exclude_profile_names = vec!["Old".into()];
        assert_eq!(
            FilterPipeline::from_request(&request).names(),
            vec![
                "valid-profile",
                "team",
                "export-method",
                "entitlements",
                "not-xcode-managed",
                "exclude-profile-name"
            ]
        );
    }
}
