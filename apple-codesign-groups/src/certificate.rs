// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signing certificate metadata.

use {
    crate::error::CodeSignGroupError,
    bcder::Oid,
    chrono::{DateTime, Utc},
    std::{
        fmt::{Debug, Display, Formatter},
        sync::Arc,
    },
    x509_certificate::{
        asn1time::Time,
        rfc4519::{OID_COMMON_NAME, OID_ORGANIZATIONAL_UNIT_NAME, OID_ORGANIZATION_NAME},
        CapturedX509Certificate, InMemorySigningKeyPair, X509Certificate,
    },
};

/// Compute the hex encoded SHA-1 fingerprint of DER certificate data.
pub fn sha1_fingerprint_hex(der: &[u8]) -> String {
    hex::encode(ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, der))
}

fn time_to_chrono(time: &Time) -> DateTime<Utc> {
    match time {
        Time::UtcTime(t) => **t,
        Time::GeneralTime(t) => DateTime::<Utc>::from(t.clone()),
    }
}

/// The role of a certificate as implied by its common name.
///
/// Apple names the certificates it issues after their purpose, e.g.
/// `Apple Distribution: Some Team (AB42XYZ789)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CertificateKind {
    /// `Apple Development`, `iPhone Developer`, `Mac Developer`.
    Development,
    /// `Apple Distribution`, `iPhone Distribution`, `3rd Party Mac Developer Application`.
    Distribution,
    /// `Developer ID Application`.
    DeveloperIdApplication,
    /// `3rd Party Mac Developer Installer`, `Mac Installer Distribution`.
    MacInstaller,
    /// `Developer ID Installer`.
    DeveloperIdInstaller,
    Unknown,
}

impl CertificateKind {
    pub fn from_common_name(name: &str) -> Self {
        const PREFIXES: &[(&str, CertificateKind)] = &[
            ("Apple Development", CertificateKind::Development),
            ("iPhone Developer", CertificateKind::Development),
            ("Mac Developer", CertificateKind::Development),
            ("Apple Distribution", CertificateKind::Distribution),
            ("iPhone Distribution", CertificateKind::Distribution),
            (
                "3rd Party Mac Developer Application",
                CertificateKind::Distribution,
            ),
            (
                "Developer ID Application",
                CertificateKind::DeveloperIdApplication,
            ),
            (
                "3rd Party Mac Developer Installer",
                CertificateKind::MacInstaller,
            ),
            ("Mac Installer Distribution", CertificateKind::MacInstaller),
            ("Developer ID Installer", CertificateKind::DeveloperIdInstaller),
        ];

        PREFIXES
            .iter()
            .find_map(|(prefix, kind)| {
                if name.starts_with(prefix) {
                    Some(*kind)
                } else {
                    None
                }
            })
            .unwrap_or(CertificateKind::Unknown)
    }

    /// Whether certificates of this kind sign installer packages rather than code.
    pub fn is_installer(&self) -> bool {
        matches!(self, Self::MacInstaller | Self::DeveloperIdInstaller)
    }
}

impl Display for CertificateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Distribution => "distribution",
            Self::DeveloperIdApplication => "developer-id-application",
            Self::MacInstaller => "mac-installer",
            Self::DeveloperIdInstaller => "developer-id-installer",
            Self::Unknown => "unknown",
        })
    }
}

/// A snapshot of an installed signing certificate.
///
/// Instances are constructed once from local state and never mutated
/// afterwards. The private key, when present, is shared so groups holding
/// the same certificate don't duplicate key material.
#[derive(Clone)]
pub struct CertificateInfo {
    pub common_name: String,
    /// Organization (O) of the subject.
    pub team_name: String,
    /// Organizational Unit (OU) of the subject.
    pub team_id: String,
    /// Hex encoded serial number.
    pub serial: String,
    /// Hex encoded SHA-1 fingerprint of the DER encoding.
    pub sha1_fingerprint: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub certificate: CapturedX509Certificate,
    pub private_key: Option<Arc<InMemorySigningKeyPair>>,
}

impl Debug for CertificateInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("common_name", &self.common_name)
            .field("team_name", &self.team_name)
            .field("team_id", &self.team_id)
            .field("serial", &self.serial)
            .field("sha1_fingerprint", &self.sha1_fingerprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("has_private_key", &self.private_key.is_some())
            .finish()
    }
}

impl Display for CertificateInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] (team: {} {}, expires: {})",
            self.common_name, self.serial, self.team_id, self.team_name, self.not_after
        )
    }
}

impl CertificateInfo {
    /// Construct an instance from a parsed certificate.
    pub fn from_certificate(
        certificate: CapturedX509Certificate,
        private_key: Option<InMemorySigningKeyPair>,
    ) -> Result<Self, CodeSignGroupError> {
        let subject = certificate.subject_name();

        let attribute = |oid: &'static bcder::ConstOid| -> Result<Option<String>, CodeSignGroupError> {
            subject
                .find_first_attribute_string(Oid(oid.as_ref().into()))
                .map_err(|e| CodeSignGroupError::CertificateCharset(format!("{:?}", e)))
        };

        let common_name =
            attribute(&OID_COMMON_NAME)?.ok_or(CodeSignGroupError::CertificateNoCommonName)?;
        let team_id = attribute(&OID_ORGANIZATIONAL_UNIT_NAME)?.unwrap_or_default();
        let team_name = attribute(&OID_ORGANIZATION_NAME)?.unwrap_or_default();

        let serial = hex::encode(certificate.serial_number_asn1().as_slice());
        let sha1_fingerprint = sha1_fingerprint_hex(certificate.constructed_data());

        let x509: &X509Certificate = &certificate;
        let asn1: &x509_certificate::rfc5280::Certificate = x509.as_ref();
        let validity = &asn1.tbs_certificate.validity;
        let not_before = time_to_chrono(&validity.not_before);
        let not_after = time_to_chrono(&validity.not_after);

        Ok(Self {
            common_name,
            team_name,
            team_id,
            serial,
            sha1_fingerprint,
            not_before,
            not_after,
            certificate,
            private_key: private_key.map(Arc::new),
        })
    }

    /// Whether `now` falls strictly inside the validity window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_before && now < self.not_after
    }

    pub fn kind(&self) -> CertificateKind {
        CertificateKind::from_common_name(&self.common_name)
    }
}
