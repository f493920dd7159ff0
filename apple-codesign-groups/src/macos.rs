// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Functionality that only works on macOS.

use {
    crate::{
        certificate::{CertificateInfo, CertificateKind},
        error::CodeSignGroupError,
        settings::KeychainDomain,
    },
    log::{debug, warn},
    security_framework::{
        item::{ItemClass, ItemSearchOptions, Reference, SearchResult},
        os::macos::{
            item::ItemSearchOptionsExt,
            keychain::{SecKeychain, SecPreferencesDomain},
        },
    },
    x509_certificate::CapturedX509Certificate,
};

impl From<KeychainDomain> for SecPreferencesDomain {
    fn from(v: KeychainDomain) -> Self {
        match v {
            KeychainDomain::User => Self::User,
            KeychainDomain::System => Self::System,
            KeychainDomain::Common => Self::Common,
            KeychainDomain::Dynamic => Self::Dynamic,
        }
    }
}

fn find_certificates(
    keychains: &[SecKeychain],
) -> Result<Vec<CapturedX509Certificate>, CodeSignGroupError> {
    let mut search = ItemSearchOptions::default();
    search.keychains(keychains);
    search.class(ItemClass::certificate());
    search.limit(i32::MAX as i64);

    let mut certs = vec![];

    for item in search.search()? {
        match item {
            SearchResult::Ref(Reference::Certificate(cert)) => {
                match CapturedX509Certificate::from_der(cert.to_der()) {
                    Ok(captured) => certs.push(captured),
                    Err(e) => warn!(
                        "skipping unparseable keychain certificate {}: {}",
                        cert.subject_summary(),
                        e
                    ),
                }
            }
            SearchResult::Ref(_) => {
                return Err(CodeSignGroupError::KeychainError(
                    "non-certificate reference from keychain search (this should not happen)"
                        .to_string(),
                ));
            }
            _ => {
                return Err(CodeSignGroupError::KeychainError(
                    "non-reference result from keychain search (this should not happen)"
                        .to_string(),
                ));
            }
        }
    }

    Ok(certs)
}

/// Locate Apple issued signing certificates in a keychain.
///
/// Private keys stay in the keychain, so returned instances have none.
pub fn keychain_signing_certificates(
    domain: KeychainDomain,
) -> Result<Vec<CertificateInfo>, CodeSignGroupError> {
    let keychain = SecKeychain::default_for_domain(domain.into())?;

    let mut res = vec![];

    for cert in find_certificates(&[keychain])? {
        // Keychains also hold CA and unrelated certificates.
        let subject = cert.subject_common_name();
        let info = match CertificateInfo::from_certificate(cert, None) {
            Ok(info) => info,
            Err(e) => {
                debug!(
                    "skipping keychain certificate {}: {}",
                    subject.as_deref().unwrap_or("<no common name>"),
                    e
                );
                continue;
            }
        };

        if info.kind() == CertificateKind::Unknown {
            debug!("skipping non-signing keychain certificate {}", info.common_name);
            continue;
        }

        debug!("found keychain certificate {}", info.common_name);
        res.push(info);
    }

    Ok(res)
}
