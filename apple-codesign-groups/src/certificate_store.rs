// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Loading of signing certificates from local sources.

use {
    crate::{
        certificate::CertificateInfo,
        cryptography::parse_pfx_data,
        error::CodeSignGroupError,
        settings::{CertificateSource, StoreSettings},
        validity::ValidCertificateInfo,
    },
    log::info,
    std::path::Path,
    x509_certificate::CapturedX509Certificate,
};

fn decode_error(path: &Path, e: impl std::fmt::Display) -> CodeSignGroupError {
    CodeSignGroupError::CertificateDecode(path.to_path_buf(), format!("{}", e))
}

/// Read the certificates of a single source.
pub fn load_source(source: &CertificateSource) -> Result<Vec<CertificateInfo>, CodeSignGroupError> {
    let path = source.path();
    let data = std::fs::read(path)?;

    let pairs = match source {
        CertificateSource::Pem { .. } => CapturedX509Certificate::from_pem_multiple(&data)
            .map_err(|e| decode_error(path, e))?
            .into_iter()
            .map(|cert| (cert, None))
            .collect::<Vec<_>>(),
        CertificateSource::Der { .. } => vec![(
            CapturedX509Certificate::from_der(data).map_err(|e| decode_error(path, e))?,
            None,
        )],
        CertificateSource::Pkcs12 { password, .. } => {
            parse_pfx_data(&data, password).map_err(|e| match e {
                CodeSignGroupError::PfxBadPassword => e,
                e => decode_error(path, e),
            })?
        }
    };

    if pairs.is_empty() {
        return Err(decode_error(path, "no certificates found"));
    }

    pairs
        .into_iter()
        .map(|(cert, key)| {
            CertificateInfo::from_certificate(cert, key).map_err(|e| decode_error(path, e))
        })
        .collect::<Result<Vec<_>, _>>()
}

/// The signing certificates available locally.
#[derive(Clone, Debug, Default)]
pub struct CertificateStore {
    certificates: Vec<CertificateInfo>,
}

impl From<Vec<CertificateInfo>> for CertificateStore {
    fn from(certificates: Vec<CertificateInfo>) -> Self {
        Self { certificates }
    }
}

impl CertificateStore {
    /// Load every certificate source named by settings.
    ///
    /// A source that fails to load fails the whole load.
    pub fn load(settings: &StoreSettings) -> Result<Self, CodeSignGroupError> {
        let mut certificates = vec![];

        for source in &settings.certificate_sources {
            let loaded = load_source(source)?;
            info!(
                "loaded {} certificates from {}",
                loaded.len(),
                source.path().display()
            );
            certificates.extend(loaded);
        }

        if let Some(domain) = settings.keychain_domain {
            certificates.extend(Self::keychain_certificates(domain)?);
        }

        Ok(Self { certificates })
    }

    #[cfg(target_os = "macos")]
    fn keychain_certificates(
        domain: crate::settings::KeychainDomain,
    ) -> Result<Vec<CertificateInfo>, CodeSignGroupError> {
        let certs = crate::macos::keychain_signing_certificates(domain)?;
        info!("loaded {} certificates from {:?} keychain", certs.len(), domain);

        Ok(certs)
    }

    #[cfg(not(target_os = "macos"))]
    fn keychain_certificates(
        domain: crate::settings::KeychainDomain,
    ) -> Result<Vec<CertificateInfo>, CodeSignGroupError> {
        log::warn!(
            "ignoring {:?} keychain; keychains are only available on macOS",
            domain
        );

        Ok(vec![])
    }

    pub fn certificates(&self) -> &[CertificateInfo] {
        &self.certificates
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Partition the certificates by validity at the current time.
    pub fn classify(&self) -> ValidCertificateInfo {
        ValidCertificateInfo::classify(self.certificates.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::certificate::testutil::generate_certificate, anyhow::Result};

    #[test]
    fn load_pem_der_and_pkcs12() -> Result<()> {
        let temp = tempfile::tempdir()?;

        let (dev, _, _) = generate_certificate("Apple Development: Joe (ABC123)", "ABC123", "Joe");
        let (dist, _, _) = generate_certificate("Apple Distribution: Joe (ABC123)", "ABC123", "Joe");
        let (installer, _, _) =
            generate_certificate("3rd Party Mac Developer Installer: Joe (ABC123)", "ABC123", "Joe");
        let (p12_cert, _, key_der) =
            generate_certificate("Developer ID Application: Joe (ABC123)", "ABC123", "Joe");

        let pem_path = temp.path().join("certs.pem");
        std::fs::write(
            &pem_path,
            format!("{}{}", dev.encode_pem(), dist.encode_pem()),
        )?;

        let der_path = temp.path().join("installer.cer");
        std::fs::write(&der_path, installer.constructed_data())?;

        let p12_path = temp.path().join("identity.p12");
        std::fs::write(
            &p12_path,
            p12::PFX::new(p12_cert.constructed_data(), &key_der, None, "secret", "joe")
                .unwrap()
                .to_der(),
        )?;

        let settings = StoreSettings::new(temp.path())
            .certificate_source(CertificateSource::Pem { path: pem_path })
            .certificate_source(CertificateSource::Der { path: der_path })
            .certificate_source(CertificateSource::Pkcs12 {
                path: p12_path,
                password: "secret".into(),
            });

        let store = CertificateStore::load(&settings)?;
        assert_eq!(store.len(), 4);

        let names = store
            .certificates()
            .iter()
            .map(|c| c.common_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "Apple Development: Joe (ABC123)",
                "Apple Distribution: Joe (ABC123)",
                "3rd Party Mac Developer Installer: Joe (ABC123)",
                "Developer ID Application: Joe (ABC123)",
            ]
        );

        assert!(store.certificates()[..3].iter().all(|c| c.private_key.is_none()));
        assert!(store.certificates()[3].private_key.is_some());

        let classified = store.classify();
        assert_eq!(classified.valid.len(), 4);

        Ok(())
    }

    #[test]
    fn bad_source_fails_load() -> Result<()> {
        let temp = tempfile::tempdir()?;

        let bad = temp.path().join("bad.pem");
        std::fs::write(&bad, "not a certificate")?;

        let settings =
            StoreSettings::new(temp.path()).certificate_source(CertificateSource::Der {
                path: bad.clone(),
            });

        assert!(matches!(
            CertificateStore::load(&settings),
            Err(CodeSignGroupError::CertificateDecode(p, _)) if p == bad
        ));

        Ok(())
    }

    #[test]
    fn pkcs12_bad_password() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let (cert, _, key_der) =
            generate_certificate("Apple Development: Joe (ABC123)", "ABC123", "Joe");

        let path = temp.path().join("identity.p12");
        std::fs::write(
            &path,
            p12::PFX::new(cert.constructed_data(), &key_der, None, "secret", "joe")
                .unwrap()
                .to_der(),
        )?;

        let source = CertificateSource::Pkcs12 {
            path,
            password: "wrong".into(),
        };

        assert!(matches!(
            load_source(&source),
            Err(CodeSignGroupError::PfxBadPassword)
        ));

        Ok(())
    }
}
