// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PKCS#12 handling for exported signing identities.

use {
    crate::error::CodeSignGroupError,
    std::collections::HashMap,
    x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair},
};

fn bmp_string(s: &str) -> Vec<u8> {
    let utf16: Vec<u16> = s.encode_utf16().collect();

    let mut bytes = Vec::with_capacity(utf16.len() * 2 + 2);
    for c in utf16 {
        bytes.push((c / 256) as u8);
        bytes.push((c % 256) as u8);
    }
    bytes.push(0x00);
    bytes.push(0x00);

    bytes
}

fn local_key_id(attributes: &[p12::PKCS12Attribute]) -> Option<Vec<u8>> {
    attributes.iter().find_map(|attr| match attr {
        p12::PKCS12Attribute::LocalKeyId(id) => Some(id.clone()),
        _ => None,
    })
}

/// Parse PFX data into certificates and their private keys.
///
/// PFX data is commonly encountered in `.p12` files, such as those created
/// when exporting identities from Apple's `Keychain Access` application. A
/// single export may hold several identities. Certificates are paired with
/// keys via their `localKeyId` bag attributes. When the data holds exactly
/// one key and no ids to pair on, the key belongs to the first certificate.
///
/// If no password was provided to create the PFX data, this password may be
/// the empty string.
pub fn parse_pfx_data(
    data: &[u8],
    password: &str,
) -> Result<Vec<(CapturedX509Certificate, Option<InMemorySigningKeyPair>)>, CodeSignGroupError> {
    let pfx = p12::PFX::parse(data).map_err(|e| {
        CodeSignGroupError::PfxParseError(format!("data does not appear to be PFX: {:?}", e))
    })?;

    if !pfx.verify_mac(password) {
        return Err(CodeSignGroupError::PfxBadPassword);
    }

    let data = match pfx.auth_safe {
        p12::ContentInfo::Data(data) => data,
        _ => {
            return Err(CodeSignGroupError::PfxParseError(
                "unexpected PFX content info".to_string(),
            ));
        }
    };

    let content_infos = yasna::parse_der(&data, |reader| {
        reader.collect_sequence_of(p12::ContentInfo::parse)
    })
    .map_err(|e| {
        CodeSignGroupError::PfxParseError(format!("failed parsing inner ContentInfo: {:?}", e))
    })?;

    let bmp_password = bmp_string(password);

    let mut certificates = vec![];
    let mut keyed = HashMap::new();
    let mut unkeyed = vec![];

    for content in content_infos {
        let bags_data = match content {
            p12::ContentInfo::Data(inner) => inner,
            p12::ContentInfo::EncryptedData(encrypted) => {
                encrypted.data(&bmp_password).ok_or_else(|| {
                    CodeSignGroupError::PfxParseError(
                        "failed decrypting inner EncryptedData".to_string(),
                    )
                })?
            }
            p12::ContentInfo::OtherContext(_) => {
                return Err(CodeSignGroupError::PfxParseError(
                    "unexpected OtherContent content in inner PFX data".to_string(),
                ));
            }
        };

        let bags = yasna::parse_ber(&bags_data, |reader| {
            reader.collect_sequence_of(p12::SafeBag::parse)
        })
        .map_err(|e| {
            CodeSignGroupError::PfxParseError(format!(
                "failed parsing SafeBag within inner Data: {:?}",
                e
            ))
        })?;

        for bag in bags {
            let key_id = local_key_id(&bag.attributes);

            match bag.bag {
                p12::SafeBagKind::CertBag(cert_bag) => match cert_bag {
                    p12::CertBag::X509(cert_data) => {
                        certificates.push((key_id, CapturedX509Certificate::from_der(cert_data)?));
                    }
                    p12::CertBag::SDSI(_) => {
                        return Err(CodeSignGroupError::PfxParseError(
                            "unexpected SDSI certificate data".to_string(),
                        ));
                    }
                },
                p12::SafeBagKind::Pkcs8ShroudedKeyBag(key_bag) => {
                    let decrypted = key_bag.decrypt(&bmp_password).ok_or_else(|| {
                        CodeSignGroupError::PfxParseError(
                            "error decrypting PKCS8 shrouded key bag; is the password correct?"
                                .to_string(),
                        )
                    })?;

                    let key = InMemorySigningKeyPair::from_pkcs8_der(&decrypted)?;

                    match key_id {
                        Some(id) => {
                            keyed.insert(id, key);
                        }
                        None => unkeyed.push(key),
                    }
                }
                p12::SafeBagKind::OtherBagKind(_) => {
                    return Err(CodeSignGroupError::PfxParseError(
                        "unexpected bag type in inner PFX content".to_string(),
                    ));
                }
            }
        }
    }

    if certificates.is_empty() {
        return Err(CodeSignGroupError::PfxParseError(
            "failed to find x509 certificate in PFX data".to_string(),
        ));
    }

    let mut fallback_key = if keyed.is_empty() && unkeyed.len() == 1 {
        unkeyed.pop()
    } else {
        None
    };

    Ok(certificates
        .into_iter()
        .map(|(key_id, cert)| {
            let key = match key_id {
                Some(id) => keyed.remove(&id),
                None => fallback_key.take(),
            };

            (cert, key)
        })
        .collect::<Vec<_>>())
}
