// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Partitioning of certificates into valid, invalid, and duplicated sets.

use {
    crate::certificate::CertificateInfo,
    chrono::{DateTime, Utc},
    log::{debug, warn},
    std::collections::BTreeMap,
};

/// A certificate set split by validity.
///
/// Every input certificate lands in exactly one of the three lists.
#[derive(Clone, Debug, Default)]
pub struct ValidCertificateInfo {
    /// One certificate per distinct common name.
    pub valid: Vec<CertificateInfo>,
    /// Certificates outside their validity window.
    pub invalid: Vec<CertificateInfo>,
    /// Valid certificates superseded by another with the same common name.
    pub duplicated: Vec<CertificateInfo>,
}

impl ValidCertificateInfo {
    /// Classify certificates at the current time.
    pub fn classify(certificates: impl IntoIterator<Item = CertificateInfo>) -> Self {
        Self::classify_at(certificates, Utc::now())
    }

    /// Classify certificates as of a given instant.
    ///
    /// Certificates failing the validity window are invalid regardless of
    /// their name. Among valid certificates sharing a common name, the one
    /// expiring first is kept and the rest are duplicates.
    pub fn classify_at(
        certificates: impl IntoIterator<Item = CertificateInfo>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut res = Self::default();
        let mut by_name: BTreeMap<String, Vec<CertificateInfo>> = BTreeMap::new();

        for cert in certificates {
            if cert.is_valid_at(now) {
                by_name
                    .entry(cert.common_name.clone())
                    .or_default()
                    .push(cert);
            } else {
                warn!(
                    "certificate {} is outside its validity window ({} - {})",
                    cert.common_name, cert.not_before, cert.not_after
                );
                res.invalid.push(cert);
            }
        }

        for (name, mut group) in by_name {
            // Stable so identical expirations keep input order.
            group.sort_by_key(|cert| cert.not_after);

            let mut iter = group.into_iter();
            if let Some(first) = iter.next() {
                res.valid.push(first);
            }

            for dupe in iter {
                debug!("certificate {} [{}] is a duplicate", name, dupe.serial);
                res.duplicated.push(dupe);
            }
        }

        res
    }

    pub fn len(&self) -> usize {
        self.valid.len() + self.invalid.len() + self.duplicated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*, crate::certificate::testutil::certificate_info, chrono::Duration,
        std::collections::BTreeSet,
    };

    fn fingerprints(certs: &[CertificateInfo]) -> BTreeSet<String> {
        certs.iter().map(|c| c.sha1_fingerprint.clone()).collect()
    }

    #[test]
    fn duplicates_keep_earliest_expiring() {
        let now = Utc::now();
        let t1 = certificate_info("X", "TEAM1", now - Duration::days(10), now + Duration::days(5));
        let t2 = certificate_info(
            "X",
            "TEAM1",
            now - Duration::days(1),
            now + Duration::days(300),
        );

        let res = ValidCertificateInfo::classify_at(vec![t2.clone(), t1.clone()], now);

        assert_eq!(res.valid.len(), 1);
        assert_eq!(res.valid[0].sha1_fingerprint, t1.sha1_fingerprint);
        assert_eq!(res.duplicated.len(), 1);
        assert_eq!(res.duplicated[0].sha1_fingerprint, t2.sha1_fingerprint);
        assert!(res.invalid.is_empty());
    }

    #[test]
    fn invalid_regardless_of_name() {
        let now = Utc::now();
        let expired = certificate_info("X", "T", now - Duration::days(10), now - Duration::days(1));
        let not_yet = certificate_info("Y", "T", now + Duration::days(1), now + Duration::days(10));
        let good = certificate_info("X", "T", now - Duration::days(1), now + Duration::days(10));

        let res = ValidCertificateInfo::classify_at(
            vec![expired.clone(), not_yet.clone(), good.clone()],
            now,
        );

        assert_eq!(fingerprints(&res.valid), fingerprints(&[good]));
        assert_eq!(fingerprints(&res.invalid), fingerprints(&[expired, not_yet]));
        assert!(res.duplicated.is_empty());
    }

    #[test]
    fn classification_is_total_and_idempotent() {
        let now = Utc::now();
        let certs = vec![
            certificate_info("A", "T", now - Duration::days(1), now + Duration::days(1)),
            certificate_info("A", "T", now - Duration::days(1), now + Duration::days(2)),
            certificate_info("A", "T", now - Duration::days(1), now + Duration::days(3)),
            certificate_info("B", "T", now - Duration::days(1), now + Duration::days(1)),
            certificate_info("C", "T", now - Duration::days(3), now - Duration::days(1)),
        ];

        let res = ValidCertificateInfo::classify_at(certs.clone(), now);
        assert_eq!(res.len(), certs.len());

        let all = fingerprints(&res.valid)
            .union(&fingerprints(&res.invalid))
            .cloned()
            .collect::<BTreeSet<_>>()
            .union(&fingerprints(&res.duplicated))
            .cloned()
            .collect::<BTreeSet<_>>();
        assert_eq!(all, fingerprints(&certs));

        assert_eq!(res.valid.len(), 2);
        assert_eq!(res.duplicated.len(), 2);
        assert_eq!(res.invalid.len(), 1);

        let again = ValidCertificateInfo::classify_at(res.valid.clone(), now);
        assert_eq!(fingerprints(&again.valid), fingerprints(&res.valid));
        assert!(again.duplicated.is_empty());
        assert!(again.invalid.is_empty());
    }

    #[test]
    fn empty_input() {
        let res = ValidCertificateInfo::classify(vec![]);
        assert!(res.is_empty());
    }
}
