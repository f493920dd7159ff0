// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Code signing material resolution for Apple platforms.
//!
//! Signing an application for an Apple platform requires a signing
//! certificate plus, for every bundle in the application (the main app and
//! each of its extensions), a provisioning profile that embeds that
//! certificate, grants the entitlements the bundle requires, and matches
//! the intended distribution method. This crate finds that combination
//! from the certificates and provisioning profiles installed locally.
//!
//! # Resolution
//!
//! Resolution happens in stages:
//!
//! 1. Certificates are loaded by a [CertificateStore] (from PEM, DER and
//!    PKCS#12 files and, on macOS, the keychain) and partitioned into valid,
//!    invalid and duplicated sets ([ValidCertificateInfo]).
//! 2. Provisioning profiles are read from a directory by a [ProfileStore].
//! 3. [SelectableGroupBuilder] pairs every signing certificate with the
//!    candidate profiles of each bundle identifier, yielding
//!    [SelectableCodeSignGroup] instances.
//! 4. A [FilterPipeline] of [GroupFilter] narrows candidate profiles and
//!    rejects groups that can't be used.
//! 5. [GroupSelector] turns what is left into a [Resolution]: a single
//!    [CodeSignGroup], an ambiguous set of candidates, or an explanation of
//!    why nothing is usable.
//!
//! [resolve] runs stages 3 to 5 for a [ResolveRequest] and falls back to
//! the [select_preferred] policy when filtering leaves ambiguity.
//!
//! # Non-features
//!
//! This crate does not download or install certificates or profiles and it
//! does not talk to Apple's developer services. Determining which bundle
//! identifiers an application has and which entitlements they need is up
//! to the caller.

pub mod app_id;
pub use app_id::*;
mod certificate;
pub use certificate::*;
mod certificate_store;
pub use certificate_store::*;
pub mod cryptography;
pub mod entitlements;
pub use entitlements::Entitlements;
mod error;
pub use error::*;
mod filter;
pub use filter::*;
mod group;
pub use group::*;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;
mod profile;
pub use profile::*;
mod profile_store;
pub use profile_store::*;
mod selection;
pub use selection::*;
mod settings;
pub use settings::*;
mod validity;
pub use validity::*;
