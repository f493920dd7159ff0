// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    cryptographic_message_syntax::CmsError, std::path::PathBuf, thiserror::Error,
    x509_certificate::X509CertificateError,
};

/// Unified error type for code signing group resolution.
#[derive(Debug, Error)]
pub enum CodeSignGroupError {
    #[error("unknown command")]
    CliUnknownCommand,

    #[error("bad argument")]
    CliBadArgument,

    #[error("{0}")]
    CliGeneralError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("X.509 certificate handler error: {0}")]
    X509(#[from] X509CertificateError),

    #[error("CMS error: {0}")]
    Cms(#[from] CmsError),

    #[error("JSON serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("certificate decode error in {0}: {1}")]
    CertificateDecode(PathBuf, String),

    #[error("bad string value in certificate: {0}")]
    CertificateCharset(String),

    #[error("certificate has no subject common name")]
    CertificateNoCommonName,

    #[error("incorrect password given when decrypting PFX data")]
    PfxBadPassword,

    #[error("error parsing PFX data: {0}")]
    PfxParseError(String),

    #[error("failed to decode provisioning profile {path}: {message}")]
    ProfileDecode { path: PathBuf, message: String },

    #[error("error parsing provisioning profile plist: {0}")]
    ProfilePlist(plist::Error),

    #[error("provisioning profile does not define {0}")]
    ProfileMissingField(&'static str),

    #[error("provisioning profile not found: {0}")]
    ProfileNotFound(String),

    #[error("unknown export method: {0}")]
    UnknownExportMethod(String),

    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("error parsing resolve request {0}: {1}")]
    SettingsParse(PathBuf, String),

    #[cfg(target_os = "macos")]
    #[error("SecurityFramework error: {0}")]
    SecurityFramework(#[from] security_framework::base::Error),

    #[error("error interfacing with macOS keychain: {0}")]
    KeychainError(String),
}
