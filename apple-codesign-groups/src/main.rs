// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    apple_codesign_groups::{
        resolve, CertificateInfo, CertificateSource, CertificateStore, CodeSignGroup,
        CodeSignGroupError, ExportMethod, KeychainDomain, Platform, ProfileStore,
        ProvisioningProfileInfo, Resolution, ResolveRequest, SelectableCodeSignGroup,
        StoreSettings,
    },
    clap::{Arg, ArgMatches, Command},
    log::LevelFilter,
    serde_json::json,
    std::{path::PathBuf, str::FromStr},
};

fn add_store_args(app: Command) -> Command {
    app.arg(
        Arg::new("profiles_dir")
            .long("profiles-dir")
            .takes_value(true)
            .help("Directory holding provisioning profiles (defaults to ~/Library/MobileDevice/Provisioning Profiles)"),
    )
    .arg(
        Arg::new("keychain_domain")
            .long("keychain-domain")
            .takes_value(true)
            .possible_values(&["user", "system", "common", "dynamic"])
            .help("(macOS only) Keychain domain to load certificates from"),
    )
    .arg(
        Arg::new("pem_source")
            .long("pem-source")
            .takes_value(true)
            .multiple_occurrences(true)
            .multiple_values(true)
            .help("Path to file containing PEM encoded certificate data"),
    )
    .arg(
        Arg::new("der_source")
            .long("der-source")
            .takes_value(true)
            .multiple_occurrences(true)
            .multiple_values(true)
            .help("Path to file containing DER encoded certificate data"),
    )
    .arg(
        Arg::new("p12_path")
            .long("p12-file")
            .alias("pfx-file")
            .takes_value(true)
            .multiple_occurrences(true)
            .help("Path to a .p12/PFX file containing certificate key pairs"),
    )
    .arg(
        Arg::new("p12_password")
            .long("p12-password")
            .alias("pfx-password")
            .takes_value(true)
            .help("The password to use to open --p12-file files"),
    )
}

fn store_settings(args: &ArgMatches) -> Result<StoreSettings, CodeSignGroupError> {
    let mut settings = match args.value_of("profiles_dir") {
        Some(dir) => StoreSettings::new(dir),
        None => StoreSettings::from_home_dir()?,
    };

    if let Some(domain) = args.value_of("keychain_domain") {
        settings = settings.keychain_domain(
            KeychainDomain::try_from(domain).map_err(CodeSignGroupError::CliGeneralError)?,
        );
    }

    if let Some(values) = args.values_of("pem_source") {
        for path in values {
            settings = settings.certificate_source(CertificateSource::Pem {
                path: PathBuf::from(path),
            });
        }
    }

    if let Some(values) = args.values_of("der_source") {
        for path in values {
            settings = settings.certificate_source(CertificateSource::Der {
                path: PathBuf::from(path),
            });
        }
    }

    if let Some(values) = args.values_of("p12_path") {
        let password = args.value_of("p12_password").unwrap_or_default();

        for path in values {
            settings = settings.certificate_source(CertificateSource::Pkcs12 {
                path: PathBuf::from(path),
                password: password.to_string(),
            });
        }
    }

    Ok(settings)
}

fn print_certificate(cert: &CertificateInfo) {
    println!("  {}", cert.common_name);
    println!("    kind:        {}", cert.kind());
    println!("    team:        {} ({})", cert.team_id, cert.team_name);
    println!("    serial:      {}", cert.serial);
    println!("    SHA-1:       {}", cert.sha1_fingerprint);
    println!("    valid:       {} - {}", cert.not_before, cert.not_after);
    println!("    private key: {}", cert.private_key.is_some());
}

fn print_profile(profile: &ProvisioningProfileInfo) {
    println!("{}", profile.name);
    println!("  UUID:          {}", profile.uuid);
    println!("  app id:        {}", profile.app_id);
    println!("  team:          {} ({})", profile.team_id, profile.team_name);
    println!("  platform:      {}", profile.platform);
    println!("  export method: {}", profile.export_method);
    println!("  xcode managed: {}", profile.is_xcode_managed());
    println!("  devices:       {}", profile.provisioned_devices.len());
    println!("  certificates:  {}", profile.developer_certificates.len());
    println!(
        "  valid:         {} - {}",
        profile.creation_date, profile.expiration_date
    );
}

fn certificate_json(cert: &CertificateInfo) -> serde_json::Value {
    json!({
        "common_name": cert.common_name,
        "team_id": cert.team_id,
        "team_name": cert.team_name,
        "serial": cert.serial,
        "sha1_fingerprint": cert.sha1_fingerprint,
        "not_after": cert.not_after.to_rfc3339(),
    })
}

fn profile_json(profile: &ProvisioningProfileInfo) -> serde_json::Value {
    json!({
        "uuid": profile.uuid,
        "name": profile.name,
        "app_id": profile.app_id,
        "export_method": profile.export_method,
        "expiration_date": profile.expiration_date.to_rfc3339(),
    })
}

fn group_json(group: &CodeSignGroup) -> serde_json::Value {
    json!({
        "certificate": certificate_json(&group.certificate),
        "installer_certificate": group.installer_certificate.as_ref().map(certificate_json),
        "profiles": group
            .bundle_id_profiles
            .iter()
            .map(|(bundle_id, profile)| (bundle_id.clone(), profile_json(profile)))
            .collect::<serde_json::Map<_, _>>(),
    })
}

fn candidate_json(group: &SelectableCodeSignGroup) -> serde_json::Value {
    json!({
        "certificate": certificate_json(&group.certificate),
        "profiles": group
            .bundle_id_profiles
            .iter()
            .map(|(bundle_id, profiles)| {
                (
                    bundle_id.clone(),
                    serde_json::Value::Array(profiles.iter().map(profile_json).collect()),
                )
            })
            .collect::<serde_json::Map<_, _>>(),
    })
}

fn command_print_certificates(args: &ArgMatches) -> Result<(), CodeSignGroupError> {
    let settings = store_settings(args)?;
    let classified = CertificateStore::load(&settings)?.classify();

    for (label, certs) in [
        ("valid", &classified.valid),
        ("invalid", &classified.invalid),
        ("duplicated", &classified.duplicated),
    ] {
        println!("{} certificates: {}", label, certs.len());
        for cert in certs {
            print_certificate(cert);
        }
    }

    Ok(())
}

fn command_print_profiles(args: &ArgMatches) -> Result<(), CodeSignGroupError> {
    let settings = store_settings(args)?;
    let store = ProfileStore::new(&settings.profiles_dir);

    let profiles = if let Some(uuid) = args.value_of("uuid") {
        vec![store.by_uuid(uuid)?]
    } else if let Some(app_id) = args.value_of("app_id") {
        store.by_app_id(app_id)?
    } else {
        store.profiles()?
    };

    if profiles.is_empty() {
        eprintln!("no provisioning profiles found");
    }

    for profile in profiles {
        print_profile(&profile);
    }

    Ok(())
}

fn command_resolve(args: &ArgMatches) -> Result<(), CodeSignGroupError> {
    let request_path = args.value_of("request").ok_or(CodeSignGroupError::CliBadArgument)?;
    let mut request = ResolveRequest::from_path(request_path)?;

    if let Some(team_id) = args.value_of("team_id") {
        request.team_id = Some(team_id.to_string());
    }

    if let Some(method) = args.value_of("export_method") {
        request.export_method = ExportMethod::from_str(method)?;
    }

    if let Some(platform) = args.value_of("platform") {
        request.platform = Platform::from_str(platform)?;
    }

    let settings = store_settings(args)?;
    let certificates = CertificateStore::load(&settings)?.classify();
    let profiles = ProfileStore::new(&settings.profiles_dir).profiles()?;

    let outcome = resolve(&certificates.valid, &profiles, &request);

    let eliminated = outcome
        .eliminated
        .iter()
        .map(|e| {
            json!({
                "certificate": e.certificate.common_name,
                "filter": e.filter,
            })
        })
        .collect::<Vec<_>>();

    let value = match &outcome.resolution {
        Resolution::Resolved(group) => json!({
            "status": "resolved",
            "used_preference": outcome.used_preference,
            "group": group_json(group),
            "eliminated": eliminated,
        }),
        Resolution::Ambiguous(groups) => json!({
            "status": "ambiguous",
            "candidates": groups.iter().map(candidate_json).collect::<Vec<_>>(),
            "eliminated": eliminated,
        }),
        Resolution::Unresolved(reason) => json!({
            "status": "unresolved",
            "reason": reason,
            "eliminated": eliminated,
        }),
    };

    println!("{}", serde_json::to_string_pretty(&value)?);

    Ok(())
}

fn main_impl() -> Result<(), CodeSignGroupError> {
    let app = Command::new("Apple code signing material resolution")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Find the certificate and provisioning profiles to sign an Apple application with")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(add_store_args(
        Command::new("print-certificates")
            .about("Print signing certificates grouped by validity"),
    ));

    let app = app.subcommand(add_store_args(
        Command::new("print-profiles")
            .about("Print installed provisioning profiles")
            .arg(
                Arg::new("app_id")
                    .long("app-id")
                    .takes_value(true)
                    .help("Only print profiles with this exact application identifier"),
            )
            .arg(
                Arg::new("uuid")
                    .long("uuid")
                    .takes_value(true)
                    .conflicts_with("app_id")
                    .help("Print the profile with this UUID"),
            ),
    ));

    let app = app.subcommand(add_store_args(
        Command::new("resolve")
            .about("Resolve the signing certificate and profiles for a request file")
            .arg(
                Arg::new("team_id")
                    .long("team-id")
                    .takes_value(true)
                    .help("Only consider certificates of this team"),
            )
            .arg(
                Arg::new("export_method")
                    .long("export-method")
                    .takes_value(true)
                    .possible_values(ExportMethod::str_names())
                    .help("Distribution method overriding the request file"),
            )
            .arg(
                Arg::new("platform")
                    .long("platform")
                    .takes_value(true)
                    .possible_values(&["ios", "macos"])
                    .help("Platform overriding the request file"),
            )
            .arg(
                Arg::new("request")
                    .required(true)
                    .help("Path to a YAML or JSON request file"),
            ),
    ));

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("print-certificates", args)) => command_print_certificates(args),
        Some(("print-profiles", args)) => command_print_profiles(args),
        Some(("resolve", args)) => command_resolve(args),
        _ => Err(CodeSignGroupError::CliUnknownCommand),
    }
}

fn main() {
    let exit_code = match main_impl() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {}", err);
            1
        }
    };

    std::process::exit(exit_code)
}
