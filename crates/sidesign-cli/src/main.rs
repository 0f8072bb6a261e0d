//! Command-line interface: sign app bundles and IPAs, inject dylib load
//! commands, and rewrite dylib load paths.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use sidesign::{change_dylib_path, inject_dylib, Signer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sidesign")]
#[command(about = "iOS code signing and Mach-O editing", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign an app bundle or IPA with a distribution identity
    Sign(SignArgs),
    /// Add a dylib load command to a Mach-O file
    Inject(InjectArgs),
    /// Rewrite an existing dylib load path in a Mach-O file
    ChangePath(ChangePathArgs),
}

#[derive(Parser)]
struct SignArgs {
    /// Input .app directory or .ipa archive
    input: PathBuf,

    /// Output path (required for .ipa input; .app bundles are signed in
    /// place)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// PKCS#12 identity file (.p12)
    #[arg(short = 'p', long)]
    pkcs12: Option<PathBuf>,

    /// Certificate file (PEM), used together with --private-key
    #[arg(short = 'c', long, requires = "private_key")]
    certificate: Option<PathBuf>,

    /// Private key file (PEM)
    #[arg(short = 'k', long, requires = "certificate")]
    private_key: Option<PathBuf>,

    /// Provisioning profile to embed (.mobileprovision)
    #[arg(short = 'm', long)]
    profile: Option<PathBuf>,

    /// Password for the PKCS#12 file
    #[arg(long, default_value = "")]
    password: String,

    /// New bundle identifier (empty keeps the existing one)
    #[arg(short = 'b', long, default_value = "")]
    bundle_id: String,

    /// New display name (empty keeps the existing one)
    #[arg(short = 'n', long, default_value = "")]
    display_name: String,

    /// New bundle version (empty keeps the existing one)
    #[arg(short = 'v', long, default_value = "")]
    bundle_version: String,

    /// Zip compression level for IPA output (0-9)
    #[arg(short = 'z', long, default_value = "6")]
    zip_level: u32,
}

#[derive(Parser)]
struct InjectArgs {
    /// Mach-O file to edit in place
    file: PathBuf,

    /// Dylib load path to add, e.g. @executable_path/libfoo.dylib
    dylib: String,

    /// Add as LC_LOAD_WEAK_DYLIB instead of LC_LOAD_DYLIB
    #[arg(long)]
    weak: bool,

    /// Add the load command if it is missing; without this flag a missing
    /// reference is an error
    #[arg(long)]
    create: bool,
}

#[derive(Parser)]
struct ChangePathArgs {
    /// Mach-O file to edit in place
    file: PathBuf,

    /// Existing dylib path to replace
    old_path: String,

    /// Replacement dylib path
    new_path: String,
}

fn run(cli: Cli) -> sidesign::Result<()> {
    match cli.command {
        Command::Sign(args) => sign(args),
        Command::Inject(args) => inject_dylib(&args.file, &args.dylib, args.weak, args.create),
        Command::ChangePath(args) => change_dylib_path(&args.file, &args.old_path, &args.new_path),
    }
}

fn sign(args: SignArgs) -> sidesign::Result<()> {
    let mut signer = Signer::new()
        .bundle_id(args.bundle_id)
        .display_name(args.display_name)
        .bundle_version(args.bundle_version)
        .compression_level(args.zip_level);

    if let Some(p12) = &args.pkcs12 {
        let password = SecretString::from(args.password.clone());
        signer = signer.pkcs12_file(p12, &password)?;
    } else if let (Some(cert), Some(key)) = (&args.certificate, &args.private_key) {
        signer = signer.pem_files(cert, key)?;
    }
    if let Some(profile) = &args.profile {
        signer = signer.provisioning_profile_file(profile)?;
    }
    signer.validate()?;

    let is_ipa = args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ipa"));
    if is_ipa {
        let output = args.output.clone().unwrap_or_else(|| {
            let mut out = args.input.clone();
            out.set_extension("signed.ipa");
            out
        });
        signer.sign_ipa(&args.input, &output)?;
        println!("signed: {}", output.display());
    } else {
        signer.sign_app(&args.input)?;
        println!("signed: {}", args.input.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
