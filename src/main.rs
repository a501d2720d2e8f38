use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use secrecy::SecretString;
use zeroize::Zeroizing;

use sign_pdf::verify::{verify_signatures, Verifier};
use sign_pdf::SignerConfig;

#[derive(Parser)]
#[command(name = "sign_pdf", about = "Sign PDF documents with a PKCS #12 certificate")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign PDF files, writing `<name>-sign.pdf` next to each of them
    Sign {
        /// PKCS #12 bundle with the signing key and certificate
        #[arg(long)]
        cert: PathBuf,

        /// Passphrase of the PKCS #12 bundle
        #[arg(long, env = "SIGN_PDF_PASSPHRASE", hide_env_values = true)]
        passphrase: String,

        /// JSON signing configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Where to write the signed files, instead of next to the inputs
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Verify the signatures of a PDF file and print the signers
    Verify {
        /// Directory of trusted PEM certificates. Without it only the
        /// integrity of the signatures is checked.
        #[arg(long)]
        ca_dir: Option<PathBuf>,

        input: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Sign {
            cert,
            passphrase,
            config,
            output_dir,
            inputs,
        } => sign(
            &cert,
            &SecretString::from(passphrase),
            config.as_deref(),
            output_dir.as_deref(),
            &inputs,
        ),
        Commands::Verify { ca_dir, input } => verify(ca_dir.as_deref(), &input),
    }
}

fn sign(
    cert: &Path,
    passphrase: &SecretString,
    config: Option<&Path>,
    output_dir: Option<&Path>,
    inputs: &[PathBuf],
) -> Result<()> {
    let config = match config {
        Some(path) => SignerConfig::from_json_file(path)?,
        None => SignerConfig::default(),
    };
    let pkcs12 = Zeroizing::new(
        std::fs::read(cert).with_context(|| format!("reading {}", cert.display()))?,
    );

    let mut pdfs = Vec::with_capacity(inputs.len());
    for input in inputs {
        pdfs.push(std::fs::read(input).with_context(|| format!("reading {}", input.display()))?);
    }

    let results = sign_each(pdfs, &pkcs12, passphrase, &config)?;

    let mut failures = 0;
    for (input, result) in inputs.iter().zip(results) {
        match result {
            Ok(signed) => {
                let output = output_path(input, output_dir)?;
                std::fs::write(&output, signed)
                    .with_context(|| format!("writing {}", output.display()))?;
                info!("{} signed into {}", input.display(), output.display());
            }
            Err(e) => {
                error!("{}: {e}", input.display());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} documents could not be signed", inputs.len());
    }
    Ok(())
}

#[cfg(feature = "rayon")]
fn sign_each(
    pdfs: Vec<Vec<u8>>,
    pkcs12: &[u8],
    passphrase: &SecretString,
    config: &SignerConfig,
) -> sign_pdf::Result<Vec<sign_pdf::Result<Vec<u8>>>> {
    use sign_pdf::batch::{sign_all, SigningJob};

    let jobs = pdfs
        .into_iter()
        .map(|pdf| SigningJob {
            pdf,
            pkcs12,
            passphrase,
        })
        .collect();
    sign_all(jobs, config)
}

#[cfg(not(feature = "rayon"))]
fn sign_each(
    pdfs: Vec<Vec<u8>>,
    pkcs12: &[u8],
    passphrase: &SecretString,
    config: &SignerConfig,
) -> sign_pdf::Result<Vec<sign_pdf::Result<Vec<u8>>>> {
    Ok(pdfs
        .into_iter()
        .map(|pdf| sign_pdf::sign_pdf(pdf, pkcs12, passphrase, config))
        .collect())
}

/// `dir/invoice.pdf` is signed into `dir/invoice-sign.pdf`.
fn output_path(input: &Path, output_dir: Option<&Path>) -> Result<PathBuf> {
    let Some(stem) = input.file_stem() else {
        bail!("{} is not a file name", input.display());
    };
    let mut name = stem.to_os_string();
    name.push("-sign.pdf");

    let dir = match output_dir {
        Some(dir) => dir,
        None => input.parent().unwrap_or(Path::new("")),
    };
    Ok(dir.join(name))
}

fn verify(ca_dir: Option<&Path>, input: &Path) -> Result<()> {
    let verifier = match ca_dir {
        Some(dir) => Verifier::from_ca_dir(dir)
            .with_context(|| format!("loading trusted certificates from {}", dir.display()))?,
        None => Verifier::integrity_only()?,
    };
    let pdf = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;

    let reports = verify_signatures(&pdf, &verifier)
        .with_context(|| format!("verifying {}", input.display()))?;
    if reports.is_empty() {
        println!("{}: not signed", input.display());
    }
    for report in reports {
        println!(
            "{}: {} signed by {}",
            input.display(),
            report.field_name.as_deref().unwrap_or("unnamed field"),
            report.signers.join(", ")
        );
    }
    Ok(())
}
