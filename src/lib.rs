#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

#[cfg(feature = "rayon")]
pub mod batch;
pub mod byte_range;
pub mod config;
pub mod placeholder;
pub mod signer;
pub mod verify;

#[cfg(test)]
mod test_support;

pub use config::SignerConfig;
pub use placeholder::{add_signature_placeholder, PlaceholderSession};
pub use signer::{sign_document, sign_document_with, SigningIdentity};

use log::info;
use secrecy::SecretString;
use thiserror::Error;

/// Why a document could not be used.
#[derive(Error, Debug)]
pub enum Malformed {
    #[error("PDF parsing error: {0}")]
    Parsing(#[from] lopdf::Error),
    #[error("PDF serialization error: {0}")]
    Serialization(String),
    #[error("signature placeholder not found")]
    MissingPlaceholder,
    #[error("more than one signature placeholder found")]
    AmbiguousPlaceholder,
    #[error("document is too big for the reserved byte range")]
    ByteRangeOverflow,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed PDF document: {0}")]
    MalformedDocument(#[from] Malformed),
    #[error("document has no pages")]
    NoPage,
    #[error("PKCS #12 bundle can not be decrypted with the given passphrase")]
    InvalidPassphrase,
    #[error("invalid PKCS #12 bundle: {0}")]
    InvalidCertificate(&'static str),
    #[error("signature needs {required} hex digits, but only {reserved} are reserved")]
    SignatureTooLarge { required: usize, reserved: usize },
    #[error("openssl error")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("can not start the signing workers: {0}")]
    WorkerPool(String),
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Error::MalformedDocument(Malformed::Parsing(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds a signature field to the document and signs it with the PKCS #12
/// bundle, in one go.
///
/// The returned bytes are the complete signed document. Nothing is written
/// anywhere: storing the result is up to the caller. The decrypted key only
/// lives for the duration of the call.
pub fn sign_pdf(
    pdf_bytes: impl AsRef<[u8]>,
    pkcs12_der: impl AsRef<[u8]>,
    passphrase: &SecretString,
    config: &SignerConfig,
) -> Result<Vec<u8>> {
    let with_placeholder = add_signature_placeholder(pdf_bytes, config)?;
    let signed = sign_document(with_placeholder, pkcs12_der, passphrase)?;
    info!("signed PDF document of {} bytes", signed.len());
    Ok(signed)
}
