//! Detached PKCS #7 signing of a document carrying a signature placeholder.
//!
//! This is a pure byte transformation: the placeholder is found by searching
//! the raw bytes, never by re-parsing the document, and every edit overwrites
//! bytes in place, so the output has exactly the length of the input.

use std::fmt;

use log::{debug, info};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::{X509Ref, X509};
use secrecy::{ExposeSecret, SecretString};

use crate::byte_range::SignaturePlaceholder;
use crate::{Error, Result};

/// Private key and certificates decrypted from a PKCS #12 bundle.
///
/// Keep it only as long as needed: the key is released when this is dropped.
pub struct SigningIdentity {
    key: PKey<Private>,
    certificate: X509,
    chain: Stack<X509>,
}

impl SigningIdentity {
    /// Decrypts a DER encoded PKCS #12 bundle.
    ///
    /// OpenSSL does not tell a wrong passphrase apart from other decryption
    /// failures, so both are reported as [`Error::InvalidPassphrase`].
    pub fn from_pkcs12(der: &[u8], passphrase: &SecretString) -> Result<Self> {
        let bundle = Pkcs12::from_der(der)
            .map_err(|_| Error::InvalidCertificate("not a PKCS #12 bundle"))?;
        let parsed = bundle
            .parse2(passphrase.expose_secret())
            .map_err(|_| Error::InvalidPassphrase)?;

        let key = parsed
            .pkey
            .ok_or(Error::InvalidCertificate("bundle has no private key"))?;
        let certificate = parsed
            .cert
            .ok_or(Error::InvalidCertificate("bundle has no certificate"))?;
        let chain = match parsed.ca {
            Some(chain) => chain,
            None => Stack::new()?,
        };

        Ok(Self {
            key,
            certificate,
            chain,
        })
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    /// Common name of the certificate subject, if it has exactly one.
    pub fn common_name(&self) -> Option<String> {
        let mut entries = self.certificate.subject_name().entries_by_nid(Nid::COMMONNAME);
        match (entries.next(), entries.next()) {
            (Some(entry), None) => entry.data().as_utf8().ok().map(|cn| cn.to_string()),
            _ => None,
        }
    }

    /// DER encoded detached PKCS #7 signature of `message`, with signed
    /// attributes and the certificate chain embedded.
    ///
    /// The digest is the key's default, SHA-256 for RSA keys.
    pub fn sign_detached(&self, message: &[u8]) -> Result<Vec<u8>> {
        let pkcs7 = Pkcs7::sign(
            &self.certificate,
            &self.key,
            &self.chain,
            message,
            Pkcs7Flags::DETACHED | Pkcs7Flags::BINARY,
        )?;
        Ok(pkcs7.to_der()?)
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("common_name", &self.common_name())
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Signs a document produced by [`crate::add_signature_placeholder`] with the
/// key of a PKCS #12 bundle.
pub fn sign_document(
    pdf_with_placeholder: impl AsRef<[u8]>,
    pkcs12_der: impl AsRef<[u8]>,
    passphrase: &SecretString,
) -> Result<Vec<u8>> {
    let (mut pdf, placeholder, message) = prepare(pdf_with_placeholder.as_ref())?;
    let identity = SigningIdentity::from_pkcs12(pkcs12_der.as_ref(), passphrase)?;
    embed_signature(&mut pdf, &placeholder, &identity.sign_detached(&message)?)?;
    Ok(pdf)
}

/// Same as [`sign_document`], with an already decrypted identity.
pub fn sign_document_with(
    pdf_with_placeholder: impl AsRef<[u8]>,
    identity: &SigningIdentity,
) -> Result<Vec<u8>> {
    let (mut pdf, placeholder, message) = prepare(pdf_with_placeholder.as_ref())?;
    embed_signature(&mut pdf, &placeholder, &identity.sign_detached(&message)?)?;
    Ok(pdf)
}

/// Resolves the `/ByteRange` on a copy of the document and extracts the bytes
/// to be signed.
fn prepare(pdf: &[u8]) -> Result<(Vec<u8>, SignaturePlaceholder, Vec<u8>)> {
    let mut pdf = pdf.to_vec();
    let placeholder = SignaturePlaceholder::locate(&pdf)?;
    let byte_range = placeholder.write_byte_range(&mut pdf)?;
    debug!("resolved /ByteRange {:?}", byte_range);

    let message = placeholder.signed_message(&pdf);
    Ok((pdf, placeholder, message))
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn embed_signature(
    pdf: &mut [u8],
    placeholder: &SignaturePlaceholder,
    signature: &[u8],
) -> Result<()> {
    let reserved = placeholder.hex_capacity();
    let required = signature.len() * 2;
    if required > reserved {
        return Err(Error::SignatureTooLarge { required, reserved });
    }

    let start = placeholder.contents.start + 1;
    for (digits, byte) in pdf[start..start + required]
        .chunks_exact_mut(2)
        .zip(signature)
    {
        digits[0] = HEX_DIGITS[usize::from(byte >> 4)];
        digits[1] = HEX_DIGITS[usize::from(byte & 0x0f)];
    }
    info!("embedded signature: {required} of {reserved} reserved hex digits used");

    Ok(())
}
