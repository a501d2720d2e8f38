//! Verification of the signatures of a PDF document.
//!
//! Checks that each signature covers the whole file except its own
//! `/Contents` literal, then verifies the PKCS #7 over the covered bytes.

use std::ops::Range;
use std::path::Path;

use lopdf::{xref::XrefEntry, Dictionary, Document, Object};
use openssl::nid::Nid;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::{X509NameEntryRef, X509NameRef, X509};
use regex::bytes::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("PDF parsing error")]
    Parsing(#[from] lopdf::Error),
    #[error("openssl error")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("can not read trusted certificates")]
    TrustStore(#[from] std::io::Error),
    #[error("invalid signature object")]
    InvalidSignatureObject,
    #[error("file is not signed from the beginning")]
    WrongRangeStart,
    #[error("signature range does not end at the end of a PDF file")]
    WrongRangeEnd,
    #[error("invalid signature range")]
    InvalidRange,
    #[error("signature coverage skips over wrong sections of the document")]
    InvalidCoverage,
    #[error("signature placeholder was never filled")]
    Unsigned,
    #[error("unexpected distinguished name format")]
    WrongDistinguished,
}

type Result<T> = std::result::Result<T, Error>;

/// How the signer certificates are checked.
pub struct Verifier {
    store: X509Store,
    flags: Pkcs7Flags,
}

impl Verifier {
    /// Signer certificates must chain up to a certificate of `store`.
    pub fn with_trust_store(store: X509Store) -> Self {
        Self {
            store,
            flags: Pkcs7Flags::empty(),
        }
    }

    /// Trusts every certificate in a directory of PEM files.
    pub fn from_ca_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut builder = X509StoreBuilder::new()?;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            builder.add_cert(X509::from_pem(&std::fs::read(&path)?)?)?;
        }
        Ok(Self::with_trust_store(builder.build()))
    }

    /// Only checks that the signature matches the document and the embedded
    /// certificate, without validating the certificate itself.
    pub fn integrity_only() -> Result<Self> {
        Ok(Self {
            store: X509StoreBuilder::new()?.build(),
            flags: Pkcs7Flags::NOVERIFY,
        })
    }
}

/// A verified signature.
#[derive(Debug, Clone)]
pub struct SignatureReport {
    /// The `/T` of the signature field.
    pub field_name: Option<String>,
    /// Common names of the signer certificates.
    pub signers: Vec<String>,
    /// The byte ranges of the document that were signed.
    pub signed_byte_ranges: [Range<usize>; 2],
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}

struct Signature {
    field_name: Option<String>,
    coverage_end: usize,
    skipped_range: Range<usize>,
    pkcs7_der: Vec<u8>,
}

/// Verifies every signature field of the document. A document without
/// signature fields has an empty report.
pub fn verify_signatures(pdf_bytes: &[u8], verifier: &Verifier) -> Result<Vec<SignatureReport>> {
    let doc = Document::load_mem(pdf_bytes)?;

    let acro_form = match doc.get_dict_in_dict(doc.catalog()?, b"AcroForm") {
        Ok(val) => val,
        Err(lopdf::Error::DictKey) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let empty_stack = Stack::new()?;
    let mut reports = Vec::new();
    for sig in get_signature_objects(pdf_bytes, &doc, acro_form)? {
        // OpenSSL requires a contiguous array of bytes to verify the
        // signature, so we must concatenate the ranges.
        let mut signed_data = Vec::with_capacity(sig.coverage_end - sig.skipped_range.len());
        signed_data.extend_from_slice(&pdf_bytes[..sig.skipped_range.start]);
        signed_data.extend_from_slice(&pdf_bytes[sig.skipped_range.end..sig.coverage_end]);

        let pkcs7 = Pkcs7::from_der(&sig.pkcs7_der)?;
        pkcs7.verify(
            &empty_stack,
            &verifier.store,
            Some(signed_data.as_slice()),
            None,
            verifier.flags,
        )?;

        let signers = pkcs7
            .signers(&empty_stack, Pkcs7Flags::empty())?
            .iter()
            .map(|signer| -> Result<String> {
                let cn = get_only_entry(signer.subject_name(), Nid::COMMONNAME)?;
                Ok(cn.data().as_utf8()?.to_string())
            })
            .collect::<Result<Vec<_>>>()?;

        reports.push(SignatureReport {
            field_name: sig.field_name,
            signers,
            signed_byte_ranges: [
                0..sig.skipped_range.start,
                sig.skipped_range.end..sig.coverage_end,
            ],
        });
    }

    Ok(reports)
}

fn get_signature_objects(
    pdf_bytes: &[u8],
    doc: &Document,
    acro_form: &Dictionary,
) -> Result<Vec<Signature>> {
    let mut signatures = Vec::new();

    for field in acro_form
        .get_deref(b"Fields", doc)?
        .as_array()?
        .iter()
        .map(|f| doc.dereference(f))
    {
        let field = field?.1.as_dict()?;

        // Check if the field is a signature
        if !is_signature(field) {
            continue;
        }

        signatures.push(process_signature(pdf_bytes, doc, field)?);
    }

    Ok(signatures)
}

fn process_signature(pdf_bytes: &[u8], doc: &Document, field: &Dictionary) -> Result<Signature> {
    let (Some(obj_id), Object::Dictionary(signature)) = doc.dereference(field.get(b"V")?)? else {
        // Signature object must be an indirect dictionary.
        return Err(Error::InvalidSignatureObject);
    };

    let signed_range = signature
        .get_deref(b"ByteRange", doc)?
        .as_array()?
        .iter()
        .map(|r| doc.dereference(r).and_then(|(_, r)| r.as_i64()))
        .collect::<lopdf::Result<ExactArrayOrNone<i64, 4>>>()?
        .0
        .ok_or(lopdf::Error::Type)?;

    // For soundness, we must ensure the signature covers the file since the
    // beginning.
    if signed_range[0] != 0 {
        return Err(Error::WrongRangeStart);
    }

    // Sanity check that the range is well formed and inside the document.
    if signed_range[1..].iter().any(|&r| r < 0) {
        return Err(Error::InvalidRange);
    }
    let signed_range = signed_range.map(|r| r as usize);
    let coverage_end = signed_range[2] + signed_range[3];
    if signed_range[1] > signed_range[2] || coverage_end > pdf_bytes.len() {
        return Err(Error::InvalidRange);
    }

    // The signature object must be inside the signed range.
    match doc.reference_table.get(obj_id.0) {
        Some(XrefEntry::Normal { offset, generation }) if *generation == obj_id.1 => {
            if *offset as usize >= signed_range[1] {
                return Err(Error::InvalidCoverage);
            }
        }
        _ => return Err(Error::InvalidSignatureObject),
    }

    // The /Contents field must match the bytes skipped in the signed range,
    // which must be hex encoded.
    let skipped_range = signed_range[1]..signed_range[2];
    let skipped_bytes = decode_pdf_hex_string(&pdf_bytes[skipped_range.clone()])
        .ok_or(Error::InvalidCoverage)?;
    let pkcs7_signature = signature.get_deref(b"Contents", doc)?.as_str()?;
    if pkcs7_signature != skipped_bytes {
        return Err(Error::InvalidCoverage);
    }
    if skipped_bytes.iter().all(|&b| b == 0) {
        return Err(Error::Unsigned);
    }

    // Tests if the signature range ends with the PDF end marker (%%EOF).
    if !pdf_ends_with_eof(&pdf_bytes[..coverage_end]) {
        return Err(Error::WrongRangeEnd);
    }

    Ok(Signature {
        field_name: field.get(b"T").and_then(Object::as_str).ok().map(decode_text_string),
        coverage_end,
        skipped_range,
        pkcs7_der: skipped_bytes,
    })
}

fn is_signature(annot_dict: &Dictionary) -> bool {
    matches!(annot_dict.get(b"FT"), Ok(Object::Name(ft)) if ft == b"Sig")
}

/// Errors out if there is not exactly one entry with the given NID in the
/// distinguished name.
fn get_only_entry(name: &X509NameRef, nid: Nid) -> Result<&X509NameEntryRef> {
    let mut entries = name.entries_by_nid(nid);
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(Error::WrongDistinguished),
    }
}

/// Decodes a PDF text string, either UTF-16BE with a byte order mark, or
/// (approximately) PDFDocEncoding.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(b"\xFE\xFF") {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decodes a PDF hex string, including the delimiters '<' and '>', skipping
/// whitespace. A missing final digit is taken as 0.
///
/// Returns None if any character is not a valid hex digit.
fn decode_pdf_hex_string(hex_input: &[u8]) -> Option<Vec<u8>> {
    // First and last characters must be the delimiters '<' and '>'.
    if hex_input.first() != Some(&b'<') || hex_input.last() != Some(&b'>') {
        return None;
    }
    let hex_input = &hex_input[1..hex_input.len() - 1];

    let mut bytes = Vec::with_capacity(hex_input.len() / 2);
    let mut hex_iter = hex_input.iter().filter_map(|&b| {
        let c = b as char;
        if c.is_whitespace() {
            None
        } else {
            Some(c.to_digit(16))
        }
    });

    while let Some(first) = hex_iter.next() {
        let first = first? as u8;
        let second = hex_iter.next().unwrap_or(Some(0))? as u8;
        bytes.push(first << 4 | second);
    }

    Some(bytes)
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the PDF ends with the %%EOF marker.
fn pdf_ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}
