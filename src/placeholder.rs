//! Injection of an invisible, not yet signed, signature field.
//!
//! The document is fully rewritten (not incrementally updated) with a classic
//! cross-reference table, so the signer can later work on plain byte offsets.

use chrono::{DateTime, FixedOffset};
use lopdf::{dictionary, xref::XrefType, Dictionary, Document, Object, ObjectId, StringFormat};
use log::debug;

use crate::byte_range;
use crate::{Error, Malformed, Result, SignerConfig};

/// Trailer keys only meaningful for a cross-reference stream, or pointing at
/// the previous revision of the file we are about to rewrite from scratch.
const STALE_TRAILER_KEYS: [&[u8]; 8] = [
    b"Type",
    b"W",
    b"Index",
    b"Filter",
    b"DecodeParms",
    b"Length",
    b"Prev",
    b"XRefStm",
];

/// Indirect objects created for the signature field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureField {
    pub signature: ObjectId,
    pub widget: ObjectId,
    pub page: ObjectId,
}

/// Owns the parsed document from loading to serialization.
pub struct PlaceholderSession {
    doc: Document,
    contents_hex_width: Option<usize>,
}

impl PlaceholderSession {
    /// Parses the PDF document.
    pub fn load(pdf_bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(pdf_bytes)?;
        debug!(
            "loaded PDF {} with {} objects",
            doc.version,
            doc.objects.len()
        );
        Ok(Self {
            doc,
            contents_hex_width: None,
        })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Adds the signature dictionary and its widget to the first page, and
    /// registers the field in the catalog's `/AcroForm`.
    ///
    /// Only one placeholder per session is supported.
    pub fn add_placeholder(
        &mut self,
        config: &SignerConfig,
        signing_time: DateTime<FixedOffset>,
    ) -> Result<SignatureField> {
        if self.contents_hex_width.is_some() {
            return Err(Malformed::AmbiguousPlaceholder.into());
        }

        let catalog = self.catalog_id()?;
        let page = self.first_page()?;

        let signature = self.doc.add_object(dictionary! {
            "Type" => "Sig",
            "Filter" => "Adobe.PPKLite",
            "SubFilter" => "adbe.pkcs7.detached",
            "ByteRange" => byte_range::pending_byte_range(),
            "Contents" => byte_range::contents_sentinel(config.contents_hex_width),
            "Reason" => text_string(&config.reason),
            "M" => Object::string_literal(pdf_date(signing_time)),
        });

        let widget = self.doc.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Sig",
            "Rect" => vec![0.into(), 0.into(), 0.into(), 0.into()],
            "V" => signature,
            "T" => text_string(&config.field_name),
            "F" => 4,
            "P" => page,
        });

        self.array_entry_mut(page, b"Annots")?
            .push(Object::Reference(widget));

        let acro_form = self.acro_form_mut(catalog)?;
        acro_form.set("SigFlags", 3);
        let fields = match acro_form.get(b"Fields") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };
        let fields = match fields {
            Some(id) => self.doc.get_object_mut(id)?.as_array_mut()?,
            None => {
                let acro_form = self.acro_form_mut(catalog)?;
                if !acro_form.has(b"Fields") {
                    acro_form.set("Fields", Vec::<Object>::new());
                }
                acro_form.get_mut(b"Fields")?.as_array_mut()?
            }
        };
        fields.push(Object::Reference(widget));

        self.contents_hex_width = Some(config.contents_hex_width);
        debug!(
            "signature {:?} attached to page {:?} through widget {:?}",
            signature, page, widget
        );

        Ok(SignatureField {
            signature,
            widget,
            page,
        })
    }

    /// Writes the document with a classic cross-reference table and resolves
    /// the pending placeholder values.
    pub fn serialize(mut self) -> Result<Vec<u8>> {
        self.doc.reference_table.cross_reference_type = XrefType::CrossReferenceTable;
        for key in STALE_TRAILER_KEYS {
            self.doc.trailer.remove(key);
        }
        self.doc.objects.retain(|_, object| !is_stream_of_type(object, &[b"ObjStm", b"XRef"]));

        let mut pdf = Vec::new();
        self.doc
            .save_to(&mut pdf)
            .map_err(|e| Malformed::Serialization(e.to_string()))?;

        if let Some(width) = self.contents_hex_width {
            byte_range::resolve_pending(&mut pdf, width)?;
        }
        debug!("serialized document with placeholder: {} bytes", pdf.len());

        Ok(pdf)
    }

    fn catalog_id(&self) -> Result<ObjectId> {
        Ok(self.doc.trailer.get(b"Root")?.as_reference()?)
    }

    fn first_page(&self) -> Result<ObjectId> {
        self.doc
            .get_pages()
            .into_values()
            .next()
            .ok_or(Error::NoPage)
    }

    /// The array under `key` in the dictionary `owner`, following one
    /// indirection. Created empty if missing.
    fn array_entry_mut(&mut self, owner: ObjectId, key: &[u8]) -> Result<&mut Vec<Object>> {
        let indirect = match self.doc.get_dictionary(owner)?.get(key) {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };

        Ok(match indirect {
            Some(id) => self.doc.get_object_mut(id)?.as_array_mut()?,
            None => {
                let dict = self.doc.get_object_mut(owner)?.as_dict_mut()?;
                if !dict.has(key) {
                    dict.set(key, Vec::<Object>::new());
                }
                dict.get_mut(key)?.as_array_mut()?
            }
        })
    }

    /// The catalog's `/AcroForm`, either indirect or inline. Created inline
    /// if missing.
    fn acro_form_mut(&mut self, catalog: ObjectId) -> Result<&mut Dictionary> {
        let indirect = match self.doc.get_dictionary(catalog)?.get(b"AcroForm") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };

        Ok(match indirect {
            Some(id) => self.doc.get_object_mut(id)?.as_dict_mut()?,
            None => {
                let catalog = self.doc.get_object_mut(catalog)?.as_dict_mut()?;
                if !catalog.has(b"AcroForm") {
                    catalog.set("AcroForm", Dictionary::new());
                }
                catalog.get_mut(b"AcroForm")?.as_dict_mut()?
            }
        })
    }
}

/// Parses `pdf_bytes`, adds an unsigned signature field on the first page and
/// serializes the result, ready for [`crate::sign_document`].
pub fn add_signature_placeholder(
    pdf_bytes: impl AsRef<[u8]>,
    config: &SignerConfig,
) -> Result<Vec<u8>> {
    config.validate()?;

    let mut session = PlaceholderSession::load(pdf_bytes.as_ref())?;
    session.add_placeholder(config, config.signing_time()?)?;
    session.serialize()
}

fn is_stream_of_type(object: &Object, types: &[&[u8]]) -> bool {
    let Ok(stream) = object.as_stream() else {
        return false;
    };
    match stream.dict.get(b"Type").and_then(Object::as_name) {
        Ok(name) => types.contains(&name),
        Err(_) => false,
    }
}

/// A PDF text string: plain bytes for ASCII, UTF-16BE with a byte order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Formats `time` as a PDF date, e.g. `D:20240131174500+07'00'`.
pub fn pdf_date(time: DateTime<FixedOffset>) -> String {
    let offset_minutes = time.offset().local_minus_utc() / 60;
    let sign = if offset_minutes < 0 { '-' } else { '+' };
    let offset_minutes = offset_minutes.abs();
    format!(
        "D:{}{}{:02}'{:02}'",
        time.format("%Y%m%d%H%M%S"),
        sign,
        offset_minutes / 60,
        offset_minutes % 60
    )
}
