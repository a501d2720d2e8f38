//! Documents and certificates generated on the fly for the tests.

use lopdf::content::{Content, Operation};
use lopdf::xref::XrefType;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509NameBuilder, X509};
use secrecy::SecretString;

pub const PASSPHRASE: &str = "correct horse battery staple";

pub fn secret(passphrase: &str) -> SecretString {
    SecretString::from(passphrase.to_string())
}

pub struct TestIdentity {
    pub pkcs12: Vec<u8>,
    pub certificate: X509,
}

/// RSA-2048 key and self-signed certificate, bundled as PKCS #12.
pub fn self_signed_pkcs12(common_name: &str, passphrase: &str) -> TestIdentity {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Invoices Test")
        .unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let certificate = builder.build();

    let pkcs12 = Pkcs12::builder()
        .name(common_name)
        .pkey(&key)
        .cert(&certificate)
        .build2(passphrase)
        .unwrap()
        .to_der()
        .unwrap();

    TestIdentity {
        pkcs12,
        certificate,
    }
}

fn page_content(page_number: usize, lines: usize) -> Vec<u8> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 10.into()]),
        Operation::new("TL", vec![12.into()]),
        Operation::new("Td", vec![50.into(), 780.into()]),
    ];
    for line in 0..lines {
        let text = format!(
            "Page {page_number} line {line:03}: VAT invoice item, quantity 1, unit price 100000 VND"
        );
        operations.push(Operation::new("Tj", vec![Object::string_literal(text)]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));
    Content { operations }.encode().unwrap()
}

/// Builds a document with `page_count` pages, each with `lines` lines of
/// text, and returns its id of the page tree root.
fn build_document(page_count: usize, lines: usize) -> (Document, ObjectId) {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let kids: Vec<Object> = (1..=page_count)
        .map(|n| {
            let content_id = doc.add_object(Stream::new(dictionary! {}, page_content(n, lines)));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => page_count as i64,
            "Kids" => kids,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    (doc, catalog_id)
}

fn save(mut doc: Document) -> Vec<u8> {
    let mut pdf = Vec::new();
    doc.save_to(&mut pdf).unwrap();
    pdf
}

pub fn sample_pdf(page_count: usize) -> Vec<u8> {
    sample_pdf_with_text(page_count, 3)
}

pub fn sample_pdf_with_text(page_count: usize, lines: usize) -> Vec<u8> {
    save(build_document(page_count, lines).0)
}

/// Same as [`sample_pdf`], but written with a cross-reference stream.
pub fn sample_pdf_with_xref_stream(page_count: usize) -> Vec<u8> {
    let (mut doc, _) = build_document(page_count, 3);
    doc.reference_table.cross_reference_type = XrefType::CrossReferenceStream;
    save(doc)
}

/// A document whose catalog, page tree and page live in an object stream,
/// indexed by an uncompressed cross-reference stream.
pub fn sample_pdf_with_object_stream() -> Vec<u8> {
    let members = [
        (1, "<</Type/Catalog/Pages 2 0 R>>"),
        (2, "<</Type/Pages/Kids[3 0 R]/Count 1>>"),
        (
            3,
            "<</Type/Page/Parent 2 0 R/MediaBox[0 0 595 842]/Contents 5 0 R\
             /Resources<</Font<</F1<</Type/Font/Subtype/Type1/BaseFont/Helvetica>>>>>>>>",
        ),
    ];
    let mut index = String::new();
    let mut objects = String::new();
    for (id, object) in members {
        index.push_str(&format!("{id} {} ", objects.len()));
        objects.push_str(object);
        objects.push('\n');
    }
    let object_stream = format!("{index}{objects}");
    let content = "BT /F1 12 Tf 50 780 Td (Object stream invoice) Tj ET";

    let mut pdf = b"%PDF-1.7\n".to_vec();
    let object_stream_offset = pdf.len();
    pdf.extend_from_slice(
        format!(
            "4 0 obj\n<</Type/ObjStm/N 3/First {}/Length {}>>\nstream\n{object_stream}\nendstream\nendobj\n",
            index.len(),
            object_stream.len()
        )
        .as_bytes(),
    );
    let content_offset = pdf.len();
    pdf.extend_from_slice(
        format!(
            "5 0 obj\n<</Length {}>>\nstream\n{content}\nendstream\nendobj\n",
            content.len()
        )
        .as_bytes(),
    );
    let xref_offset = pdf.len();

    // W [1 4 2]: entry type, then offset or object stream number, then
    // generation or index inside the object stream.
    let entries: [(u8, u32, u16); 7] = [
        (0, 0, 0xFFFF),
        (2, 4, 0),
        (2, 4, 1),
        (2, 4, 2),
        (1, object_stream_offset as u32, 0),
        (1, content_offset as u32, 0),
        (1, xref_offset as u32, 0),
    ];
    let mut xref = Vec::new();
    for (kind, field, generation) in entries {
        xref.push(kind);
        xref.extend_from_slice(&field.to_be_bytes());
        xref.extend_from_slice(&generation.to_be_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "6 0 obj\n<</Type/XRef/Size 7/W[1 4 2]/Root 1 0 R/Length {}>>\nstream\n",
            xref.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&xref);
    pdf.extend_from_slice(
        format!("\nendstream\nendobj\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes(),
    );
    pdf
}

/// A document whose catalog already has an indirect `/AcroForm` with a text
/// field on the first page.
pub fn sample_pdf_with_form(page_count: usize) -> Vec<u8> {
    let (mut doc, catalog_id) = build_document(page_count, 3);
    let page_id = *doc.get_pages().get(&1).unwrap();

    let text_field = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Widget",
        "FT" => "Tx",
        "T" => Object::string_literal("Buyer"),
        "Rect" => vec![50.into(), 50.into(), 250.into(), 70.into()],
        "P" => page_id,
    });
    let form_id = doc.add_object(dictionary! {
        "Fields" => vec![Object::Reference(text_field)],
        "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
    });

    doc.get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .unwrap()
        .set("Annots", vec![Object::Reference(text_field)]);
    doc.get_object_mut(catalog_id)
        .and_then(Object::as_dict_mut)
        .unwrap()
        .set("AcroForm", form_id);

    save(doc)
}

/// A syntactically valid document with an empty page tree.
pub fn pdf_without_pages() -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Count" => 0,
        "Kids" => Vec::<Object>::new(),
    });
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    save(doc)
}
