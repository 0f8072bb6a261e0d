//! CMS (RFC 5652) signature construction for the code signature blob.
//!
//! The signature that lands in the SuperBlob's CMS slot is a detached
//! SignedData over the primary CodeDirectory, carrying two Apple-private
//! signed attributes that bind the remaining code directories by their
//! CDHashes.

use bcder::{encode::Values, Captured, Mode, OctetString, Oid};
use bytes::Bytes;
use cryptographic_message_syntax::{SignedDataBuilder, SignerBuilder};
use x509_certificate::rfc5652::AttributeValue;

use crate::crypto::SigningCredentials;
use crate::{Error, Result};

/// 1.2.840.113635.100.9.1: CDHash plist attribute (sha1 + truncated sha256).
const OID_CDHASH_PLIST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x09, 0x01];

/// 1.2.840.113635.100.9.2: per-digest CDHash attribute.
const OID_CDHASHES: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x63, 0x64, 0x09, 0x02];

/// 2.16.840.1.101.3.4.2.1 (sha256), body only.
const OID_SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];

/// Produce a detached CMS signature over `content` (the primary
/// CodeDirectory), attaching the Apple CDHash attributes codesign emits.
pub fn sign_code_directory(
    content: &[u8],
    credentials: &SigningCredentials,
    cdhash_sha1: &[u8; 20],
    cdhash_sha256: &[u8; 32],
) -> Result<Vec<u8>> {
    let plist_attr = AttributeValue::new(Captured::from_values(
        Mode::Der,
        OctetString::encode_slice(&cdhash_plist(cdhash_sha1, cdhash_sha256)),
    ));
    let hashes_attr = AttributeValue::new(Captured::from_values(
        Mode::Der,
        RawDer(&cdhash_sha256_entry(cdhash_sha256)),
    ));

    let signer = SignerBuilder::new(&credentials.signing_key, credentials.certificate.clone())
        .signed_attribute(Oid(Bytes::copy_from_slice(OID_CDHASH_PLIST)), vec![plist_attr])
        .signed_attribute(Oid(Bytes::copy_from_slice(OID_CDHASHES)), vec![hashes_attr]);

    let mut builder = SignedDataBuilder::default()
        .content_external(content.to_vec())
        .signer(signer);
    for cert in &credentials.cert_chain {
        builder = builder.certificate(cert.clone());
    }

    builder
        .build_der()
        .map_err(|e| Error::Signing(format!("CMS signature: {e}")))
}

/// The v1 attribute payload: an XML plist whose `cdhashes` array holds the
/// SHA-1 CDHash and the SHA-256 CDHash truncated to 20 bytes, with a
/// trailing newline as codesign writes it.
fn cdhash_plist(sha1: &[u8; 20], sha256: &[u8; 32]) -> Vec<u8> {
    use plist::{Dictionary, Value};

    let mut dict = Dictionary::new();
    dict.insert(
        "cdhashes".to_string(),
        Value::Array(vec![
            Value::Data(sha1.to_vec()),
            Value::Data(sha256[..20].to_vec()),
        ]),
    );

    let mut buf = Vec::new();
    // Serializing a plain dictionary to XML cannot fail.
    if plist::to_writer_xml(&mut buf, &Value::Dictionary(dict)).is_err() {
        return buf;
    }
    buf.push(b'\n');
    buf
}

/// One v2 attribute entry: `SEQUENCE { OID sha256, OCTET STRING cdhash }`.
fn cdhash_sha256_entry(cdhash: &[u8; 32]) -> Vec<u8> {
    let body_len = 2 + OID_SHA256.len() + 2 + cdhash.len();
    let mut der = Vec::with_capacity(2 + body_len);
    der.push(0x30);
    der.push(body_len as u8);
    der.push(0x06);
    der.push(OID_SHA256.len() as u8);
    der.extend_from_slice(OID_SHA256);
    der.push(0x04);
    der.push(cdhash.len() as u8);
    der.extend_from_slice(cdhash);
    der
}

/// Feeds pre-encoded DER into bcder's attribute capture verbatim.
struct RawDer<'a>(&'a [u8]);

impl Values for RawDer<'_> {
    fn encoded_len(&self, _mode: Mode) -> usize {
        self.0.len()
    }

    fn write_encoded<W: std::io::Write>(
        &self,
        _mode: Mode,
        target: &mut W,
    ) -> std::result::Result<(), std::io::Error> {
        target.write_all(self.0)
    }
}
