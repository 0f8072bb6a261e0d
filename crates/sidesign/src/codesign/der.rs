//! Entitlements plist to DER conversion for signature slot -7.
//!
//! Apple's DER entitlements encoding maps plist types onto ASN.1: booleans
//! and integers keep their universal tags, strings become UTF8String, arrays
//! become SEQUENCE, and dictionaries become a SET of `SEQUENCE { key, value }`
//! pairs. Data, date, and real values never appear in entitlements and are
//! skipped.

use plist::Value;

const TAG_BOOLEAN: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_UTF8_STRING: u8 = 0x0c;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;

/// Emit a DER tag + definite length header followed by `content`.
fn emit(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    let len = content.len();
    if len < 128 {
        out.push(len as u8);
    } else {
        let n = (64 - (len as u64).leading_zeros() as usize).div_ceil(8);
        out.push(0x80 | n as u8);
        for i in (0..n).rev() {
            out.push((len >> (i * 8)) as u8);
        }
    }
    out.extend_from_slice(content);
}

/// Minimal big-endian two's-complement encoding of a non-negative integer.
fn integer_bytes(val: u64) -> Vec<u8> {
    if val == 0 {
        return vec![0];
    }
    let mut n = (64 - val.leading_zeros() as usize).div_ceil(8);
    // A set high bit would read as negative; pad with a zero octet.
    let sign_pad = (val >> (n * 8 - 1)) & 1 == 1;
    let mut bytes = Vec::with_capacity(n + usize::from(sign_pad));
    if sign_pad {
        bytes.push(0);
    }
    while n > 0 {
        n -= 1;
        bytes.push((val >> (n * 8)) as u8);
    }
    bytes
}

fn encode_into(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Boolean(b) => emit(out, TAG_BOOLEAN, &[u8::from(*b)]),
        Value::Integer(i) => {
            let val = i.as_signed().unwrap_or(0) as u64;
            emit(out, TAG_INTEGER, &integer_bytes(val));
        }
        Value::String(s) => emit(out, TAG_UTF8_STRING, s.as_bytes()),
        Value::Array(items) => {
            let mut content = Vec::new();
            for item in items {
                encode_into(&mut content, item);
            }
            emit(out, TAG_SEQUENCE, &content);
        }
        Value::Dictionary(dict) => {
            let mut content = Vec::new();
            for (key, val) in dict {
                let mut pair = Vec::new();
                emit(&mut pair, TAG_UTF8_STRING, key.as_bytes());
                encode_into(&mut pair, val);
                emit(&mut content, TAG_SEQUENCE, &pair);
            }
            emit(out, TAG_SET, &content);
        }
        // Data, Date, Real, Uid: not representable in entitlements DER.
        _ => {}
    }
}

/// Convert an XML entitlements plist to its DER form, or `None` when the
/// plist does not parse or encodes to nothing.
pub fn plist_to_der(plist_xml: &[u8]) -> Option<Vec<u8>> {
    let value: Value = plist::from_bytes(plist_xml).ok()?;
    let mut der = Vec::new();
    encode_into(&mut der, &value);
    (!der.is_empty()).then_some(der)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_form_length() {
        let mut out = Vec::new();
        emit(&mut out, TAG_UTF8_STRING, &[b'a'; 10]);
        assert_eq!(&out[..2], &[0x0c, 10]);
    }

    #[test]
    fn long_form_length() {
        let mut out = Vec::new();
        emit(&mut out, TAG_SEQUENCE, &vec![0u8; 256]);
        assert_eq!(&out[..4], &[0x30, 0x82, 0x01, 0x00]);
    }

    #[test]
    fn booleans() {
        let mut t = Vec::new();
        encode_into(&mut t, &Value::Boolean(true));
        assert_eq!(t, vec![0x01, 0x01, 0x01]);

        let mut f = Vec::new();
        encode_into(&mut f, &Value::Boolean(false));
        assert_eq!(f, vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn strings_use_utf8string_tag() {
        let mut out = Vec::new();
        encode_into(&mut out, &Value::String("test".into()));
        assert_eq!(out, vec![0x0c, 0x04, b't', b'e', b's', b't']);
    }

    #[test]
    fn small_integer() {
        let mut out = Vec::new();
        encode_into(&mut out, &Value::Integer(42.into()));
        assert_eq!(out, vec![0x02, 0x01, 0x2a]);
    }

    #[test]
    fn integer_sign_padding() {
        // 128 and 255 need a leading zero octet; 256 does not.
        assert_eq!(integer_bytes(128), vec![0x00, 0x80]);
        assert_eq!(integer_bytes(255), vec![0x00, 0xff]);
        assert_eq!(integer_bytes(256), vec![0x01, 0x00]);
        assert_eq!(integer_bytes(0), vec![0x00]);
    }

    #[test]
    fn dict_encodes_as_set_of_pairs() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>get-task-allow</key>
    <true/>
</dict>
</plist>"#;
        let der = plist_to_der(xml).unwrap();
        assert_eq!(der[0], TAG_SET);
        // SET { SEQUENCE { UTF8String "get-task-allow", BOOLEAN true } }
        assert_eq!(der[2], TAG_SEQUENCE);
        assert_eq!(der[4], TAG_UTF8_STRING);
    }

    #[test]
    fn empty_dict() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
</dict>
</plist>"#;
        assert_eq!(plist_to_der(xml).unwrap(), vec![TAG_SET, 0x00]);
    }

    #[test]
    fn garbage_input_is_none() {
        assert!(plist_to_der(b"not a plist").is_none());
    }
}
