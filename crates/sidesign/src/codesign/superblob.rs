//! Embedded-signature SuperBlob assembly.
//!
//! A SuperBlob is a 12-byte header (magic, total length, blob count) followed
//! by 8-byte index entries (slot type, offset) and the concatenated blobs.
//! Every embedded blob carries its own magic + length header; everything is
//! big-endian.

use super::constants::*;

const SUPERBLOB_HEADER_LEN: u32 = 12;
const INDEX_ENTRY_LEN: u32 = 8;

/// Wrap `payload` in a generic blob header (magic + 4-byte length).
pub fn wrap_blob(magic: u32, payload: &[u8]) -> Vec<u8> {
    let total = 8 + payload.len() as u32;
    let mut blob = Vec::with_capacity(total as usize);
    blob.extend_from_slice(&magic.to_be_bytes());
    blob.extend_from_slice(&total.to_be_bytes());
    blob.extend_from_slice(payload);
    blob
}

/// XML entitlements blob (slot 5 payload).
pub fn entitlements_blob(plist_xml: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_ENTITLEMENTS, plist_xml)
}

/// DER entitlements blob (slot 7 payload).
pub fn der_entitlements_blob(der: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, der)
}

/// Empty requirements vector: header plus a zero requirement count.
pub fn empty_requirements_blob() -> Vec<u8> {
    wrap_blob(CSMAGIC_REQUIREMENTS, &0u32.to_be_bytes())
}

/// CMS signature wrapper blob (slot 0x10000).
pub fn signature_blob(cms_der: &[u8]) -> Vec<u8> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, cms_der)
}

/// Empty signature wrapper used for ad-hoc signatures.
pub fn adhoc_signature_blob() -> Vec<u8> {
    wrap_blob(CSMAGIC_BLOBWRAPPER, &[])
}

/// Collects signature components and serializes them as one SuperBlob.
///
/// Components may be added in any order; the index is emitted sorted by slot
/// type, which matches the layout `codesign` produces (CodeDirectory first,
/// CMS wrapper last). A requirements blob is synthesized when none was set,
/// since verifiers expect slot 2 to exist.
#[derive(Debug, Default)]
pub struct SuperBlob {
    slots: Vec<(u32, Vec<u8>)>,
    requirements_set: bool,
}

impl SuperBlob {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&mut self, slot: u32, blob: Vec<u8>) {
        self.slots.retain(|(s, _)| *s != slot);
        self.slots.push((slot, blob));
    }

    /// Primary (SHA-1) CodeDirectory, slot 0. The CMS signature covers this
    /// blob.
    pub fn code_directory_sha1(mut self, cd: Vec<u8>) -> Self {
        self.set(CSSLOT_CODEDIRECTORY, cd);
        self
    }

    /// Alternate (SHA-256) CodeDirectory, slot 0x1000.
    pub fn code_directory_sha256(mut self, cd: Vec<u8>) -> Self {
        self.set(CSSLOT_ALTERNATE_CODEDIRECTORIES, cd);
        self
    }

    /// Requirements blob, slot 2.
    pub fn requirements(mut self, blob: Vec<u8>) -> Self {
        self.set(CSSLOT_REQUIREMENTS, blob);
        self.requirements_set = true;
        self
    }

    /// XML entitlements blob, slot 5.
    pub fn entitlements(mut self, blob: Vec<u8>) -> Self {
        self.set(CSSLOT_ENTITLEMENTS, blob);
        self
    }

    /// DER entitlements blob, slot 7.
    pub fn der_entitlements(mut self, blob: Vec<u8>) -> Self {
        self.set(CSSLOT_DER_ENTITLEMENTS, blob);
        self
    }

    /// CMS signature wrapper, slot 0x10000.
    pub fn cms_signature(mut self, blob: Vec<u8>) -> Self {
        self.set(CSSLOT_SIGNATURESLOT, blob);
        self
    }

    /// Serialize the SuperBlob.
    pub fn build(mut self) -> Vec<u8> {
        if !self.requirements_set {
            self.set(CSSLOT_REQUIREMENTS, empty_requirements_blob());
        }
        self.slots.sort_by_key(|(slot, _)| *slot);

        let count = self.slots.len() as u32;
        let index_end = SUPERBLOB_HEADER_LEN + count * INDEX_ENTRY_LEN;
        let total: u32 = index_end + self.slots.iter().map(|(_, b)| b.len() as u32).sum::<u32>();

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());

        let mut offset = index_end;
        for (slot, blob) in &self.slots {
            out.extend_from_slice(&slot.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            offset += blob.len() as u32;
        }
        for (_, blob) in &self.slots {
            out.extend_from_slice(blob);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be32(buf: &[u8], off: usize) -> u32 {
        u32::from_be_bytes(buf[off..off + 4].try_into().unwrap())
    }

    #[test]
    fn wrap_blob_header() {
        let blob = wrap_blob(CSMAGIC_BLOBWRAPPER, &[0x30, 0x82]);
        assert_eq!(be32(&blob, 0), CSMAGIC_BLOBWRAPPER);
        assert_eq!(be32(&blob, 4), 10);
        assert_eq!(&blob[8..], &[0x30, 0x82]);
    }

    #[test]
    fn empty_requirements_is_twelve_bytes() {
        let req = empty_requirements_blob();
        assert_eq!(req.len(), 12);
        assert_eq!(be32(&req, 0), CSMAGIC_REQUIREMENTS);
        assert_eq!(be32(&req, 4), 12);
        assert_eq!(be32(&req, 8), 0);
    }

    #[test]
    fn adhoc_signature_is_header_only() {
        let blob = adhoc_signature_blob();
        assert_eq!(blob.len(), 8);
        assert_eq!(be32(&blob, 4), 8);
    }

    #[test]
    fn entitlements_blob_round_trip() {
        let xml = b"<?xml version=\"1.0\"?><plist><dict/></plist>";
        let blob = entitlements_blob(xml);
        assert_eq!(be32(&blob, 0), CSMAGIC_EMBEDDED_ENTITLEMENTS);
        assert_eq!(be32(&blob, 4) as usize, 8 + xml.len());
        assert_eq!(&blob[8..], xml);
    }

    #[test]
    fn superblob_header_and_offsets() {
        let sb = SuperBlob::new()
            .code_directory_sha1(vec![0xab; 50])
            .requirements(vec![0xcd; 30])
            .entitlements(vec![0xef; 20])
            .build();

        assert_eq!(be32(&sb, 0), CSMAGIC_EMBEDDED_SIGNATURE);
        assert_eq!(be32(&sb, 8), 3);
        assert_eq!(be32(&sb, 4) as usize, sb.len());

        // Index: three entries starting at 12; first blob at 12 + 3*8 = 36.
        assert_eq!(be32(&sb, 12), CSSLOT_CODEDIRECTORY);
        assert_eq!(be32(&sb, 16), 36);
        assert_eq!(be32(&sb, 20), CSSLOT_REQUIREMENTS);
        assert_eq!(be32(&sb, 24), 86);
        assert_eq!(be32(&sb, 28), CSSLOT_ENTITLEMENTS);
        assert_eq!(be32(&sb, 32), 116);
    }

    #[test]
    fn requirements_synthesized_when_missing() {
        let sb = SuperBlob::new().code_directory_sha256(vec![0xaa; 80]).build();
        // Two entries: synthesized requirements + the alternate directory.
        assert_eq!(be32(&sb, 8), 2);
        assert_eq!(be32(&sb, 12), CSSLOT_REQUIREMENTS);
        assert_eq!(be32(&sb, 20), CSSLOT_ALTERNATE_CODEDIRECTORIES);
    }

    #[test]
    fn index_is_sorted_by_slot_regardless_of_insertion_order() {
        let sb = SuperBlob::new()
            .cms_signature(signature_blob(&[]))
            .code_directory_sha256(vec![0x02; 10])
            .der_entitlements(der_entitlements_blob(&[]))
            .code_directory_sha1(vec![0x01; 10])
            .entitlements(entitlements_blob(b""))
            .build();

        let expected = [
            CSSLOT_CODEDIRECTORY,
            CSSLOT_REQUIREMENTS,
            CSSLOT_ENTITLEMENTS,
            CSSLOT_DER_ENTITLEMENTS,
            CSSLOT_ALTERNATE_CODEDIRECTORIES,
            CSSLOT_SIGNATURESLOT,
        ];
        for (i, slot) in expected.iter().enumerate() {
            assert_eq!(be32(&sb, 12 + i * 8), *slot);
        }
    }

    #[test]
    fn setting_a_slot_twice_keeps_the_last_value() {
        let sb = SuperBlob::new()
            .code_directory_sha1(vec![0x01; 4])
            .code_directory_sha1(vec![0x02; 4])
            .build();
        // Two entries (requirements synthesized), one CodeDirectory.
        assert_eq!(be32(&sb, 8), 2);
        let cd_offset = be32(&sb, 16) as usize;
        assert_eq!(&sb[cd_offset..cd_offset + 4], &[0x02; 4]);
    }
}
