//! Binary-format constants for embedded Apple code signatures.
//!
//! Magic numbers, slot indices, and flags follow the layout published in
//! Apple's `cs_blobs.h`; everything is written big-endian on disk.

/// Embedded signature SuperBlob.
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;
/// CodeDirectory blob.
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;
/// Requirements vector blob.
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;
/// Entitlements blob, XML plist payload.
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;
/// Entitlements blob, ASN.1 DER payload.
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xfade7172;
/// Wrapper around the CMS signature.
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xfade0b01;

/// Primary (SHA-1) CodeDirectory slot.
pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;
/// Info.plist slot.
pub const CSSLOT_INFOSLOT: u32 = 0x0001;
/// Requirements slot.
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;
/// CodeResources slot.
pub const CSSLOT_RESOURCEDIR: u32 = 0x0003;
/// Application-specific slot.
pub const CSSLOT_APPLICATION: u32 = 0x0004;
/// XML entitlements slot.
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;
/// Rep-specific slot.
pub const CSSLOT_REP_SPECIFIC: u32 = 0x0006;
/// DER entitlements slot.
pub const CSSLOT_DER_ENTITLEMENTS: u32 = 0x0007;
/// First alternate CodeDirectory slot (our SHA-256 directory lands here).
pub const CSSLOT_ALTERNATE_CODEDIRECTORIES: u32 = 0x1000;
/// CMS signature slot.
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;

/// Highest special-slot index a CodeDirectory of ours can carry
/// (`-CSSLOT_DER_ENTITLEMENTS`).
pub const CS_SPECIAL_SLOT_MAX: u32 = 7;

/// CodeDirectory hashType for SHA-1.
pub const CS_HASHTYPE_SHA1: u8 = 1;
/// CodeDirectory hashType for SHA-256.
pub const CS_HASHTYPE_SHA256: u8 = 2;

/// SHA-1 digest length.
pub const CS_SHA1_LEN: usize = 20;
/// SHA-256 digest length.
pub const CS_SHA256_LEN: usize = 32;

/// CodeDirectory flag: ad-hoc signed, no signing identity.
pub const CS_ADHOC: u32 = 0x0000_0002;

/// execSegFlags bit: this directory covers the main executable.
pub const CS_EXECSEG_MAIN_BINARY: u64 = 0x0001;

/// CodeDirectory version we emit: 0x20400 adds the exec-segment fields.
pub const CODEDIRECTORY_VERSION: u32 = 0x20400;

/// Code-signing page size. Fixed at 4 KiB regardless of the VM page size.
pub const PAGE_SIZE: usize = 4096;
/// log2([`PAGE_SIZE`]), stored in the CodeDirectory header.
pub const PAGE_SIZE_LOG2: u8 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_values_match_cs_blobs() {
        assert_eq!(CSMAGIC_EMBEDDED_SIGNATURE, 0xfade0cc0);
        assert_eq!(CSMAGIC_CODEDIRECTORY, 0xfade0c02);
        assert_eq!(CSMAGIC_REQUIREMENTS, 0xfade0c01);
        assert_eq!(CSMAGIC_EMBEDDED_ENTITLEMENTS, 0xfade7171);
        assert_eq!(CSMAGIC_EMBEDDED_DER_ENTITLEMENTS, 0xfade7172);
        assert_eq!(CSMAGIC_BLOBWRAPPER, 0xfade0b01);
    }

    #[test]
    fn page_size_matches_log2() {
        assert_eq!(1usize << PAGE_SIZE_LOG2, PAGE_SIZE);
    }

    #[test]
    fn slot_indices() {
        assert_eq!(CSSLOT_CODEDIRECTORY, 0);
        assert_eq!(CSSLOT_REQUIREMENTS, 2);
        assert_eq!(CSSLOT_ENTITLEMENTS, 5);
        assert_eq!(CSSLOT_DER_ENTITLEMENTS, 7);
        assert_eq!(CSSLOT_ALTERNATE_CODEDIRECTORIES, 0x1000);
        assert_eq!(CSSLOT_SIGNATURESLOT, 0x10000);
    }
}
