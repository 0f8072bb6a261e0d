//! CodeDirectory construction.
//!
//! The CodeDirectory is the heart of an embedded signature: per-page digests
//! of the signed code plus "special slot" digests for Info.plist, the
//! requirements blob, CodeResources, and the entitlements blobs. We emit two
//! directories per binary (SHA-1 for legacy verifiers, SHA-256 for everything
//! since iOS 11) and the CMS signature binds to their digests.

use sha1::{Digest, Sha1};
use sha2::Sha256;

use super::constants::*;

/// Header size for version 0x20400 (through execSegFlags).
const CD_HEADER_LEN: u32 = 88;

/// The two digest algorithms a CodeDirectory of ours can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Sha1,
    Sha256,
}

impl DigestKind {
    /// `hashType` byte for the CodeDirectory header.
    pub fn tag(self) -> u8 {
        match self {
            DigestKind::Sha1 => CS_HASHTYPE_SHA1,
            DigestKind::Sha256 => CS_HASHTYPE_SHA256,
        }
    }

    /// Digest length in bytes.
    pub fn len(self) -> usize {
        match self {
            DigestKind::Sha1 => CS_SHA1_LEN,
            DigestKind::Sha256 => CS_SHA256_LEN,
        }
    }

    /// Digest `data` with this algorithm.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestKind::Sha1 => Sha1::digest(data).to_vec(),
            DigestKind::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Builds CodeDirectory blobs for one binary slice.
///
/// Special slots are set by their conventional names; slots that stay `None`
/// are emitted as zero digests, and trailing empty slots are trimmed the way
/// `codesign` trims them. Slots -6/-7 exist only on directories whose
/// execSegFlags mark the main executable.
pub struct CodeDirectoryBuilder {
    ident: String,
    team: Option<String>,
    code: Vec<u8>,
    /// Digests indexed by special-slot magnitude minus one: `[0]` is slot -1
    /// (Info.plist), `[6]` is slot -7 (DER entitlements). Slots -4 and -6 are
    /// reserved and always empty.
    special: [Option<Vec<u8>>; CS_SPECIAL_SLOT_MAX as usize],
    exec_seg_limit: u64,
    exec_seg_flags: u64,
    flags: u32,
}

impl CodeDirectoryBuilder {
    pub fn new(ident: impl Into<String>, code: Vec<u8>) -> Self {
        Self {
            ident: ident.into(),
            team: None,
            code,
            special: Default::default(),
            exec_seg_limit: 0,
            exec_seg_flags: 0,
            flags: 0,
        }
    }

    /// Team identifier from the signing certificate (absent for ad-hoc).
    pub fn team_id(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Slot -1: digest of the bundle's Info.plist.
    pub fn info_hash(mut self, digest: Vec<u8>) -> Self {
        self.special[0] = Some(digest);
        self
    }

    /// Slot -2: digest of the requirements blob.
    pub fn requirements_hash(mut self, digest: Vec<u8>) -> Self {
        self.special[1] = Some(digest);
        self
    }

    /// Slot -3: digest of `_CodeSignature/CodeResources`.
    pub fn resources_hash(mut self, digest: Vec<u8>) -> Self {
        self.special[2] = Some(digest);
        self
    }

    /// Slot -5: digest of the XML entitlements blob.
    pub fn entitlements_hash(mut self, digest: Vec<u8>) -> Self {
        self.special[4] = Some(digest);
        self
    }

    /// Slot -7: digest of the DER entitlements blob.
    pub fn der_entitlements_hash(mut self, digest: Vec<u8>) -> Self {
        self.special[6] = Some(digest);
        self
    }

    /// `execSegLimit`: file size of the `__TEXT` segment.
    pub fn exec_seg_limit(mut self, limit: u64) -> Self {
        self.exec_seg_limit = limit;
        self
    }

    /// Raw `execSegFlags` (e.g. [`CS_EXECSEG_MAIN_BINARY`]).
    pub fn exec_seg_flags(mut self, flags: u64) -> Self {
        self.exec_seg_flags = flags;
        self
    }

    /// CodeDirectory flags word (e.g. [`CS_ADHOC`]).
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    fn is_main_executable(&self) -> bool {
        self.exec_seg_flags & CS_EXECSEG_MAIN_BINARY != 0
    }

    /// Number of special slots to emit: the highest occupied slot, with
    /// trailing empties trimmed. Non-executables never report slots -6/-7;
    /// the floor is 3 (Info.plist, requirements, resources).
    fn special_slot_count(&self) -> usize {
        let ceiling = if self.is_main_executable() {
            CS_SPECIAL_SLOT_MAX as usize
        } else {
            5
        };
        let highest = self.special[..ceiling]
            .iter()
            .rposition(|slot| slot.is_some());
        match highest {
            Some(idx) => idx + 1,
            None => 3,
        }
    }

    /// Build one directory. Call once per [`DigestKind`] for dual signing.
    pub fn build(&self, kind: DigestKind) -> Vec<u8> {
        let digest_len = kind.len();
        let code_limit = self.code.len() as u32;
        let n_code_slots = self.code.len().div_ceil(PAGE_SIZE);
        let n_special_slots = self.special_slot_count();

        let ident_offset = CD_HEADER_LEN;
        let ident_len = self.ident.len() as u32 + 1;
        let team_len = self.team.as_ref().map_or(0, |t| t.len() as u32 + 1);
        let team_offset = if self.team.is_some() {
            ident_offset + ident_len
        } else {
            0
        };
        let hash_offset =
            ident_offset + ident_len + team_len + (n_special_slots * digest_len) as u32;
        let total_len = hash_offset + (n_code_slots * digest_len) as u32;

        let mut cd = Vec::with_capacity(total_len as usize);
        cd.extend_from_slice(&CSMAGIC_CODEDIRECTORY.to_be_bytes());
        cd.extend_from_slice(&total_len.to_be_bytes());
        cd.extend_from_slice(&CODEDIRECTORY_VERSION.to_be_bytes());
        cd.extend_from_slice(&self.flags.to_be_bytes());
        cd.extend_from_slice(&hash_offset.to_be_bytes());
        cd.extend_from_slice(&ident_offset.to_be_bytes());
        cd.extend_from_slice(&(n_special_slots as u32).to_be_bytes());
        cd.extend_from_slice(&(n_code_slots as u32).to_be_bytes());
        cd.extend_from_slice(&code_limit.to_be_bytes());
        cd.push(digest_len as u8); // hashSize
        cd.push(kind.tag()); // hashType
        cd.push(0); // platform
        cd.push(PAGE_SIZE_LOG2); // pageSize, log2
        cd.extend_from_slice(&0u32.to_be_bytes()); // spare2
        cd.extend_from_slice(&0u32.to_be_bytes()); // scatterOffset
        cd.extend_from_slice(&team_offset.to_be_bytes());
        cd.extend_from_slice(&0u32.to_be_bytes()); // spare3
        cd.extend_from_slice(&0u64.to_be_bytes()); // codeLimit64
        cd.extend_from_slice(&0u64.to_be_bytes()); // execSegBase
        cd.extend_from_slice(&self.exec_seg_limit.to_be_bytes());
        cd.extend_from_slice(&self.exec_seg_flags.to_be_bytes());

        cd.extend_from_slice(self.ident.as_bytes());
        cd.push(0);
        if let Some(team) = &self.team {
            cd.extend_from_slice(team.as_bytes());
            cd.push(0);
        }

        // Special slots, stored from -n up to -1.
        let empty = vec![0u8; digest_len];
        for idx in (0..n_special_slots).rev() {
            cd.extend_from_slice(self.special[idx].as_deref().unwrap_or(&empty));
        }

        // One digest per 4 KiB code page.
        for page in self.code.chunks(PAGE_SIZE) {
            cd.extend_from_slice(&kind.digest(page));
        }

        cd
    }
}

/// SHA-1 CDHash of a CodeDirectory blob (binds the CMS signature).
pub fn cdhash_sha1(code_directory: &[u8]) -> [u8; 20] {
    Sha1::digest(code_directory).into()
}

/// SHA-256 CDHash of a CodeDirectory blob.
pub fn cdhash_sha256(code_directory: &[u8]) -> [u8; 32] {
    Sha256::digest(code_directory).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header offsets for version 0x20400: magic 0, length 4, version 8,
    // flags 12, hashOffset 16, identOffset 20, nSpecialSlots 24,
    // nCodeSlots 28, codeLimit 32, hashSize 36, hashType 37, platform 38,
    // pageSize 39, teamOffset 48, execSegLimit 72, execSegFlags 80.
    fn be32(cd: &[u8], off: usize) -> u32 {
        u32::from_be_bytes(cd[off..off + 4].try_into().unwrap())
    }

    fn be64(cd: &[u8], off: usize) -> u64 {
        u64::from_be_bytes(cd[off..off + 8].try_into().unwrap())
    }

    #[test]
    fn header_sha256() {
        let cd = CodeDirectoryBuilder::new("com.example.app", vec![0u8; 8192])
            .build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 0), CSMAGIC_CODEDIRECTORY);
        assert_eq!(be32(&cd, 4) as usize, cd.len());
        assert_eq!(be32(&cd, 8), CODEDIRECTORY_VERSION);
        assert_eq!(cd[36] as usize, CS_SHA256_LEN);
        assert_eq!(cd[37], CS_HASHTYPE_SHA256);
        assert_eq!(cd[39], PAGE_SIZE_LOG2);
    }

    #[test]
    fn header_sha1() {
        let cd =
            CodeDirectoryBuilder::new("com.example.app", vec![0u8; 8192]).build(DigestKind::Sha1);
        assert_eq!(be32(&cd, 0), CSMAGIC_CODEDIRECTORY);
        assert_eq!(cd[36] as usize, CS_SHA1_LEN);
        assert_eq!(cd[37], CS_HASHTYPE_SHA1);
    }

    #[test]
    fn team_id_is_embedded_and_referenced() {
        let cd = CodeDirectoryBuilder::new("com.example.app", vec![0u8; 4096])
            .team_id("TEAM123456")
            .build(DigestKind::Sha256);
        let team_offset = be32(&cd, 48) as usize;
        assert!(team_offset > 0);
        assert_eq!(&cd[team_offset..team_offset + 10], b"TEAM123456");
        assert_eq!(cd[team_offset + 10], 0);
    }

    #[test]
    fn identifier_is_nul_terminated_at_ident_offset() {
        let cd = CodeDirectoryBuilder::new("com.example.myapp", vec![0u8; 4096])
            .build(DigestKind::Sha256);
        let ident_offset = be32(&cd, 20) as usize;
        assert_eq!(&cd[ident_offset..ident_offset + 17], b"com.example.myapp");
        assert_eq!(cd[ident_offset + 17], 0);
    }

    #[test]
    fn partial_page_rounds_up() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 6144]).build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 28), 2); // nCodeSlots
        assert_eq!(be32(&cd, 32), 6144); // codeLimit
    }

    #[test]
    fn exec_seg_fields() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096])
            .exec_seg_limit(65536)
            .exec_seg_flags(CS_EXECSEG_MAIN_BINARY)
            .build(DigestKind::Sha256);
        assert_eq!(be64(&cd, 72), 65536);
        assert_eq!(be64(&cd, 80), CS_EXECSEG_MAIN_BINARY);
    }

    #[test]
    fn minimal_directory_reports_three_special_slots() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096]).build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 24), 3);
    }

    #[test]
    fn xml_entitlements_extend_to_five_slots() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096])
            .entitlements_hash(vec![0u8; 32])
            .build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 24), 5);
    }

    #[test]
    fn der_entitlements_extend_executables_to_seven_slots() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096])
            .entitlements_hash(vec![0u8; 32])
            .der_entitlements_hash(vec![0u8; 32])
            .exec_seg_flags(CS_EXECSEG_MAIN_BINARY)
            .build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 24), 7);
    }

    #[test]
    fn non_executables_cap_at_five_slots() {
        // Dylibs never get slots -6/-7 even when a DER digest is supplied.
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096])
            .entitlements_hash(vec![0u8; 32])
            .der_entitlements_hash(vec![0u8; 32])
            .build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 24), 5);
    }

    #[test]
    fn flags_word() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096])
            .flags(CS_ADHOC)
            .build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 12), CS_ADHOC);
    }

    #[test]
    fn empty_code_yields_zero_slots() {
        let cd = CodeDirectoryBuilder::new("t", Vec::new()).build(DigestKind::Sha256);
        assert_eq!(be32(&cd, 28), 0);
        assert_eq!(be32(&cd, 32), 0);
    }

    #[test]
    fn cdhash_is_deterministic() {
        let cd = CodeDirectoryBuilder::new("t", vec![0u8; 4096]).build(DigestKind::Sha256);
        assert_eq!(cdhash_sha256(&cd), cdhash_sha256(&cd));
        assert_eq!(cdhash_sha1(&cd).len(), 20);
    }

    #[test]
    fn dual_directories_differ_only_in_digests() {
        let code = vec![0xab; 8192];
        let sha1 = CodeDirectoryBuilder::new("t", code.clone()).build(DigestKind::Sha1);
        let sha256 = CodeDirectoryBuilder::new("t", code).build(DigestKind::Sha256);
        assert_eq!(&sha1[0..4], &sha256[0..4]);
        assert!(sha256.len() > sha1.len());
    }
}
