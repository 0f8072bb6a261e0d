//! Mach-O container parsing.
//!
//! Wraps goblin's parser into the slice-oriented view the signing and
//! rewriting code needs: where each architecture lives in the file, whether
//! it already carries a code signature, and how much of it counts as code.

use std::path::Path;

use goblin::mach::header::{MH_CIGAM_64, MH_EXECUTE, MH_MAGIC_64};
use goblin::mach::load_command::CommandVariant;
use goblin::mach::{Mach, MachO};

use crate::{Error, Result};

/// Compare a NUL-padded 16-byte segment name field against `name`. Exact
/// match only: `__TEXT_EXEC` is not `__TEXT`.
pub(crate) fn segment_named(segname: &[u8; 16], name: &[u8]) -> bool {
    let len = segname
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(segname.len());
    &segname[..len] == name
}

/// A Mach-O file, thin or FAT, held in memory.
pub struct MachOFile {
    data: Vec<u8>,
    is_fat: bool,
    slices: Vec<ArchSlice>,
}

/// One architecture within a [`MachOFile`].
pub struct ArchSlice {
    /// Byte offset of the slice within the containing file.
    pub offset: usize,
    /// Slice length in bytes.
    pub size: usize,
    /// `cputype` from the Mach header.
    pub cpu_type: u32,
    /// 64-bit Mach header.
    pub is_64: bool,
    /// Filetype is `MH_EXECUTE`.
    pub is_executable: bool,
    /// `LC_CODE_SIGNATURE` data offset, relative to the slice, if signed.
    pub code_sig_offset: Option<u32>,
    /// `LC_CODE_SIGNATURE` data size, if signed.
    pub code_sig_size: Option<u32>,
    /// `__TEXT` segment file size, used as execSegLimit.
    pub text_segment_size: u64,
    /// Bytes of code covered by page hashing (up to the signature, or the
    /// whole slice when unsigned).
    pub code_length: usize,
}

impl MachOFile {
    /// Read and parse a Mach-O file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(std::fs::read(path.as_ref())?)
    }

    /// Parse a Mach-O image from bytes, taking ownership of the buffer.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mach =
            Mach::parse(&data).map_err(|e| Error::MachO(format!("unrecognized image: {e}")))?;

        let (is_fat, slices) = match mach {
            Mach::Binary(macho) => {
                let slice = Self::scan_slice(&macho, 0, data.len())?;
                (false, vec![slice])
            }
            Mach::Fat(fat) => {
                let mut slices = Vec::new();
                for (i, arch) in fat.iter_arches().enumerate() {
                    let arch =
                        arch.map_err(|e| Error::MachO(format!("fat arch {i}: {e}")))?;
                    let (offset, size) = (arch.offset as usize, arch.size as usize);
                    if offset + size > data.len() {
                        return Err(Error::MachO(format!(
                            "fat arch {i} extends past end of file"
                        )));
                    }
                    let macho = MachO::parse(&data[offset..offset + size], 0)
                        .map_err(|e| Error::MachO(format!("fat arch {i}: {e}")))?;
                    slices.push(Self::scan_slice(&macho, offset, size)?);
                }
                (true, slices)
            }
        };

        Ok(Self {
            data,
            is_fat,
            slices,
        })
    }

    fn scan_slice(macho: &MachO, offset: usize, size: usize) -> Result<ArchSlice> {
        let mut code_sig_offset = None;
        let mut code_sig_size = None;
        let mut text_segment_size = 0u64;

        for lc in &macho.load_commands {
            match lc.command {
                CommandVariant::CodeSignature(cs) => {
                    code_sig_offset = Some(cs.dataoff);
                    code_sig_size = Some(cs.datasize);
                }
                CommandVariant::Segment64(ref seg) if segment_named(&seg.segname, b"__TEXT") => {
                    text_segment_size = seg.filesize;
                }
                CommandVariant::Segment32(ref seg) if segment_named(&seg.segname, b"__TEXT") => {
                    text_segment_size = seg.filesize as u64;
                }
                _ => {}
            }
        }

        let code_length = code_sig_offset.map_or(size, |o| o as usize);

        Ok(ArchSlice {
            offset,
            size,
            cpu_type: macho.header.cputype as u32,
            is_64: matches!(macho.header.magic, MH_MAGIC_64 | MH_CIGAM_64),
            is_executable: macho.header.filetype == MH_EXECUTE,
            code_sig_offset,
            code_sig_size,
            text_segment_size,
            code_length,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_fat(&self) -> bool {
        self.is_fat
    }

    pub fn slices(&self) -> &[ArchSlice] {
        &self.slices
    }

    /// The bytes of `slice` that page hashing covers.
    pub fn code_bytes(&self, slice: &ArchSlice) -> &[u8] {
        &self.data[slice.offset..slice.offset + slice.code_length]
    }

    /// The full bytes of `slice`.
    pub fn slice_bytes(&self, slice: &ArchSlice) -> &[u8] {
        &self.data[slice.offset..slice.offset + slice.size]
    }
}
