//! Raw Mach header arithmetic shared by the rewriting and signing writers.
//!
//! goblin gives us a structured read-only view; the writers patch bytes in
//! place, so they need the header geometry (field offsets, endianness,
//! load-command extents) at the byte level. All of that lives here.

use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use goblin::mach::load_command::{LC_SEGMENT, LC_SEGMENT_64};

use crate::{Error, Result};

/// `ncmds` offset within a Mach header (same for 32- and 64-bit).
pub const NCMDS_OFFSET: usize = 16;
/// `sizeofcmds` offset within a Mach header.
pub const SIZEOFCMDS_OFFSET: usize = 20;

/// Decoded Mach header geometry for one slice.
#[derive(Debug, Clone, Copy)]
pub struct RawHeader {
    pub is_64: bool,
    pub big_endian: bool,
    pub ncmds: u32,
    pub sizeofcmds: u32,
}

impl RawHeader {
    /// Decode the fixed header at the start of `slice`.
    pub fn parse(slice: &[u8]) -> Result<Self> {
        if slice.len() < 32 {
            return Err(Error::MachO("header truncated".into()));
        }
        let magic = u32::from_le_bytes(slice[0..4].try_into().unwrap());
        let (is_64, big_endian) = match magic {
            MH_MAGIC_64 => (true, false),
            MH_CIGAM_64 => (true, true),
            MH_MAGIC => (false, false),
            MH_CIGAM => (false, true),
            _ => return Err(Error::MachO(format!("unknown magic {magic:#010x}"))),
        };
        Ok(Self {
            is_64,
            big_endian,
            ncmds: read_u32(slice, NCMDS_OFFSET, big_endian),
            sizeofcmds: read_u32(slice, SIZEOFCMDS_OFFSET, big_endian),
        })
    }

    /// Fixed header length: 32 bytes for 64-bit, 28 for 32-bit.
    pub fn len(&self) -> usize {
        if self.is_64 {
            32
        } else {
            28
        }
    }

    /// Byte offset one past the last load command.
    pub fn commands_end(&self) -> usize {
        self.len() + self.sizeofcmds as usize
    }

    /// Pointer alignment for load-command sizes.
    pub fn pointer_align(&self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    /// Store updated `ncmds`/`sizeofcmds` back into `slice`.
    pub fn store_counts(&self, slice: &mut [u8]) {
        write_u32(slice, NCMDS_OFFSET, self.ncmds, self.big_endian);
        write_u32(slice, SIZEOFCMDS_OFFSET, self.sizeofcmds, self.big_endian);
    }
}

/// One raw load command: its offset in the slice, command type, and size.
#[derive(Debug, Clone, Copy)]
pub struct RawCommand {
    pub offset: usize,
    pub cmd: u32,
    pub cmdsize: u32,
}

/// Walk the load commands of `slice`, validating that each stays inside the
/// declared command area.
pub fn commands(slice: &[u8], header: &RawHeader) -> Result<Vec<RawCommand>> {
    let end = header.commands_end().min(slice.len());
    let mut out = Vec::with_capacity(header.ncmds as usize);
    let mut offset = header.len();
    for _ in 0..header.ncmds {
        if offset + 8 > end {
            return Err(Error::MachO("load commands overrun header area".into()));
        }
        let cmd = read_u32(slice, offset, header.big_endian);
        let cmdsize = read_u32(slice, offset + 4, header.big_endian);
        if cmdsize < 8 || offset + cmdsize as usize > end {
            return Err(Error::MachO(format!(
                "load command at {offset:#x} has bad size {cmdsize}"
            )));
        }
        out.push(RawCommand {
            offset,
            cmd,
            cmdsize,
        });
        offset += cmdsize as usize;
    }
    Ok(out)
}

/// Upper bound for growing the load-command area: the lowest file offset of
/// any section's data, since that is the first byte the commands must not
/// touch. Falls back to the lowest non-zero segment offset, then one page.
pub fn command_area_limit(slice: &[u8], header: &RawHeader) -> Result<usize> {
    let mut limit = usize::MAX;
    let mut min_segment = usize::MAX;

    for lc in commands(slice, header)? {
        let seg_64 = match lc.cmd {
            LC_SEGMENT_64 => true,
            LC_SEGMENT => false,
            _ => continue,
        };
        // segment_command{,_64}: cmd, cmdsize, segname[16], then
        // vmaddr/vmsize/fileoff/filesize sized by pointer width.
        let word = if seg_64 { 8 } else { 4 };
        let fileoff_at = lc.offset + 24 + 2 * word;
        let fileoff = if seg_64 {
            read_u64(slice, fileoff_at, header.big_endian) as usize
        } else {
            read_u32(slice, fileoff_at, header.big_endian) as usize
        };
        if fileoff > 0 {
            min_segment = min_segment.min(fileoff);
        }

        // Section entries follow the segment command fields.
        let nsects_at = lc.offset + 24 + 4 * word + 16;
        let nsects = read_u32(slice, nsects_at, header.big_endian) as usize;
        let sect_len = if seg_64 { 80 } else { 68 };
        let sect_off_field = if seg_64 { 48 } else { 40 };
        let mut sect = lc.offset + if seg_64 { 72 } else { 56 };
        for _ in 0..nsects {
            if sect + sect_len > slice.len() {
                break;
            }
            let data_off = read_u32(slice, sect + sect_off_field, header.big_endian) as usize;
            if data_off > 0 {
                limit = limit.min(data_off);
            }
            sect += sect_len;
        }
    }

    if limit != usize::MAX {
        Ok(limit)
    } else if min_segment != usize::MAX {
        Ok(min_segment)
    } else {
        Ok(0x1000)
    }
}

/// Round `value` up to a power-of-two `alignment`.
pub fn align_to(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

pub fn read_u32(data: &[u8], offset: usize, big_endian: bool) -> u32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().unwrap();
    if big_endian {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    }
}

pub fn read_u64(data: &[u8], offset: usize, big_endian: bool) -> u64 {
    let bytes: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
    if big_endian {
        u64::from_be_bytes(bytes)
    } else {
        u64::from_le_bytes(bytes)
    }
}

pub fn write_u32(data: &mut [u8], offset: usize, value: u32, big_endian: bool) {
    let bytes = if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    data[offset..offset + 4].copy_from_slice(&bytes);
}

pub fn write_u64(data: &mut [u8], offset: usize, value: u64, big_endian: bool) {
    let bytes = if big_endian {
        value.to_be_bytes()
    } else {
        value.to_le_bytes()
    };
    data[offset..offset + 8].copy_from_slice(&bytes);
}
