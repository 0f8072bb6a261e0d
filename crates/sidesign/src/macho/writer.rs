//! Embedding signature SuperBlobs into Mach-O binaries.
//!
//! The signature lives at the tail of `__LINKEDIT` and is referenced by an
//! `LC_CODE_SIGNATURE` load command. Re-signing replaces the old signature
//! region; signing an unsigned binary appends one and adds the load command.
//! FAT containers are rebuilt with recomputed slice offsets since embedded
//! signatures change slice sizes.

use goblin::mach::fat::FatArch;
use goblin::mach::header::{MH_CIGAM_64, MH_MAGIC_64};
use goblin::mach::load_command::{CommandVariant, LC_CODE_SIGNATURE};
use goblin::mach::{Mach, MachO, MultiArch};

use super::layout::{self, align_to};
use super::parser::segment_named;
use super::signer::SignedSlice;
use crate::{Error, Result};

/// `sizeof(struct linkedit_data_command)`.
const LINKEDIT_DATA_COMMAND_LEN: u32 = 16;

/// FAT header: magic + nfat_arch, then 20 bytes per fat_arch entry.
const FAT_MAGIC: u32 = 0xcafe_babe;

/// Embed per-slice signatures, rebuilding the FAT container as needed.
pub fn embed_signatures(data: &[u8], signed: &[SignedSlice]) -> Result<Vec<u8>> {
    let mach =
        Mach::parse(data).map_err(|e| Error::MachO(format!("unrecognized image: {e}")))?;
    match mach {
        Mach::Binary(macho) => {
            let first = signed
                .first()
                .ok_or_else(|| Error::Signing("no signed slices supplied".into()))?;
            embed_into_slice(data, &macho, &first.signature)
        }
        Mach::Fat(fat) => rebuild_fat(data, &fat, signed),
    }
}

fn rebuild_fat(data: &[u8], fat: &MultiArch, signed: &[SignedSlice]) -> Result<Vec<u8>> {
    let arches: Vec<FatArch> = fat
        .iter_arches()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::MachO(format!("bad FAT arch table: {e}")))?;
    if arches.is_empty() {
        return Err(Error::MachO("empty FAT container".into()));
    }

    // Re-emit each slice, signed where a signature was supplied.
    let mut slices: Vec<Vec<u8>> = Vec::with_capacity(arches.len());
    for (i, arch) in arches.iter().enumerate() {
        let range = arch.offset as usize..(arch.offset + arch.size) as usize;
        let slice_data = &data[range];
        match signed.iter().find(|s| s.slice_index == i) {
            Some(s) if !s.signature.is_empty() => {
                let macho = MachO::parse(slice_data, 0)
                    .map_err(|e| Error::MachO(format!("fat arch {i}: {e}")))?;
                slices.push(embed_into_slice(slice_data, &macho, &s.signature)?);
            }
            _ => slices.push(slice_data.to_vec()),
        }
    }

    // Lay the slices back out honoring each arch's alignment.
    let table_len = 8 + arches.len() * 20;
    let mut cursor = align_to(table_len, 0x4000);
    let mut placements = Vec::with_capacity(slices.len());
    for (arch, slice) in arches.iter().zip(&slices) {
        cursor = align_to(cursor, 1usize << arch.align);
        placements.push((cursor as u32, slice.len() as u32));
        cursor += slice.len();
    }

    let mut out = vec![0u8; cursor];
    // The FAT header and arch table are always big-endian.
    layout::write_u32(&mut out, 0, FAT_MAGIC, true);
    layout::write_u32(&mut out, 4, arches.len() as u32, true);
    for (i, arch) in arches.iter().enumerate() {
        let entry = 8 + i * 20;
        let (offset, size) = placements[i];
        layout::write_u32(&mut out, entry, arch.cputype as u32, true);
        layout::write_u32(&mut out, entry + 4, arch.cpusubtype as u32, true);
        layout::write_u32(&mut out, entry + 8, offset, true);
        layout::write_u32(&mut out, entry + 12, size, true);
        layout::write_u32(&mut out, entry + 16, arch.align, true);
    }
    for ((offset, _), slice) in placements.iter().zip(&slices) {
        out[*offset as usize..*offset as usize + slice.len()].copy_from_slice(slice);
    }
    Ok(out)
}

/// Embed `signature` into one thin slice, returning the new slice bytes.
fn embed_into_slice(data: &[u8], macho: &MachO, signature: &[u8]) -> Result<Vec<u8>> {
    if !matches!(macho.header.magic, MH_MAGIC_64 | MH_CIGAM_64) {
        return Err(Error::MachO("only 64-bit slices can be signed".into()));
    }

    let mut code_sig_cmd = None;
    let mut linkedit_cmd = None;
    let mut commands_end = 0usize;
    for lc in &macho.load_commands {
        commands_end = commands_end.max(lc.offset + lc.command.cmdsize());
        match &lc.command {
            CommandVariant::CodeSignature(cs) => code_sig_cmd = Some((lc.offset, *cs)),
            CommandVariant::Segment64(seg) if segment_named(&seg.segname, b"__LINKEDIT") => {
                linkedit_cmd = Some((lc.offset, *seg));
            }
            _ => {}
        }
    }

    // Everything before the old signature (or the segment end) is kept.
    let code_length = match code_sig_cmd {
        Some((_, cs)) => cs.dataoff as usize,
        None => segments_file_end(macho).unwrap_or(data.len()),
    };
    let sig_offset = align_to(code_length, 16);

    let mut out = Vec::with_capacity(sig_offset + signature.len());
    out.extend_from_slice(&data[..code_length]);
    out.resize(sig_offset, 0);
    out.extend_from_slice(signature);

    let big_endian = macho.header.magic == MH_CIGAM_64;
    match code_sig_cmd {
        Some((offset, _)) => {
            // linkedit_data_command: cmd, cmdsize, dataoff, datasize.
            layout::write_u32(&mut out, offset + 8, sig_offset as u32, big_endian);
            layout::write_u32(&mut out, offset + 12, signature.len() as u32, big_endian);
        }
        None => {
            add_code_signature_command(
                &mut out,
                macho,
                commands_end,
                sig_offset as u32,
                signature.len() as u32,
                big_endian,
            )?;
        }
    }

    if let Some((offset, seg)) = linkedit_cmd {
        let sig_end = (sig_offset + signature.len()) as u64;
        if sig_end > seg.fileoff + seg.filesize || code_sig_cmd.is_some() {
            // segment_command_64: vmsize at +32, filesize at +48.
            let filesize = sig_end - seg.fileoff;
            layout::write_u64(&mut out, offset + 48, filesize, big_endian);
            let vmsize = align_to(filesize as usize, 0x4000) as u64;
            layout::write_u64(&mut out, offset + 32, vmsize, big_endian);
        }
    }

    Ok(out)
}

/// File offset one past the last segment's data.
fn segments_file_end(macho: &MachO) -> Option<usize> {
    macho
        .load_commands
        .iter()
        .filter_map(|lc| match &lc.command {
            CommandVariant::Segment64(seg) => Some((seg.fileoff + seg.filesize) as usize),
            CommandVariant::Segment32(seg) => Some((seg.fileoff + seg.filesize) as usize),
            _ => None,
        })
        .max()
}

fn add_code_signature_command(
    out: &mut [u8],
    macho: &MachO,
    commands_end: usize,
    dataoff: u32,
    datasize: u32,
    big_endian: bool,
) -> Result<()> {
    // The new command must stay clear of the first segment's file data.
    let first_segment = macho
        .load_commands
        .iter()
        .filter_map(|lc| match &lc.command {
            CommandVariant::Segment64(seg) if seg.fileoff > 0 => Some(seg.fileoff as usize),
            CommandVariant::Segment32(seg) if seg.fileoff > 0 => Some(seg.fileoff as usize),
            _ => None,
        })
        .min()
        .unwrap_or(0x1000);
    if commands_end + LINKEDIT_DATA_COMMAND_LEN as usize > first_segment {
        return Err(Error::MachO(
            "no room for LC_CODE_SIGNATURE in the load-command area".into(),
        ));
    }

    layout::write_u32(out, commands_end, LC_CODE_SIGNATURE, big_endian);
    layout::write_u32(out, commands_end + 4, LINKEDIT_DATA_COMMAND_LEN, big_endian);
    layout::write_u32(out, commands_end + 8, dataoff, big_endian);
    layout::write_u32(out, commands_end + 12, datasize, big_endian);

    let ncmds = layout::read_u32(out, layout::NCMDS_OFFSET, big_endian) + 1;
    let sizeofcmds =
        layout::read_u32(out, layout::SIZEOFCMDS_OFFSET, big_endian) + LINKEDIT_DATA_COMMAND_LEN;
    layout::write_u32(out, layout::NCMDS_OFFSET, ncmds, big_endian);
    layout::write_u32(out, layout::SIZEOFCMDS_OFFSET, sizeofcmds, big_endian);
    Ok(())
}
