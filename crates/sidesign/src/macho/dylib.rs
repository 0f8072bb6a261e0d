//! Dylib load-command rewriting: injection and install-path changes.
//!
//! Both operations patch only the load-command area at the front of each
//! slice, so file offsets elsewhere in the binary stay valid. FAT files are
//! patched slice by slice; the file is written back only after every slice
//! succeeded.

use std::fs;
use std::path::Path;

use goblin::mach::load_command::{
    LC_ID_DYLIB, LC_LOAD_DYLIB, LC_LOAD_WEAK_DYLIB, LC_REEXPORT_DYLIB,
};
use goblin::mach::Mach;
use tracing::debug;

use super::layout::{self, RawCommand, RawHeader};
use crate::{Error, Result};

/// `sizeof(struct dylib_command)` before the path string.
const DYLIB_COMMAND_LEN: usize = 24;
/// Offset of the `lc_str` name offset within a dylib_command.
const NAME_OFFSET_FIELD: usize = 8;

/// Add a load command for `dylib_path` to the Mach-O file at `file`.
///
/// `weak` emits `LC_LOAD_WEAK_DYLIB` so a missing library does not abort
/// launch. If some load command already references `dylib_path` the file is
/// left untouched and the call succeeds. `create` permits appending a new
/// load command; with `create` false a missing reference is an error, which
/// lets callers check for a reference without modifying anything.
pub fn inject_dylib(
    file: impl AsRef<Path>,
    dylib_path: &str,
    weak: bool,
    create: bool,
) -> Result<()> {
    let file = file.as_ref();
    let mut data = fs::read(file)?;
    let mut modified = false;

    for (offset, size) in slice_ranges(&data)? {
        modified |= inject_into_slice(&mut data[offset..offset + size], dylib_path, weak, create)?;
    }

    if modified {
        fs::write(file, &data)?;
        debug!(file = %file.display(), dylib = dylib_path, weak, "injected dylib load command");
    }
    Ok(())
}

/// Rewrite the install path of an existing dylib load command from
/// `old_path` to `new_path` in every slice that references it.
///
/// Fails when no slice references `old_path`. A longer path grows the
/// command in place by shifting the following load commands into free
/// header space.
pub fn change_dylib_path(
    file: impl AsRef<Path>,
    old_path: &str,
    new_path: &str,
) -> Result<()> {
    let file = file.as_ref();
    let mut data = fs::read(file)?;
    let mut found = false;

    for (offset, size) in slice_ranges(&data)? {
        found |= change_in_slice(&mut data[offset..offset + size], old_path, new_path)?;
    }

    if !found {
        return Err(Error::DylibRewrite(format!(
            "no load command references {old_path}"
        )));
    }
    fs::write(file, &data)?;
    debug!(file = %file.display(), old = old_path, new = new_path, "rewrote dylib install path");
    Ok(())
}

/// Byte ranges of every architecture slice in the file.
fn slice_ranges(data: &[u8]) -> Result<Vec<(usize, usize)>> {
    match Mach::parse(data).map_err(|e| Error::MachO(format!("unrecognized image: {e}")))? {
        Mach::Binary(_) => Ok(vec![(0, data.len())]),
        Mach::Fat(fat) => {
            let mut ranges = Vec::new();
            for (i, arch) in fat.iter_arches().enumerate() {
                let arch = arch.map_err(|e| Error::MachO(format!("fat arch {i}: {e}")))?;
                let (offset, size) = (arch.offset as usize, arch.size as usize);
                if offset + size > data.len() {
                    return Err(Error::MachO(format!(
                        "fat arch {i} extends past end of file"
                    )));
                }
                ranges.push((offset, size));
            }
            Ok(ranges)
        }
    }
}

fn is_dylib_reference(cmd: u32) -> bool {
    matches!(
        cmd,
        LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_ID_DYLIB
    )
}

/// The install path stored in a dylib load command, minus trailing NULs.
fn command_path<'a>(slice: &'a [u8], header: &RawHeader, lc: &RawCommand) -> Option<&'a [u8]> {
    let cmdsize = lc.cmdsize as usize;
    let end = lc.offset + cmdsize;
    // The name-offset field must fit inside the command before we read it.
    if cmdsize < NAME_OFFSET_FIELD + 4 || end > slice.len() {
        return None;
    }
    let name_offset = layout::read_u32(slice, lc.offset + NAME_OFFSET_FIELD, header.big_endian);
    if name_offset as usize >= cmdsize {
        return None;
    }
    let raw = &slice[lc.offset + name_offset as usize..end];
    let nul = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    Some(&raw[..nul])
}

/// Serialize a dylib_command with `cmd` type and `path`, padded to
/// `cmdsize`.
fn encode_dylib_command(cmd: u32, cmdsize: usize, path: &str, big_endian: bool) -> Vec<u8> {
    let mut buf = vec![0u8; cmdsize];
    layout::write_u32(&mut buf, 0, cmd, big_endian);
    layout::write_u32(&mut buf, 4, cmdsize as u32, big_endian);
    layout::write_u32(&mut buf, 8, DYLIB_COMMAND_LEN as u32, big_endian);
    layout::write_u32(&mut buf, 12, 2, big_endian); // timestamp
    layout::write_u32(&mut buf, 16, 0x0001_0000, big_endian); // current_version
    layout::write_u32(&mut buf, 20, 0x0001_0000, big_endian); // compatibility_version
    buf[DYLIB_COMMAND_LEN..DYLIB_COMMAND_LEN + path.len()].copy_from_slice(path.as_bytes());
    buf
}

fn inject_into_slice(
    slice: &mut [u8],
    dylib_path: &str,
    weak: bool,
    create: bool,
) -> Result<bool> {
    let mut header = RawHeader::parse(slice)?;
    let commands = layout::commands(slice, &header)?;

    for lc in &commands {
        if is_dylib_reference(lc.cmd)
            && command_path(slice, &header, lc) == Some(dylib_path.as_bytes())
        {
            debug!(dylib = dylib_path, "load command already present");
            return Ok(false);
        }
    }

    if !create {
        return Err(Error::DylibRewrite(format!(
            "{dylib_path} is not referenced and creation was not requested"
        )));
    }

    let cmdsize = layout::align_to(
        DYLIB_COMMAND_LEN + dylib_path.len() + 1,
        header.pointer_align(),
    );
    let insert_at = header.commands_end();
    let limit = layout::command_area_limit(slice, &header)?;
    if insert_at + cmdsize > limit.min(slice.len()) {
        return Err(Error::DylibRewrite(format!(
            "no room for a {cmdsize}-byte load command ({} bytes free)",
            limit.min(slice.len()).saturating_sub(insert_at)
        )));
    }

    let cmd = if weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };
    let encoded = encode_dylib_command(cmd, cmdsize, dylib_path, header.big_endian);
    slice[insert_at..insert_at + cmdsize].copy_from_slice(&encoded);

    header.ncmds += 1;
    header.sizeofcmds += cmdsize as u32;
    header.store_counts(slice);
    Ok(true)
}

fn change_in_slice(slice: &mut [u8], old_path: &str, new_path: &str) -> Result<bool> {
    let mut header = RawHeader::parse(slice)?;
    let commands = layout::commands(slice, &header)?;

    let Some(target) = commands.iter().copied().find(|lc| {
        is_dylib_reference(lc.cmd) && command_path(slice, &header, lc) == Some(old_path.as_bytes())
    }) else {
        return Ok(false);
    };

    let needed = layout::align_to(
        DYLIB_COMMAND_LEN + new_path.len() + 1,
        header.pointer_align(),
    );
    let old_size = target.cmdsize as usize;

    if needed <= old_size {
        // Fits in place: overwrite the path region, keep cmdsize.
        let path_area = target.offset + DYLIB_COMMAND_LEN..target.offset + old_size;
        slice[path_area].fill(0);
        let dst = target.offset + DYLIB_COMMAND_LEN;
        slice[dst..dst + new_path.len()].copy_from_slice(new_path.as_bytes());
        layout::write_u32(
            slice,
            target.offset + NAME_OFFSET_FIELD,
            DYLIB_COMMAND_LEN as u32,
            header.big_endian,
        );
        return Ok(true);
    }

    // The command grows: shift every following command back by the delta.
    let delta = needed - old_size;
    let commands_end = header.commands_end();
    let limit = layout::command_area_limit(slice, &header)?;
    if commands_end + delta > limit.min(slice.len()) {
        return Err(Error::DylibRewrite(format!(
            "new path needs {delta} more bytes but only {} are free",
            limit.min(slice.len()).saturating_sub(commands_end)
        )));
    }

    let tail_start = target.offset + old_size;
    slice.copy_within(tail_start..commands_end, tail_start + delta);

    let cmd_bytes = encode_dylib_command(target.cmd, needed, new_path, header.big_endian);
    slice[target.offset..target.offset + needed].copy_from_slice(&cmd_bytes);

    header.sizeofcmds += delta as u32;
    header.store_counts(slice);
    Ok(true)
}
