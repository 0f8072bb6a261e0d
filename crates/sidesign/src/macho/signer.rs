//! Signature construction for Mach-O slices.
//!
//! Every slice gets two CodeDirectories (SHA-1 and SHA-256), an empty
//! requirements blob, the entitlements in XML and DER form when supplied,
//! and a CMS signature carrying the Apple CDHash attributes. With no
//! credentials the result is an ad-hoc signature: CS_ADHOC flags and an
//! empty signature wrapper.

use tracing::debug;

use super::parser::{ArchSlice, MachOFile};
use super::writer;
use crate::codesign::constants::{CS_ADHOC, CS_EXECSEG_MAIN_BINARY};
use crate::codesign::superblob::{
    adhoc_signature_blob, der_entitlements_blob, empty_requirements_blob, entitlements_blob,
    signature_blob,
};
use crate::codesign::{cdhash_sha1, cdhash_sha256, der, CodeDirectoryBuilder, DigestKind, SuperBlob};
use crate::crypto::cms;
use crate::crypto::SigningCredentials;
use crate::Result;

/// Per-binary signing inputs; the digests land in CodeDirectory special
/// slots.
#[derive(Default)]
pub struct SigningInputs<'a> {
    /// CodeDirectory identifier, normally the bundle identifier.
    pub identifier: &'a str,
    /// Entitlements XML plist, for slots -5 and -7.
    pub entitlements: Option<&'a [u8]>,
    /// Raw Info.plist bytes, for slot -1.
    pub info_plist: Option<&'a [u8]>,
    /// Raw CodeResources bytes, for slot -3.
    pub code_resources: Option<&'a [u8]>,
}

/// Signature for one architecture slice, matched back to the slice by
/// index when embedding.
#[derive(Debug, Clone)]
pub struct SignedSlice {
    pub slice_index: usize,
    /// The serialized SuperBlob.
    pub signature: Vec<u8>,
}

/// Sign every slice of `macho` and return the binary with the signatures
/// embedded. `credentials: None` produces ad-hoc signatures.
pub fn sign_macho(
    macho: &MachOFile,
    inputs: &SigningInputs<'_>,
    credentials: Option<&SigningCredentials>,
) -> Result<Vec<u8>> {
    let signed = sign_slices(macho, inputs, credentials)?;
    writer::embed_signatures(macho.data(), &signed)
}

/// Build a SuperBlob for every architecture slice.
pub fn sign_slices(
    macho: &MachOFile,
    inputs: &SigningInputs<'_>,
    credentials: Option<&SigningCredentials>,
) -> Result<Vec<SignedSlice>> {
    let mut signed = Vec::with_capacity(macho.slices().len());
    for (index, slice) in macho.slices().iter().enumerate() {
        debug!(
            index,
            cpu_type = slice.cpu_type,
            executable = slice.is_executable,
            "signing slice"
        );
        let signature = sign_slice(macho.code_bytes(slice), slice, inputs, credentials)?;
        signed.push(SignedSlice {
            slice_index: index,
            signature,
        });
    }
    Ok(signed)
}

fn sign_slice(
    code: &[u8],
    slice: &ArchSlice,
    inputs: &SigningInputs<'_>,
    credentials: Option<&SigningCredentials>,
) -> Result<Vec<u8>> {
    let requirements = empty_requirements_blob();

    let ent_blob = inputs.entitlements.map(entitlements_blob);
    let der_blob = inputs
        .entitlements
        .and_then(|xml| der::plist_to_der(xml))
        .map(|der| der_entitlements_blob(&der));

    let exec_seg_flags = if slice.is_executable {
        CS_EXECSEG_MAIN_BINARY
    } else {
        0
    };

    let build_cd = |kind: DigestKind| {
        let mut builder = CodeDirectoryBuilder::new(inputs.identifier, code.to_vec())
            .requirements_hash(kind.digest(&requirements))
            .exec_seg_limit(slice.text_segment_size)
            .exec_seg_flags(exec_seg_flags);
        if credentials.is_none() {
            builder = builder.flags(CS_ADHOC);
        }
        if let Some(team) = credentials.and_then(|c| c.team_id.as_deref()) {
            builder = builder.team_id(team);
        }
        if let Some(info) = inputs.info_plist {
            builder = builder.info_hash(kind.digest(info));
        }
        if let Some(resources) = inputs.code_resources {
            builder = builder.resources_hash(kind.digest(resources));
        }
        if let Some(blob) = &ent_blob {
            builder = builder.entitlements_hash(kind.digest(blob));
        }
        if let Some(blob) = &der_blob {
            builder = builder.der_entitlements_hash(kind.digest(blob));
        }
        builder.build(kind)
    };

    let cd_sha1 = build_cd(DigestKind::Sha1);
    let cd_sha256 = build_cd(DigestKind::Sha256);

    let sig_blob = match credentials {
        Some(creds) => {
            // The CMS content is the primary (slot 0) CodeDirectory; the
            // signed attributes carry both CDHashes.
            let cms_der = cms::sign_code_directory(
                &cd_sha1,
                creds,
                &cdhash_sha1(&cd_sha1),
                &cdhash_sha256(&cd_sha256),
            )?;
            signature_blob(&cms_der)
        }
        None => adhoc_signature_blob(),
    };

    let mut superblob = SuperBlob::new()
        .code_directory_sha1(cd_sha1)
        .code_directory_sha256(cd_sha256)
        .requirements(requirements)
        .cms_signature(sig_blob);
    if let Some(blob) = ent_blob {
        superblob = superblob.entitlements(blob);
    }
    if let Some(blob) = der_blob {
        superblob = superblob.der_entitlements(blob);
    }
    Ok(superblob.build())
}
