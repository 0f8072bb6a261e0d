//! Provisioning profile handling.
//!
//! An `embedded.mobileprovision` file is a CMS envelope around an XML
//! plist. Rather than unwrapping the CMS layer we locate the plist window
//! directly, which matches how the profile is consumed: the raw bytes are
//! copied into the bundle verbatim and only the `Entitlements` dictionary
//! is pulled out for signing.

use std::path::Path;

use crate::{Error, Result};

/// A loaded provisioning profile: the raw file plus its entitlements,
/// re-serialized as standalone XML.
#[derive(Debug)]
pub struct ProvisioningProfile {
    raw: Vec<u8>,
    entitlements_xml: Vec<u8>,
}

impl ProvisioningProfile {
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let plist_data = plist_window(&raw)?;
        let parsed: plist::Value = plist::from_bytes(plist_data)?;
        let entitlements = parsed
            .as_dictionary()
            .and_then(|d| d.get("Entitlements"))
            .ok_or_else(|| {
                Error::ProvisioningProfile("profile has no Entitlements dictionary".into())
            })?;

        let mut entitlements_xml = Vec::new();
        plist::to_writer_xml(&mut entitlements_xml, entitlements)?;
        Ok(Self {
            raw,
            entitlements_xml,
        })
    }

    /// The original file bytes, written into bundles as
    /// `embedded.mobileprovision`.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The profile's entitlements as an XML plist document.
    pub fn entitlements_xml(&self) -> &[u8] {
        &self.entitlements_xml
    }
}

/// Locate the XML plist inside the CMS envelope by scanning for the
/// document markers.
fn plist_window(data: &[u8]) -> Result<&[u8]> {
    const START: &[u8] = b"<?xml";
    const END: &[u8] = b"</plist>";

    let start = find(data, START)
        .ok_or_else(|| Error::ProvisioningProfile("no plist found in profile".into()))?;
    let end = find(&data[start..], END)
        .ok_or_else(|| Error::ProvisioningProfile("unterminated plist in profile".into()))?;
    Ok(&data[start..start + end + END.len()])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile(wrap: bool) -> Vec<u8> {
        let plist = br#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Name</key>
    <string>Test Profile</string>
    <key>TeamIdentifier</key>
    <array><string>ABCDE12345</string></array>
    <key>Entitlements</key>
    <dict>
        <key>application-identifier</key>
        <string>ABCDE12345.com.example.app</string>
        <key>get-task-allow</key>
        <true/>
    </dict>
</dict>
</plist>"#;

        if wrap {
            let mut data = vec![0x30, 0x82, 0xff, 0xfe, 0x06, 0x09];
            data.extend_from_slice(plist);
            data.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
            data
        } else {
            plist.to_vec()
        }
    }

    #[test]
    fn extracts_entitlements_from_wrapped_profile() {
        let profile = ProvisioningProfile::from_bytes(sample_profile(true)).unwrap();
        let parsed: plist::Value = plist::from_bytes(profile.entitlements_xml()).unwrap();
        let dict = parsed.as_dictionary().unwrap();
        assert_eq!(
            dict.get("application-identifier").unwrap().as_string(),
            Some("ABCDE12345.com.example.app")
        );
        assert_eq!(dict.get("get-task-allow").unwrap().as_boolean(), Some(true));
    }

    #[test]
    fn bare_plist_works_too() {
        let profile = ProvisioningProfile::from_bytes(sample_profile(false)).unwrap();
        assert!(!profile.entitlements_xml().is_empty());
    }

    #[test]
    fn raw_bytes_preserved() {
        let data = sample_profile(true);
        let profile = ProvisioningProfile::from_bytes(data.clone()).unwrap();
        assert_eq!(profile.raw(), data.as_slice());
    }

    #[test]
    fn rejects_data_without_plist() {
        let err = ProvisioningProfile::from_bytes(vec![0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::ProvisioningProfile(_)));
    }

    #[test]
    fn rejects_unterminated_plist() {
        let err = ProvisioningProfile::from_bytes(b"junk<?xml version no end".to_vec()).unwrap_err();
        assert!(matches!(err, Error::ProvisioningProfile(_)));
    }

    #[test]
    fn rejects_profile_without_entitlements() {
        let data = br#"<?xml version="1.0"?><plist version="1.0"><dict><key>Name</key><string>x</string></dict></plist>"#;
        let err = ProvisioningProfile::from_bytes(data.to_vec()).unwrap_err();
        assert!(matches!(err, Error::ProvisioningProfile(_)));
    }
}
