//! Signing identity loading from PEM files or PKCS#12 containers.
//!
//! Apple distribution identities arrive either as a certificate + key PEM
//! pair or as a password-protected `.p12` export from Keychain Access. Both
//! load into the same [`SigningCredentials`], with the private key held as an
//! [`InMemorySigningKeyPair`] so it can drive CMS signing directly.

use p12::PFX;
use x509_certificate::{CapturedX509Certificate, InMemorySigningKeyPair};

use crate::{Error, Result};

/// A complete signing identity: certificate, private key, intermediate
/// chain, and the Apple team identifier from the certificate subject.
///
/// Holds private key material; avoid logging instances.
#[derive(Debug)]
pub struct SigningCredentials {
    /// The signing certificate.
    pub certificate: CapturedX509Certificate,
    /// Private key matching the certificate (RSA or ECDSA P-256).
    pub signing_key: InMemorySigningKeyPair,
    /// Intermediate CA certificates included in the CMS signature.
    pub cert_chain: Vec<CapturedX509Certificate>,
    /// Team identifier from the certificate's Organizational Unit.
    pub team_id: Option<String>,
}

impl SigningCredentials {
    /// Load from PEM-encoded certificate and PKCS#8 private key.
    ///
    /// Encrypted PEM keys are not supported; use PKCS#12 for
    /// password-protected material.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificate = CapturedX509Certificate::from_pem(cert_pem)
            .map_err(|e| Error::Certificate(format!("bad certificate PEM: {e}")))?;

        let mut signing_key = None;
        for block in pem::parse_many(key_pem)
            .map_err(|e| Error::Certificate(format!("bad private key PEM: {e}")))?
        {
            match block.tag() {
                "PRIVATE KEY" => {
                    signing_key = Some(
                        InMemorySigningKeyPair::from_pkcs8_der(block.contents()).map_err(|e| {
                            Error::Certificate(format!("unsupported private key: {e}"))
                        })?,
                    );
                    break;
                }
                "ENCRYPTED PRIVATE KEY" => {
                    return Err(Error::Certificate(
                        "encrypted PEM keys are not supported; use a PKCS#12 container".into(),
                    ));
                }
                _ => {}
            }
        }
        let signing_key = signing_key.ok_or_else(|| {
            Error::Certificate("no PKCS#8 PRIVATE KEY block in key file".into())
        })?;

        let team_id = extract_team_id(&certificate);
        let creds = Self {
            certificate,
            signing_key,
            cert_chain: Vec::new(),
            team_id,
        };
        creds.validate_key_pair()?;
        Ok(creds)
    }

    /// Load from a PKCS#12 container.
    ///
    /// The first certificate bag is the signing certificate; the remainder
    /// become the chain.
    pub fn from_p12(p12_data: &[u8], password: &str) -> Result<Self> {
        let pfx = PFX::parse(p12_data)
            .map_err(|e| Error::Certificate(format!("bad PKCS#12 data: {e:?}")))?;

        if !pfx.verify_mac(password) {
            return Err(Error::InvalidPassword);
        }

        let keys = pfx
            .key_bags(password)
            .map_err(|e| Error::Certificate(format!("PKCS#12 key bags: {e:?}")))?;
        let certs = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::Certificate(format!("PKCS#12 cert bags: {e:?}")))?;

        let cert_der = certs
            .first()
            .ok_or_else(|| Error::Certificate("no certificate in PKCS#12".into()))?;
        let key_der = keys
            .first()
            .ok_or_else(|| Error::Certificate("no private key in PKCS#12".into()))?;

        let certificate = CapturedX509Certificate::from_der(cert_der.clone())
            .map_err(|e| Error::Certificate(format!("bad certificate in PKCS#12: {e}")))?;
        let signing_key = InMemorySigningKeyPair::from_pkcs8_der(key_der)
            .map_err(|e| Error::Certificate(format!("unsupported private key: {e}")))?;
        let cert_chain = certs
            .iter()
            .skip(1)
            .filter_map(|der| CapturedX509Certificate::from_der(der.clone()).ok())
            .collect();

        let team_id = extract_team_id(&certificate);
        let creds = Self {
            certificate,
            signing_key,
            cert_chain,
            team_id,
        };
        creds.validate_key_pair()?;
        Ok(creds)
    }

    /// The key must belong to the certificate or every signature we emit is
    /// garbage; compare SubjectPublicKeyInfo key bytes.
    fn validate_key_pair(&self) -> Result<()> {
        use x509_certificate::Sign;

        if self.certificate.public_key_data() != self.signing_key.public_key_data() {
            return Err(Error::Certificate(
                "private key does not match the certificate's public key".into(),
            ));
        }
        Ok(())
    }
}

/// The Apple team identifier lives in the subject's first OU attribute.
fn extract_team_id(cert: &CapturedX509Certificate) -> Option<String> {
    cert.subject_name()
        .iter_organizational_unit()
        .next()
        .and_then(|atav| atav.to_string().ok())
}
