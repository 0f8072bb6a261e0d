//! Signing identities, CMS signature generation, and provisioning
//! profiles.

pub mod cms;
pub mod credentials;
pub mod profile;

pub use credentials::SigningCredentials;
pub use profile::ProvisioningProfile;
