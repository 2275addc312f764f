// Authentication strategies for Aperture
// Turns an identity's credential into the header it travels in

use crate::identity::{Credential, CredentialKind};

pub trait AuthStrategy {
    /// Header name and value carrying this credential.
    fn auth_header(&self, default_header_name: &str) -> (String, String);
}

impl AuthStrategy for Credential {
    fn auth_header(&self, default_header_name: &str) -> (String, String) {
        match self.kind {
            CredentialKind::Header => {
                let name = self
                    .header_name
                    .as_deref()
                    .unwrap_or(default_header_name);
                (name.to_string(), self.value.clone())
            }
            CredentialKind::Cookie => ("Cookie".to_string(), self.value.clone()),
        }
    }
}
