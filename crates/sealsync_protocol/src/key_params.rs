//! Account key-derivation parameters.

use serde::{Deserialize, Serialize};

/// Envelope and key protocol version.
pub const PROTOCOL_VERSION: &str = "004";

/// Parameters needed to re-derive an account's root key from its password.
///
/// Contains no secret material and is stored in clear text next to exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyParams {
    /// Account identifier, usually an email address.
    pub identifier: String,
    /// Random nonce mixed into the derivation salt.
    pub pw_nonce: String,
    /// Protocol version.
    pub version: String,
    /// What caused these parameters to be created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origination: Option<String>,
    /// Creation time in milliseconds, as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl KeyParams {
    /// Creates parameters for the current protocol version.
    pub fn new(identifier: impl Into<String>, pw_nonce: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            pw_nonce: pw_nonce.into(),
            version: PROTOCOL_VERSION.to_string(),
            origination: None,
            created: None,
        }
    }

    /// Sets the origination tag.
    pub fn with_origination(mut self, origination: impl Into<String>) -> Self {
        self.origination = Some(origination.into());
        self
    }

    /// Returns true if the version is the one this client speaks.
    pub fn is_supported(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}
