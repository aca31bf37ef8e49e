//! Admin access-path secret.

use std::fmt;
use std::fmt::Write as _;

use rand::RngCore;

/// Capability-style secret guarding the admin channel's access point.
///
/// Access control is possession of this high-entropy URL path segment —
/// obscurity-based, not a cryptographic authentication scheme. Anyone who
/// learns the path can drive the admin API. 256 bits, hex-encoded.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminSecret(String);

impl AdminSecret {
    /// Generate a fresh 256-bit secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let mut encoded = String::with_capacity(64);
        for byte in bytes {
            let _ = write!(encoded, "{byte:02x}");
        }
        Self(encoded)
    }

    /// The secret as a path segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdminSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Not redacted: the whole point is handing it to the operator.
        f.debug_tuple("AdminSecret").field(&self.0).finish()
    }
}
