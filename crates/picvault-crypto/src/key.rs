use std::fmt;

use sha2::{Digest, Sha256};

/// 256-bit symmetric key bound to one user id.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub bytes: [u8; 32],
}

// Never print key bytes.
impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// Derive the key for a user: SHA-256 of the UTF-8 id, unsalted.
/// The same id always yields the same key; there is no stored key to rotate.
pub fn derive_key(user_id: &str) -> KeyMaterial {
    KeyMaterial {
        bytes: Sha256::digest(user_id.as_bytes()).into(),
    }
}
