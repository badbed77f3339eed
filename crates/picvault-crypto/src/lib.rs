//! Per-user field encryption for picvault documents.
//! Keys are derived from the user id with SHA-256; fields use AES-256-CBC with a
//! fresh random IV each time.

pub mod field_cipher;
pub mod key;

pub use field_cipher::{decrypt_field, encrypt_field, CipherError, FieldCipher};
pub use key::{derive_key, KeyMaterial};
