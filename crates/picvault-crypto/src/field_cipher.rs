use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use picvault_core::records::{EncryptedField, EncryptedRecord, Record};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::key::{derive_key, KeyMaterial};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const IV_LEN: usize = 16;
const DELIMITER: char = ':';

/// Failures decoding or decrypting an [`EncryptedField`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("encrypted field has no ':' delimiter")]
    MissingDelimiter,
    #[error("invalid iv: {0}")]
    InvalidIv(String),
    #[error("ciphertext decode failed: {0}")]
    Encoding(String),
    /// Wrong key or corrupted ciphertext.
    #[error("decryption failed: bad padding")]
    Padding,
    #[error("decrypted bytes are not utf-8")]
    Utf8,
}

/// AES-256-CBC cipher for individual text fields of one user.
#[derive(Debug, Clone)]
pub struct FieldCipher {
    key: KeyMaterial,
}

impl FieldCipher {
    pub fn new(key: KeyMaterial) -> Self {
        Self { key }
    }

    pub fn for_user(user_id: &str) -> Self {
        Self::new(derive_key(user_id))
    }

    /// Encrypt under a fresh random IV; output is `hex(iv):base64(ciphertext)`.
    pub fn encrypt(&self, plaintext: &str) -> EncryptedField {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.bytes.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        EncryptedField::new(format!(
            "{}:{}",
            hex::encode(iv),
            STANDARD.encode(ciphertext)
        ))
    }

    /// Split on the first delimiter, then decrypt. Never returns partial output.
    pub fn decrypt(&self, field: &EncryptedField) -> Result<String, CipherError> {
        let (iv_hex, body) = field
            .as_str()
            .split_once(DELIMITER)
            .ok_or(CipherError::MissingDelimiter)?;

        let iv_bytes = hex::decode(iv_hex).map_err(|e| CipherError::InvalidIv(e.to_string()))?;
        let iv: [u8; IV_LEN] = iv_bytes.as_slice().try_into().map_err(|_| {
            CipherError::InvalidIv(format!("expected {IV_LEN} bytes, got {}", iv_bytes.len()))
        })?;

        let ciphertext = STANDARD
            .decode(body)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;

        let plaintext = Aes256CbcDec::new(&self.key.bytes.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Padding)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    pub fn encrypt_record(&self, record: &Record) -> EncryptedRecord {
        EncryptedRecord {
            url: self.encrypt(&record.url),
            liked: record.liked,
            tags: record.tags.iter().map(|tag| self.encrypt(tag)).collect(),
        }
    }

    /// All-or-nothing: one bad tag fails the whole record.
    pub fn decrypt_record(&self, record: &EncryptedRecord) -> Result<Record, CipherError> {
        Ok(Record {
            url: self.decrypt(&record.url)?,
            liked: record.liked,
            tags: record
                .tags
                .iter()
                .map(|tag| self.decrypt(tag))
                .collect::<Result<_, _>>()?,
        })
    }
}

pub fn encrypt_field(plaintext: &str, user_id: &str) -> EncryptedField {
    FieldCipher::for_user(user_id).encrypt(plaintext)
}

pub fn decrypt_field(field: &EncryptedField, user_id: &str) -> Result<String, CipherError> {
    FieldCipher::for_user(user_id).decrypt(field)
}
