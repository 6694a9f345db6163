//! Key module for handling decrypted content keys.
//!
//! Keys are unwrapped from License key containers using AES-128-CBC with the
//! encryption key derived for the owning session.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::license_protocol::license::key_container::KeyType;
use crate::license_protocol::license::KeyContainer;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// A decrypted content key.
///
/// Key type names use the license protocol enum string values (e.g. CONTENT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Key {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(with = "uuid::serde::simple")]
    pub kid: Uuid,
    #[serde(rename = "k", with = "hex::serde")]
    pub key: Vec<u8>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl Key {
    pub fn new(key_type: String, kid: Uuid, key: Vec<u8>, permissions: Vec<String>) -> Self {
        Self {
            key_type,
            kid,
            key,
            permissions,
        }
    }

    pub fn is_content(&self) -> bool {
        self.key_type == KeyType::Content.as_str_name()
    }

    /// Unwrap a Key from a KeyContainer.
    ///
    /// Missing fields are a decode error; a wrong key/IV size or bad padding
    /// is an integrity failure.
    pub fn from_key_container(container: &KeyContainer, enc_key: &[u8]) -> Result<Self> {
        let key_type = container
            .r#type
            .map(|v| {
                KeyType::try_from(v)
                    .map_err(|_| Error::DecodeError(format!("Unknown key type {}", v)))
            })
            .transpose()?
            .unwrap_or(KeyType::Content);

        let mut permissions = Vec::new();
        if key_type == KeyType::OperatorSession {
            if let Some(ref perms) = container.operator_session_key_permissions {
                for (allowed, name) in [
                    (perms.allow_encrypt, "allow_encrypt"),
                    (perms.allow_decrypt, "allow_decrypt"),
                    (perms.allow_sign, "allow_sign"),
                    (perms.allow_signature_verify, "allow_signature_verify"),
                ] {
                    if allowed.unwrap_or(false) {
                        permissions.push(name.to_string());
                    }
                }
            }
        }

        let kid = Self::kid_to_uuid(container.id.as_deref().unwrap_or_default());

        let key_bytes = container
            .key
            .as_ref()
            .ok_or_else(|| Error::DecodeError("Key container missing key".to_string()))?;
        let iv_bytes = container
            .iv
            .as_ref()
            .ok_or_else(|| Error::DecodeError("Key container missing IV".to_string()))?;

        let key = Self::decrypt_key(key_bytes, iv_bytes, enc_key)?;
        Ok(Self::new(key_type.as_str_name().to_string(), kid, key, permissions))
    }

    fn decrypt_key(encrypted_key: &[u8], iv: &[u8], enc_key: &[u8]) -> Result<Vec<u8>> {
        let decryptor = Aes128CbcDec::new_from_slices(enc_key, iv).map_err(|_| {
            Error::IntegrityError(format!(
                "Invalid key/IV length ({}/{})",
                enc_key.len(),
                iv.len()
            ))
        })?;

        let mut buffer = encrypted_key.to_vec();
        let decrypted = decryptor
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|_| Error::IntegrityError("Bad padding on key container".to_string()))?;
        Ok(decrypted.to_vec())
    }

    /// Convert a Key ID to a UUID.
    ///
    /// - 16 bytes: direct UUID bytes
    /// - 32 bytes: hex-encoded UUID string
    /// - Decimal ASCII bytes: parsed as integer
    /// - Other lengths: zero padded or truncated to 16 bytes
    pub fn kid_to_uuid(kid: &[u8]) -> Uuid {
        if kid.is_empty() {
            return Uuid::nil();
        }

        if let Ok(s) = std::str::from_utf8(kid) {
            if s.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(n) = s.parse::<u128>() {
                    return Uuid::from_u128(n);
                }
            }
            if kid.len() == 32 {
                if let Ok(uuid) = Uuid::parse_str(s) {
                    return uuid;
                }
            }
        }

        let mut buf = [0u8; 16];
        let len = kid.len().min(16);
        buf[..len].copy_from_slice(&kid[..len]);
        Uuid::from_bytes(buf)
    }
}
