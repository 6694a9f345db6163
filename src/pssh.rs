//! PSSH parsing utilities and the content identifier derived from them.
//!
//! The license engine keys everything on the Widevine PSSH data carried in a
//! challenge. Its canonical textual form is the base64 of a version 0
//! Widevine PSSH box wrapping that data, which is what external logs store.
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use byteorder::{BigEndian, ByteOrder};
use prost::Message;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::license_protocol::WidevinePsshData;

/// Widevine system UUID.
pub const WIDEVINE_SYSTEM_ID: Uuid = Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed);

/// Opaque identifier of the protected content (Widevine PSSH data).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdentifier(Vec<u8>);

impl ContentIdentifier {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wrap the identifier in a v0 Widevine PSSH box.
    pub fn to_pssh(&self) -> Pssh {
        Pssh {
            version: 0,
            flags: 0,
            system_id: WIDEVINE_SYSTEM_ID,
            key_ids: Vec::new(),
            init_data: self.0.clone(),
        }
    }

    /// Base64 of the identifier wrapped in a PSSH box.
    pub fn to_pssh_base64(&self) -> String {
        self.to_pssh().to_base64()
    }

    /// Base64 of the raw identifier bytes.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }
}

impl From<Vec<u8>> for ContentIdentifier {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pssh_base64())
    }
}

/// Parsed PSSH box or Widevine init data wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pssh {
    pub version: u8,
    pub flags: u32,
    pub system_id: Uuid,
    key_ids: Vec<Uuid>,
    pub init_data: Vec<u8>,
}

impl Pssh {
    /// Parse a PSSH box, or wrap bare init data as a v0 Widevine box.
    ///
    /// Empty input is rejected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::DecodeError("PSSH data must not be empty".to_string()));
        }

        if let Ok(pssh) = parse_pssh_box(data) {
            return Ok(pssh);
        }

        Ok(ContentIdentifier::new(data).to_pssh())
    }

    /// Parse a strict PSSH box; bare init data is rejected.
    pub fn from_box(data: &[u8]) -> Result<Self> {
        parse_pssh_box(data)
    }

    /// Parse a PSSH box or init data from base64.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD.decode(data_b64.trim())?;
        Self::from_bytes(&data)
    }

    /// Serialize as a full PSSH box.
    pub fn to_bytes(&self) -> Vec<u8> {
        build_pssh_box(self)
    }

    /// Serialize as a base64 PSSH box.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }

    /// The content identifier carried by this box.
    pub fn content_id(&self) -> ContentIdentifier {
        ContentIdentifier::new(self.init_data.clone())
    }

    /// Extract KIDs from a v1 box header or the Widevine CENC header.
    pub fn key_ids(&self) -> Result<Vec<Uuid>> {
        if self.version == 1 && !self.key_ids.is_empty() {
            return Ok(self.key_ids.clone());
        }

        if self.system_id != WIDEVINE_SYSTEM_ID {
            return Err(Error::DecodeError(format!(
                "Unsupported system ID for key ids: {}",
                self.system_id
            )));
        }

        let pssh_data = WidevinePsshData::decode(self.init_data.as_slice())
            .map_err(|e| Error::DecodeError(format!("Failed to parse WidevinePsshData: {}", e)))?;
        Ok(pssh_data.key_ids.iter().map(|id| parse_key_id_bytes(id)).collect())
    }
}

impl FromStr for Pssh {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pssh::from_base64(s)
    }
}

fn parse_pssh_box(data: &[u8]) -> Result<Pssh> {
    if data.len() < 8 {
        return Err(Error::DecodeError("PSSH box too short".to_string()));
    }

    let size = BigEndian::read_u32(&data[0..4]) as usize;
    if &data[4..8] != b"pssh" {
        return Err(Error::DecodeError("Not a PSSH box".to_string()));
    }
    let mut offset = 8;

    let end = match size {
        0 => data.len(),
        1 => {
            if data.len() < 16 {
                return Err(Error::DecodeError("PSSH box too short".to_string()));
            }
            offset += 8;
            BigEndian::read_u64(&data[8..16]) as usize
        }
        n => n,
    };
    if end > data.len() {
        return Err(Error::DecodeError("PSSH size exceeds data length".to_string()));
    }
    let data = &data[..end];

    if data.len() < offset + 4 + 16 {
        return Err(Error::DecodeError("PSSH header incomplete".to_string()));
    }
    let version = data[offset];
    let flags = BigEndian::read_u24(&data[offset + 1..offset + 4]);
    offset += 4;

    let system_id = Uuid::from_slice(&data[offset..offset + 16])
        .map_err(|_| Error::DecodeError("Invalid system ID".to_string()))?;
    offset += 16;

    let mut key_ids = Vec::new();
    if version == 1 {
        if data.len() < offset + 4 {
            return Err(Error::DecodeError("Missing KID count".to_string()));
        }
        let kid_count = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
        offset += 4;

        let required = kid_count
            .checked_mul(16)
            .and_then(|n| n.checked_add(offset))
            .filter(|&n| n <= data.len())
            .ok_or_else(|| Error::DecodeError("Missing KIDs".to_string()))?;
        for chunk in data[offset..required].chunks_exact(16) {
            key_ids.push(Uuid::from_slice(chunk).unwrap_or_else(|_| Uuid::nil()));
        }
        offset = required;
    } else if version != 0 {
        return Err(Error::DecodeError(format!("Invalid PSSH version: {}", version)));
    }

    if data.len() < offset + 4 {
        return Err(Error::DecodeError("Missing init data length".to_string()));
    }
    let data_size = BigEndian::read_u32(&data[offset..offset + 4]) as usize;
    offset += 4;
    if data.len() - offset < data_size {
        return Err(Error::DecodeError("Missing init data".to_string()));
    }

    Ok(Pssh {
        version,
        flags,
        system_id,
        key_ids,
        init_data: data[offset..offset + data_size].to_vec(),
    })
}

fn build_pssh_box(pssh: &Pssh) -> Vec<u8> {
    let mut body = Vec::new();
    body.push(pssh.version);
    body.extend_from_slice(&pssh.flags.to_be_bytes()[1..]);
    body.extend_from_slice(pssh.system_id.as_bytes());

    if pssh.version == 1 {
        body.extend_from_slice(&(pssh.key_ids.len() as u32).to_be_bytes());
        for kid in pssh.key_ids.iter() {
            body.extend_from_slice(kid.as_bytes());
        }
    }

    body.extend_from_slice(&(pssh.init_data.len() as u32).to_be_bytes());
    body.extend_from_slice(&pssh.init_data);

    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(b"pssh");
    out.extend_from_slice(&body);
    out
}

fn parse_key_id_bytes(key_id: &[u8]) -> Uuid {
    if key_id.len() == 16 {
        return Uuid::from_slice(key_id).unwrap_or_else(|_| Uuid::nil());
    }

    if key_id.len() == 32 {
        if let Some(uuid) = std::str::from_utf8(key_id)
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            return uuid;
        }
    }

    let mut buf = [0u8; 16];
    if key_id.len() >= 16 {
        buf.copy_from_slice(&key_id[key_id.len() - 16..]);
    } else {
        buf[16 - key_id.len()..].copy_from_slice(key_id);
    }
    Uuid::from_bytes(buf)
}
