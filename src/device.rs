//! Device module for handling Widevine Device (.wvd) files.
//!
//! The device file contains the RSA private key and the ClientIdentification
//! blob sent with every license request. The blob is kept byte-exact; it is
//! only decoded (best-effort) to report the system id and client info.
//! v1 files carried VMP data separately, it is kept alongside the blob.

use std::fmt;
use std::path::Path;

use prost::Message;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{Error, Result};
use crate::license_protocol::{ClientIdentification, DrmCertificate, SignedDrmCertificate};

/// Magic bytes for WVD files.
const WVD_MAGIC: &[u8; 3] = b"WVD";

/// Current supported WVD version.
const WVD_VERSION: u8 = 2;

/// Device types supported by Widevine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceType {
    /// Chrome CDM device.
    Chrome = 1,
    /// Android CDM device.
    Android = 2,
}

impl TryFrom<u8> for DeviceType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DeviceType::Chrome),
            2 => Ok(DeviceType::Android),
            _ => Err(Error::FormatError(format!("Invalid device type: {}", value))),
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(device_type: DeviceType) -> Self {
        device_type as u8
    }
}

/// Widevine device identity: signing key plus client identification blob.
///
/// Immutable once loaded. Sessions share it through `Arc<Device>`.
pub struct Device {
    pub device_type: DeviceType,
    /// Security level (1-3, where 1 is highest).
    pub security_level: u8,
    /// Device flags (reserved).
    pub flags: u8,
    private_key: RsaPrivateKey,
    client_id: Vec<u8>,
    /// VMP data from a v1 file.
    pub vmp: Option<Vec<u8>>,
    /// System id from the DRM certificate, when the blob carries one.
    pub system_id: Option<u32>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device_type", &self.device_type)
            .field("security_level", &self.security_level)
            .field("flags", &self.flags)
            .field("key_bits", &(self.private_key.size() * 8))
            .field("client_id_len", &self.client_id.len())
            .field("system_id", &self.system_id)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Create a Device from components.
    pub fn new(
        device_type: DeviceType,
        security_level: u8,
        flags: u8,
        private_key: RsaPrivateKey,
        client_id: Vec<u8>,
    ) -> Self {
        let system_id = extract_system_id(&client_id);
        if system_id.is_none() {
            debug!("client id carries no DRM certificate system id");
        }

        Self {
            device_type,
            security_level,
            flags,
            private_key,
            client_id,
            vmp: None,
            system_id,
        }
    }

    /// Load a Device from a WVD file path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Alias of [`Device::from_bytes`].
    pub fn load(data: &[u8]) -> Result<Self> {
        Self::from_bytes(data)
    }

    /// Load a Device from raw WVD bytes (v1 or v2).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(Error::FormatError("Data too short".to_string()));
        }

        if &data[0..3] != WVD_MAGIC {
            return Err(Error::FormatError("Invalid magic bytes".to_string()));
        }

        let version = data[3];
        if version != WVD_VERSION && version != 1 {
            return Err(Error::FormatError(format!("Unsupported version: {}", version)));
        }

        let device_type = DeviceType::try_from(data[4])?;
        let security_level = data[5];
        let flags = data[6];

        let mut reader = FieldReader::new(data, 7);

        let private_key_der = reader.read_u16_prefixed("private key")?;
        let private_key = RsaPrivateKey::from_pkcs8_der(private_key_der)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(private_key_der))
            .map_err(|e| Error::FormatError(format!("Failed to parse RSA key: {}", e)))?;
        private_key
            .validate()
            .map_err(|e| Error::FormatError(format!("Invalid RSA key: {}", e)))?;

        let client_id = reader.read_u16_prefixed("client ID")?.to_vec();

        let vmp = if version == 1 {
            let vmp = reader.read_u16_prefixed("VMP")?;
            (!vmp.is_empty()).then(|| vmp.to_vec())
        } else {
            None
        };

        let mut device = Self::new(device_type, security_level, flags, private_key, client_id);
        device.vmp = vmp;
        debug!(
            "loaded WVD v{} device: {:?} L{} ({} bit key)",
            version,
            device.device_type,
            device.security_level,
            device.private_key.size() * 8
        );
        Ok(device)
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    /// The serialized ClientIdentification blob.
    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    /// Android devices use the OEMCrypto request id form.
    pub fn is_device_type_restricted(&self) -> bool {
        self.device_type == DeviceType::Android
    }

    /// Client info name/value pairs, if the blob decodes.
    pub fn client_info(&self) -> Vec<(String, String)> {
        ClientIdentification::decode(self.client_id.as_slice())
            .map(|client_id| {
                client_id
                    .client_info
                    .into_iter()
                    .map(|nv| (nv.name.unwrap_or_default(), nv.value.unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn extract_system_id(client_id: &[u8]) -> Option<u32> {
    let client_id = ClientIdentification::decode(client_id).ok()?;
    let signed = SignedDrmCertificate::decode(client_id.token?.as_slice()).ok()?;
    let cert = DrmCertificate::decode(signed.drm_certificate?.as_slice()).ok()?;
    cert.system_id
}

/// Cursor over u16-BE length-prefixed fields.
struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    fn read_u16_prefixed(&mut self, name: &str) -> Result<&'a [u8]> {
        let len_bytes = self
            .data
            .get(self.offset..self.offset + 2)
            .ok_or_else(|| Error::FormatError(format!("Data too short for {} length", name)))?;
        let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
        self.offset += 2;

        let field = self
            .data
            .get(self.offset..self.offset + len)
            .ok_or_else(|| Error::FormatError(format!("Data too short for {}", name)))?;
        self.offset += len;
        Ok(field)
    }
}
