//! Test fixtures: a generated Chrome L3 device and an in-process license
//! server that answers challenges the way a real one does.

use std::sync::Arc;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use prost::Message;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;
use uuid::Uuid;

use crate::codec::{self, MessageType, SignedEnvelope};
use crate::device::Device;
use crate::license_protocol::license::key_container::KeyType;
use crate::license_protocol::license::KeyContainer;
use crate::license_protocol::{License, LicenseIdentification, LicenseType};
use crate::session::LicenseSession;
use crate::utils::random_bytes;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

/// System id stamped into the fixture's DRM certificate.
pub(crate) const FIXTURE_SYSTEM_ID: u32 = 4464;

pub(crate) fn fixture_device_bytes() -> Vec<u8> {
    include_bytes!("testdata/chrome_l3_2048.wvd").to_vec()
}

pub(crate) fn fixture_device() -> Arc<Device> {
    Arc::new(Device::from_bytes(&fixture_device_bytes()).expect("fixture device"))
}

/// A license produced by [`LicenseServer`] and the keys it carries.
pub(crate) struct ServerLicense {
    pub bytes: Vec<u8>,
    pub content_keys: Vec<(Uuid, Vec<u8>)>,
}

/// Answers challenges with licenses carrying `key_count` content keys and
/// one signing key, optionally prefixed by an OEMCrypto core message.
pub(crate) struct LicenseServer {
    device_key: RsaPublicKey,
    key_count: usize,
    core_message: Option<Vec<u8>>,
}

impl LicenseServer {
    pub fn new(device_key: RsaPublicKey) -> Self {
        Self {
            device_key,
            key_count: 2,
            core_message: None,
        }
    }

    pub fn with_key_count(mut self, key_count: usize) -> Self {
        self.key_count = key_count;
        self
    }

    pub fn with_core_message(mut self, core_message: Vec<u8>) -> Self {
        self.core_message = Some(core_message);
        self
    }

    /// Answer a challenge with a signed license.
    pub fn license_for(&self, challenge: &[u8]) -> ServerLicense {
        let envelope = codec::decode_envelope(challenge).expect("challenge envelope");
        let request = codec::decode_license_request(&envelope.msg).expect("license request");

        let session_key = random_bytes(16);
        let wrapped_key = self
            .device_key
            .encrypt(&mut OsRng, Oaep::new::<Sha1>(), &session_key)
            .expect("wrap session key");

        let (enc_context, mac_context) = LicenseSession::derive_context(&envelope.msg);
        let derived = LicenseSession::derive_keys(&enc_context, &mac_context, &session_key)
            .expect("derive keys");

        let mut content_keys = Vec::new();
        let mut containers = Vec::new();
        for _ in 0..self.key_count {
            let kid = Uuid::new_v4();
            let key = random_bytes(16);
            let iv = random_bytes(16);
            containers.push(KeyContainer {
                id: Some(kid.as_bytes().to_vec()),
                iv: Some(iv.clone()),
                key: Some(encrypt_key(&key, &derived.enc_key, &iv)),
                r#type: Some(KeyType::Content as i32),
                ..Default::default()
            });
            content_keys.push((kid, key));
        }

        let signing_iv = random_bytes(16);
        containers.push(KeyContainer {
            iv: Some(signing_iv.clone()),
            key: Some(encrypt_key(&random_bytes(64), &derived.enc_key, &signing_iv)),
            r#type: Some(KeyType::Signing as i32),
            ..Default::default()
        });

        let license = License {
            id: Some(LicenseIdentification {
                request_id: request.request_id().map(<[u8]>::to_vec),
                session_id: Some(random_bytes(16)),
                r#type: Some(request.license_type().unwrap_or(LicenseType::Streaming) as i32),
                ..Default::default()
            }),
            key: containers,
            license_start_time: Some(1_700_000_000),
        };
        let msg = license.encode_to_vec();

        let mut mac = Hmac::<Sha256>::new_from_slice(&derived.mac_key_server).expect("hmac key");
        if let Some(ref core_message) = self.core_message {
            mac.update(core_message);
        }
        mac.update(&msg);
        let signature = mac.finalize().into_bytes().to_vec();

        let mut response = SignedEnvelope::new(MessageType::License, msg, signature);
        response.session_key = Some(wrapped_key);
        response.oemcrypto_core_message = self.core_message.clone();

        ServerLicense {
            bytes: codec::encode_envelope(&response),
            content_keys,
        }
    }

    /// A server-side rejection.
    pub fn error_response() -> Vec<u8> {
        codec::encode_envelope(&SignedEnvelope::new(
            MessageType::ErrorResponse,
            b"license denied".to_vec(),
            Vec::new(),
        ))
    }
}

fn encrypt_key(key: &[u8], enc_key: &[u8], iv: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; key.len() + 16];
    buf[..key.len()].copy_from_slice(key);
    Aes128CbcEnc::new_from_slices(enc_key, iv)
        .expect("cbc key/iv")
        .encrypt_padded_mut::<Pkcs7>(&mut buf, key.len())
        .expect("encrypt")
        .to_vec()
}
