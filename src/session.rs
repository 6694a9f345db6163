//! License session state machine.
//!
//! A session builds one signed license request for a content identifier and
//! later consumes the matching license. The derivation context computed from
//! the signed request bytes must survive between the two calls, which is why
//! this is a stateful object rather than a pair of functions.
//!
//! States move `Built -> AwaitingResponse -> Completed | Failed`, never
//! backwards. `Failed` is absorbing.

use std::sync::Arc;

use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use rsa::rand_core::OsRng;
use rsa::{Oaep, Pss};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::codec::{self, ContentIdFields, LicenseRequestFields, MessageType, SignedEnvelope};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::license_protocol::license_request::RequestType;
use crate::license_protocol::{LicenseType, ProtocolVersion};
use crate::pssh::ContentIdentifier;
use crate::utils::{random_bytes, random_u32, unix_timestamp};

type HmacSha256 = Hmac<Sha256>;
type CmacAes128 = Cmac<Aes128>;

/// Lifecycle state of a [`LicenseSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Built,
    AwaitingResponse,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Encryption and authentication contexts derived from the signed request.
#[derive(Debug, Clone)]
struct DerivationContext {
    enc: Vec<u8>,
    mac: Vec<u8>,
}

/// Keys derived from the server's session key.
#[derive(Debug, Clone)]
pub struct DerivedKeys {
    pub enc_key: Vec<u8>,
    pub mac_key_server: Vec<u8>,
}

/// One in-flight license transaction.
#[derive(Debug)]
pub struct LicenseSession {
    id: Vec<u8>,
    number: u32,
    content_id: ContentIdentifier,
    device: Arc<Device>,
    request_id: Option<Vec<u8>>,
    context: Option<DerivationContext>,
    keys: Vec<Key>,
    state: SessionState,
}

impl LicenseSession {
    /// Create a session in the `Built` state.
    ///
    /// `number` is the 1-based session counter used by the Android request id
    /// form.
    pub fn new(device: Arc<Device>, content_id: ContentIdentifier, number: u32) -> Self {
        Self {
            id: random_bytes(16),
            number,
            content_id,
            device,
            request_id: None,
            context: None,
            keys: Vec::new(),
            state: SessionState::Built,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn content_id(&self) -> &ContentIdentifier {
        &self.content_id
    }

    pub fn request_id(&self) -> Option<&[u8]> {
        self.request_id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Keys recovered by a completed session.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Build and sign the license request.
    ///
    /// Returns the challenge bytes and the request id the server will echo.
    /// The PSS signature is randomized, so two challenges for identical
    /// inputs differ.
    pub fn create_license_request(
        &mut self,
        license_type: LicenseType,
        device_type_restricted: bool,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        self.expect_state(SessionState::Built)?;
        if self.content_id.is_empty() {
            return Err(Error::InvalidContentIdentifier);
        }

        let request_id = if device_type_restricted {
            self.counter_request_id()
        } else {
            random_bytes(16)
        };

        let request = LicenseRequestFields {
            client_id: Some(self.device.client_id().to_vec()),
            content_id: Some(ContentIdFields::WidevinePsshData {
                pssh_data: vec![self.content_id.as_bytes().to_vec()],
                license_type: Some(license_type),
                request_id: Some(request_id.clone()),
            }),
            request_type: Some(RequestType::New),
            request_time: Some(unix_timestamp()),
            protocol_version: Some(ProtocolVersion::Version21),
            key_control_nonce: Some(random_u32()),
        };
        let msg = codec::encode_license_request(&request);

        let signature = sign_pss_sha1(&self.device, &msg)?;
        let context = Self::derive_context(&msg);
        let challenge = codec::encode_envelope(&SignedEnvelope::new(
            MessageType::LicenseRequest,
            msg,
            signature,
        ));

        self.context = Some(DerivationContext {
            enc: context.0,
            mac: context.1,
        });
        self.request_id = Some(request_id.clone());
        self.state = SessionState::AwaitingResponse;
        debug!(
            "session {} built {} request {}",
            hex::encode(&self.id),
            license_type.as_str_name(),
            hex::encode(&request_id)
        );

        Ok((challenge, request_id))
    }

    /// Verify the license response and unwrap its keys.
    ///
    /// Any failure moves the session to `Failed`; partial keys are never
    /// returned. A license without a content key is `NoKeysLoaded`.
    pub fn parse_license(&mut self, response: &[u8]) -> Result<Vec<Key>> {
        self.expect_state(SessionState::AwaitingResponse)?;

        match self.load_license(response) {
            Ok(keys) => {
                info!(
                    "session {} recovered {} key(s)",
                    hex::encode(&self.id),
                    keys.len()
                );
                self.keys = keys.clone();
                self.state = SessionState::Completed;
                self.context = None;
                Ok(keys)
            }
            Err(e) => {
                warn!("session {} failed: {}", hex::encode(&self.id), e);
                self.fail();
                Err(e)
            }
        }
    }

    /// Cancel the session. Terminal sessions are left untouched.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Failed;
            self.context = None;
        }
    }

    fn load_license(&self, response: &[u8]) -> Result<Vec<Key>> {
        let envelope = codec::decode_envelope(response)?;
        if envelope.message_type != MessageType::License {
            return Err(Error::UnexpectedMessageType {
                expected: MessageType::License,
                found: envelope.message_type,
            });
        }

        let license = codec::decode_license(&envelope.msg)?;

        let expected = self.request_id.as_deref().unwrap_or_default();
        let found = license.request_id.as_deref().unwrap_or_default();
        if expected != found {
            return Err(Error::RequestIdMismatch {
                expected: expected.to_vec(),
                found: found.to_vec(),
            });
        }

        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::InvalidState {
                expected: SessionState::AwaitingResponse,
                found: self.state,
            })?;

        let wrapped_key = envelope
            .session_key
            .as_ref()
            .ok_or_else(|| Error::DecodeError("License missing session key".to_string()))?;
        let session_key = self
            .device
            .private_key()
            .decrypt(Oaep::new::<Sha1>(), wrapped_key)
            .map_err(|e| Error::IntegrityError(format!("Failed to unwrap session key: {}", e)))?;

        let derived = Self::derive_keys(&context.enc, &context.mac, &session_key)?;

        let mut mac = HmacSha256::new_from_slice(&derived.mac_key_server)
            .map_err(|e| Error::IntegrityError(format!("Invalid HMAC key: {}", e)))?;
        if let Some(ref core) = envelope.oemcrypto_core_message {
            mac.update(core);
        }
        mac.update(&envelope.msg);
        mac.verify_slice(&envelope.signature)
            .map_err(|_| Error::IntegrityError("Signature mismatch on license message".to_string()))?;

        let keys = license
            .key_containers
            .iter()
            .map(|container| Key::from_key_container(container, &derived.enc_key))
            .collect::<Result<Vec<_>>>()?;

        if !keys.iter().any(Key::is_content) {
            return Err(Error::NoKeysLoaded);
        }
        Ok(keys)
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state != expected {
            return Err(Error::InvalidState {
                expected,
                found: self.state,
            });
        }
        Ok(())
    }

    /// OEMCrypto style request id: 4 random bytes, 4 zero bytes and the
    /// little-endian session number, hex encoded.
    fn counter_request_id(&self) -> Vec<u8> {
        let mut req = [0u8; 16];
        req[..4].copy_from_slice(&random_bytes(4));
        req[8..].copy_from_slice(&u64::from(self.number).to_le_bytes());
        hex::encode_upper(req).into_bytes()
    }

    /// Derive encryption and MAC context from a signed request.
    #[must_use]
    pub fn derive_context(message: &[u8]) -> (Vec<u8>, Vec<u8>) {
        fn context(label: &[u8], msg: &[u8], key_bits: u32) -> Vec<u8> {
            let mut out = Vec::with_capacity(label.len() + 1 + msg.len() + 4);
            out.extend_from_slice(label);
            out.push(0);
            out.extend_from_slice(msg);
            out.extend_from_slice(&key_bits.to_be_bytes());
            out
        }

        (
            context(b"ENCRYPTION", message, 128),
            context(b"AUTHENTICATION", message, 512),
        )
    }

    /// Derive the content encryption key and the server MAC key with AES-CMAC
    /// over the contexts.
    pub fn derive_keys(enc_context: &[u8], mac_context: &[u8], key: &[u8]) -> Result<DerivedKeys> {
        let derive = |context: &[u8], counter: u8| -> Result<Vec<u8>> {
            let mut mac = CmacAes128::new_from_slice(key)
                .map_err(|_| Error::IntegrityError(format!("Invalid session key length {}", key.len())))?;
            mac.update(&[counter]);
            mac.update(context);
            Ok(mac.finalize().into_bytes().to_vec())
        };

        let enc_key = derive(enc_context, 1)?;
        let mut mac_key_server = derive(mac_context, 1)?;
        mac_key_server.extend_from_slice(&derive(mac_context, 2)?);
        Ok(DerivedKeys {
            enc_key,
            mac_key_server,
        })
    }
}

fn sign_pss_sha1(device: &Device, message: &[u8]) -> Result<Vec<u8>> {
    let hash = Sha1::digest(message);
    let mut rng = OsRng;
    let signature = device
        .private_key()
        .sign_with_rng(&mut rng, Pss::new::<Sha1>(), &hash)?;
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rsa::Pss;
    use sha1::{Digest, Sha1};

    use super::{LicenseSession, SessionState};
    use crate::codec::{self, MessageType};
    use crate::device::{Device, DeviceType};
    use crate::error::Error;
    use crate::license_protocol::LicenseType;
    use crate::pssh::ContentIdentifier;
    use crate::testing::{fixture_device, fixture_device_bytes, LicenseServer};

    fn new_session() -> LicenseSession {
        LicenseSession::new(fixture_device(), ContentIdentifier::new(b"pssh".to_vec()), 1)
    }

    #[test]
    fn derive_context_contains_labels() {
        let message = b"test-message";
        let (enc, mac) = LicenseSession::derive_context(message);

        assert!(enc.starts_with(b"ENCRYPTION\0test-message"));
        assert!(mac.starts_with(b"AUTHENTICATION\0test-message"));
        assert!(enc.ends_with(&128u32.to_be_bytes()));
        assert!(mac.ends_with(&512u32.to_be_bytes()));
    }

    #[test]
    fn derive_keys_lengths() {
        let (enc_ctx, mac_ctx) = LicenseSession::derive_context(b"context");
        let keys = LicenseSession::derive_keys(&enc_ctx, &mac_ctx, &[0u8; 16]).expect("derive");

        assert_eq!(keys.enc_key.len(), 16);
        assert_eq!(keys.mac_key_server.len(), 32);
    }

    #[test]
    fn derive_keys_rejects_bad_session_key() {
        let (enc_ctx, mac_ctx) = LicenseSession::derive_context(b"context");
        assert!(matches!(
            LicenseSession::derive_keys(&enc_ctx, &mac_ctx, &[0u8; 5]),
            Err(Error::IntegrityError(_))
        ));
    }

    #[test]
    fn challenge_is_signed_license_request() {
        let mut session = new_session();
        let (challenge, request_id) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        assert_eq!(request_id.len(), 16);
        assert_eq!(session.state(), SessionState::AwaitingResponse);
        assert_eq!(session.request_id(), Some(request_id.as_slice()));

        let envelope = codec::decode_envelope(&challenge).expect("envelope");
        assert_eq!(envelope.message_type, MessageType::LicenseRequest);
        let request = codec::decode_license_request(&envelope.msg).expect("request");
        assert_eq!(request.request_id(), Some(request_id.as_slice()));
        assert_eq!(request.license_type(), Some(LicenseType::Streaming));
        assert_eq!(request.content_identifier(), Some(session.content_id().clone()));
        assert_eq!(request.client_id.as_deref(), Some(fixture_device().client_id()));

        let hash = Sha1::digest(&envelope.msg);
        fixture_device()
            .public_key()
            .verify(Pss::new::<Sha1>(), &hash, &envelope.signature)
            .expect("valid PSS signature");
    }

    #[test]
    fn android_request_id_uses_counter_form() {
        let mut bytes = fixture_device_bytes();
        bytes[4] = DeviceType::Android.into();
        let device = Arc::new(Device::from_bytes(&bytes).expect("device"));
        let mut session = LicenseSession::new(device, ContentIdentifier::new(b"pssh".to_vec()), 3);

        let (_, request_id) = session
            .create_license_request(LicenseType::Streaming, true)
            .expect("challenge");
        assert_eq!(request_id.len(), 32);
        let raw = hex::decode(&request_id).expect("hex request id");
        assert_eq!(&raw[4..8], &[0, 0, 0, 0]);
        assert_eq!(&raw[8..], &3u64.to_le_bytes());
    }

    #[test]
    fn empty_content_id_keeps_session_built() {
        let mut session = LicenseSession::new(fixture_device(), ContentIdentifier::new(Vec::new()), 1);
        let err = session
            .create_license_request(LicenseType::Streaming, false)
            .expect_err("empty content id");
        assert!(matches!(err, Error::InvalidContentIdentifier));
        assert_eq!(session.state(), SessionState::Built);
        assert!(session.request_id().is_none());
    }

    #[test]
    fn second_challenge_is_rejected() {
        let mut session = new_session();
        session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");
        let err = session
            .create_license_request(LicenseType::Streaming, false)
            .expect_err("already built");
        assert!(matches!(err, Error::InvalidState { .. }));
        assert_eq!(session.state(), SessionState::AwaitingResponse);
    }

    #[test]
    fn matching_license_completes_session() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key());
        let response = server.license_for(&challenge);
        let keys = session.parse_license(&response.bytes).expect("keys");

        let content: Vec<_> = keys.iter().filter(|key| key.is_content()).collect();
        assert_eq!(content.len(), response.content_keys.len());
        for (key, (kid, bytes)) in content.iter().zip(response.content_keys.iter()) {
            assert_eq!(&key.kid, kid);
            assert_eq!(&key.key, bytes);
        }
        assert!(keys.iter().any(|key| key.key_type == "SIGNING"));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.keys(), keys.as_slice());
    }

    #[test]
    fn error_response_fails_session() {
        let mut session = new_session();
        session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let err = session
            .parse_license(&LicenseServer::error_response())
            .expect_err("error response");
        assert!(matches!(
            err,
            Error::UnexpectedMessageType {
                found: MessageType::ErrorResponse,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn foreign_request_id_is_mismatch() {
        let mut session = new_session();
        session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let mut other = new_session();
        let (other_challenge, _) = other
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key());
        let response = server.license_for(&other_challenge);
        let err = session.parse_license(&response.bytes).expect_err("mismatch");
        assert!(matches!(err, Error::RequestIdMismatch { .. }));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn tampered_signature_is_integrity_error() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key());
        let mut envelope = codec::decode_envelope(&server.license_for(&challenge).bytes)
            .expect("envelope");
        envelope.signature[0] ^= 0x01;

        let err = session
            .parse_license(&codec::encode_envelope(&envelope))
            .expect_err("tampered");
        assert!(matches!(err, Error::IntegrityError(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.keys().is_empty());
    }

    #[test]
    fn license_with_only_signing_key_fails() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key()).with_key_count(0);
        let err = session
            .parse_license(&server.license_for(&challenge).bytes)
            .expect_err("no content keys");
        assert!(matches!(err, Error::NoKeysLoaded));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.keys().is_empty());
    }

    #[test]
    fn core_message_is_covered_by_signature() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key())
            .with_core_message(b"oemcrypto core message".to_vec());
        let keys = session
            .parse_license(&server.license_for(&challenge).bytes)
            .expect("keys");
        assert!(keys.iter().any(|key| key.is_content()));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[test]
    fn tampered_core_message_is_integrity_error() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");

        let server = LicenseServer::new(fixture_device().public_key())
            .with_core_message(b"oemcrypto core message".to_vec());
        let mut envelope = codec::decode_envelope(&server.license_for(&challenge).bytes)
            .expect("envelope");
        if let Some(core) = envelope.oemcrypto_core_message.as_mut() {
            core[0] ^= 0x01;
        }

        let err = session
            .parse_license(&codec::encode_envelope(&envelope))
            .expect_err("tampered core message");
        assert!(matches!(err, Error::IntegrityError(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn failed_session_rejects_further_responses() {
        let mut session = new_session();
        let (challenge, _) = session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");
        session
            .parse_license(&LicenseServer::error_response())
            .expect_err("error response");

        let server = LicenseServer::new(fixture_device().public_key());
        let err = session
            .parse_license(&server.license_for(&challenge).bytes)
            .expect_err("failed is absorbing");
        assert!(matches!(
            err,
            Error::InvalidState {
                found: SessionState::Failed,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn garbage_response_fails_session() {
        let mut session = new_session();
        session
            .create_license_request(LicenseType::Streaming, false)
            .expect("challenge");
        let err = session.parse_license(&[0xFF, 0xFF, 0xFF]).expect_err("garbage");
        assert!(matches!(err, Error::DecodeError(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }
}
