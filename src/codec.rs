//! Record-level codec for license protocol messages.
//!
//! Wraps the prost definitions in [`crate::license_protocol`] with plain
//! records whose enum fields are validated. Truncated or malformed input is a
//! [`Error::DecodeError`]; unknown tags are skipped.
use prost::Message;

use crate::error::{Error, Result};
use crate::license_protocol::license::KeyContainer;
use crate::license_protocol::license_request::content_identification::init_data::InitDataType;
use crate::license_protocol::license_request::content_identification::{
    ContentIdVariant, InitData, WidevinePsshData,
};
use crate::license_protocol::license_request::{ContentIdentification, RequestType};
use crate::license_protocol::{License, LicenseRequest, LicenseType, ProtocolVersion, SignedMessage};
use crate::pssh::{ContentIdentifier, Pssh, WIDEVINE_SYSTEM_ID};

pub use crate::license_protocol::signed_message::MessageType;

/// Decoded `SignedMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub message_type: MessageType,
    /// Signed payload; empty when the field is absent.
    pub msg: Vec<u8>,
    /// Signature over `msg`; empty when the field is absent.
    pub signature: Vec<u8>,
    /// RSA-wrapped session key (licenses only).
    pub session_key: Option<Vec<u8>>,
    pub oemcrypto_core_message: Option<Vec<u8>>,
}

impl SignedEnvelope {
    pub fn new(message_type: MessageType, msg: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            message_type,
            msg,
            signature,
            session_key: None,
            oemcrypto_core_message: None,
        }
    }
}

/// Content identification carried by a license request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentIdFields {
    WidevinePsshData {
        pssh_data: Vec<Vec<u8>>,
        license_type: Option<LicenseType>,
        request_id: Option<Vec<u8>>,
    },
    InitData {
        init_data_type: Option<InitDataType>,
        init_data: Option<Vec<u8>>,
        license_type: Option<LicenseType>,
        request_id: Option<Vec<u8>>,
    },
}

/// Decoded `LicenseRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LicenseRequestFields {
    /// Serialized client identification blob.
    pub client_id: Option<Vec<u8>>,
    pub content_id: Option<ContentIdFields>,
    pub request_type: Option<RequestType>,
    pub request_time: Option<i64>,
    pub protocol_version: Option<ProtocolVersion>,
    pub key_control_nonce: Option<u32>,
}

impl LicenseRequestFields {
    /// The content identifier this request asks a license for.
    ///
    /// This is the first Widevine PSSH data entry, or the init data of a CENC
    /// PSSH box. Empty identifiers are treated as absent.
    pub fn content_identifier(&self) -> Option<ContentIdentifier> {
        let bytes = match self.content_id.as_ref()? {
            ContentIdFields::WidevinePsshData { pssh_data, .. } => pssh_data.first()?.clone(),
            ContentIdFields::InitData {
                init_data_type: Some(InitDataType::Cenc),
                init_data: Some(init_data),
                ..
            } => {
                let pssh = Pssh::from_box(init_data).ok()?;
                if pssh.system_id != WIDEVINE_SYSTEM_ID {
                    return None;
                }
                pssh.init_data
            }
            ContentIdFields::InitData { .. } => return None,
        };
        Some(ContentIdentifier::new(bytes)).filter(|id| !id.is_empty())
    }

    pub fn request_id(&self) -> Option<&[u8]> {
        match self.content_id.as_ref()? {
            ContentIdFields::WidevinePsshData { request_id, .. }
            | ContentIdFields::InitData { request_id, .. } => request_id.as_deref(),
        }
    }

    pub fn license_type(&self) -> Option<LicenseType> {
        match self.content_id.as_ref()? {
            ContentIdFields::WidevinePsshData { license_type, .. }
            | ContentIdFields::InitData { license_type, .. } => *license_type,
        }
    }
}

/// Decoded `License`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LicenseFields {
    pub request_id: Option<Vec<u8>>,
    pub session_id: Option<Vec<u8>>,
    pub license_type: Option<LicenseType>,
    pub license_start_time: Option<i64>,
    pub key_containers: Vec<KeyContainer>,
}

/// Cheap structural classification of a payload handed over by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// JSON object, i.e. a ClearKey request or response.
    ClearKeyJson,
    /// Protobuf `SignedMessage` (starts with the field 1 varint tag).
    SignedMessage,
    Unrecognized,
}

impl PayloadKind {
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => PayloadKind::ClearKeyJson,
            // A serialized SignedMessage always leads with its `type` field.
            _ if bytes.first() == Some(&0x08) => PayloadKind::SignedMessage,
            _ => PayloadKind::Unrecognized,
        }
    }
}

pub fn decode_envelope(bytes: &[u8]) -> Result<SignedEnvelope> {
    let signed = SignedMessage::decode(bytes)
        .map_err(|e| Error::DecodeError(format!("Failed to parse SignedMessage: {}", e)))?;

    let message_type = enum_field::<MessageType>(signed.r#type, "message type")?
        .ok_or_else(|| Error::DecodeError("SignedMessage missing type".to_string()))?;

    Ok(SignedEnvelope {
        message_type,
        msg: signed.msg.unwrap_or_default(),
        signature: signed.signature.unwrap_or_default(),
        session_key: signed.session_key,
        oemcrypto_core_message: signed.oemcrypto_core_message,
    })
}

pub fn encode_envelope(envelope: &SignedEnvelope) -> Vec<u8> {
    SignedMessage {
        r#type: Some(envelope.message_type as i32),
        msg: Some(envelope.msg.clone()),
        signature: Some(envelope.signature.clone()),
        session_key: envelope.session_key.clone(),
        remote_attestation: None,
        oemcrypto_core_message: envelope.oemcrypto_core_message.clone(),
    }
    .encode_to_vec()
}

pub fn decode_license_request(bytes: &[u8]) -> Result<LicenseRequestFields> {
    let request = LicenseRequest::decode(bytes)
        .map_err(|e| Error::DecodeError(format!("Failed to parse LicenseRequest: {}", e)))?;

    let content_id = match request.content_id.and_then(|c| c.content_id_variant) {
        Some(ContentIdVariant::WidevinePsshData(data)) => Some(ContentIdFields::WidevinePsshData {
            pssh_data: data.pssh_data,
            license_type: enum_field(data.license_type, "license type")?,
            request_id: data.request_id,
        }),
        Some(ContentIdVariant::InitData(data)) => Some(ContentIdFields::InitData {
            init_data_type: enum_field(data.init_data_type, "init data type")?,
            init_data: data.init_data,
            license_type: enum_field(data.license_type, "license type")?,
            request_id: data.request_id,
        }),
        None => None,
    };

    Ok(LicenseRequestFields {
        client_id: request.client_id,
        content_id,
        request_type: enum_field(request.r#type, "request type")?,
        request_time: request.request_time,
        protocol_version: enum_field(request.protocol_version, "protocol version")?,
        key_control_nonce: request.key_control_nonce,
    })
}

pub fn encode_license_request(fields: &LicenseRequestFields) -> Vec<u8> {
    let content_id = fields.content_id.as_ref().map(|c| {
        let variant = match c {
            ContentIdFields::WidevinePsshData {
                pssh_data,
                license_type,
                request_id,
            } => ContentIdVariant::WidevinePsshData(WidevinePsshData {
                pssh_data: pssh_data.clone(),
                license_type: license_type.map(|t| t as i32),
                request_id: request_id.clone(),
            }),
            ContentIdFields::InitData {
                init_data_type,
                init_data,
                license_type,
                request_id,
            } => ContentIdVariant::InitData(InitData {
                init_data_type: init_data_type.map(|t| t as i32),
                init_data: init_data.clone(),
                license_type: license_type.map(|t| t as i32),
                request_id: request_id.clone(),
            }),
        };
        ContentIdentification {
            content_id_variant: Some(variant),
        }
    });

    LicenseRequest {
        client_id: fields.client_id.clone(),
        content_id,
        r#type: fields.request_type.map(|t| t as i32),
        request_time: fields.request_time,
        key_control_nonce_deprecated: None,
        protocol_version: fields.protocol_version.map(|v| v as i32),
        key_control_nonce: fields.key_control_nonce,
    }
    .encode_to_vec()
}

pub fn decode_license(bytes: &[u8]) -> Result<LicenseFields> {
    let license = License::decode(bytes)
        .map_err(|e| Error::DecodeError(format!("Failed to parse License: {}", e)))?;
    let id = license.id.unwrap_or_default();

    Ok(LicenseFields {
        request_id: id.request_id,
        session_id: id.session_id,
        license_type: enum_field(id.r#type, "license type")?,
        license_start_time: license.license_start_time,
        key_containers: license.key,
    })
}

/// Decode a player-built challenge: a `LICENSE_REQUEST` envelope and its body.
pub fn decode_challenge(bytes: &[u8]) -> Result<LicenseRequestFields> {
    let envelope = decode_envelope(bytes)?;
    if envelope.message_type != MessageType::LicenseRequest {
        return Err(Error::UnexpectedMessageType {
            expected: MessageType::LicenseRequest,
            found: envelope.message_type,
        });
    }
    decode_license_request(&envelope.msg)
}

fn enum_field<E: TryFrom<i32>>(value: Option<i32>, name: &str) -> Result<Option<E>> {
    value
        .map(|v| {
            E::try_from(v).map_err(|_| Error::DecodeError(format!("Unknown {} value {}", name, v)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::license_protocol::license::key_container::KeyType;
    use crate::license_protocol::LicenseIdentification;

    fn sample_request() -> LicenseRequestFields {
        LicenseRequestFields {
            client_id: Some(vec![0x08, 0x01, 0x12, 0x00]),
            content_id: Some(ContentIdFields::WidevinePsshData {
                pssh_data: vec![b"pssh-data".to_vec()],
                license_type: Some(LicenseType::Streaming),
                request_id: Some(vec![7; 16]),
            }),
            request_type: Some(RequestType::New),
            request_time: Some(1_700_000_000),
            protocol_version: Some(ProtocolVersion::Version21),
            key_control_nonce: Some(42),
        }
    }

    #[test]
    fn license_request_round_trips() {
        let fields = sample_request();
        let decoded = decode_license_request(&encode_license_request(&fields)).expect("decode");
        assert_eq!(decoded, fields);
        assert_eq!(
            decoded.content_identifier(),
            Some(ContentIdentifier::new(b"pssh-data".to_vec()))
        );
        assert_eq!(decoded.request_id(), Some(&[7u8; 16][..]));
    }

    #[test]
    fn init_data_request_uses_embedded_pssh() {
        let content_id = ContentIdentifier::new(b"cenc-header".to_vec());
        let fields = LicenseRequestFields {
            content_id: Some(ContentIdFields::InitData {
                init_data_type: Some(InitDataType::Cenc),
                init_data: Some(content_id.to_pssh().to_bytes()),
                license_type: Some(LicenseType::Offline),
                request_id: None,
            }),
            ..Default::default()
        };
        let decoded = decode_license_request(&encode_license_request(&fields)).expect("decode");
        assert_eq!(decoded.content_identifier(), Some(content_id));
        assert_eq!(decoded.license_type(), Some(LicenseType::Offline));
    }

    #[test]
    fn empty_pssh_data_has_no_identifier() {
        let fields = LicenseRequestFields {
            content_id: Some(ContentIdFields::WidevinePsshData {
                pssh_data: vec![Vec::new()],
                license_type: None,
                request_id: None,
            }),
            ..Default::default()
        };
        assert_eq!(fields.content_identifier(), None);
        assert_eq!(LicenseRequestFields::default().content_identifier(), None);
    }

    #[test]
    fn envelope_round_trips() {
        let mut envelope = SignedEnvelope::new(MessageType::License, vec![1, 2, 3], vec![4, 5]);
        envelope.session_key = Some(vec![6; 8]);
        let decoded = decode_envelope(&encode_envelope(&envelope)).expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn truncated_envelope_is_decode_error() {
        let envelope = SignedEnvelope::new(MessageType::License, vec![0xAA; 40], vec![0xBB; 32]);
        let bytes = encode_envelope(&envelope);
        let err = decode_envelope(&bytes[..bytes.len() - 5]).expect_err("truncated");
        assert!(matches!(err, Error::DecodeError(_)));
    }

    #[test]
    fn envelope_without_type_is_decode_error() {
        let bytes = SignedMessage {
            msg: Some(vec![1]),
            ..Default::default()
        }
        .encode_to_vec();
        assert!(matches!(decode_envelope(&bytes), Err(Error::DecodeError(_))));
    }

    #[test]
    fn unknown_message_type_is_decode_error() {
        let bytes = SignedMessage {
            r#type: Some(99),
            ..Default::default()
        }
        .encode_to_vec();
        assert!(matches!(decode_envelope(&bytes), Err(Error::DecodeError(_))));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut bytes = encode_envelope(&SignedEnvelope::new(
            MessageType::ErrorResponse,
            vec![9],
            Vec::new(),
        ));
        // field 15, length-delimited, 2 bytes
        bytes.extend_from_slice(&[0x7A, 0x02, 0xDE, 0xAD]);
        let decoded = decode_envelope(&bytes).expect("decode");
        assert_eq!(decoded.message_type, MessageType::ErrorResponse);
        assert_eq!(decoded.msg, vec![9]);
    }

    #[test]
    fn license_fields_are_extracted() {
        let license = License {
            id: Some(LicenseIdentification {
                request_id: Some(b"req".to_vec()),
                session_id: Some(b"sess".to_vec()),
                r#type: Some(LicenseType::Streaming as i32),
                ..Default::default()
            }),
            key: vec![KeyContainer {
                id: Some(vec![1; 16]),
                r#type: Some(KeyType::Content as i32),
                ..Default::default()
            }],
            license_start_time: Some(10),
        };
        let fields = decode_license(&license.encode_to_vec()).expect("decode");
        assert_eq!(fields.request_id.as_deref(), Some(&b"req"[..]));
        assert_eq!(fields.license_type, Some(LicenseType::Streaming));
        assert_eq!(fields.key_containers.len(), 1);
    }

    #[test]
    fn challenge_must_be_license_request() {
        let envelope = SignedEnvelope::new(
            MessageType::License,
            encode_license_request(&sample_request()),
            Vec::new(),
        );
        let err = decode_challenge(&encode_envelope(&envelope)).expect_err("wrong type");
        assert!(matches!(err, Error::UnexpectedMessageType { .. }));
    }

    #[test]
    fn payload_kind_detection() {
        assert_eq!(PayloadKind::detect(b"  {\"keys\":[]}"), PayloadKind::ClearKeyJson);
        assert_eq!(PayloadKind::detect(&[0x08, 0x01, 0x12]), PayloadKind::SignedMessage);
        assert_eq!(PayloadKind::detect(b""), PayloadKind::Unrecognized);
        assert_eq!(PayloadKind::detect(b"<xml/>"), PayloadKind::Unrecognized);
    }
}
