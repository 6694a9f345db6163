//! Widevine license protocol messages.
//!
//! Only the messages and fields the engine reads or writes are declared. Tag
//! numbers follow the published `license_protocol.proto`; fields not declared
//! here are skipped on decode.

/// Outer signed wrapper around every protocol message.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedMessage {
    #[prost(enumeration = "signed_message::MessageType", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub msg: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub session_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub remote_attestation: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub oemcrypto_core_message: Option<Vec<u8>>,
}

pub mod signed_message {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MessageType {
        LicenseRequest = 1,
        License = 2,
        ErrorResponse = 3,
        ServiceCertificateRequest = 4,
        ServiceCertificate = 5,
        SubLicense = 6,
        CasLicenseRequest = 7,
        CasLicense = 8,
        ExternalLicenseRequest = 9,
        ExternalLicense = 10,
    }

    impl MessageType {
        /// Protocol enum name, e.g. `LICENSE_REQUEST`.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                MessageType::LicenseRequest => "LICENSE_REQUEST",
                MessageType::License => "LICENSE",
                MessageType::ErrorResponse => "ERROR_RESPONSE",
                MessageType::ServiceCertificateRequest => "SERVICE_CERTIFICATE_REQUEST",
                MessageType::ServiceCertificate => "SERVICE_CERTIFICATE",
                MessageType::SubLicense => "SUB_LICENSE",
                MessageType::CasLicenseRequest => "CAS_LICENSE_REQUEST",
                MessageType::CasLicense => "CAS_LICENSE",
                MessageType::ExternalLicenseRequest => "EXTERNAL_LICENSE_REQUEST",
                MessageType::ExternalLicense => "EXTERNAL_LICENSE",
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum LicenseType {
    Streaming = 1,
    Offline = 2,
    Automatic = 3,
}

impl LicenseType {
    pub fn as_str_name(&self) -> &'static str {
        match self {
            LicenseType::Streaming => "STREAMING",
            LicenseType::Offline => "OFFLINE",
            LicenseType::Automatic => "AUTOMATIC",
        }
    }

    pub fn from_str_name(value: &str) -> Option<Self> {
        match value {
            "STREAMING" => Some(Self::Streaming),
            "OFFLINE" => Some(Self::Offline),
            "AUTOMATIC" => Some(Self::Automatic),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Version20 = 20,
    Version21 = 21,
    Version22 = 22,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseRequest {
    /// Serialized `ClientIdentification`, carried verbatim.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub client_id: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub content_id: Option<license_request::ContentIdentification>,
    #[prost(enumeration = "license_request::RequestType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub request_time: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub key_control_nonce_deprecated: Option<Vec<u8>>,
    #[prost(enumeration = "ProtocolVersion", optional, tag = "6")]
    pub protocol_version: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub key_control_nonce: Option<u32>,
}

pub mod license_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContentIdentification {
        #[prost(oneof = "content_identification::ContentIdVariant", tags = "1, 4")]
        pub content_id_variant: Option<content_identification::ContentIdVariant>,
    }

    pub mod content_identification {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct WidevinePsshData {
            #[prost(bytes = "vec", repeated, tag = "1")]
            pub pssh_data: Vec<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "2")]
            pub license_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "3")]
            pub request_id: Option<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct InitData {
            #[prost(enumeration = "init_data::InitDataType", optional, tag = "1")]
            pub init_data_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "2")]
            pub init_data: Option<Vec<u8>>,
            #[prost(enumeration = "super::super::LicenseType", optional, tag = "3")]
            pub license_type: Option<i32>,
            #[prost(bytes = "vec", optional, tag = "4")]
            pub request_id: Option<Vec<u8>>,
        }

        pub mod init_data {
            #[derive(
                Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
            )]
            #[repr(i32)]
            pub enum InitDataType {
                Cenc = 1,
                Webm = 2,
            }
        }

        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum ContentIdVariant {
            #[prost(message, tag = "1")]
            WidevinePsshData(WidevinePsshData),
            #[prost(message, tag = "4")]
            InitData(InitData),
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum RequestType {
        New = 1,
        Renewal = 2,
        Release = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LicenseIdentification {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub request_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub session_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub purchase_id: Option<Vec<u8>>,
    #[prost(enumeration = "LicenseType", optional, tag = "4")]
    pub r#type: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct License {
    #[prost(message, optional, tag = "1")]
    pub id: Option<LicenseIdentification>,
    #[prost(message, repeated, tag = "3")]
    pub key: Vec<license::KeyContainer>,
    #[prost(int64, optional, tag = "4")]
    pub license_start_time: Option<i64>,
}

pub mod license {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct KeyContainer {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub id: Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub iv: Option<Vec<u8>>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub key: Option<Vec<u8>>,
        #[prost(enumeration = "key_container::KeyType", optional, tag = "4")]
        pub r#type: Option<i32>,
        #[prost(message, optional, tag = "9")]
        pub operator_session_key_permissions:
            Option<key_container::OperatorSessionKeyPermissions>,
        #[prost(string, optional, tag = "12")]
        pub track_label: Option<String>,
    }

    pub mod key_container {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct OperatorSessionKeyPermissions {
            #[prost(bool, optional, tag = "1")]
            pub allow_encrypt: Option<bool>,
            #[prost(bool, optional, tag = "2")]
            pub allow_decrypt: Option<bool>,
            #[prost(bool, optional, tag = "3")]
            pub allow_sign: Option<bool>,
            #[prost(bool, optional, tag = "4")]
            pub allow_signature_verify: Option<bool>,
        }

        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum KeyType {
            Signing = 1,
            Content = 2,
            KeyControl = 3,
            OperatorSession = 4,
            Entitlement = 5,
            OemContent = 6,
        }

        impl KeyType {
            pub fn as_str_name(&self) -> &'static str {
                match self {
                    KeyType::Signing => "SIGNING",
                    KeyType::Content => "CONTENT",
                    KeyType::KeyControl => "KEY_CONTROL",
                    KeyType::OperatorSession => "OPERATOR_SESSION",
                    KeyType::Entitlement => "ENTITLEMENT",
                    KeyType::OemContent => "OEM_CONTENT",
                }
            }
        }
    }
}

/// Subset of `ClientIdentification` used to inspect a device blob.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientIdentification {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub token: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub client_info: Vec<client_identification::NameValue>,
}

pub mod client_identification {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NameValue {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub value: Option<String>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignedDrmCertificate {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub drm_certificate: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DrmCertificate {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub serial_number: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub creation_time_seconds: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub public_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub system_id: Option<u32>,
    #[prost(string, optional, tag = "7")]
    pub provider_id: Option<String>,
}

/// Widevine CENC header carried inside a PSSH box.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WidevinePsshData {
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_ids: Vec<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: Option<Vec<u8>>,
}
