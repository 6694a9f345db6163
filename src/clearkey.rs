//! ClearKey license responses (JSON Web Key sets).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::license_protocol::license::key_container::KeyType;
use crate::pssh::ContentIdentifier;
use crate::results::{KeySource, LicenseResult};
use crate::utils::unix_timestamp;

#[derive(Debug, Deserialize)]
struct KeySet {
    keys: Vec<JsonWebKey>,
}

#[derive(Debug, Deserialize)]
struct JsonWebKey {
    #[serde(default)]
    kty: Option<String>,
    kid: String,
    k: String,
}

#[derive(Serialize)]
struct KidDocument<'a> {
    kids: Vec<&'a str>,
}

/// Parse a ClearKey response into a result.
pub fn parse(body: &[u8], source_url: Option<&str>) -> Result<LicenseResult> {
    let key_set: KeySet = serde_json::from_slice(body)
        .map_err(|e| Error::DecodeError(format!("Invalid ClearKey response: {}", e)))?;
    if key_set.keys.is_empty() {
        return Err(Error::NoKeysLoaded);
    }

    let keys = key_set
        .keys
        .iter()
        .map(|jwk| {
            if let Some(kty) = jwk.kty.as_deref().filter(|kty| *kty != "oct") {
                return Err(Error::DecodeError(format!("Unsupported key type {}", kty)));
            }
            let kid = decode_base64url(&jwk.kid)?;
            let key = decode_base64url(&jwk.k)?;
            Ok(Key::new(
                KeyType::Content.as_str_name().to_string(),
                Key::kid_to_uuid(&kid),
                key,
                Vec::new(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LicenseResult {
        source: KeySource::ClearKey,
        content_id: content_id(&key_set),
        keys,
        source_url: source_url.map(str::to_string),
        timestamp: unix_timestamp(),
    })
}

/// The identifier ClearKey content is de-duplicated on: the JSON document
/// `{"kids":[...]}` listing each key's `k` value.
fn content_id(key_set: &KeySet) -> ContentIdentifier {
    let document = KidDocument {
        kids: key_set.keys.iter().map(|jwk| jwk.k.as_str()).collect(),
    };
    ContentIdentifier::new(serde_json::to_vec(&document).unwrap_or_default())
}

fn decode_base64url(value: &str) -> Result<Vec<u8>> {
    let normalized = value.trim_end_matches('=').replace('+', "-").replace('/', "_");
    Ok(URL_SAFE_NO_PAD.decode(normalized)?)
}
