//! License engine: swaps player challenges for ones signed by the loaded
//! device and recovers keys from the matching licenses.
//!
//! The engine is a single owner with `&mut self` APIs. Share it across
//! threads through [`SharedEngine`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::clearkey;
use crate::codec::{self, MessageType, PayloadKind};
use crate::config::EngineConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::license_protocol::LicenseType;
use crate::pssh::ContentIdentifier;
use crate::registry::SessionRegistry;
use crate::results::{KeySource, LicenseResult, ResultLog};
use crate::session::LicenseSession;
use crate::utils::unix_timestamp;

/// Callback fired once per newly recorded result.
pub type ResultSink = Box<dyn FnMut(&LicenseResult) + Send>;

/// Engine shared between threads.
pub type SharedEngine = Arc<Mutex<Engine>>;

/// What to send upstream in place of an intercepted request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Send this challenge instead.
    Replace(Vec<u8>),
    /// Send the original body.
    Unmodified,
}

/// Result of inspecting an intercepted response body.
///
/// The response itself is always delivered to the player unchanged.
#[derive(Debug)]
pub enum ResponseOutcome {
    Recorded(LicenseResult),
    /// Keys for this content were recovered earlier.
    AlreadyRecorded(String),
    /// The body does not answer one of our challenges.
    PassThrough,
    Rejected(Error),
}

pub struct Engine {
    config: EngineConfig,
    license_type: LicenseType,
    device: Option<Arc<Device>>,
    registry: SessionRegistry,
    results: ResultLog,
    sink: Option<ResultSink>,
    session_counter: u32,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("pending_sessions", &self.registry.len())
            .field("results", &self.results.len())
            .field("session_counter", &self.session_counter)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            license_type: LicenseType::Streaming,
            registry: SessionRegistry::new(config.session_ttl(), config.max_sessions),
            config,
            device: None,
            results: ResultLog::new(),
            sink: None,
            session_counter: 0,
        }
    }
}

impl Engine {
    /// Create an engine, loading the configured device if there is one.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let license_type = config.license_type()?;
        let device = match config.device_path {
            Some(ref path) => {
                info!("loading device {}", path.display());
                Some(Arc::new(Device::from_path(path)?))
            }
            None => None,
        };

        Ok(Self {
            license_type,
            registry: SessionRegistry::new(config.session_ttl(), config.max_sessions),
            config,
            device,
            results: ResultLog::new(),
            sink: None,
            session_counter: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Load a device from raw WVD bytes and make it the active device.
    pub fn load_device(&mut self, raw: &[u8]) -> Result<Arc<Device>> {
        let device = Arc::new(Device::from_bytes(raw)?);
        self.set_device(device.clone());
        Ok(device)
    }

    /// Replace the active device. Pending sessions keep the device they were
    /// built with.
    pub fn set_device(&mut self, device: impl Into<Arc<Device>>) {
        let device = device.into();
        info!(
            "active device: {:?} L{} system id {:?}",
            device.device_type, device.security_level, device.system_id
        );
        self.device = Some(device);
    }

    pub fn device(&self) -> Option<&Arc<Device>> {
        self.device.as_ref()
    }

    pub fn set_result_sink<F>(&mut self, sink: F)
    where
        F: FnMut(&LicenseResult) + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
    }

    /// Build and register a signed challenge for `content_id`.
    pub fn build_challenge(
        &mut self,
        device: Arc<Device>,
        content_id: ContentIdentifier,
        license_type: LicenseType,
    ) -> Result<Vec<u8>> {
        let number = self.session_counter.wrapping_add(1);
        let restricted = device.is_device_type_restricted();
        let mut session = LicenseSession::new(device, content_id, number);
        let (challenge, request_id) = session.create_license_request(license_type, restricted)?;
        self.session_counter = number;

        if let Some(mut replaced) = self.registry.register(request_id, session)? {
            replaced.fail();
        }
        Ok(challenge)
    }

    /// Verify a license and record its keys.
    ///
    /// The matching session leaves the registry whether or not the license
    /// verifies.
    pub fn consume_response(
        &mut self,
        response: &[u8],
        source_url: Option<&str>,
    ) -> Result<LicenseResult> {
        self.consume(response, source_url).map(|(result, _)| result)
    }

    fn consume(
        &mut self,
        response: &[u8],
        source_url: Option<&str>,
    ) -> Result<(LicenseResult, bool)> {
        let envelope = codec::decode_envelope(response)?;
        if envelope.message_type != MessageType::License {
            return Err(Error::UnexpectedMessageType {
                expected: MessageType::License,
                found: envelope.message_type,
            });
        }
        let license = codec::decode_license(&envelope.msg)?;
        let request_id = license.request_id.unwrap_or_default();

        let mut session = self.registry.remove(&request_id)?;
        let keys = session.parse_license(response)?;

        let result = LicenseResult {
            source: KeySource::Widevine,
            content_id: session.content_id().clone(),
            keys,
            source_url: source_url.map(str::to_string),
            timestamp: unix_timestamp(),
        };
        let recorded = self.record(result.clone());
        Ok((result, recorded))
    }

    /// Inspect an intercepted request body.
    ///
    /// Anything that is not a usable Widevine challenge is forwarded as is.
    pub fn handle_request(&mut self, body: &[u8]) -> Forward {
        if !self.config.enabled {
            return Forward::Unmodified;
        }

        match PayloadKind::detect(body) {
            PayloadKind::SignedMessage => {}
            PayloadKind::ClearKeyJson => {
                trace!("ClearKey request forwarded");
                return Forward::Unmodified;
            }
            PayloadKind::Unrecognized => return Forward::Unmodified,
        }

        let request = match codec::decode_challenge(body) {
            Ok(request) => request,
            Err(e) => {
                debug!("not a license challenge: {}", e);
                return Forward::Unmodified;
            }
        };

        let Some(content_id) = request.content_identifier() else {
            info!("no PSSH data in challenge");
            return Forward::Unmodified;
        };

        if self.results.contains(KeySource::Widevine, &content_id) {
            info!("keys already retrieved for {}", content_id);
            return Forward::Unmodified;
        }

        let Some(device) = self.device.clone() else {
            debug!("no device loaded");
            return Forward::Unmodified;
        };

        match self.build_challenge(device, content_id, self.license_type) {
            Ok(challenge) => Forward::Replace(challenge),
            Err(e) => {
                warn!("failed to build challenge: {}", e);
                Forward::Unmodified
            }
        }
    }

    /// Inspect an intercepted response body.
    pub fn handle_response(&mut self, body: &[u8], source_url: Option<&str>) -> ResponseOutcome {
        if !self.config.enabled {
            return ResponseOutcome::PassThrough;
        }

        match PayloadKind::detect(body) {
            PayloadKind::ClearKeyJson => match clearkey::parse(body, source_url) {
                Ok(result) => {
                    let recorded = self.record(result.clone());
                    Self::outcome(result, recorded)
                }
                Err(e) => {
                    warn!("invalid ClearKey response: {}", e);
                    ResponseOutcome::Rejected(e)
                }
            },
            PayloadKind::SignedMessage => match self.consume(body, source_url) {
                Ok((result, recorded)) => Self::outcome(result, recorded),
                Err(Error::UnexpectedMessageType { found, .. }) => {
                    info!("ignoring {} message", found.as_str_name());
                    ResponseOutcome::PassThrough
                }
                Err(Error::NotFound(request_id)) => {
                    debug!("no session for request {}", hex::encode(request_id));
                    ResponseOutcome::PassThrough
                }
                Err(e) => {
                    warn!("license rejected: {}", e);
                    ResponseOutcome::Rejected(e)
                }
            },
            PayloadKind::Unrecognized => {
                debug!("{}", Error::UnrecognizedPayload);
                ResponseOutcome::PassThrough
            }
        }
    }

    fn outcome(result: LicenseResult, recorded: bool) -> ResponseOutcome {
        if recorded {
            ResponseOutcome::Recorded(result)
        } else {
            ResponseOutcome::AlreadyRecorded(result.content_key())
        }
    }

    fn record(&mut self, result: LicenseResult) -> bool {
        let content_key = result.content_key();
        let key_count = result.keys.len();
        if !self.results.record(result) {
            return false;
        }

        info!("recorded {} key(s) for {}", key_count, content_key);
        if let (Some(sink), Some(result)) = (self.sink.as_mut(), self.results.entries().last()) {
            sink(result);
        }
        true
    }

    /// Drop a pending session.
    pub fn cancel(&mut self, request_id: &[u8]) -> Result<()> {
        let mut session = self.registry.remove(request_id)?;
        session.fail();
        Ok(())
    }

    /// Evict sessions whose license never arrived. Returns how many went.
    pub fn evict_stale(&mut self) -> usize {
        let evicted = self.registry.evict_expired(Instant::now());
        if !evicted.is_empty() {
            info!("evicted {} stale session(s)", evicted.len());
        }
        evicted.len()
    }

    pub fn results(&self) -> &[LicenseResult] {
        self.results.entries()
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    pub fn pending_sessions(&self) -> usize {
        self.registry.len()
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }
}
