#![cfg(feature = "cli")]
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn, Level};

use wvproxy::config::EngineConfig;
use wvproxy::device::Device;
use wvproxy::license_protocol::LicenseType;
use wvproxy::pssh::Pssh;
use wvproxy::{Engine, Forward, ResponseOutcome};

#[derive(Parser)]
#[command(name = "wvproxy", version, disable_version_flag = true, about = "wvproxy CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the metadata of a WVD device file.
    DeviceInfo { wvd_path: PathBuf },
    /// Build a signed license challenge for a PSSH and print it as base64.
    Challenge {
        device_path: PathBuf,
        pssh: String,
        #[arg(short = 't', long = "type", default_value = "STREAMING")]
        license_type: String,
    },
    /// Drive the engine from stdin.
    ///
    /// Reads `REQUEST <b64>`, `RESPONSE <b64> [url]`, `LOGS` and `CLEAR`
    /// lines. Each REQUEST is answered with the base64 body to forward, each
    /// RESPONSE with a JSON outcome.
    Bridge { config_path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("wvproxy version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::DeviceInfo { wvd_path }) => run_device_info(&wvd_path),
        Some(Commands::Challenge {
            device_path,
            pssh,
            license_type,
        }) => run_challenge(&device_path, &pssh, &license_type),
        Some(Commands::Bridge { config_path }) => run_bridge(&config_path),
        None => Ok(()),
    }
}

#[derive(Serialize)]
struct DeviceMeta {
    device_type: String,
    security_level: u8,
    flags: u8,
    system_id: Option<u32>,
    key_bits: usize,
    client_id_bytes: usize,
    vmp: bool,
    client_info: Vec<(String, String)>,
}

fn run_device_info(wvd_path: &Path) -> anyhow::Result<()> {
    let device = Device::from_path(wvd_path).context("Failed to load device")?;
    let meta = DeviceMeta {
        device_type: format!("{:?}", device.device_type).to_uppercase(),
        security_level: device.security_level,
        flags: device.flags,
        system_id: device.system_id,
        key_bits: rsa::traits::PublicKeyParts::size(device.private_key()) * 8,
        client_id_bytes: device.client_id().len(),
        vmp: device.vmp.is_some(),
        client_info: device.client_info(),
    };
    print!("{}", serde_yaml::to_string(&meta)?);
    Ok(())
}

fn run_challenge(device_path: &Path, pssh: &str, license_type: &str) -> anyhow::Result<()> {
    let license_type = LicenseType::from_str_name(&license_type.to_uppercase())
        .with_context(|| format!("Invalid license type '{}'", license_type))?;
    let device = Arc::new(Device::from_path(device_path).context("Failed to load device")?);
    info!("[+] Loaded Device (L{})", device.security_level);

    let pssh = Pssh::from_str(pssh)?;
    match pssh.key_ids() {
        Ok(kids) => {
            for kid in kids {
                info!("[+] KID {}", kid.as_simple());
            }
        }
        Err(e) => warn!("Could not read key ids from PSSH: {}", e),
    }
    let mut engine = Engine::default();
    let challenge = engine.build_challenge(device, pssh.content_id(), license_type)?;
    info!("[+] Created License Request Message (Challenge)");

    println!("{}", STANDARD.encode(challenge));
    Ok(())
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum OutcomeLine<'a> {
    Recorded { result: &'a wvproxy::results::LicenseResult },
    AlreadyRecorded { pssh_data: &'a str },
    PassThrough,
    Rejected { error: String },
}

fn run_bridge(config_path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::from_path(config_path).context("Failed to load config")?;
    let mut engine = Engine::new(config)?;
    if engine.device().is_none() {
        warn!("No device configured, challenges will be forwarded untouched");
    }
    engine.set_result_sink(|result| {
        for key in result.keys.iter() {
            info!("[{}] {}:{}", key.key_type, key.kid.as_simple(), hex::encode(&key.key));
        }
    });

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        let reply = match parts.next() {
            Some("REQUEST") => {
                let Some(body) = decode_body(parts.next()) else {
                    continue;
                };
                match engine.handle_request(&body) {
                    Forward::Replace(challenge) => STANDARD.encode(challenge),
                    Forward::Unmodified => STANDARD.encode(body),
                }
            }
            Some("RESPONSE") => {
                let Some(body) = decode_body(parts.next()) else {
                    continue;
                };
                let outcome = engine.handle_response(&body, parts.next());
                let line = match outcome {
                    ResponseOutcome::Recorded(ref result) => OutcomeLine::Recorded { result },
                    ResponseOutcome::AlreadyRecorded(ref pssh_data) => {
                        OutcomeLine::AlreadyRecorded { pssh_data }
                    }
                    ResponseOutcome::PassThrough => OutcomeLine::PassThrough,
                    ResponseOutcome::Rejected(ref e) => OutcomeLine::Rejected {
                        error: e.to_string(),
                    },
                };
                serde_json::to_string(&line)?
            }
            Some("LOGS") => serde_json::to_string(engine.results())?,
            Some("CLEAR") => {
                engine.clear_results();
                "OK".to_string()
            }
            Some(other) => {
                error!("Unknown command '{}'", other);
                continue;
            }
            None => continue,
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
        engine.evict_stale();
    }
    Ok(())
}

fn decode_body(body: Option<&str>) -> Option<Vec<u8>> {
    let Some(body) = body else {
        error!("Missing body");
        return None;
    };
    match STANDARD.decode(body) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            error!("Invalid base64 body: {}", e);
            None
        }
    }
}
