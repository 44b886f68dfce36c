//! Minecraft Server List Ping.
//!
//! The exchange is: handshake (next state = status), status request, one
//! JSON status response. Every packet is framed as
//! `VarInt length | VarInt packet id | payload`.
//!
//! Before connecting, `_minecraft._tcp.<host>` is looked up so servers
//! published behind an SRV record are reached on their real host and port.

use std::{net::IpAddr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{TokioAsyncResolver, proto::rr::rdata::SRV};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::config::LivenessConfig;

/// Protocol number sent in the handshake. Servers answer status pings for
/// any version, so an old, widely known one is used.
const HANDSHAKE_PROTOCOL_VERSION: i32 = 47;
const NEXT_STATE_STATUS: i32 = 1;
const STATUS_PACKET_ID: i32 = 0x00;
const MAX_RESPONSE_LEN: usize = 1 << 20;
const SRV_SERVICE: &str = "_minecraft._tcp";

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Status query timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Invalid status JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessState {
    pub online: bool,
    pub active_consumer_count: u32,
    pub max_consumer_count: u32,
    #[serde(rename = "version", skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub announcement: Option<String>,
    #[serde(rename = "consumers", skip_serializing_if = "Vec::is_empty")]
    pub consumer_sample: Vec<String>,
}

impl LivenessState {
    /// What an unreachable or still booting server looks like.
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn has_active_consumers(&self) -> bool {
        self.online && self.active_consumer_count > 0
    }
}

/// Collapses a failed query into the offline reading. Failing to reach the
/// server and the server not being ready are the same thing to every caller.
pub fn normalize(result: Result<LivenessState, ProbeError>) -> LivenessState {
    match result {
        Ok(state) => state,
        Err(e) => {
            log::debug!("Liveness probe failed, treating server as offline: {e}");
            LivenessState::offline()
        }
    }
}

/// Application level readiness source for the hosted server.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self) -> LivenessState;

    async fn has_active_consumers(&self) -> bool {
        self.probe().await.has_active_consumers()
    }
}

/// Host and port the status exchange connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SrvRecord {
    priority: u16,
    weight: u16,
    port: u16,
    target: String,
}

impl From<&SRV> for SrvRecord {
    fn from(srv: &SRV) -> Self {
        Self {
            priority: srv.priority(),
            weight: srv.weight(),
            port: srv.port(),
            target: srv.target().to_utf8(),
        }
    }
}

/// Lowest priority wins, ties go to the heaviest weight. A `.` target
/// means the service is not offered under that name.
fn pick_srv_target(records: &[SrvRecord]) -> Option<Target> {
    let best = records
        .iter()
        .min_by_key(|r| (r.priority, std::cmp::Reverse(r.weight)))?;
    let host = best.target.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(Target {
        host: host.to_string(),
        port: best.port,
    })
}

/// Names that never carry SRV records.
fn skips_srv(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || host.eq_ignore_ascii_case("localhost")
}

pub struct SlpProber {
    host: String,
    port: u16,
    timeout: Duration,
    resolver: Option<TokioAsyncResolver>,
}

impl SlpProber {
    pub fn new(config: &LivenessConfig) -> Self {
        let resolver = if config.srv_lookup && !skips_srv(&config.host) {
            TokioAsyncResolver::tokio_from_system_conf()
                .inspect_err(|e| {
                    log::warn!("SRV lookup disabled, unable to read resolver config: {e}")
                })
                .ok()
        } else {
            None
        };

        Self {
            host: config.host.clone(),
            port: config.port,
            timeout: config.timeout,
            resolver,
        }
    }

    /// Follows the SRV record for the configured host when there is one,
    /// otherwise connects to host and port as configured.
    async fn resolve_target(&self) -> Target {
        let direct = Target {
            host: self.host.clone(),
            port: self.port,
        };
        let Some(resolver) = &self.resolver else {
            return direct;
        };

        let name = format!("{SRV_SERVICE}.{}", self.host);
        let records: Vec<SrvRecord> = match resolver.srv_lookup(name.as_str()).await {
            Ok(lookup) => lookup.iter().map(SrvRecord::from).collect(),
            Err(e) => {
                log::debug!("No SRV record for {name}: {e}");
                return direct;
            }
        };

        match pick_srv_target(&records) {
            Some(target) => {
                log::debug!("{name} points to {}:{}", target.host, target.port);
                target
            }
            None => direct,
        }
    }

    /// Runs the raw status exchange, bounded by the configured timeout.
    pub async fn query(&self) -> Result<LivenessState, ProbeError> {
        tokio::time::timeout(self.timeout, self.exchange())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    async fn exchange(&self) -> Result<LivenessState, ProbeError> {
        let target = self.resolve_target().await;
        let mut stream = TcpStream::connect((target.host.as_str(), target.port)).await?;

        let mut handshake = Vec::new();
        write_varint(&mut handshake, STATUS_PACKET_ID);
        write_varint(&mut handshake, HANDSHAKE_PROTOCOL_VERSION);
        write_string(&mut handshake, &target.host);
        handshake.extend_from_slice(&target.port.to_be_bytes());
        write_varint(&mut handshake, NEXT_STATE_STATUS);

        let mut out = Vec::with_capacity(handshake.len() + 8);
        write_frame(&mut out, &handshake);
        write_frame(&mut out, &encode_varint(STATUS_PACKET_ID));
        stream.write_all(&out).await?;
        stream.flush().await?;

        let json = read_status_response(&mut stream).await?;
        let response: StatusResponse = serde_json::from_str(&json)?;
        Ok(response.into())
    }
}

#[async_trait]
impl Prober for SlpProber {
    async fn probe(&self) -> LivenessState {
        normalize(self.query().await)
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    version: Option<VersionInfo>,
    players: Option<PlayersInfo>,
    #[serde(default)]
    description: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PlayersInfo {
    #[serde(default)]
    max: u32,
    #[serde(default)]
    online: u32,
    #[serde(default)]
    sample: Vec<PlayerSample>,
}

#[derive(Debug, Deserialize)]
struct PlayerSample {
    name: String,
}

impl From<StatusResponse> for LivenessState {
    fn from(response: StatusResponse) -> Self {
        let (active, max, sample) = match response.players {
            Some(p) => (
                p.online,
                p.max,
                p.sample.into_iter().map(|s| s.name).collect(),
            ),
            None => (0, 0, Vec::new()),
        };
        let motd = clean_motd(&flatten_description(&response.description));

        LivenessState {
            online: true,
            active_consumer_count: active,
            max_consumer_count: max,
            protocol_version: response.version.map(|v| v.name),
            announcement: (!motd.is_empty()).then_some(motd),
            consumer_sample: sample,
        }
    }
}

/// The description is either a plain string or a chat component with nested
/// `extra` children.
fn flatten_description(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(flatten_description).collect(),
        Value::Object(map) => {
            let mut out = map
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(extra) = map.get("extra") {
                out.push_str(&flatten_description(extra));
            }
            out
        }
        _ => String::new(),
    }
}

/// Strips `§x` formatting codes and surrounding whitespace.
fn clean_motd(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
        } else {
            out.push(c);
        }
    }
    out.trim().to_string()
}

fn encode_varint(value: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    write_varint(&mut buf, value);
    buf
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_frame(buf: &mut Vec<u8>, packet: &[u8]) {
    write_varint(buf, packet.len() as i32);
    buf.extend_from_slice(packet);
}

async fn read_varint<R>(reader: &mut R) -> Result<i32, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Protocol("VarInt is too long".to_string()))
}

fn read_varint_slice(buf: &[u8]) -> Result<(i32, usize), ProbeError> {
    let mut result: u32 = 0;
    for (i, byte) in buf.iter().take(5).enumerate() {
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result as i32, i + 1));
        }
    }
    Err(ProbeError::Protocol("truncated or oversized VarInt".to_string()))
}

async fn read_status_response<R>(reader: &mut R) -> Result<String, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let len = read_varint(reader).await?;
    let len = usize::try_from(len)
        .ok()
        .filter(|l| *l > 0 && *l <= MAX_RESPONSE_LEN)
        .ok_or_else(|| ProbeError::Protocol(format!("invalid packet length {len}")))?;

    let mut packet = vec![0u8; len];
    reader.read_exact(&mut packet).await?;

    let (packet_id, id_len) = read_varint_slice(&packet)?;
    if packet_id != STATUS_PACKET_ID {
        return Err(ProbeError::Protocol(format!(
            "unexpected packet id {packet_id:#04x}"
        )));
    }

    let rest = &packet[id_len..];
    let (str_len, str_len_len) = read_varint_slice(rest)?;
    let body = usize::try_from(str_len)
        .ok()
        .and_then(|l| rest.get(str_len_len..str_len_len + l))
        .ok_or_else(|| ProbeError::Protocol("status string exceeds packet".to_string()))?;

    String::from_utf8(body.to_vec()).map_err(|e| ProbeError::Protocol(e.to_string()))
}
