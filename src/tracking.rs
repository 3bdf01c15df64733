//! Request and correlation ID resolution
//!
//! Every inbound request gets a request ID and a correlation ID derived from
//! its headers with a fixed priority cascade. The same headers always resolve
//! to the same IDs; randomness is only used when no header carries a signal.

use axum::http::HeaderMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Client-supplied request ID, echoed back on every response
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Client-supplied correlation ID, echoed back on every response
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Ray ID set by the edge proxy (Cloudflare)
pub const EDGE_RAY_HEADER: &str = "cf-ray";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Width of the time bucket salting forwarded-for hashes
const FORWARDED_HASH_BUCKET_SECS: u64 = 1;

/// Where a request ID came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestIdSource {
    Client,
    Edge,
    ForwardedHash,
    Generated,
}

impl RequestIdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Edge => "edge",
            Self::ForwardedHash => "forwarded-hash",
            Self::Generated => "generated",
        }
    }
}

impl fmt::Display for RequestIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a correlation ID came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorrelationIdSource {
    Client,
    Edge,
    Fallback,
}

impl CorrelationIdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Edge => "edge",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for CorrelationIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved identifiers for one request
///
/// Attached to the request extensions by the observability middleware and
/// embedded in every log entry and persisted record for that request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingIds {
    pub request_id: String,
    pub correlation_id: String,
    pub request_id_source: RequestIdSource,
    pub correlation_id_source: CorrelationIdSource,
}

/// Resolve tracking IDs for the current instant
pub fn resolve(headers: &HeaderMap) -> TrackingIds {
    resolve_at(headers, SystemTime::now())
}

/// Resolve tracking IDs as of `now`
///
/// Request ID priority: client header, edge ray header, hash of the first
/// forwarded-for address salted with a coarse time bucket, random.
/// Correlation ID priority: client header, edge ray header, the request ID.
pub fn resolve_at(headers: &HeaderMap, now: SystemTime) -> TrackingIds {
    let edge_ray = header_value(headers, EDGE_RAY_HEADER);

    let (request_id, request_id_source) =
        if let Some(id) = header_value(headers, REQUEST_ID_HEADER) {
            (id.to_string(), RequestIdSource::Client)
        } else if let Some(ray) = edge_ray {
            (ray.to_string(), RequestIdSource::Edge)
        } else if let Some(addr) = first_forwarded_address(headers) {
            (forwarded_hash(addr, now), RequestIdSource::ForwardedHash)
        } else {
            (generate_request_id(), RequestIdSource::Generated)
        };

    let (correlation_id, correlation_id_source) =
        if let Some(id) = header_value(headers, CORRELATION_ID_HEADER) {
            (id.to_string(), CorrelationIdSource::Client)
        } else if let Some(ray) = edge_ray {
            (ray.to_string(), CorrelationIdSource::Edge)
        } else {
            (request_id.clone(), CorrelationIdSource::Fallback)
        };

    TrackingIds {
        request_id,
        correlation_id,
        request_id_source,
        correlation_id_source,
    }
}

/// Best-effort client address: first forwarded-for hop, then real-ip, then peer
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    if let Some(addr) = first_forwarded_address(headers) {
        return addr.to_string();
    }
    if let Some(addr) = header_value(headers, REAL_IP_HEADER) {
        return addr.to_string();
    }
    remote.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn first_forwarded_address(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, FORWARDED_FOR_HEADER)?
        .split(',')
        .map(str::trim)
        .find(|addr| !addr.is_empty())
}

fn forwarded_hash(addr: &str, now: SystemTime) -> String {
    let bucket = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        / FORWARDED_HASH_BUCKET_SECS;

    let digest = Sha256::digest(format!("{}|{}", addr, bucket).as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

fn generate_request_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}
