use std::time::Duration;

use bt_bencode::Value;
use tracing::{debug, warn};

use crate::{decode_compact_ipv4_peers, AnnounceEvent, AnnounceRequest, AnnounceResponse, TrackerError};

pub struct HttpTrackerClient {
    announce_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTrackerClient {
    pub fn new(announce_url: impl Into<String>) -> Self {
        Self {
            announce_url: announce_url.into(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client with sane defaults builds"),
        }
    }

    pub fn announce(&self, req: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
        let url = build_announce_url(&self.announce_url, req);
        debug!(url, "announcing to HTTP tracker");
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = resp.status();
        let bytes = resp.bytes().map_err(|e| TrackerError::Transient(e.to_string()))?;
        if status.is_server_error() {
            return Err(TrackerError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(TrackerError::Permanent(format!("HTTP {status}")));
        }
        parse_announce_response(&bytes)
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> TrackerError {
    if e.is_timeout() || e.is_connect() {
        TrackerError::Transient(e.to_string())
    } else {
        TrackerError::Permanent(e.to_string())
    }
}

fn build_announce_url(base: &str, req: &AnnounceRequest) -> String {
    let event = match req.event {
        AnnounceEvent::None => "",
        AnnounceEvent::Started => "&event=started",
        AnnounceEvent::Stopped => "&event=stopped",
        AnnounceEvent::Completed => "&event=completed",
    };
    let sep = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{sep}info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1{event}",
        percent_encode_bytes(req.info_hash.as_bytes()),
        percent_encode_bytes(&req.peer_id),
        req.port,
        req.uploaded,
        req.downloaded,
        req.left,
    )
}

/// Percent-encodes arbitrary bytes (not necessarily valid UTF-8), as
/// required for `info_hash`/`peer_id` query params.
fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

fn parse_announce_response(bytes: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = bt_bencode::decode(bytes)
        .map_err(|e| TrackerError::Permanent(format!("malformed tracker response: {e}")))?;

    if let Some(reason) = value.get(b"failure reason").and_then(Value::as_bytes) {
        return Err(TrackerError::Permanent(String::from_utf8_lossy(reason).into_owned()));
    }

    let interval_seconds = value
        .get(b"interval")
        .and_then(Value::as_integer)
        .unwrap_or(1800) as u64;
    let min_interval_seconds = value
        .get(b"min interval")
        .and_then(Value::as_integer)
        .map(|v| v as u64);
    let complete = value.get(b"complete").and_then(Value::as_integer).map(|v| v as u32);
    let incomplete = value
        .get(b"incomplete")
        .and_then(Value::as_integer)
        .map(|v| v as u32);

    let peers = match value.get(b"peers") {
        Some(Value::Bytes(compact)) => decode_compact_ipv4_peers(compact),
        Some(Value::List(dicts)) => dicts
            .iter()
            .filter_map(|d| {
                let ip = d.get(b"ip").and_then(Value::as_bytes)?;
                let ip = std::str::from_utf8(ip).ok()?.parse().ok()?;
                let port = d.get(b"port").and_then(Value::as_integer)? as u16;
                Some(std::net::SocketAddr::new(ip, port))
            })
            .collect(),
        _ => {
            warn!("tracker response has no \"peers\" key");
            Vec::new()
        }
    };

    Ok(AnnounceResponse {
        interval_seconds,
        min_interval_seconds,
        complete,
        incomplete,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_core::InfoHash;

    #[test]
    fn builds_announce_url_with_percent_encoded_binary_fields() {
        let req = AnnounceRequest {
            info_hash: InfoHash::from_bytes([0xFFu8; 20]),
            peer_id: [b'-'; 20],
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: AnnounceEvent::Started,
            num_want: None,
            key: 1,
        };
        let url = build_announce_url("http://tracker.example/announce", &req);
        assert!(url.starts_with("http://tracker.example/announce?info_hash=%FF%FF%FF"));
        assert!(url.contains("event=started"));
        assert!(url.contains("compact=1"));
    }

    #[test]
    fn parses_compact_peer_list() {
        let raw = b"d8:intervali1800e5:peers6:\x01\x02\x03\x04\x1a\xe1e";
        let resp = parse_announce_response(raw).unwrap();
        assert_eq!(resp.interval_seconds, 1800);
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].port(), 0x1ae1);
    }

    #[test]
    fn failure_reason_is_an_error() {
        let raw = b"d14:failure reason11:bad infohashe";
        assert!(matches!(
            parse_announce_response(raw),
            Err(TrackerError::Permanent(_))
        ));
    }
}
