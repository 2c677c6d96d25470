//! Instance URL parsing
//!
//! Remote agents describe every tunnel instance with a compact URL of the form
//! `scheme://[password@]host[:port][/targetHost[:targetPort]][?query]`.
//! [`parse_descriptor`] turns it into structured connection parameters. It is
//! pure and total: malformed input degrades to empty fields, never to an error.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a tunnel instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelMode {
    Server,
    Client,
}

impl TunnelMode {
    /// Parse the remote `type` field. Unknown values are not tunnels.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "server" => Some(Self::Server),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for TunnelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS mode of a server-side tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Use whatever the agent is configured with
    #[default]
    Inherit,
    /// Plain TCP
    Mode0,
    /// Self-signed certificate
    Mode1,
    /// Custom certificate (`crt`/`key` query parameters)
    Mode2,
}

impl TlsMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inherit => "inherit",
            Self::Mode0 => "mode0",
            Self::Mode1 => "mode1",
            Self::Mode2 => "mode2",
        }
    }

    fn from_query(value: &str) -> Option<Self> {
        match value {
            "0" => Some(Self::Mode0),
            "1" => Some(Self::Mode1),
            "2" => Some(Self::Mode2),
            _ => None,
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value used for the log level when the URL does not set one
pub const INHERIT: &str = "inherit";

/// Structured form of an instance URL
///
/// Ports and pool bounds stay textual, exactly as the remote side wrote them;
/// the numeric accessors apply the storage conversions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDescriptor {
    pub tunnel_address: String,
    pub tunnel_port: String,
    pub target_address: String,
    pub target_port: String,
    pub tls_mode: TlsMode,
    pub log_level: String,
    pub cert_path: String,
    pub key_path: String,
    pub password: String,
    pub min: String,
    pub max: String,
}

impl Default for ParsedDescriptor {
    fn default() -> Self {
        Self {
            tunnel_address: String::new(),
            tunnel_port: String::new(),
            target_address: String::new(),
            target_port: String::new(),
            tls_mode: TlsMode::Inherit,
            log_level: INHERIT.to_string(),
            cert_path: String::new(),
            key_path: String::new(),
            password: String::new(),
            min: String::new(),
            max: String::new(),
        }
    }
}

impl ParsedDescriptor {
    /// Tunnel port as stored (0 when absent or not numeric)
    pub fn tunnel_port_number(&self) -> i32 {
        self.tunnel_port.parse().unwrap_or(0)
    }

    /// Target port as stored (0 when absent or not numeric)
    pub fn target_port_number(&self) -> i32 {
        self.target_port.parse().unwrap_or(0)
    }

    /// Minimum pool size, `None` when absent
    pub fn min_pool(&self) -> Option<i32> {
        pool_bound(&self.min)
    }

    /// Maximum pool size, `None` when absent
    pub fn max_pool(&self) -> Option<i32> {
        pool_bound(&self.max)
    }
}

fn pool_bound(value: &str) -> Option<i32> {
    if value.is_empty() {
        None
    } else {
        Some(value.parse().unwrap_or(0))
    }
}

/// Parse an instance URL for an instance running in `mode`
pub fn parse_descriptor(raw: &str, mode: TunnelMode) -> ParsedDescriptor {
    let mut parsed = ParsedDescriptor::default();
    if raw.is_empty() {
        return parsed;
    }

    let mut rest = match raw.find("://") {
        Some(idx) => &raw[idx + 3..],
        None => raw,
    };

    let query = match rest.find('?') {
        Some(idx) => {
            let query = &rest[idx + 1..];
            rest = &rest[..idx];
            query
        }
        None => "",
    };

    if let Some(idx) = rest.find('@') {
        parsed.password = rest[..idx].to_string();
        rest = &rest[idx + 1..];
    }

    let (host_part, path_part) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };

    let (addr, port) = split_host_port(host_part);
    parsed.tunnel_address = addr;
    parsed.tunnel_port = port;

    let (addr, port) = split_host_port(path_part);
    parsed.target_address = addr;
    parsed.target_port = port;

    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "tls" if mode == TunnelMode::Server => {
                if let Some(tls) = TlsMode::from_query(value) {
                    parsed.tls_mode = tls;
                }
            }
            "log" => parsed.log_level = value.to_lowercase(),
            "crt" => parsed.cert_path = query_unescape(value).unwrap_or_else(|| value.to_string()),
            "key" => parsed.key_path = query_unescape(value).unwrap_or_else(|| value.to_string()),
            "min" => parsed.min = value.to_string(),
            "max" => parsed.max = value.to_string(),
            _ => {}
        }
    }

    parsed
}

/// Split `addr[:port]`, understanding bracketed and bare IPv6 literals
fn split_host_port(part: &str) -> (String, String) {
    let part = part.trim();
    if part.is_empty() {
        return (String::new(), String::new());
    }

    // [v6]:port keeps its brackets so the address can be displayed as-is
    if part.starts_with('[') {
        if let Some(end) = part.find(']') {
            let addr = part[..=end].to_string();
            let port = part[end + 1..]
                .strip_prefix(':')
                .map(str::to_string)
                .unwrap_or_default();
            return (addr, port);
        }
    }

    let colons = part.matches(':').count();
    if colons == 0 {
        return if part.parse::<i64>().is_ok() {
            (String::new(), part.to_string())
        } else {
            (part.to_string(), String::new())
        };
    }

    if colons > 1 || part.contains("::") {
        // Bare IPv6: the last group is a port only when it is a valid one
        if let Some(idx) = part.rfind(':') {
            let candidate = &part[idx + 1..];
            if matches!(candidate.parse::<u32>(), Ok(1..=65535)) {
                return (part[..idx].to_string(), candidate.to_string());
            }
        }
        return (part.to_string(), String::new());
    }

    match part.split_once(':') {
        Some((addr, port)) => (addr.to_string(), port.to_string()),
        None => (part.to_string(), String::new()),
    }
}

/// Form-style unescape: `+` is a space and every `%` must start a hex pair
fn query_unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = value.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
