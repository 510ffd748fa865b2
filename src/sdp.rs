//! Session description payload carried by ANNOUNCE
//!
//! Line oriented `type=value` pairs. Only the fields the receiver needs are
//! modelled; unrecognised line types are ignored. `a=` lines accumulate into
//! an attribute map keyed by the text before the first colon.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

/// `o=` line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub net_type: String,
    pub addr_type: String,
    pub unicast_address: String,
}

/// `c=` line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectData {
    pub net_type: String,
    pub addr_type: String,
    pub connection_address: String,
}

/// `t=` line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub start_time: i64,
    pub stop_time: i64,
}

/// `m=` line; the port keeps its `<port>/<count>` form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaDescription {
    pub media: String,
    pub port: String,
    pub proto: String,
    pub fmt: String,
}

/// Parsed session description, immutable once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    pub version: i32,
    pub origin: Origin,
    pub session_name: String,
    pub information: String,
    pub connect_data: ConnectData,
    pub timing: Timing,
    pub media: Vec<MediaDescription>,
    pub attributes: BTreeMap<String, String>,
}

impl SessionDescription {
    /// Parse a description body
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let mut sdp = SessionDescription::default();

        for line in input.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (kind, value) = line
                .split_once('=')
                .ok_or_else(|| malformed(line))?;

            match kind {
                "v" => {
                    sdp.version = value.trim().parse().map_err(|_| malformed(line))?;
                }
                "o" => {
                    let [username, session_id, session_version, net_type, addr_type, unicast_address] =
                        fields::<6>(value).ok_or_else(|| malformed(line))?;
                    sdp.origin = Origin {
                        username,
                        session_id,
                        session_version,
                        net_type,
                        addr_type,
                        unicast_address,
                    };
                }
                "s" => sdp.session_name = value.to_string(),
                "i" => sdp.information = value.to_string(),
                "c" => {
                    let [net_type, addr_type, connection_address] =
                        fields::<3>(value).ok_or_else(|| malformed(line))?;
                    sdp.connect_data = ConnectData {
                        net_type,
                        addr_type,
                        connection_address,
                    };
                }
                "t" => {
                    let [start, stop] = fields::<2>(value).ok_or_else(|| malformed(line))?;
                    sdp.timing = Timing {
                        start_time: start.parse().map_err(|_| malformed(line))?,
                        stop_time: stop.parse().map_err(|_| malformed(line))?,
                    };
                }
                "m" => {
                    let [media, port, proto, fmt] =
                        fields::<4>(value).ok_or_else(|| malformed(line))?;
                    sdp.media.push(MediaDescription {
                        media,
                        port,
                        proto,
                        fmt,
                    });
                }
                "a" => {
                    let (key, attr) = value.split_once(':').unwrap_or((value, ""));
                    sdp.attributes.insert(key.to_string(), attr.to_string());
                }
                _ => {}
            }
        }

        Ok(sdp)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Codec identity from the `rtpmap` attribute
    pub fn rtpmap(&self) -> Option<&str> {
        self.attribute("rtpmap")
    }

    pub fn fmtp(&self) -> Option<&str> {
        self.attribute("fmtp")
    }

    /// True when the sender negotiated an encrypted payload
    pub fn is_encrypted(&self) -> bool {
        self.attributes.contains_key("rsaaeskey")
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v={}\r\n", self.version)?;
        let o = &self.origin;
        write!(
            f,
            "o={} {} {} {} {} {}\r\n",
            o.username, o.session_id, o.session_version, o.net_type, o.addr_type, o.unicast_address
        )?;
        write!(f, "s={}\r\n", self.session_name)?;
        if !self.information.is_empty() {
            write!(f, "i={}\r\n", self.information)?;
        }
        let c = &self.connect_data;
        write!(f, "c={} {} {}\r\n", c.net_type, c.addr_type, c.connection_address)?;
        write!(f, "t={} {}\r\n", self.timing.start_time, self.timing.stop_time)?;
        for m in &self.media {
            write!(f, "m={} {} {} {}\r\n", m.media, m.port, m.proto, m.fmt)?;
        }
        for (key, value) in &self.attributes {
            write!(f, "a={}:{}\r\n", key, value)?;
        }
        Ok(())
    }
}

fn malformed(line: &str) -> ProtocolError {
    ProtocolError::MalformedDescription(line.to_string())
}

/// Exactly `N` leading whitespace separated fields
fn fields<const N: usize>(value: &str) -> Option<[String; N]> {
    let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if parts.len() < N {
        return None;
    }
    parts.into_iter().take(N).collect::<Vec<_>>().try_into().ok()
}
