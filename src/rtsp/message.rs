//! Control protocol request/response model
//!
//! Methods are a closed set and unknown verbs fail at parse time. Status
//! codes carry their canonical reason phrase; codes outside the known table
//! still render, as `Status(N)`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::RTSP_VERSION;
use crate::error::ProtocolError;

/// Header map; keys are case-sensitive as received
pub type Headers = BTreeMap<String, String>;

/// Control protocol verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Announce,
    Setup,
    Record,
    SetParameter,
    GetParameter,
    Flush,
    Teardown,
    Describe,
    Play,
    Pause,
}

impl Method {
    /// Every method, in the order advertised by OPTIONS
    pub const ALL: [Method; 11] = [
        Method::Announce,
        Method::Setup,
        Method::Record,
        Method::Pause,
        Method::Flush,
        Method::Teardown,
        Method::Options,
        Method::GetParameter,
        Method::SetParameter,
        Method::Describe,
        Method::Play,
    ];

    /// Wire token for the method
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Record => "RECORD",
            Method::SetParameter => "SET_PARAMETER",
            Method::GetParameter => "GET_PARAMETER",
            Method::Flush => "FLUSH",
            Method::Teardown => "TEARDOWN",
            Method::Describe => "DESCRIBE",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
        }
    }

    /// Comma separated list for the `Public` header
    pub fn public_header() -> String {
        Self::ALL
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u16);

const REASONS: &[(u16, &str)] = &[
    (100, "Continue"),
    (200, "OK"),
    (201, "Created"),
    (250, "Low on Storage Space"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (303, "See Other"),
    (305, "Use Proxy"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (402, "Payment Required"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Timeout"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Request Entity Too Large"),
    (414, "Request-URI Too Long"),
    (415, "Unsupported Media Type"),
    (451, "Invalid parameter"),
    (452, "Illegal Conference Identifier"),
    (453, "Not Enough Bandwidth"),
    (454, "Session Not Found"),
    (455, "Method Not Valid In This State"),
    (456, "Header Field Not Valid"),
    (457, "Invalid Range"),
    (458, "Parameter Is Read-Only"),
    (459, "Aggregate Operation Not Allowed"),
    (460, "Only Aggregate Operation Allowed"),
    (461, "Unsupported Transport"),
    (462, "Destination Unreachable"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Timeout"),
    (505, "RTSP Version Not Supported"),
    (551, "Option not supported"),
];

impl Status {
    pub const CONTINUE: Status = Status(100);
    pub const OK: Status = Status(200);
    pub const BAD_REQUEST: Status = Status(400);
    pub const UNAUTHORIZED: Status = Status(401);
    pub const NOT_FOUND: Status = Status(404);
    pub const METHOD_NOT_ALLOWED: Status = Status(405);
    pub const UNSUPPORTED_MEDIA_TYPE: Status = Status(415);
    pub const INVALID_PARAMETER: Status = Status(451);
    pub const SESSION_NOT_FOUND: Status = Status(454);
    pub const METHOD_NOT_VALID_IN_THIS_STATE: Status = Status(455);
    pub const UNSUPPORTED_TRANSPORT: Status = Status(461);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);
    pub const NOT_IMPLEMENTED: Status = Status(501);
    pub const SERVICE_UNAVAILABLE: Status = Status(503);

    pub const fn from_code(code: u16) -> Self {
        Status(code)
    }

    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Canonical reason phrase, if the code is a known one
    pub fn reason(&self) -> Option<&'static str> {
        REASONS
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, reason)| *reason)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => f.write_str(reason),
            None => write!(f, "Status({})", self.0),
        }
    }
}

/// Inbound or outbound control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub protocol: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            protocol: RTSP_VERSION.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .insert("Content-Type".to_string(), content_type.to_string());
        self.body = body;
        self
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Protocol: {}", self.protocol)?;
        writeln!(f, "Method: {}", self.method)?;
        writeln!(f, "Request URI: {}", self.uri)?;
        writeln!(f, "Headers:")?;
        for (key, value) in &self.headers {
            writeln!(f, "  {}: {}", key, value)?;
        }
        write!(f, "Body: {} bytes", self.body.len())
    }
}

/// Response built by exactly one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub protocol: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: Status::OK,
            protocol: RTSP_VERSION.to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Fresh response mirroring the request's protocol version and sequence number
    pub fn for_request(request: &Request) -> Self {
        let mut response = Self::new();
        response.protocol = request.protocol.clone();
        if let Some(cseq) = request.header("CSeq") {
            response.headers.insert("CSeq".to_string(), cseq.to_string());
        }
        response
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Protocol: {}", self.protocol)?;
        writeln!(f, "Status: {} {}", self.status.code(), self.status)?;
        writeln!(f, "Headers:")?;
        for (key, value) in &self.headers {
            writeln!(f, "  {}: {}", key, value)?;
        }
        write!(f, "Body: {} bytes", self.body.len())
    }
}

/// `Transport` header parameters exchanged during SETUP
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transport {
    pub server_port: Option<u16>,
    pub control_port: Option<u16>,
    pub timing_port: Option<u16>,
}

impl Transport {
    /// Pull the port parameters out of a `;` separated transport header
    pub fn parse(value: &str) -> Self {
        let mut transport = Transport::default();
        for part in value.split(';') {
            let Some((key, port)) = part.split_once('=') else {
                continue;
            };
            let port = port.trim().parse::<u16>().ok();
            match key.trim() {
                "server_port" => transport.server_port = port,
                "control_port" => transport.control_port = port,
                "timing_port" => transport.timing_port = port,
                _ => {}
            }
        }
        transport
    }

    /// Request-side header value sent by a client
    pub fn request_header(&self) -> String {
        format!(
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={};timing_port={}",
            self.control_port.unwrap_or(0),
            self.timing_port.unwrap_or(0)
        )
    }

    /// Response-side header value sent by a server
    pub fn response_header(&self) -> String {
        format!(
            "RTP/AVP/UDP;unicast;mode=record;server_port={};control_port={};timing_port={}",
            self.server_port.unwrap_or(0),
            self.control_port.unwrap_or(0),
            self.timing_port.unwrap_or(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("options".parse::<Method>().unwrap(), Method::Options);
        assert_eq!("OPTIONS".parse::<Method>().unwrap(), Method::Options);
        assert_eq!(
            "set_parameter".parse::<Method>().unwrap(),
            Method::SetParameter
        );
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = "foo".parse::<Method>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMethod(m) if m == "foo"));
    }

    #[test]
    fn test_method_string_roundtrip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn test_status_rendering() {
        assert_eq!(Status::OK.to_string(), "OK");
        assert_eq!(Status::SESSION_NOT_FOUND.to_string(), "Session Not Found");
        assert_eq!(Status::from_code(299).to_string(), "Status(299)");
        assert!(Status::from_code(299).reason().is_none());
    }

    #[test]
    fn test_every_known_code_has_one_phrase() {
        for (code, _) in REASONS {
            let matches = REASONS.iter().filter(|(c, _)| c == code).count();
            assert_eq!(matches, 1, "code {} listed more than once", code);
        }
    }

    #[test]
    fn test_response_echoes_cseq_and_protocol() {
        let mut request = Request::new(Method::Options, "*")
            .with_header("CSeq", "7")
            .with_header("User-Agent", "test");
        request.protocol = "RTSP/1.1".to_string();

        let response = Response::for_request(&request);
        assert_eq!(response.protocol, "RTSP/1.1");
        assert_eq!(response.header("CSeq"), Some("7"));
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.status, Status::OK);
    }

    #[test]
    fn test_transport_parse() {
        let transport = Transport::parse(
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port=8888;timing_port=8889",
        );
        assert_eq!(transport.control_port, Some(8888));
        assert_eq!(transport.timing_port, Some(8889));
        assert_eq!(transport.server_port, None);

        let reply = Transport {
            server_port: Some(6000),
            control_port: Some(6001),
            timing_port: Some(6002),
        };
        assert_eq!(Transport::parse(&reply.response_header()), reply);
    }
}
