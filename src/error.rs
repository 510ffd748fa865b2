//! Error types for the zone audio node

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Control protocol and session description parse errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("Malformed status line: {0}")]
    MalformedStatusLine(String),

    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    #[error("Body too large: {0} bytes")]
    BodyTooLarge(usize),

    #[error("Line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("Body shorter than declared {expected} bytes")]
    BodyTooShort { expected: usize },

    #[error("Malformed session description line: {0}")]
    MalformedDescription(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Device authentication and payload decryption errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    #[error("Base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid AES key or IV length")]
    InvalidKeyLength,

    #[error("No device key configured")]
    MissingKey,
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// Local audio output errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Sink closed")]
    SinkClosed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Invalid transport: {0}")]
    InvalidTransport(String),

    #[error("Session has no negotiated transport")]
    SessionNotArmed,

    #[error("Session already has an active data connection")]
    SessionActive,
}

/// Cluster membership errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to encode node metadata: {0}")]
    MetadataEncode(String),

    #[error("Failed to decode node metadata: {0}")]
    MetadataDecode(String),
}

/// Replicated configuration store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not leader (leader: {})", leader.as_deref().unwrap_or("unknown"))]
    NotLeader { leader: Option<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Apply failed: {0}")]
    Apply(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
