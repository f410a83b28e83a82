//! PDCP (PeerDrop Control Protocol) wire protocol implementation.
//!
//! One request and one response travel over each control connection. Both
//! are JSON documents wrapped in a small binary frame so message boundaries
//! never depend on the payload.
//!
//! ## Framing
//!
//! | offset | size | field                                      |
//! |--------|------|--------------------------------------------|
//! | 0      | 4    | `b"PDCP"`                                  |
//! | 4      | 1    | major version (`1`)                        |
//! | 5      | 1    | minor version (`0`)                        |
//! | 6      | 1    | `0x01` request, `0x02` response            |
//! | 7      | 4    | document length, big-endian `u32`          |
//! | 11     | n    | UTF-8 JSON document                        |
//!
//! A peer with a different major version is refused; minor versions are
//! compatible.
//!
//! ## Schema
//!
//! ```text
//! request  = { "serial": str, "request": "transfer",
//!              "groupId": int, "files": [ { "name", "size", "requestId", "mime", "directory"? } ] }
//!          | { "serial": str, "request": "clipboard", "clipboardText": str }
//!          | { "serial": str, "request": "acquaintance" }
//! response = { "result": bool, "error"?: str, "serial"?: str, "nickname"?: str }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Leading bytes of every frame.
pub const MAGIC: [u8; 4] = *b"PDCP";

/// (major, minor) version written into outgoing frames.
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Bytes preceding the JSON document.
pub const HEADER_SIZE: usize = MAGIC.len() + 2 + 1 + 4;

/// Largest JSON document accepted in either direction.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Error code a peer sends when this device may not send to it.
pub const ERROR_NOT_ALLOWED: &str = "not-allowed";

/// Message types in the PDCP protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// A [`Request`] document
    Request = 0x01,
    /// A [`Response`] document
    Response = 0x02,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

/// The fixed-size prefix of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// (major, minor) version of the sender
    pub version: (u8, u8),
    /// Which document follows
    pub message_type: MessageType,
    /// Length of the JSON document
    pub payload_length: u32,
}

impl FrameHeader {
    /// Header for an outgoing document of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolError`] if `len` exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn outgoing(message_type: MessageType, len: usize) -> Result<Self> {
        check_payload_len(len)?;
        let payload_length = u32::try_from(len).map_err(|_| oversize(len))?;
        Ok(Self {
            version: PROTOCOL_VERSION,
            message_type,
            payload_length,
        })
    }

    /// Serialize to the on-wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let (major, minor) = self.version;
        let mut out = [0u8; HEADER_SIZE];
        let fields = MAGIC
            .into_iter()
            .chain([major, minor, self.message_type as u8])
            .chain(self.payload_length.to_be_bytes());
        for (slot, byte) in out.iter_mut().zip(fields) {
            *slot = byte;
        }
        out
    }

    /// Parse and validate a received header.
    ///
    /// # Errors
    ///
    /// Fails on a foreign magic, an incompatible major version, an unknown
    /// message type or an oversized length.
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Result<Self> {
        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(Error::ProtocolError("not a PDCP frame".to_string()));
        }

        let &[major, minor, kind, ref len @ ..] = rest else {
            return Err(Error::ProtocolError("truncated frame header".to_string()));
        };
        if major != PROTOCOL_VERSION.0 {
            return Err(Error::UnsupportedVersion { major, minor });
        }

        let message_type = MessageType::from_byte(kind)
            .ok_or_else(|| Error::ProtocolError(format!("unknown message type {kind:#04x}")))?;

        let len: [u8; 4] = len
            .try_into()
            .map_err(|_| Error::ProtocolError("truncated frame header".to_string()))?;
        let payload_length = u32::from_be_bytes(len);
        check_payload_len(payload_length as usize)?;

        Ok(Self {
            version: (major, minor),
            message_type,
            payload_length,
        })
    }
}

fn oversize(len: usize) -> Error {
    Error::ProtocolError(format!(
        "document of {len} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit"
    ))
}

fn check_payload_len(len: usize) -> Result<()> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(oversize(len));
    }
    Ok(())
}

/// A control-plane request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Identifier of the sending device
    pub serial: String,
    /// What is being asked
    #[serde(flatten)]
    pub body: RequestBody,
}

impl Request {
    /// Create a request from this device.
    pub fn new(serial: impl Into<String>, body: RequestBody) -> Self {
        Self {
            serial: serial.into(),
            body,
        }
    }
}

/// The kind-specific part of a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum RequestBody {
    /// Propose a batch of files
    Transfer {
        /// Session identifier for the batch
        #[serde(rename = "groupId")]
        group_id: i64,
        /// Files in the batch, in order
        files: Vec<FileEntry>,
    },
    /// Deliver clipboard text
    Clipboard {
        /// The text
        #[serde(rename = "clipboardText")]
        text: String,
    },
    /// Ask the peer to identify itself
    Acquaintance,
}

impl RequestBody {
    /// Short name of the request kind, as sent on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transfer { .. } => "transfer",
            Self::Clipboard { .. } => "clipboard",
            Self::Acquaintance => "acquaintance",
        }
    }
}

/// One file in a transfer proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Name the peer will see
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Identifier of the file within the group
    #[serde(rename = "requestId")]
    pub request_id: i64,
    /// MIME type
    pub mime: String,
    /// Path inside a shared folder
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub directory: Option<String>,
}

/// A control-plane response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request was accepted
    pub result: bool,
    /// Rejection code, present when `result` is false
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    /// Identifier of the answering device (acquaintance only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub serial: Option<String>,
    /// Display name of the answering device (acquaintance only)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub nickname: Option<String>,
}

impl Response {
    /// An acceptance.
    #[must_use]
    pub const fn accepted() -> Self {
        Self {
            result: true,
            error: None,
            serial: None,
            nickname: None,
        }
    }

    /// A rejection carrying `code`.
    #[must_use]
    pub fn rejected(code: &ErrorCode) -> Self {
        Self {
            result: false,
            error: Some(code.as_str().to_string()),
            serial: None,
            nickname: None,
        }
    }

    /// An answer to an acquaintance request.
    pub fn identity(serial: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            result: true,
            error: None,
            serial: Some(serial.into()),
            nickname: Some(nickname.into()),
        }
    }

    /// The rejection code, if the request was rejected.
    #[must_use]
    pub fn error_code(&self) -> Option<ErrorCode> {
        if self.result {
            return None;
        }
        Some(
            self.error
                .as_deref()
                .map_or_else(|| ErrorCode::Other(String::new()), ErrorCode::from_wire),
        )
    }
}

/// Why a peer rejected a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// The peer does not permit this device to send to it
    NotAllowed,
    /// Any other code (possibly empty)
    Other(String),
}

impl ErrorCode {
    /// Parse a wire code.
    #[must_use]
    pub fn from_wire(code: &str) -> Self {
        if code == ERROR_NOT_ALLOWED {
            Self::NotAllowed
        } else {
            Self::Other(code.to_string())
        }
    }

    /// The wire form of this code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotAllowed => ERROR_NOT_ALLOWED,
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialize a document for the wire.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if `document` cannot be represented as JSON.
pub fn encode_payload<T: Serialize>(document: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(document).map_err(|e| Error::Serialization(e.to_string()))
}

/// Parse a document received from the wire.
///
/// # Errors
///
/// Returns [`Error::Serialization`] if `bytes` is not a valid `T`.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

/// Receive one frame: the validated header and its document bytes.
///
/// # Errors
///
/// Fails if the stream ends early or the header is invalid.
pub async fn read_frame<R>(reader: &mut R) -> Result<(FrameHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; HEADER_SIZE];
    reader.read_exact(&mut prefix).await?;
    let header = FrameHeader::decode(&prefix)?;

    let mut document = Vec::with_capacity(header.payload_length as usize);
    reader
        .take(u64::from(header.payload_length))
        .read_to_end(&mut document)
        .await?;
    if document.len() != header.payload_length as usize {
        return Err(Error::ProtocolError(format!(
            "{} ended after {} of {} bytes",
            header.message_type,
            document.len(),
            header.payload_length
        )));
    }

    Ok((header, document))
}

/// Send `document` as a single frame of `message_type` and flush.
///
/// # Errors
///
/// Fails if the document is too large or the stream rejects the write.
pub async fn write_frame<W>(writer: &mut W, message_type: MessageType, document: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = FrameHeader::outgoing(message_type, document.len())?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + document.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(document);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn within<T>(limit: Duration, op: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(limit, op)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout(limit.as_secs())))
}

/// Read one frame of the expected type and decode its JSON document.
///
/// The whole exchange is bounded by `limit`. A document that does not
/// match `T` is a protocol error.
///
/// # Errors
///
/// Returns an error on I/O failure, [`Error::Timeout`], a frame of the wrong
/// type, or a malformed document.
pub async fn read_message<R, T>(reader: &mut R, expected: MessageType, limit: Duration) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let (header, document) = within(limit, read_frame(reader)).await?;

    if header.message_type != expected {
        return Err(Error::UnexpectedMessage {
            expected: expected.to_string(),
            actual: header.message_type.to_string(),
        });
    }

    decode_payload(&document).map_err(|e| Error::ProtocolError(format!("malformed {expected}: {e}")))
}

/// Encode `message` and send it as one frame, bounded by `limit`.
///
/// # Errors
///
/// Returns an error if encoding or writing fails, or on [`Error::Timeout`].
pub async fn write_message<W, T>(
    writer: &mut W,
    message_type: MessageType,
    message: &T,
    limit: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let document = encode_payload(message)?;
    within(limit, write_frame(writer, message_type, &document)).await
}

/// Enable keep-alive probes on a control connection so a vanished peer is
/// noticed while a user decides on a proposal.
///
/// # Errors
///
/// Returns an error if the socket rejects the option.
pub fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let probes = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    SockRef::from(stream)
        .set_tcp_keepalive(&probes)
        .map_err(Error::Io)?;
    tracing::trace!(idle = ?KEEPALIVE_IDLE, "keep-alive enabled");
    Ok(())
}

/// Open a control connection, bounded by `connect_timeout`.
///
/// # Errors
///
/// Returns [`Error::ConnectionFailed`] if the peer refuses, is unreachable,
/// or does not answer in time.
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(Error::ConnectionFailed {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(Error::ConnectionFailed {
                addr,
                reason: format!("timed out after {}s", connect_timeout.as_secs()),
            })
        }
    };

    configure_tcp_keepalive(&stream)?;
    tracing::debug!("Control connection established with {}", addr);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn acquaintance_header() -> [u8; HEADER_SIZE] {
        FrameHeader::outgoing(MessageType::Request, 31).unwrap().encode()
    }

    #[test]
    fn test_header_layout() {
        let bytes = acquaintance_header();
        assert_eq!(bytes, [b'P', b'D', b'C', b'P', 1, 0, 0x01, 0, 0, 0, 31]);

        let header = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(header.message_type, MessageType::Request);
        assert_eq!(header.payload_length, 31);
        assert_eq!(header.version, PROTOCOL_VERSION);
    }

    #[test]
    fn test_header_accepts_newer_minor_version() {
        let mut bytes = acquaintance_header();
        bytes[5] = 9;
        assert_eq!(FrameHeader::decode(&bytes).unwrap().version, (1, 9));
    }

    #[test]
    fn test_header_rejections() {
        let mut foreign = acquaintance_header();
        foreign[..4].copy_from_slice(b"LDRP");
        assert!(matches!(
            FrameHeader::decode(&foreign),
            Err(Error::ProtocolError(_))
        ));

        let mut newer = acquaintance_header();
        newer[4] = 2;
        assert!(matches!(
            FrameHeader::decode(&newer),
            Err(Error::UnsupportedVersion { major: 2, minor: 0 })
        ));

        let mut unknown = acquaintance_header();
        unknown[6] = 0x7F;
        assert!(matches!(
            FrameHeader::decode(&unknown),
            Err(Error::ProtocolError(_))
        ));

        let mut huge = acquaintance_header();
        huge[7..].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(FrameHeader::decode(&huge).is_err());
    }

    #[test]
    fn test_outgoing_refuses_oversize_document() {
        assert!(FrameHeader::outgoing(MessageType::Response, MAX_PAYLOAD_SIZE).is_ok());
        assert!(FrameHeader::outgoing(MessageType::Response, MAX_PAYLOAD_SIZE + 1).is_err());
    }

    #[test]
    fn test_transfer_request_wire_shape() {
        let request = Request::new(
            "serial-1",
            RequestBody::Transfer {
                group_id: 100,
                files: vec![
                    FileEntry {
                        name: "a.jpg".to_string(),
                        size: 4,
                        request_id: 101,
                        mime: "image/jpeg".to_string(),
                        directory: Some("Photos".to_string()),
                    },
                    FileEntry {
                        name: "b.txt".to_string(),
                        size: 1,
                        request_id: 102,
                        mime: "text/plain".to_string(),
                        directory: None,
                    },
                ],
            },
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "serial": "serial-1",
                "request": "transfer",
                "groupId": 100,
                "files": [
                    {"name": "a.jpg", "size": 4, "requestId": 101, "mime": "image/jpeg", "directory": "Photos"},
                    {"name": "b.txt", "size": 1, "requestId": 102, "mime": "text/plain"}
                ]
            })
        );
    }

    #[test]
    fn test_clipboard_and_acquaintance_wire_shape() {
        let clip = Request::new(
            "s",
            RequestBody::Clipboard {
                text: "hello".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&clip).unwrap(),
            json!({"serial": "s", "request": "clipboard", "clipboardText": "hello"})
        );

        let hello = Request::new("s", RequestBody::Acquaintance);
        assert_eq!(
            serde_json::to_value(&hello).unwrap(),
            json!({"serial": "s", "request": "acquaintance"})
        );

        let parsed: Request =
            serde_json::from_value(json!({"serial": "s", "request": "acquaintance"})).unwrap();
        assert_eq!(parsed.body, RequestBody::Acquaintance);
    }

    #[test]
    fn test_response_requires_result() {
        assert!(decode_payload::<Response>(br#"{"error":"x"}"#).is_err());

        let ok: Response = decode_payload(br#"{"result":true}"#).unwrap();
        assert_eq!(ok, Response::accepted());
        assert_eq!(ok.error_code(), None);
    }

    #[test]
    fn test_response_error_codes() {
        let not_allowed: Response =
            decode_payload(br#"{"result":false,"error":"not-allowed"}"#).unwrap();
        assert_eq!(not_allowed.error_code(), Some(ErrorCode::NotAllowed));

        let other: Response = decode_payload(br#"{"result":false,"error":"x"}"#).unwrap();
        assert_eq!(
            other.error_code(),
            Some(ErrorCode::Other("x".to_string()))
        );

        let bare: Response = decode_payload(br#"{"result":false}"#).unwrap();
        assert_eq!(bare.error_code(), Some(ErrorCode::Other(String::new())));

        assert_eq!(
            serde_json::to_value(Response::rejected(&ErrorCode::NotAllowed)).unwrap(),
            json!({"result": false, "error": "not-allowed"})
        );
    }

    #[tokio::test]
    async fn test_acquaintance_exchange_over_duplex() {
        let (mut sender, mut answerer) = tokio::io::duplex(1024);
        let limit = Duration::from_secs(1);

        write_message(
            &mut sender,
            MessageType::Request,
            &Request::new("laptop", RequestBody::Acquaintance),
            limit,
        )
        .await
        .unwrap();
        let request: Request = read_message(&mut answerer, MessageType::Request, limit)
            .await
            .unwrap();
        assert_eq!(request.serial, "laptop");
        assert_eq!(request.body.kind(), "acquaintance");

        write_message(
            &mut answerer,
            MessageType::Response,
            &Response::identity("phone", "Pixel"),
            limit,
        )
        .await
        .unwrap();
        let response: Response = read_message(&mut sender, MessageType::Response, limit)
            .await
            .unwrap();
        assert_eq!(response.nickname.as_deref(), Some("Pixel"));
    }

    #[tokio::test]
    async fn test_truncated_document_is_rejected() {
        let mut wire = FrameHeader::outgoing(MessageType::Response, 64)
            .unwrap()
            .encode()
            .to_vec();
        wire.extend_from_slice(br#"{"result":true}"#);

        let mut cursor = std::io::Cursor::new(wire);
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_checks_type() {
        let mut buffer = Vec::new();
        write_message(
            &mut buffer,
            MessageType::Request,
            &Request::new("s", RequestBody::Acquaintance),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let result: Result<Response> =
            read_message(&mut cursor, MessageType::Response, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::UnexpectedMessage { .. })));
    }

    #[tokio::test]
    async fn test_read_message_malformed_is_protocol_error() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, MessageType::Response, br#"{"nickname":"x"}"#)
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buffer);
        let result: Result<Response> =
            read_message(&mut cursor, MessageType::Response, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let (mut client, _server) = tokio::io::duplex(64);

        let result: Result<Response> =
            read_message(&mut client, MessageType::Response, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(err.code(), Some("E004"));
    }
}
