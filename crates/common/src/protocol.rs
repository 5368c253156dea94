//! Wire protocol shared by the daemon and its clients.
//!
//! Every frame is one line of JSON. Frames are signed with the sender's
//! Ed25519 key over `msg_type|msg_id|seq|ts|payload` and carry a sequence
//! number that strictly increases per direction.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::keys::{KeyPair, PublicKey};

pub const API_VERSION: u32 = 5;
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
pub const SHUTDOWN_TOPIC: &str = "shutdown";
pub const MALFORMED_REQUEST: &str = "Request missing required field(s).";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
    #[error("bad signature on {0} frame")]
    BadSignature(String),
    #[error("sequence number {got} does not follow {last}")]
    Replay { last: u64, got: u64 },
    #[error("expected {expected} frame, got {got}")]
    Unexpected { expected: FrameKind, got: FrameKind },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    Hello,
    Challenge,
    Proof,
    Welcome,
    Request,
    Reply,
    Subscribe,
    Event,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Hello => "HELLO",
            FrameKind::Challenge => "CHALLENGE",
            FrameKind::Proof => "PROOF",
            FrameKind::Welcome => "WELCOME",
            FrameKind::Request => "REQUEST",
            FrameKind::Reply => "REPLY",
            FrameKind::Subscribe => "SUBSCRIBE",
            FrameKind::Event => "EVENT",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Frame {
    pub msg_type: FrameKind,
    pub msg_id: String,
    pub seq: u64,
    pub ts: u64,
    pub payload: Value,
    #[serde(default)]
    pub sig: String,
}

impl Frame {
    pub fn new(msg_type: FrameKind, seq: u64, payload: Value) -> Self {
        Self {
            msg_type,
            msg_id: Uuid::new_v4().to_string(),
            seq,
            ts: now_ts(),
            payload,
            sig: String::new(),
        }
    }

    pub fn canonical_body(&self) -> String {
        let payload = serde_json::to_string(&self.payload).unwrap_or_else(|_| "{}".to_string());
        format!(
            "{}|{}|{}|{}|{}",
            self.msg_type, self.msg_id, self.seq, self.ts, payload
        )
    }

    pub fn sign(&mut self, key: &KeyPair) {
        self.sig = key.sign(self.canonical_body().as_bytes());
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        key.verify(self.canonical_body().as_bytes(), &self.sig)
    }

    pub fn expect(self, kind: FrameKind) -> Result<Self, ProtocolError> {
        if self.msg_type != kind {
            return Err(ProtocolError::Unexpected {
                expected: kind,
                got: self.msg_type,
            });
        }
        Ok(self)
    }

    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn new_nonce() -> String {
    let bytes: [u8; 24] = rand::random();
    general_purpose::STANDARD.encode(bytes)
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Hello {
    pub public_key: PublicKey,
    pub nonce: String,
    pub api_version: u32,
}

/// Server reply to `HELLO`; the frame signature covers `client_nonce`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Challenge {
    pub server_key: PublicKey,
    pub client_nonce: String,
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Proof {
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Welcome {
    pub user: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Subscribe {
    /// Base64 topic prefixes; empty subscribes to everything.
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub topic: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "topic": general_purpose::STANDARD.encode(&self.topic),
            "payload": general_purpose::STANDARD.encode(&self.payload),
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let field = |name: &str| -> Result<Vec<u8>, ProtocolError> {
            let raw = value
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::Handshake(format!("event missing {name}")))?;
            general_purpose::STANDARD
                .decode(raw.as_bytes())
                .map_err(|err| ProtocolError::Handshake(format!("event {name}: {err}")))
        };
        Ok(Self {
            topic: field("topic")?,
            payload: field("payload")?,
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.topic == SHUTDOWN_TOPIC.as_bytes()
    }
}

/// What the client sends inside a `REQUEST` frame. `user` is never part of
/// it; the server injects the authenticated label.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RequestEnvelope {
    pub command: String,
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReplyError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Exactly one of `{"data": ...}` or `{"error": {...}}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReplyEnvelope {
    Data(Value),
    Error(ReplyError),
}

impl ReplyEnvelope {
    pub fn error(message: impl Into<String>) -> Self {
        ReplyEnvelope::Error(ReplyError {
            message: message.into(),
            traceback: None,
        })
    }

    pub fn error_with_trace(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        ReplyEnvelope::Error(ReplyError {
            message: message.into(),
            traceback: Some(traceback.into()),
        })
    }

    pub fn into_result(self) -> Result<Value, ReplyError> {
        match self {
            ReplyEnvelope::Data(value) => Ok(value),
            ReplyEnvelope::Error(err) => Err(err),
        }
    }
}

/// Read one line-delimited frame; `Ok(None)` on clean EOF.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    read_frame_within(reader, MAX_FRAME_BYTES).await
}

/// Never buffers more than `limit + 1` bytes of a line.
async fn read_frame_within<R>(reader: &mut BufReader<R>, limit: usize) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let read = (&mut *reader)
            .take(limit as u64 + 1)
            .read_line(&mut line)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if line.len() > limit {
            return Err(ProtocolError::FrameTooLarge);
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(raw)?));
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(frame)? + "\n";
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Inbound half of an authenticated connection.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    peer: Option<PublicKey>,
    last_seq: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            peer: None,
            last_seq: 0,
        }
    }

    pub fn peer(&self) -> Option<PublicKey> {
        self.peer
    }

    /// Read a frame without checking it. Only used for the opening `HELLO`,
    /// whose signing key arrives inside the frame itself.
    pub async fn next_unverified(&mut self) -> Result<Option<Frame>, ProtocolError> {
        read_frame(&mut self.inner).await
    }

    /// Check `frame` against `peer`, pin the peer, and advance the sequence.
    pub fn accept(&mut self, frame: Frame, peer: PublicKey) -> Result<Frame, ProtocolError> {
        if !frame.verify(&peer) {
            return Err(ProtocolError::BadSignature(frame.msg_type.to_string()));
        }
        if frame.seq <= self.last_seq {
            return Err(ProtocolError::Replay {
                last: self.last_seq,
                got: frame.seq,
            });
        }
        self.last_seq = frame.seq;
        self.peer = Some(peer);
        Ok(frame)
    }

    pub async fn next(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let peer = self
            .peer
            .ok_or_else(|| ProtocolError::Handshake("peer key not established".into()))?;
        match read_frame(&mut self.inner).await? {
            Some(frame) => self.accept(frame, peer).map(Some),
            None => Ok(None),
        }
    }

    pub async fn expect(&mut self, kind: FrameKind) -> Result<Frame, ProtocolError> {
        match self.next().await? {
            Some(frame) => frame.expect(kind),
            None => Err(ProtocolError::Closed),
        }
    }
}

/// Outbound half of an authenticated connection.
pub struct FrameWriter<W> {
    inner: W,
    key: Arc<KeyPair>,
    next_seq: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, key: Arc<KeyPair>) -> Self {
        Self {
            inner,
            key,
            next_seq: 1,
        }
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub async fn send(&mut self, kind: FrameKind, payload: Value) -> Result<Frame, ProtocolError> {
        let mut frame = Frame::new(kind, self.next_seq, payload);
        frame.sign(&self.key);
        self.next_seq += 1;
        write_frame(&mut self.inner, &frame).await?;
        Ok(frame)
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_envelope_has_exactly_one_key() {
        let data = serde_json::to_value(ReplyEnvelope::Data(json!([1, 2]))).unwrap();
        assert_eq!(data, json!({"data": [1, 2]}));

        let error = serde_json::to_value(ReplyEnvelope::error(MALFORMED_REQUEST)).unwrap();
        assert_eq!(
            error,
            json!({"error": {"message": "Request missing required field(s)."}})
        );

        let traced: ReplyEnvelope = serde_json::from_value(
            json!({"error": {"message": "boom", "traceback": "at handler"}}),
        )
        .unwrap();
        assert_eq!(
            traced.into_result().unwrap_err().traceback.as_deref(),
            Some("at handler")
        );
    }

    #[test]
    fn tampered_frames_fail_verification() {
        let key = KeyPair::generate();
        let mut frame = Frame::new(FrameKind::Request, 1, json!({"command": "api"}));
        frame.sign(&key);
        assert!(frame.verify(&key.public()));

        frame.payload = json!({"command": "stop_suite"});
        assert!(!frame.verify(&key.public()));
    }

    #[test]
    fn event_payload_is_base64_in_json() {
        let event = Event::new(SHUTDOWN_TOPIC, "Stopped by operator");
        let value = event.to_value();
        assert_eq!(value["topic"], json!("c2h1dGRvd24="));
        let back = Event::from_value(&value).unwrap();
        assert!(back.is_shutdown());
        assert_eq!(back.payload, b"Stopped by operator");
    }

    #[tokio::test]
    async fn reader_rejects_replayed_sequence() {
        let key = Arc::new(KeyPair::generate());
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client, key.clone());
        let mut reader = FrameReader::new(server);

        let first = writer.send(FrameKind::Hello, json!({})).await.unwrap();
        let opened = reader.next_unverified().await.unwrap().unwrap();
        reader.accept(opened, key.public()).unwrap();

        let mut replay = first.clone();
        replay.msg_type = FrameKind::Request;
        replay.sign(&key);
        write_frame(&mut writer.inner, &replay).await.unwrap();
        assert!(matches!(
            reader.next().await,
            Err(ProtocolError::Replay { last: 1, got: 1 })
        ));
    }

    #[tokio::test]
    async fn endless_line_is_cut_off_at_the_frame_cap() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let feeder = tokio::spawn(async move {
            let chunk = vec![b'x'; 64 * 1024];
            for _ in 0..(MAX_FRAME_BYTES / chunk.len() + 128) {
                if client.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });
        let mut reader = FrameReader::new(server);
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            reader.next_unverified(),
        )
        .await
        .expect("reader kept buffering past the cap");
        assert!(matches!(outcome, Err(ProtocolError::FrameTooLarge)));
        drop(reader);
        feeder.abort();
    }

    #[tokio::test]
    async fn line_limit_applies_before_the_newline_arrives() {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(&[b'{'; 100]).await.unwrap();
        let mut reader = BufReader::new(server);
        assert!(matches!(
            read_frame_within(&mut reader, 32).await,
            Err(ProtocolError::FrameTooLarge)
        ));

        let (mut client, server) = tokio::io::duplex(4096);
        let hello = r#"{"msg_type":"HELLO","msg_id":"m","seq":1,"ts":0,"payload":{}}"#;
        client.write_all(format!("{hello}\n").as_bytes()).await.unwrap();
        let mut reader = BufReader::new(server);
        let frame = read_frame_within(&mut reader, 256).await.unwrap().unwrap();
        assert_eq!(frame.msg_type, FrameKind::Hello);
    }

    #[tokio::test]
    async fn reader_reports_eof() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = FrameReader::new(server);
        assert!(reader.next_unverified().await.unwrap().is_none());
    }
}
