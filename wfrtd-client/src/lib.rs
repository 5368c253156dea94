//! wfrt client library
//!
//! Authenticated access to a running workflow: one request/reply session on
//! the command channel, or a topic subscription on the event channel.

pub mod scan;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use wfrt_common::protocol::{
    new_nonce, Challenge, Event, FrameReader, FrameWriter, Hello, Proof, ProtocolError, Subscribe,
    Welcome,
};
use wfrt_common::{
    ContactError, ContactFile, FrameKind, KeyError, KeyPair, PublicKey, ReplyEnvelope, ReplyError,
    RequestEnvelope, ServiceDir, API_VERSION,
};

pub use scan::{scan, WorkflowEntry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("workflow {0} is not running")]
    WorkflowStopped(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("connection rejected by server")]
    Rejected,
    #[error("timeout")]
    Timeout,
    #[error("session closed after an earlier failure")]
    SessionClosed,
    #[error("{}", .0.message)]
    Remote(ReplyError),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Where a workflow listens, from its contact file. Missing or corrupt
/// contact information means the workflow is not running.
pub fn get_location(run_dir: &Path, workflow: &str) -> Result<ContactFile> {
    let service = ServiceDir::new(run_dir, workflow);
    match ContactFile::load(&service.contact()) {
        Ok(contact) => Ok(contact),
        Err(err @ (ContactError::Missing | ContactError::Corrupt(_))) => {
            debug!(workflow, "no usable contact file: {}", err);
            Err(ClientError::WorkflowStopped(workflow.to_string()))
        }
        Err(ContactError::Io(err)) => Err(ClientError::Io(err)),
    }
}

/// The client's signing key and the server key it expects to talk to.
#[derive(Clone)]
pub struct Credentials {
    pub key: Arc<KeyPair>,
    pub server: PublicKey,
}

impl Credentials {
    pub fn new(key: KeyPair, server: PublicKey) -> Self {
        Self {
            key: Arc::new(key),
            server,
        }
    }

    /// The owner's client key and the server key from the service directory.
    pub fn load(run_dir: &Path, workflow: &str) -> Result<Self> {
        let service = ServiceDir::new(run_dir, workflow);
        Ok(Self::new(service.load_client_key()?, service.load_server_pub()?))
    }
}

struct Session {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    user: String,
}

async fn open_session(host: &str, port: u16, creds: &Credentials, limit: Duration) -> Result<Session> {
    timeout(limit, dial(host, port, creds))
        .await
        .map_err(|_| ClientError::Timeout)?
}

async fn dial(host: &str, port: u16, creds: &Credentials) -> Result<Session> {
    let stream = TcpStream::connect((host, port)).await?;
    handshake(stream, creds).await
}

async fn handshake(stream: TcpStream, creds: &Credentials) -> Result<Session> {
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write, creds.key.clone());

    let nonce = new_nonce();
    let hello = Hello {
        public_key: creds.key.public(),
        nonce: nonce.clone(),
        api_version: API_VERSION,
    };
    writer
        .send(FrameKind::Hello, serde_json::to_value(&hello).map_err(ProtocolError::from)?)
        .await?;

    // an unauthorised key gets the connection dropped without a word
    let frame = match reader.next_unverified().await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(ClientError::Rejected),
        Err(ProtocolError::Io(err)) if err.kind() == std::io::ErrorKind::ConnectionReset => {
            return Err(ClientError::Rejected)
        }
        Err(err) => return Err(err.into()),
    };
    let frame = reader.accept(frame.expect(FrameKind::Challenge)?, creds.server)?;
    let challenge: Challenge = frame.payload_as()?;
    if challenge.server_key != creds.server || challenge.client_nonce != nonce {
        warn!("server failed to prove its identity");
        return Err(ProtocolError::Handshake("challenge does not match".into()).into());
    }

    let proof = Proof {
        nonce: challenge.nonce,
    };
    writer
        .send(FrameKind::Proof, serde_json::to_value(&proof).map_err(ProtocolError::from)?)
        .await?;
    let welcome: Welcome = match reader.next().await? {
        Some(frame) => frame.expect(FrameKind::Welcome)?.payload_as()?,
        None => return Err(ClientError::Rejected),
    };
    debug!(user = %welcome.user, "session established");
    Ok(Session {
        reader,
        writer,
        user: welcome.user,
    })
}

/// One authenticated command-channel session. A timed-out or failed
/// exchange leaves the stream out of step, so the session is closed and
/// later calls return [`ClientError::SessionClosed`].
pub struct WorkflowClient {
    session: Session,
    timeout: Duration,
    broken: bool,
}

impl WorkflowClient {
    /// Connect to `workflow` as its owner.
    pub async fn connect(run_dir: &Path, workflow: &str) -> Result<Self> {
        let contact = get_location(run_dir, workflow)?;
        let creds = Credentials::load(run_dir, workflow)?;
        Self::connect_to(&contact.host, contact.port, &creds, DEFAULT_TIMEOUT).await
    }

    pub async fn connect_to(host: &str, port: u16, creds: &Credentials, limit: Duration) -> Result<Self> {
        let session = open_session(host, port, creds, limit).await?;
        Ok(Self {
            session,
            timeout: limit,
            broken: false,
        })
    }

    /// User label the server assigned to this session.
    pub fn user(&self) -> &str {
        &self.session.user
    }

    /// Send `payload` as-is and return the reply envelope.
    pub async fn request_raw(&mut self, payload: Value) -> Result<ReplyEnvelope> {
        if self.broken {
            return Err(ClientError::SessionClosed);
        }
        let outcome = match timeout(self.timeout, exchange(&mut self.session, payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout),
        };
        if let Err(err) = &outcome {
            warn!("closing session: {}", err);
            self.broken = true;
            let _ = self.session.writer.shutdown().await;
        }
        outcome
    }

    pub async fn request(&mut self, command: &str, args: Map<String, Value>) -> Result<ReplyEnvelope> {
        let envelope = RequestEnvelope {
            command: command.to_string(),
            args,
            meta: None,
        };
        let payload = serde_json::to_value(&envelope).map_err(ProtocolError::from)?;
        self.request_raw(payload).await
    }

    /// Like [`request`](Self::request) but turns an error reply into
    /// [`ClientError::Remote`]. `args` must be a JSON object or null.
    pub async fn call(&mut self, command: &str, args: Value) -> Result<Value> {
        let args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ClientError::InvalidResponse(format!(
                    "arguments must be an object, got {other}"
                )))
            }
        };
        self.request(command, args)
            .await?
            .into_result()
            .map_err(ClientError::Remote)
    }

    /// Run a query document and return its result.
    pub async fn query(&mut self, request: &str, variables: Option<Value>) -> Result<Value> {
        let mut args = json!({ "request_string": request });
        if let Some(variables) = variables {
            args["variables"] = variables;
        }
        self.call("query", args).await
    }

    pub async fn close(mut self) {
        let _ = self.session.writer.shutdown().await;
    }
}

async fn exchange(session: &mut Session, payload: Value) -> Result<ReplyEnvelope> {
    session.writer.send(FrameKind::Request, payload).await?;
    match session.reader.next().await? {
        Some(frame) => {
            let frame = frame.expect(FrameKind::Reply)?;
            serde_json::from_value::<ReplyEnvelope>(frame.payload)
                .map_err(|err| ClientError::InvalidResponse(err.to_string()))
        }
        None => Err(ClientError::InvalidResponse("connection closed before reply".into())),
    }
}

/// Decode a binary `data` value (base64 text).
pub fn decode_binary(value: &Value) -> Result<Vec<u8>> {
    let raw = value
        .as_str()
        .ok_or_else(|| ClientError::InvalidResponse("expected base64 string".into()))?;
    general_purpose::STANDARD
        .decode(raw)
        .map_err(|err| ClientError::InvalidResponse(err.to_string()))
}

/// An event-channel subscription.
pub struct Subscriber {
    session: Session,
    finished: bool,
}

impl Subscriber {
    /// Subscribe to events whose topic starts with one of `topics`; an empty
    /// list means every topic. Shutdown notices are always delivered.
    pub async fn connect(host: &str, pub_port: u16, creds: &Credentials, topics: &[&str]) -> Result<Self> {
        let mut session = open_session(host, pub_port, creds, DEFAULT_TIMEOUT).await?;
        let subscribe = Subscribe {
            topics: topics
                .iter()
                .map(|topic| general_purpose::STANDARD.encode(topic))
                .collect(),
        };
        session
            .writer
            .send(
                FrameKind::Subscribe,
                serde_json::to_value(&subscribe).map_err(ProtocolError::from)?,
            )
            .await?;
        Ok(Self {
            session,
            finished: false,
        })
    }

    pub async fn for_workflow(run_dir: &Path, workflow: &str, topics: &[&str]) -> Result<Self> {
        let contact = get_location(run_dir, workflow)?;
        let creds = Credentials::load(run_dir, workflow)?;
        Self::connect(&contact.host, contact.pub_port, &creds, topics).await
    }

    pub fn user(&self) -> &str {
        &self.session.user
    }

    /// Next event, or `None` once the channel has closed. The shutdown
    /// event is the last one returned.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        if self.finished {
            return Ok(None);
        }
        let Some(frame) = self.session.reader.next().await? else {
            self.finished = true;
            return Ok(None);
        };
        let event = Event::from_value(&frame.expect(FrameKind::Event)?.payload)?;
        if event.is_shutdown() {
            self.finished = true;
        }
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn contact(workflow: &str) -> ContactFile {
        ContactFile {
            workflow: workflow.to_string(),
            host: "127.0.0.1".to_string(),
            port: 43001,
            pub_port: 43100,
            api_version: API_VERSION,
            owner: "owner".to_string(),
            pid: 4242,
            server_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn location_comes_from_the_contact_file() {
        let run_dir = tempdir().unwrap();
        let service = ServiceDir::new(run_dir.path(), "flow");
        std::fs::create_dir_all(service.root()).unwrap();
        contact("flow").write(&service.contact()).unwrap();

        let found = get_location(run_dir.path(), "flow").unwrap();
        assert_eq!(found.port, 43001);
        assert_eq!(found.pub_port, 43100);
    }

    #[test]
    fn missing_or_corrupt_contact_means_stopped() {
        let run_dir = tempdir().unwrap();
        assert!(matches!(
            get_location(run_dir.path(), "flow"),
            Err(ClientError::WorkflowStopped(name)) if name == "flow"
        ));

        let service = ServiceDir::new(run_dir.path(), "flow");
        std::fs::create_dir_all(service.root()).unwrap();
        std::fs::write(service.contact(), "host = \"x\"\n").unwrap();
        assert!(matches!(
            get_location(run_dir.path(), "flow"),
            Err(ClientError::WorkflowStopped(_))
        ));
    }

    /// Completes the server side of the handshake and answers each request
    /// with `{"answer_to": <command>}`, the first one after `first_delay`.
    async fn slow_server(server_key: Arc<KeyPair>, first_delay: Duration) -> (u16, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, write) = stream.into_split();
            let mut reader = FrameReader::new(read);
            let mut writer = FrameWriter::new(write, server_key.clone());

            let hello = reader.next_unverified().await.unwrap().unwrap();
            let greeting: Hello = hello.payload_as().unwrap();
            reader.accept(hello, greeting.public_key).unwrap();
            let nonce = new_nonce();
            let challenge = Challenge {
                server_key: server_key.public(),
                client_nonce: greeting.nonce,
                nonce: nonce.clone(),
            };
            writer
                .send(FrameKind::Challenge, serde_json::to_value(&challenge).unwrap())
                .await
                .unwrap();
            reader.expect(FrameKind::Proof).await.unwrap();
            writer
                .send(FrameKind::Welcome, json!({"user": "owner"}))
                .await
                .unwrap();

            let mut delay = Some(first_delay);
            while let Ok(Some(frame)) = reader.next().await {
                if let Some(delay) = delay.take() {
                    tokio::time::sleep(delay).await;
                }
                let command = frame.payload["command"].clone();
                let reply = ReplyEnvelope::Data(json!({ "answer_to": command }));
                if writer
                    .send(FrameKind::Reply, serde_json::to_value(&reply).unwrap())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
        (port, task)
    }

    #[tokio::test]
    async fn late_reply_is_never_handed_to_the_next_request() {
        let server_key = Arc::new(KeyPair::generate());
        let (port, server) = slow_server(server_key.clone(), Duration::from_millis(400)).await;
        let creds = Credentials::new(KeyPair::generate(), server_key.public());
        let mut client = WorkflowClient::connect_to("127.0.0.1", port, &creds, Duration::from_millis(200))
            .await
            .unwrap();

        assert!(matches!(
            client.request("stop_suite", Map::new()).await,
            Err(ClientError::Timeout)
        ));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(matches!(
            client.request("api", Map::new()).await,
            Err(ClientError::SessionClosed)
        ));
        server.abort();
    }

    #[tokio::test]
    async fn prompt_replies_keep_the_session_open() {
        let server_key = Arc::new(KeyPair::generate());
        let (port, server) = slow_server(server_key.clone(), Duration::ZERO).await;
        let creds = Credentials::new(KeyPair::generate(), server_key.public());
        let mut client = WorkflowClient::connect_to("127.0.0.1", port, &creds, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(client.user(), "owner");

        for command in ["api", "query"] {
            let data = client.call(command, Value::Null).await.unwrap();
            assert_eq!(data, json!({ "answer_to": command }));
        }
        client.close().await;
        server.abort();
    }

    #[test]
    fn binary_data_is_base64() {
        assert_eq!(decode_binary(&json!("AAEC")).unwrap(), vec![0, 1, 2]);
        assert!(matches!(
            decode_binary(&json!(3)),
            Err(ClientError::InvalidResponse(_))
        ));
    }
}
