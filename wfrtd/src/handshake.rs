//! Server side of the connection handshake shared by both channels.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;
use wfrt_common::protocol::{
    new_nonce, Challenge, FrameKind, FrameReader, FrameWriter, Hello, Proof, ProtocolError, Welcome,
};
use wfrt_common::{KeyPair, API_VERSION};

use crate::auth::{AuthError, AuthGate};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// An authenticated connection.
pub struct Session<R, W> {
    pub reader: FrameReader<R>,
    pub writer: FrameWriter<W>,
    pub user: String,
}

/// Run `HELLO -> CHALLENGE -> PROOF -> WELCOME`. Unknown keys get nothing
/// back; the caller drops the connection.
pub async fn accept_session<R, W>(
    read: R,
    write: W,
    domain: &str,
    gate: &AuthGate,
    server_key: Arc<KeyPair>,
    timeout: Duration,
) -> Result<Session<R, W>, AuthError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::time::timeout(timeout, handshake(read, write, domain, gate, server_key))
        .await
        .map_err(|_| AuthError::Timeout)?
}

async fn handshake<R, W>(
    read: R,
    write: W,
    domain: &str,
    gate: &AuthGate,
    server_key: Arc<KeyPair>,
) -> Result<Session<R, W>, AuthError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write, server_key);

    let hello = reader
        .next_unverified()
        .await?
        .ok_or(ProtocolError::Closed)?
        .expect(FrameKind::Hello)?;
    let greeting: Hello = hello.payload_as()?;
    if greeting.api_version != API_VERSION {
        return Err(AuthError::Version {
            expected: API_VERSION,
            got: greeting.api_version,
        });
    }
    // proves possession of the presented key before it is looked up
    reader.accept(hello, greeting.public_key)?;

    if gate.is_closed() {
        return Err(AuthError::Closed);
    }
    let user = gate
        .authorize(domain, &greeting.public_key)
        .ok_or_else(|| AuthError::UnknownKey(greeting.public_key.fingerprint()))?;

    let nonce = new_nonce();
    let challenge = Challenge {
        server_key: writer.key().public(),
        client_nonce: greeting.nonce,
        nonce: nonce.clone(),
    };
    writer.send(FrameKind::Challenge, to_payload(&challenge)?).await?;

    let proof: Proof = reader.expect(FrameKind::Proof).await?.payload_as()?;
    if proof.nonce != nonce {
        return Err(AuthError::NonceMismatch);
    }
    writer
        .send(FrameKind::Welcome, to_payload(&Welcome { user: user.clone() })?)
        .await?;
    debug!(domain, user = %user, "session established");
    Ok(Session { reader, writer, user })
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    Ok(serde_json::to_value(value)?)
}
