use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{WireReader, WireWriter};
use super::error::{NetError, Result};
use super::registry::{KindLease, KindRegistry, SecondaryKind};

pub type TcpReader = WireReader<BufReader<OwnedReadHalf>>;
pub type TcpWriter = WireWriter<BufWriter<OwnedWriteHalf>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Server key plus the identity this client announces
#[derive(Clone)]
pub struct Credentials {
    key: String,
    identity: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    /// Read timeout of request/response channels
    pub read_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(120)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Handshaking,
    Open,
}

/// Send credentials and await the remote's verdict.
pub async fn handshake<R, W>(
    reader: &mut WireReader<R>,
    writer: &mut WireWriter<W>,
    credentials: &Credentials,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.write_utf(&credentials.key).await?;
    writer.write_utf(&credentials.identity).await?;
    writer.flush().await?;

    if reader.read_bool().await? {
        Ok(())
    } else {
        let reason = reader.read_utf().await?;
        Err(NetError::Rejected(reason))
    }
}

/// An authenticated TCP channel in the OPEN state
pub struct Connection {
    endpoint: Endpoint,
    reader: TcpReader,
    writer: TcpWriter,
}

impl Connection {
    /// Connect and handshake. A rejection is returned as-is and never retried here.
    pub async fn open(
        endpoint: &Endpoint,
        credentials: &Credentials,
        options: &TransportOptions,
    ) -> Result<Self> {
        let stream = tokio::time::timeout(
            options.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| NetError::ConnectTimeout(endpoint.to_string()))?
        .map_err(|source| NetError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = WireReader::new(BufReader::new(read_half)).with_timeout(options.read_timeout);
        let mut writer = WireWriter::new(BufWriter::new(write_half));

        handshake(&mut reader, &mut writer, credentials).await?;
        debug!(%endpoint, "Handshake accepted");

        Ok(Self {
            endpoint: endpoint.clone(),
            reader,
            writer,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Both halves at once, for request/response exchanges.
    pub fn io_mut(&mut self) -> (&mut TcpReader, &mut TcpWriter) {
        (&mut self.reader, &mut self.writer)
    }

    pub fn into_split(self) -> (TcpReader, TcpWriter) {
        (self.reader, self.writer)
    }

    pub async fn close(mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// A dedicated channel tagged with its kind; the kind stays reserved while this lives.
pub struct SecondaryConnection {
    connection: Connection,
    lease: KindLease,
}

impl SecondaryConnection {
    pub fn kind(&self) -> SecondaryKind {
        self.lease.kind()
    }

    pub fn io_mut(&mut self) -> (&mut TcpReader, &mut TcpWriter) {
        self.connection.io_mut()
    }

    pub fn into_parts(self) -> (TcpReader, TcpWriter, KindLease) {
        let (reader, writer) = self.connection.into_split();
        (reader, writer, self.lease)
    }

    pub async fn close(self) -> Result<()> {
        let kind = self.kind();
        let result = self.connection.close().await;
        debug!(%kind, "Secondary connection closed");
        result
    }
}

struct PrimaryConnection {
    writer: TcpWriter,
    watcher: JoinHandle<()>,
}

/// Owns the primary connection and hands out secondary connections.
pub struct Connections {
    endpoint: Endpoint,
    credentials: Option<Credentials>,
    options: TransportOptions,
    registry: KindRegistry,
    primary: tokio::sync::Mutex<Option<PrimaryConnection>>,
    primary_state: Arc<Mutex<ConnectionState>>,
}

impl Connections {
    /// `credentials` is `None` when no server key is configured; every open then fails.
    pub fn new(endpoint: Endpoint, credentials: Option<Credentials>, options: TransportOptions) -> Self {
        Self {
            endpoint,
            credentials,
            options,
            registry: KindRegistry::new(),
            primary: tokio::sync::Mutex::new(None),
            primary_state: Arc::new(Mutex::new(ConnectionState::Closed)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn registry(&self) -> &KindRegistry {
        &self.registry
    }

    pub fn primary_state(&self) -> ConnectionState {
        *self.primary_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_primary_state(&self, state: ConnectionState) {
        set_state(&self.primary_state, state);
    }

    fn credentials(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(NetError::MissingKey)
    }

    /// Open the primary connection if it is not already open.
    ///
    /// Once open, a watcher reads heartbeats without a timeout until the remote goes away.
    pub async fn open_primary(&self) -> Result<()> {
        let mut primary = self.primary.lock().await;
        if primary.is_some() && self.primary_state() == ConnectionState::Open {
            return Ok(());
        }
        if let Some(stale) = primary.take() {
            stale.watcher.abort();
        }

        let credentials = self.credentials()?;
        self.set_primary_state(ConnectionState::Handshaking);
        let connection = match Connection::open(&self.endpoint, credentials, &self.options).await {
            Ok(connection) => connection,
            Err(err) => {
                self.set_primary_state(ConnectionState::Closed);
                return Err(err);
            }
        };

        let (mut reader, writer) = connection.into_split();
        reader.set_timeout(None);
        let state = Arc::clone(&self.primary_state);
        let endpoint = self.endpoint.clone();
        let watcher = tokio::spawn(async move {
            loop {
                if let Err(err) = reader.read_u8().await {
                    warn!(%endpoint, error = %err, "Primary connection lost");
                    set_state(&state, ConnectionState::Closed);
                    break;
                }
            }
        });

        self.set_primary_state(ConnectionState::Open);
        info!(endpoint = %self.endpoint, "Primary connection open");
        *primary = Some(PrimaryConnection { writer, watcher });
        Ok(())
    }

    pub async fn close_primary(&self) {
        if let Some(mut primary) = self.primary.lock().await.take() {
            primary.watcher.abort();
            let _ = primary.writer.shutdown().await;
        }
        self.set_primary_state(ConnectionState::Closed);
    }

    /// Open a fresh connection of the given kind.
    ///
    /// Fails fast with [`NetError::KindAlreadyOpen`] while another one of that kind is alive.
    pub async fn open_secondary(&self, kind: SecondaryKind) -> Result<SecondaryConnection> {
        let lease = self.registry.acquire(kind)?;
        let credentials = self.credentials()?;
        let mut connection = Connection::open(&self.endpoint, credentials, &self.options).await?;

        let (_, writer) = connection.io_mut();
        writer.write_u8(kind.as_byte()).await?;
        writer.flush().await?;
        debug!(%kind, endpoint = %self.endpoint, "Secondary connection open");

        Ok(SecondaryConnection { connection, lease })
    }
}

fn set_state(slot: &Mutex<ConnectionState>, state: ConnectionState) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = state;
}

/// Opens secondary connections of one fixed kind; handed to the task that needs them.
#[derive(Clone)]
pub struct SecondaryConnector {
    connections: Arc<Connections>,
    kind: SecondaryKind,
}

impl SecondaryConnector {
    pub fn new(connections: Arc<Connections>, kind: SecondaryKind) -> Self {
        Self { connections, kind }
    }

    pub fn kind(&self) -> SecondaryKind {
        self.kind
    }

    pub async fn open(&self) -> Result<SecondaryConnection> {
        self.connections.open_secondary(self.kind).await
    }
}
