//! # Connection Pool
//!
//! Purpose: Reuse TCP connections for the async client to reduce handshake
//! latency and allocation churn, and own the client's lifecycle state.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections,
//!    never across an `.await`.
//! 3. **Bounded Waiting**: A semaphore caps connections in use; callers past
//!    the cap queue for a permit, bounded by the connect timeout when set.
//! 4. **Session Setup**: AUTH and SELECT run once per new connection.
//! 5. **Clean Framing**: A connection whose reply was never read is dropped,
//!    never reused.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::client::{ClientError, ClientResult, ConnectionStatus};
use crate::resp::{decode_response, encode_command, encode_u64, RespValue};

const STATUS_OPEN: u8 = 0;
const STATUS_CLOSING: u8 = 1;
const STATUS_CLOSED: u8 = 2;

/// Pool configuration for the async client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional read timeout applied to each response.
    pub read_timeout: Option<Duration>,
    /// Optional write timeout applied to each request.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout; also bounds the wait for a free slot.
    pub connect_timeout: Option<Duration>,
    /// Password sent with AUTH on every new connection.
    pub password: Option<String>,
    /// Logical database selected on every new connection.
    pub db: Option<u32>,
}

struct PoolInner {
    config: PoolConfig,
    idle: Mutex<VecDeque<Connection>>,
    slots: Arc<Semaphore>,
    status: AtomicU8,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool. No connection is opened yet.
    pub fn new(config: PoolConfig) -> Self {
        let idle = VecDeque::with_capacity(config.max_idle);
        let slots = Arc::new(Semaphore::new(config.max_total.min(Semaphore::MAX_PERMITS)));
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(idle),
                slots,
                status: AtomicU8::new(STATUS_OPEN),
            }),
        }
    }

    /// Server address this pool connects to.
    pub fn addr(&self) -> &str {
        &self.inner.config.addr
    }

    /// Acquires a connection from the pool, connecting if none is idle.
    ///
    /// Waits while every slot is in use. Fails with `PoolExhausted` if the
    /// wait outlasts the connect timeout, and with `Closed` if the pool shuts
    /// down meanwhile.
    pub async fn acquire(&self) -> ClientResult<PooledConnection> {
        if self.status() != ConnectionStatus::Open {
            return Err(ClientError::Closed);
        }

        let permit = self.acquire_permit().await?;

        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.clone(), conn, permit));
        }

        let conn = Connection::connect(&self.inner.config).await?;
        Ok(PooledConnection::new(self.clone(), conn, permit))
    }

    /// Reports the lifecycle state shared by every handle of this pool.
    pub fn status(&self) -> ConnectionStatus {
        match self.inner.status.load(Ordering::Acquire) {
            STATUS_OPEN => ConnectionStatus::Open,
            STATUS_CLOSING => ConnectionStatus::Closing,
            _ => ConnectionStatus::Closed,
        }
    }

    /// Moves the pool to `Closing` and hands back every idle connection.
    ///
    /// Callers waiting for a slot fail with `Closed`. Connections still in
    /// use are dropped when they are returned.
    pub fn shutdown(&self) -> Vec<Connection> {
        let _ = self.inner.status.compare_exchange(
            STATUS_OPEN,
            STATUS_CLOSING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.slots.close();
        let mut idle = self.inner.idle.lock();
        idle.drain(..).collect()
    }

    /// Marks the pool `Closed` once teardown has finished.
    pub fn mark_closed(&self) {
        self.inner.status.store(STATUS_CLOSED, Ordering::Release);
    }

    async fn acquire_permit(&self) -> ClientResult<OwnedSemaphorePermit> {
        let slots = Arc::clone(&self.inner.slots);
        let permit = match self.inner.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, slots.acquire_owned())
                .await
                .map_err(|_| ClientError::PoolExhausted)?,
            None => slots.acquire_owned().await,
        };
        permit.map_err(|_| ClientError::Closed)
    }

    fn pop_idle(&self) -> Option<Connection> {
        self.inner.idle.lock().pop_front()
    }

    fn return_connection(&self, conn: Connection) {
        let mut idle = self.inner.idle.lock();
        let open = self.inner.status.load(Ordering::Acquire) == STATUS_OPEN;
        if open && idle.len() < self.inner.config.max_idle {
            idle.push_back(conn);
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
///
/// Holds one pool slot for as long as it lives.
pub struct PooledConnection {
    pool: ConnectionPool,
    conn: Option<Connection>,
    valid: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(pool: ConnectionPool, conn: Connection, permit: OwnedSemaphorePermit) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
            _permit: permit,
        }
    }

    /// Executes a RESP command and returns the parsed response.
    pub async fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let conn = match self.conn.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::Closed),
        };
        // Stays false if this future is dropped with a reply in flight, or if
        // IO/protocol fails.
        self.valid = false;
        let response = conn.exec(args).await;
        self.valid = response.is_ok();
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.valid {
                self.pool.return_connection(conn);
            }
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Connection {
    async fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = with_timeout(config.connect_timeout, TcpStream::connect(config.addr.as_str())).await?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            stream,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: Vec::with_capacity(256),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        };

        if let Some(password) = config.password.as_deref() {
            conn.expect_ok(&[b"AUTH", password.as_bytes()]).await?;
        }
        if let Some(db) = config.db {
            let (digits, len) = encode_u64(u64::from(db));
            conn.expect_ok(&[b"SELECT", &digits[..len]]).await?;
        }

        Ok(conn)
    }

    pub async fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        with_timeout(self.write_timeout, self.stream.write_all(&self.write_buf)).await?;

        loop {
            if let Some(value) = decode_response(&mut self.read_buf)? {
                return Ok(value);
            }
            let read = with_timeout(self.read_timeout, self.stream.read_buf(&mut self.read_buf)).await?;
            if read == 0 {
                return Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
        }
    }

    async fn expect_ok(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        match self.exec(args).await? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> ClientResult<T>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "operation timed out"))?,
        None => fut.await,
    };
    Ok(result?)
}
