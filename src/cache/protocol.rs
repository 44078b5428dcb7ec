//! Memcached text protocol client
//!
//! Just enough of the protocol for the remote store: `get`, `set` and
//! `delete`, with per-endpoint connection reuse and key-based routing over
//! several endpoints.

use std::borrow::Cow;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CacheError, Result};

// == Protocol Constants ==
/// Longest key memcached accepts
const MAX_KEY_LENGTH: usize = 250;

/// Expiration times above this many seconds are read by memcached as Unix
/// timestamps rather than offsets
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Idle connections kept per endpoint
const MAX_IDLE_CONNECTIONS: usize = 8;

type Connection = BufStream<TcpStream>;

// == Wire Types ==
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Get(&'a str),
    Set {
        key: &'a str,
        value: &'a [u8],
        expiration: u64,
    },
    Delete(&'a str),
}

#[derive(Debug, PartialEq)]
enum Reply {
    Value(Option<Vec<u8>>),
    Stored,
    Deleted,
    NotFound,
}

// == Endpoint ==
struct Endpoint {
    addr: String,
    idle: Mutex<Vec<Connection>>,
}

impl Endpoint {
    async fn checkout(&self, timeout: Duration) -> Result<Connection> {
        if let Some(conn) = self.idle.lock().await.pop() {
            return Ok(conn);
        }

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| unavailable(&self.addr, "connect timed out"))?
            .map_err(|e| unavailable(&self.addr, e))?;
        debug!("connected to memcached at {}", self.addr);
        Ok(BufStream::new(stream))
    }

    async fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }
}

// == Memcached Client ==
/// Client for one or more memcached endpoints.
pub struct MemcachedClient {
    endpoints: Vec<Endpoint>,
    timeout: Duration,
}

impl MemcachedClient {
    /// Creates a client for a comma-separated `host:port` list.
    ///
    /// No connection is made until the first command.
    pub fn new(endpoints: &str, timeout: Duration) -> Result<Self> {
        let endpoints: Vec<Endpoint> = endpoints
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(|addr| Endpoint {
                addr: addr.to_string(),
                idle: Mutex::new(Vec::new()),
            })
            .collect();

        if endpoints.is_empty() {
            return Err(CacheError::InvalidOption {
                name: "endpoints".to_string(),
                reason: "no memcached endpoint configured".to_string(),
            });
        }

        Ok(Self { endpoints, timeout })
    }

    /// Configured endpoint addresses, in order.
    pub fn endpoints(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.addr.as_str()).collect()
    }

    // == Get ==
    /// Fetches `key`, `None` on a cache miss.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = wire_key(key);
        match self.call(&key, Command::Get(&key)).await? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl` seconds (0 never expires).
    pub async fn set(&self, key: &str, value: &[u8], ttl: u64) -> Result<()> {
        let key = wire_key(key);
        let command = Command::Set {
            key: &key,
            value,
            expiration: expiration(ttl, chrono::Utc::now().timestamp()),
        };
        match self.call(&key, command).await? {
            Reply::Stored => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    // == Delete ==
    /// Deletes `key`. Returns false if the key was not present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let key = wire_key(key);
        match self.call(&key, Command::Delete(&key)).await? {
            Reply::Deleted => Ok(true),
            Reply::NotFound => Ok(false),
            other => Err(unexpected(&other)),
        }
    }

    async fn call(&self, key: &str, command: Command<'_>) -> Result<Reply> {
        let endpoint = &self.endpoints[endpoint_index(key, self.endpoints.len())];
        let mut conn = endpoint.checkout(self.timeout).await?;

        let reply = tokio::time::timeout(self.timeout, roundtrip(&mut conn, &command))
            .await
            .map_err(|_| unavailable(&endpoint.addr, "request timed out"))?
            .map_err(|e| unavailable(&endpoint.addr, e))?;

        // Only connections that completed a full exchange are reused.
        endpoint.checkin(conn).await;
        reply
    }
}

// == Wire Helpers ==
/// Writes `command` and reads its reply.
///
/// The outer `io::Result` carries transport failures; the inner `Result`
/// carries error replies from the server.
async fn roundtrip<S>(conn: &mut S, command: &Command<'_>) -> std::io::Result<Result<Reply>>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    match command {
        Command::Get(key) => {
            conn.write_all(format!("get {}\r\n", key).as_bytes()).await?;
        }
        Command::Set {
            key,
            value,
            expiration,
        } => {
            let header = format!("set {} 0 {} {}\r\n", key, expiration, value.len());
            conn.write_all(header.as_bytes()).await?;
            conn.write_all(value).await?;
            conn.write_all(b"\r\n").await?;
        }
        Command::Delete(key) => {
            conn.write_all(format!("delete {}\r\n", key).as_bytes()).await?;
        }
    }
    conn.flush().await?;

    let line = read_line(conn).await?;
    let reply = match (command, line.as_str()) {
        (Command::Get(_), "END") => Ok(Reply::Value(None)),
        (Command::Get(_), line) if line.starts_with("VALUE ") => {
            let len = value_length(line)?;
            let mut data = vec![0u8; len + 2];
            conn.read_exact(&mut data).await?;
            data.truncate(len);

            let end = read_line(conn).await?;
            if end != "END" {
                return Err(invalid_data(format!("expected END, got '{}'", end)));
            }
            Ok(Reply::Value(Some(data)))
        }
        (Command::Set { .. }, "STORED") => Ok(Reply::Stored),
        (Command::Delete(_), "DELETED") => Ok(Reply::Deleted),
        (Command::Delete(_), "NOT_FOUND") => Ok(Reply::NotFound),
        (_, line) => Err(CacheError::BackendUnavailable(format!(
            "unexpected reply '{}'",
            line
        ))),
    };
    Ok(reply)
}

async fn read_line<S>(conn: &mut S) -> std::io::Result<String>
where
    S: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if conn.read_line(&mut line).await? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Extracts `<bytes>` from `VALUE <key> <flags> <bytes> [<cas>]`.
fn value_length(line: &str) -> std::io::Result<usize> {
    line.split_whitespace()
        .nth(3)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| invalid_data(format!("malformed VALUE line '{}'", line)))
}

/// Returns `key` unchanged when memcached accepts it, otherwise a fixed
/// length digest of it.
fn wire_key(key: &str) -> Cow<'_, str> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key.bytes().all(|b| b.is_ascii_graphic());
    if valid {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("sha256:{}", hex::encode(Sha256::digest(key.as_bytes()))))
    }
}

/// Picks the endpoint owning `key`. Stable across processes.
fn endpoint_index(key: &str, endpoints: usize) -> usize {
    if endpoints <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % endpoints as u64) as usize
}

/// Converts a TTL to memcached's expiration field.
fn expiration(ttl: u64, now: i64) -> u64 {
    let ttl = ttl.min(super::MAX_TTL);
    if ttl > MAX_RELATIVE_EXPIRATION {
        (now.max(0) as u64).saturating_add(ttl)
    } else {
        ttl
    }
}

fn unavailable(addr: &str, reason: impl std::fmt::Display) -> CacheError {
    CacheError::BackendUnavailable(format!("{}: {}", addr, reason))
}

fn unexpected(reply: &Reply) -> CacheError {
    CacheError::BackendUnavailable(format!("unexpected reply {:?}", reply))
}

fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}
