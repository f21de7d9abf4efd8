//! NNTP client with TLS and plaintext transport
//!
//! One [`NntpClient`] is one server session: connect, authenticate, select a
//! group, stream overview lines. Sessions are pooled by
//! [`crate::pool::NntpPool`] and leased exclusively for one chunk at a time.

mod auth;
mod connection;
mod group_ops;
mod io;
mod stream;

pub use stream::NntpStream;

use crate::commands::GroupInfo;
use crate::config::ServerConfig;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::debug;

/// Authentication state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    /// Connected, greeting read, not yet authenticated
    Ready,
    /// AUTHINFO exchange in flight
    InProgress,
    /// AUTHINFO accepted
    Authenticated,
}

/// Async NNTP session
///
/// # Example
///
/// ```no_run
/// use usenet_index::{NntpClient, ServerConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> usenet_index::Result<()> {
/// let config = ServerConfig::tls("news.example.com", "user", "pass");
/// let mut client = NntpClient::connect(Arc::new(config)).await?;
/// client.authenticate().await?;
///
/// let info = client.select_group("alt.binaries.test").await?;
/// let lines = client.xover_lines(info.first, info.first + 99).await?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct NntpClient {
    /// Buffered stream (plain TCP or TLS)
    stream: BufReader<NntpStream>,
    /// Authentication state
    state: ConnectionState,
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Currently selected newsgroup with its GROUP response
    current_group: Option<(String, GroupInfo)>,
    /// Whether this session hit a transport fault and must be discarded
    is_broken: bool,
}

impl NntpClient {
    /// Check if this session is broken and should be discarded by the pool
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Mark this session as broken
    pub(crate) fn mark_broken(&mut self) {
        self.is_broken = true;
    }

    /// Get the currently selected newsgroup, if any
    pub fn current_group(&self) -> Option<&str> {
        self.current_group.as_ref().map(|(name, _)| name.as_str())
    }

    /// Check if the session is authenticated
    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, ConnectionState::Authenticated)
    }
}

impl Drop for NntpClient {
    fn drop(&mut self) {
        debug!(host = %self.config.host, "NntpClient dropped");
    }
}
