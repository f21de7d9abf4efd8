//! Connection pooling for NNTP sessions using bb8
//!
//! Sessions are constructed lazily up to the pool cap, authenticated on
//! creation, and retain their selected group across leases. A session that
//! hits a transport fault is flagged broken and discarded instead of being
//! returned to the free list.

use crate::client::NntpClient;
use crate::config::ServerConfig;
use crate::error::{IndexError, Result};
use bb8::{Pool, PooledConnection};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and backoff behavior for transient failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,
    /// Backoff multiplier (exponential factor)
    pub backoff_multiplier: f64,
    /// Whether to randomize each delay by ±25%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry config that fails fast
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry `attempt` (0-based), with jitter applied
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);

        let ms = if self.jitter {
            // ±25% keeps simultaneous retries from re-colliding
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            base * factor
        } else {
            base
        };

        Duration::from_millis(ms as u64)
    }
}

/// Connection manager for the bb8 pool
pub struct NntpConnectionManager {
    config: Arc<ServerConfig>,
}

impl NntpConnectionManager {
    /// Create a new connection manager
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait::async_trait]
impl bb8::ManageConnection for NntpConnectionManager {
    type Connection = NntpClient;
    type Error = IndexError;

    async fn connect(&self) -> Result<Self::Connection> {
        let mut client = NntpClient::connect(self.config.clone()).await?;
        client.authenticate().await?;
        debug!("New pooled session ready for {}", self.config.host);
        Ok(client)
    }

    async fn is_valid(&self, _conn: &mut Self::Connection) -> Result<()> {
        // Liveness surfaces on first use; a dead socket fails the lease's
        // command and the session is discarded via has_broken
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_broken()
    }
}

/// NNTP connection pool
///
/// # Example
///
/// ```no_run
/// use usenet_index::{NntpPool, ServerConfig};
///
/// # async fn example() -> usenet_index::Result<()> {
/// let config = ServerConfig::tls("news.example.com", "user", "pass");
/// let pool = NntpPool::new(config, 10).await?;
///
/// let mut conn = pool.get().await?;
/// conn.select_group("alt.binaries.test").await?;
/// # Ok(())
/// # }
/// ```
pub struct NntpPool {
    pool: Pool<NntpConnectionManager>,
    retry_config: RetryConfig,
}

impl NntpPool {
    /// Create a pool of at most `max_size` sessions with default retries
    pub async fn new(config: ServerConfig, max_size: u32) -> Result<Self> {
        Self::with_retry_config(config, max_size, RetryConfig::default()).await
    }

    /// Create a pool with a custom retry configuration
    pub async fn with_retry_config(
        config: ServerConfig,
        max_size: u32,
        retry_config: RetryConfig,
    ) -> Result<Self> {
        debug!(
            "Creating NNTP pool for {}:{} (max size {}, max retries {})",
            config.host, config.port, max_size, retry_config.max_retries
        );

        let manager = NntpConnectionManager::new(config);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_secs(120))
            .idle_timeout(Some(Duration::from_secs(300)))
            .build(manager)
            .await
            .map_err(|e| IndexError::Other(format!("Failed to create pool: {}", e)))?;

        Ok(Self { pool, retry_config })
    }

    /// Lease a session, retrying construction failures with backoff
    ///
    /// # Errors
    ///
    /// [`IndexError::AuthFailed`] propagates immediately (retrying bad
    /// credentials only locks accounts); other construction failures are
    /// retried up to the configured limit.
    pub async fn get(&self) -> Result<PooledConnection<'_, NntpConnectionManager>> {
        let mut last_error = None;

        for attempt in 0..=self.retry_config.max_retries {
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(bb8::RunError::User(e @ IndexError::AuthFailed(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    let e = match e {
                        bb8::RunError::User(inner) => inner,
                        bb8::RunError::TimedOut => IndexError::Timeout,
                    };

                    if attempt < self.retry_config.max_retries {
                        let delay = self.retry_config.backoff_delay(attempt);
                        warn!(
                            "Failed to lease connection (attempt {}/{}), retrying in {:?}: {}",
                            attempt + 1,
                            self.retry_config.max_retries + 1,
                            delay,
                            e
                        );
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        Err(last_error.unwrap_or(IndexError::Timeout))
    }

    /// Current retry configuration
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Number of sessions currently leased out
    pub fn connections_in_use(&self) -> u32 {
        let state = self.pool.state();
        state.connections - state.idle_connections
    }

    /// Number of idle sessions available
    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }
}
