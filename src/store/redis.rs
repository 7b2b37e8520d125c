//! Redis-backed counter store.
//!
//! One client is built at startup and shared by every request. The
//! connection is a multiplexed, auto-reconnecting `ConnectionManager`,
//! established on first use so that a Redis outage at boot does not keep the
//! service from starting. Until the connection succeeds, each call reports
//! [`StoreError::Connection`] and the next call tries again.

use async_trait::async_trait;
use ::redis::aio::{ConnectionManager, ConnectionManagerConfig};
use ::redis::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::CounterStore;
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Counter store shared by every instance through Redis.
pub struct RedisStore {
    client: Client,
    /// Single connect attempt per call; the gate decides on failure
    manager_config: ConnectionManagerConfig,
    connection: OnceCell<ConnectionManager>,
    /// `host:port`, for logs only
    addr: String,
}

impl RedisStore {
    /// Build the client from configuration. Performs no network I/O.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config.redis_url();
        let client =
            Client::open(url.as_str()).map_err(|e| StoreError::InvalidAddress(e.to_string()))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(0)
            .set_connection_timeout(config.timeout());

        Ok(Self {
            client,
            manager_config,
            connection: OnceCell::new(),
            addr: config.addr(),
        })
    }

    /// The `host:port` this store talks to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!(addr = %self.addr, "Connecting to Redis");
                let manager = ConnectionManager::new_with_config(
                    self.client.clone(),
                    self.manager_config.clone(),
                )
                .await?;
                info!(addr = %self.addr, "Redis connection established");
                Ok::<_, StoreError>(manager)
            })
            .await?;

        // Clones share the same multiplexed connection.
        Ok(manager.clone())
    }

    /// Release the connection. Called once the server has stopped serving.
    pub async fn shutdown(self) {
        let connected = self.is_connected();
        drop(self.connection);
        info!(addr = %self.addr, connected, "Redis store released");
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let value: i64 = ::redis::cmd("INCR").arg(key).query_async(&mut conn).await?;

        u64::try_from(value)
            .map_err(|_| StoreError::Protocol(format!("INCR returned negative value {}", value)))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let updated: bool = ::redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;

        Ok(updated)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pong: String = ::redis::cmd("PING").query_async(&mut conn).await?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply {:?}", pong)))
        }
    }
}
