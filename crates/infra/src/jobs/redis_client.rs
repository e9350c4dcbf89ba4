//! Redis implementation of [`ListClient`] (feature `redis`).

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo, RedisResult};
use tokio::sync::OnceCell;
use tokio::time::timeout;

use super::list_store::ListClient;
use super::store::JobStoreError;

/// List client talking to a Redis-compatible server.
///
/// Every command (connect included) is bounded by `timeout`; a slow or
/// unreachable server surfaces as `JobStoreError::Unavailable`.
///
/// One connection is opened on first use and shared by every clone; it
/// reconnects by itself after the server drops it. A failed first connect is
/// not remembered, the next command tries again.
#[derive(Clone)]
pub struct RedisListClient {
    client: redis::Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    timeout: Duration,
}

impl fmt::Debug for RedisListClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisListClient")
            .field("connected", &self.connection.initialized())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisListClient {
    /// `token`, when given, is sent as the connection password.
    pub fn new(url: &str, token: Option<&str>, timeout: Duration) -> RedisResult<Self> {
        let mut info = url.into_connection_info()?;
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            info.redis.password = Some(token.to_string());
        }

        Ok(Self {
            client: redis::Client::open(info)?,
            connection: Arc::new(OnceCell::new()),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, JobStoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| {
                self.bounded("CONNECT", ConnectionManager::new(self.client.clone()))
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T>(
        &self,
        command: &str,
        fut: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, JobStoreError> {
        match timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(JobStoreError::unavailable(format!(
                "redis {} failed: {}",
                command, e
            ))),
            Err(_) => Err(JobStoreError::unavailable(format!(
                "redis {} timed out after {:?}",
                command, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl ListClient for RedisListClient {
    async fn lpush(&self, key: &str, value: String) -> Result<(), JobStoreError> {
        let mut conn = self.connection().await?;
        self.bounded("LPUSH", conn.lpush::<_, _, i64>(key, value))
            .await?;
        Ok(())
    }

    async fn rpoplpush(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, JobStoreError> {
        let mut conn = self.connection().await?;
        self.bounded(
            "RPOPLPUSH",
            conn.rpoplpush::<_, _, Option<String>>(source, destination),
        )
        .await
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, JobStoreError> {
        let mut conn = self.connection().await?;
        self.bounded("LRANGE", conn.lrange::<_, Vec<String>>(key, 0, -1))
            .await
    }

    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, JobStoreError> {
        let mut conn = self.connection().await?;
        let removed = self
            .bounded("LREM", conn.lrem::<_, _, i64>(key, 1, value))
            .await?;
        Ok(removed > 0)
    }

    async fn llen(&self, key: &str) -> Result<usize, JobStoreError> {
        let mut conn = self.connection().await?;
        self.bounded("LLEN", conn.llen::<_, usize>(key)).await
    }

    async fn del(&self, keys: &[&str]) -> Result<(), JobStoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        self.bounded("DEL", conn.del::<_, i64>(keys.to_vec())).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_becomes_the_password() {
        let client = RedisListClient::new(
            "redis://cache.internal:6379",
            Some("s3cret"),
            Duration::from_millis(100),
        )
        .unwrap();

        let info = client.client.get_connection_info();
        assert_eq!(info.redis.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(RedisListClient::new("not a url", None, Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Port 1 on localhost refuses connections.
        let client =
            RedisListClient::new("redis://127.0.0.1:1", None, Duration::from_millis(200)).unwrap();

        assert!(matches!(
            client.llen("queue:x").await,
            Err(JobStoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn failed_connect_is_retried_on_the_next_command() {
        let client =
            RedisListClient::new("redis://127.0.0.1:1", None, Duration::from_millis(200)).unwrap();
        let clone = client.clone();

        assert!(client.llen("queue:x").await.is_err());
        assert!(!client.connection.initialized());

        assert!(matches!(
            clone.lrange_all("queue:x").await,
            Err(JobStoreError::Unavailable(_))
        ));
        assert!(!clone.connection.initialized());
        assert!(Arc::ptr_eq(&client.connection, &clone.connection));
    }
}
