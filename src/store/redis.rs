use super::CounterStore;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::OnceCell;

/// Redis-backed counter store.
///
/// The multiplexed connection is opened on first use and reconnects on its
/// own afterwards.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                tracing::info!("Connecting to Redis");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;

        Ok(conn.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let count = redis::cmd("INCR").arg(key).query_async::<_, i64>(&mut conn).await?;
        Ok(count)
    }

    async fn expire_at(&self, key: &str, unix_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("EXPIREAT")
            .arg(key)
            .arg(unix_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn incr_with_expiry(&self, key: &str, unix_secs: u64) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;

        // MULTI/EXEC so the counter never exists without its expiry.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIREAT")
            .arg(key)
            .arg(unix_secs)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn sorted_add(&self, collection: &str, score: u64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("ZADD")
            .arg(collection)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("LPUSH")
            .arg(list)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_trim(&self, list: &str, start: isize, stop: isize) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("LTRIM")
            .arg(list)
            .arg(start)
            .arg(stop)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {}", pong)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_does_not_connect() {
        // Nothing listens here; construction must still succeed.
        assert!(RedisStore::new("redis://127.0.0.1:1").is_ok());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            RedisStore::new("not a url"),
            Err(StoreError::Redis(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_errors() {
        let store = RedisStore::new("redis://127.0.0.1:1").unwrap();
        assert!(store.ping().await.is_err());
    }
}
