use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{cmd, Client, RedisError};
use tokio::sync::RwLock;

#[derive(Clone)]
pub(crate) struct RedisHandle {
    url: String,
    manager: Arc<RwLock<Option<ConnectionManager>>>,
}

#[derive(Debug, Clone)]
pub(crate) enum RedisHealth {
    Healthy,
    Disconnected,
    Unhealthy(String),
}

impl RedisHandle {
    pub(crate) fn new(url: String) -> Self {
        Self { url, manager: Arc::new(RwLock::new(None)) }
    }

    pub(crate) async fn connect(&self) -> Result<(), RedisError> {
        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        *guard = Some(manager);
        Ok(())
    }

    pub(crate) async fn disconnect(&self) {
        let mut guard = self.manager.write().await;
        *guard = None;
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.manager.read().await.is_some()
    }

    pub(crate) async fn health(&self) -> RedisHealth {
        let manager = { self.manager.read().await.clone() };
        let Some(mut manager) = manager else {
            return RedisHealth::Disconnected;
        };

        match cmd("PING").query_async::<_, String>(&mut manager).await {
            Ok(_) => RedisHealth::Healthy,
            Err(err) => RedisHealth::Unhealthy(err.to_string()),
        }
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut manager = self.connection().await?;
        cmd("GET").arg(key).query_async::<_, Option<String>>(&mut manager).await
    }

    /// `ttl_seconds == 0` stores the key without expiry.
    pub(crate) async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), RedisError> {
        let mut manager = self.connection().await?;
        let mut command = cmd("SET");
        command.arg(key).arg(value);
        if ttl_seconds > 0 {
            command.arg("EX").arg(ttl_seconds);
        }
        command.query_async::<_, ()>(&mut manager).await
    }

    /// `SET key value NX`; returns whether the key was written.
    pub(crate) async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, RedisError> {
        let mut manager = self.connection().await?;
        let mut command = cmd("SET");
        command.arg(key).arg(value).arg("NX");
        if ttl_seconds > 0 {
            command.arg("EX").arg(ttl_seconds);
        }
        let reply = command.query_async::<_, Option<String>>(&mut manager).await?;
        Ok(reply.is_some())
    }

    pub(crate) async fn del(&self, key: &str) -> Result<(), RedisError> {
        let mut manager = self.connection().await?;
        cmd("DEL").arg(key).query_async::<_, i64>(&mut manager).await?;
        Ok(())
    }

    /// Returns the shared connection, connecting first when none is held. A
    /// failed startup connect is therefore retried by the next command.
    async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        if let Some(manager) = self.manager.read().await.clone() {
            return Ok(manager);
        }

        let client = Client::open(self.url.clone())?;
        let manager = ConnectionManager::new(client).await?;
        let mut guard = self.manager.write().await;
        match guard.as_ref() {
            // A concurrent caller connected first.
            Some(existing) => Ok(existing.clone()),
            None => {
                tracing::info!("Redis connection established");
                *guard = Some(manager.clone());
                Ok(manager)
            }
        }
    }
}
