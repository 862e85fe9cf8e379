//! Redis / KeyDB backend.
//!
//! Batches run as `MULTI`/`EXEC` transactions on one pooled connection, so a
//! session and its ticket index become visible together.

use fred::clients::Pool;
use fred::interfaces::{ClientLike, KeysInterface, TransactionInterface};
use fred::types::config::{Config, ReconnectPolicy, ServerConfig, TlsConnector};
use fred::types::{Builder, Value};

use super::{BatchOp, BatchReply, KvBackend};
use crate::error::Error;

/// Connection settings for [`RedisBackend::connect`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `host:port`, optionally with a `redis://` or `rediss://` scheme.
    pub endpoint: String,
    pub tls: bool,
    /// Name of the environment variable holding the password, if any.
    pub auth_token_env: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:6379".into(),
            tls: false,
            auth_token_env: "CAS_REDIS_PASSWORD".into(),
            pool_size: 4,
        }
    }
}

impl RedisConfig {
    /// Read settings from the environment.
    ///
    /// - `CAS_REDIS_URL`: endpoint (default `127.0.0.1:6379`); a `rediss://`
    ///   scheme turns TLS on
    /// - `CAS_REDIS_TLS`: `"1"` or `"true"` to force TLS
    /// - `CAS_REDIS_AUTH_TOKEN_ENV`: name of the password variable
    ///   (default `CAS_REDIS_PASSWORD`)
    /// - `CAS_REDIS_POOL_SIZE`: connections in the pool (default 4)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pool size is not a positive integer.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CAS_REDIS_URL") {
            config.tls = url.starts_with("rediss://");
            config.endpoint = url;
        }
        if matches!(std::env::var("CAS_REDIS_TLS").as_deref(), Ok("1") | Ok("true")) {
            config.tls = true;
        }
        if let Ok(name) = std::env::var("CAS_REDIS_AUTH_TOKEN_ENV") {
            config.auth_token_env = name;
        }
        if let Ok(size) = std::env::var("CAS_REDIS_POOL_SIZE") {
            config.pool_size = size
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::Config(format!("CAS_REDIS_POOL_SIZE: invalid value {size:?}")))?;
        }

        Ok(config)
    }
}

/// [`KvBackend`] over a `fred` connection pool.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Wrap an already initialised pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build, connect and PING-verify a pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed endpoint and [`Error::Redis`]
    /// if the server cannot be reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, Error> {
        let auth_token = std::env::var(&config.auth_token_env).ok();

        let endpoint = config
            .endpoint
            .trim_start_matches("rediss://")
            .trim_start_matches("redis://");
        let (host, port) = parse_host_port(endpoint)?;

        let mut fred_config = Config {
            server: ServerConfig::new_centralized(host, port),
            ..Config::default()
        };
        if config.tls {
            fred_config.tls = Some(TlsConnector::default_rustls()?.into());
        }
        if let Some(token) = auth_token {
            fred_config.password = Some(token);
        }

        let mut builder = Builder::from_config(fred_config);
        builder.set_policy(ReconnectPolicy::new_exponential(0, 100, 30_000, 2));

        let pool = builder.build_pool(config.pool_size)?;
        pool.init().await?;
        let _: String = pool.ping(None).await?;

        tracing::info!(
            host,
            port,
            tls = config.tls,
            pool_size = config.pool_size,
            "session backend connected"
        );

        Ok(Self::new(pool))
    }
}

impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.pool.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<bool, Error> {
        let reply: Option<String> = self.pool.set(key, value, None, None, false).await?;
        Ok(reply.is_some())
    }

    async fn expire_at(&self, key: &str, at: i64) -> Result<bool, Error> {
        let applied: i64 = self.pool.expire_at(key, at, None).await?;
        Ok(applied == 1)
    }

    async fn del(&self, key: &str) -> Result<u64, Error> {
        Ok(self.pool.del(key).await?)
    }

    async fn batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchReply>, Error> {
        let trx = self.pool.next().multi();
        for op in ops {
            match op {
                BatchOp::Set { key, value } => {
                    let _: () = trx
                        .set(key.as_str(), value.as_str(), None, None, false)
                        .await?;
                }
                BatchOp::ExpireAt { key, at } => {
                    let _: () = trx.expire_at(key.as_str(), *at, None).await?;
                }
                BatchOp::Del { key } => {
                    let _: () = trx.del(key.as_str()).await?;
                }
            }
        }

        let values: Vec<Value> = trx.exec(false).await?;
        tracing::trace!(commands = ops.len(), "transaction executed");
        Ok(ops
            .iter()
            .zip(values)
            .map(|(op, value)| reply_for(op, &value))
            .collect())
    }
}

/// Interpret one `EXEC` result according to the command that produced it.
fn reply_for(op: &BatchOp, value: &Value) -> BatchReply {
    match op {
        BatchOp::Set { .. } => match value.as_str() {
            Some(s) if s == "OK" => BatchReply::Ok,
            _ => BatchReply::Failed(format!("{value:?}")),
        },
        BatchOp::ExpireAt { .. } => value
            .as_i64()
            .map(|n| n == 1)
            .or_else(|| value.as_bool())
            .map_or_else(|| BatchReply::Failed(format!("{value:?}")), BatchReply::Applied),
        BatchOp::Del { .. } => value
            .as_u64()
            .map_or_else(|| BatchReply::Failed(format!("{value:?}")), BatchReply::Removed),
    }
}

/// Parse a `host:port` string. If the port is omitted, defaults to `6379`.
fn parse_host_port(endpoint: &str) -> Result<(&str, u16), Error> {
    let endpoint = endpoint.split('/').next().unwrap_or(endpoint);

    if let Some((host, port_str)) = endpoint.rsplit_once(':') {
        let port: u16 = port_str
            .parse()
            .map_err(|_| Error::Config(format!("invalid port in endpoint: {endpoint}")))?;
        Ok((host, port))
    } else {
        Ok((endpoint, 6379))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("redis.local:6380").unwrap();
        assert_eq!(host, "redis.local");
        assert_eq!(port, 6380);
    }

    #[test]
    fn parse_host_port_default() {
        let (host, port) = parse_host_port("redis.local").unwrap();
        assert_eq!(host, "redis.local");
        assert_eq!(port, 6379);
    }

    #[test]
    fn parse_host_port_strips_path() {
        let (host, port) = parse_host_port("redis.local:6381/0").unwrap();
        assert_eq!(host, "redis.local");
        assert_eq!(port, 6381);
    }

    #[test]
    fn parse_host_port_bad_port() {
        assert!(matches!(
            parse_host_port("redis.local:sixty"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn set_reply_mapping() {
        let op = BatchOp::set("k", "v");
        assert_eq!(reply_for(&op, &Value::from("OK")), BatchReply::Ok);
        assert!(matches!(reply_for(&op, &Value::Null), BatchReply::Failed(_)));
    }

    #[test]
    fn expire_reply_mapping() {
        let op = BatchOp::expire_at("k", 1);
        assert_eq!(reply_for(&op, &Value::Integer(1)), BatchReply::Applied(true));
        assert_eq!(reply_for(&op, &Value::Integer(0)), BatchReply::Applied(false));
        assert_eq!(reply_for(&op, &Value::Boolean(true)), BatchReply::Applied(true));
    }

    #[test]
    fn del_reply_mapping() {
        let op = BatchOp::del("k");
        assert_eq!(reply_for(&op, &Value::Integer(1)), BatchReply::Removed(1));
        assert_eq!(reply_for(&op, &Value::Integer(0)), BatchReply::Removed(0));
    }

    #[test]
    fn default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.endpoint, "127.0.0.1:6379");
        assert!(!config.tls);
        assert_eq!(config.pool_size, 4);
    }
}
