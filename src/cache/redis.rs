use std::time::Duration;

use async_trait::async_trait;
use redis::{
    ConnectionInfo, IntoConnectionInfo, aio::MultiplexedConnection, cluster::ClusterClient,
    cluster_async::ClusterConnection,
};

use super::{error::CacheResult, traits::Cache};
use crate::config::RedisCacheConfig;

/// A wrapper enum for either a standalone or cluster Redis connection.
enum RedisConn {
    Standalone(MultiplexedConnection),
    Cluster(ClusterConnection),
}

/// Execute a Redis command on either connection type.
macro_rules! redis_cmd {
    ($conn:expr, $cmd:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $cmd.query_async(c).await,
            RedisConn::Cluster(ref mut c) => $cmd.query_async(c).await,
        }
    };
}

/// Execute a Redis script on either connection type.
macro_rules! redis_script {
    ($conn:expr, $script:expr) => {
        match $conn {
            RedisConn::Standalone(ref mut c) => $script.invoke_async(c).await,
            RedisConn::Cluster(ref mut c) => $script.invoke_async(c).await,
        }
    };
}

/// Lua script for atomic compare-and-swap.
/// ARGV: [has_expected (0/1), expected, new, ttl_ms]. Returns 1 if swapped.
///
/// `GET` on a missing or expired key returns `false` in Lua, which is how
/// "absent" is distinguished from an empty string.
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local key = KEYS[1]
local has_expected = ARGV[1] == '1'
local expected = ARGV[2]
local new_value = ARGV[3]
local ttl_ms = tonumber(ARGV[4])

local current = redis.call('GET', key)

if has_expected then
    if current == false or current ~= expected then
        return 0
    end
elseif current ~= false then
    return 0
end

if ttl_ms > 0 then
    redis.call('SET', key, new_value, 'PX', ttl_ms)
else
    redis.call('SET', key, new_value)
end
return 1
"#;

enum RedisConnection {
    Standalone(redis::Client),
    Cluster(ClusterClient),
}

/// Redis-backed store shared by every service instance.
pub struct RedisCache {
    connection: RedisConnection,
    key_prefix: String,
    connect_timeout: Duration,
}

impl RedisCache {
    pub async fn from_config(config: &RedisCacheConfig) -> CacheResult<Self> {
        let connection = if config.url.starts_with("redis+cluster://") {
            // e.g., "redis+cluster://host1:6379,host2:6379"
            let nodes: Vec<ConnectionInfo> = config
                .url
                .trim_start_matches("redis+cluster://")
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| format!("redis://{s}").into_connection_info())
                .collect::<Result<Vec<_>, _>>()?;

            if nodes.is_empty() {
                return Err(super::error::CacheError::Redis(redis::RedisError::from((
                    redis::ErrorKind::InvalidClientConfig,
                    "No cluster nodes specified in URL",
                ))));
            }

            let client = redis::cluster::ClusterClientBuilder::new(nodes)
                .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
                .build()?;
            RedisConnection::Cluster(client)
        } else {
            let client = redis::Client::open(config.url.as_str())?;
            RedisConnection::Standalone(client)
        };

        let cache = Self {
            connection,
            key_prefix: config.key_prefix.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        };

        // Fail at startup rather than on the first request
        let mut conn = cache.get_connection().await?;
        let _: String = redis_cmd!(conn, redis::cmd("PING"))?;

        Ok(cache)
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> CacheResult<RedisConn> {
        let connect = async {
            let conn: CacheResult<RedisConn> = match &self.connection {
                RedisConnection::Standalone(client) => {
                    let conn = client.get_multiplexed_async_connection().await?;
                    Ok(RedisConn::Standalone(conn))
                }
                RedisConnection::Cluster(client) => {
                    let conn = client.get_async_connection().await?;
                    Ok(RedisConn::Cluster(conn))
                }
            };
            conn
        };

        tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| super::error::CacheError::Timeout(self.connect_timeout))?
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let data: Option<Vec<u8>> = redis_cmd!(conn, redis::cmd("GET").arg(&full_key))?;

        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        if ttl.as_millis() > 0 {
            let _: () = redis_cmd!(
                conn,
                redis::cmd("SET")
                    .arg(&full_key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
            )?;
        } else {
            let _: () = redis_cmd!(conn, redis::cmd("SET").arg(&full_key).arg(value))?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let _: () = redis_cmd!(conn, redis::cmd("DEL").arg(&full_key))?;

        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Duration,
    ) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let swapped: i64 = redis_script!(
            conn,
            redis::Script::new(COMPARE_AND_SWAP_SCRIPT)
                .key(&full_key)
                .arg(if expected.is_some() { "1" } else { "0" })
                .arg(expected.unwrap_or_default())
                .arg(new)
                .arg(ttl.as_millis() as u64)
        )?;

        Ok(swapped == 1)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
