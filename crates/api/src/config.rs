use std::time::Duration;

/// Parse an env var, falling back to `default` when unset.
///
/// # Panics
///
/// Panics when the variable is set but unparsable -- misconfiguration
/// should fail fast at startup.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    ///
    /// Synchronous submissions are exempt (they wait up to the task's
    /// own timeout); the layer only guards the plain request/response
    /// endpoints.
    pub request_timeout_secs: u64,
    /// Graceful shutdown drain bound in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Delegate stream token configuration.
    pub stream_auth: StreamAuthConfig,
    /// Dispatch engine policy knobs.
    pub dispatch: DispatchConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            stream_auth: StreamAuthConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
        }
    }
}

/// Configuration for delegate stream token validation.
#[derive(Debug, Clone)]
pub struct StreamAuthConfig {
    /// HMAC-SHA256 secret used to verify delegate stream tokens.
    pub secret: String,
}

impl StreamAuthConfig {
    /// Load stream auth configuration from the environment.
    ///
    /// # Panics
    ///
    /// Panics if `STREAM_TOKEN_SECRET` is not set or is empty -- the
    /// delegate endpoint must never run unverified.
    pub fn from_env() -> Self {
        let secret = std::env::var("STREAM_TOKEN_SECRET")
            .expect("STREAM_TOKEN_SECRET must be set in the environment");
        assert!(!secret.is_empty(), "STREAM_TOKEN_SECRET must not be empty");
        Self { secret }
    }
}

/// Policy knobs for the dispatch engine.
///
/// Loaded once at startup; every loop and sweep receives an immutable
/// copy, so changing a knob means restarting the replica.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Reaper sweep interval in seconds (default: `5`).
    pub sweep_interval_secs: u64,
    /// Bound on acquiring the sweep lock in milliseconds (default: `500`).
    pub lock_acquire_timeout_ms: u64,
    /// Window after which a QUEUED task's owner is reclaimed, in seconds
    /// (default: `300`).
    pub owner_reclaim_secs: i64,
    /// Ceiling on how long a task may stay QUEUED, in seconds
    /// (default: `3600`).
    pub queued_ceiling_secs: i64,
    /// Default per-task execution budget in milliseconds when the caller
    /// omits one (default: `600000`, ten minutes).
    pub default_task_timeout_ms: i64,
    /// Upper bound on caller-supplied execution budgets in milliseconds
    /// (default: `86400000`, one day).
    pub max_task_timeout_ms: i64,
    /// TTL for unclaimed sync-task cache entries, in seconds
    /// (default: `30`).
    pub sync_cache_ttl_secs: i64,
    /// Age ceiling for wait instances, in seconds (default: `7200`).
    pub wait_ttl_secs: i64,
    /// Interval between wait-instance cleanup passes, in seconds
    /// (default: `600`).
    pub wait_cleanup_interval_secs: u64,
    /// Perpetual-task assignment loop interval in seconds (default: `5`).
    pub assign_interval_secs: u64,
    /// Missed-heartbeat multiple after which an assigned perpetual task
    /// is reclaimed (default: `3` intervals of silence).
    pub missed_heartbeat_multiple: i64,
    /// Maximum number of unowned queued tasks rebroadcast per sweep
    /// (default: `200`).
    pub rebroadcast_batch: i64,
}

impl DispatchConfig {
    /// Load dispatch configuration from environment variables.
    ///
    /// | Env Var                       | Default    |
    /// |-------------------------------|------------|
    /// | `SWEEP_INTERVAL_SECS`         | `5`        |
    /// | `LOCK_ACQUIRE_TIMEOUT_MS`     | `500`      |
    /// | `OWNER_RECLAIM_SECS`          | `300`      |
    /// | `QUEUED_CEILING_SECS`         | `3600`     |
    /// | `DEFAULT_TASK_TIMEOUT_MS`     | `600000`   |
    /// | `MAX_TASK_TIMEOUT_MS`         | `86400000` |
    /// | `SYNC_CACHE_TTL_SECS`         | `30`       |
    /// | `WAIT_TTL_SECS`               | `7200`     |
    /// | `WAIT_CLEANUP_INTERVAL_SECS`  | `600`      |
    /// | `ASSIGN_INTERVAL_SECS`        | `5`        |
    /// | `MISSED_HEARTBEAT_MULTIPLE`   | `3`        |
    /// | `REBROADCAST_BATCH`           | `200`      |
    pub fn from_env() -> Self {
        Self {
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", 5),
            lock_acquire_timeout_ms: env_or("LOCK_ACQUIRE_TIMEOUT_MS", 500),
            owner_reclaim_secs: env_or("OWNER_RECLAIM_SECS", 300),
            queued_ceiling_secs: env_or("QUEUED_CEILING_SECS", 3600),
            default_task_timeout_ms: env_or("DEFAULT_TASK_TIMEOUT_MS", 600_000),
            max_task_timeout_ms: env_or("MAX_TASK_TIMEOUT_MS", 86_400_000),
            sync_cache_ttl_secs: env_or("SYNC_CACHE_TTL_SECS", 30),
            wait_ttl_secs: env_or("WAIT_TTL_SECS", 7200),
            wait_cleanup_interval_secs: env_or("WAIT_CLEANUP_INTERVAL_SECS", 600),
            assign_interval_secs: env_or("ASSIGN_INTERVAL_SECS", 5),
            missed_heartbeat_multiple: env_or("MISSED_HEARTBEAT_MULTIPLE", 3),
            rebroadcast_batch: env_or("REBROADCAST_BATCH", 200),
        }
    }

    /// Defaults without touching the environment; the starting point for
    /// engine tests.
    pub fn for_tests() -> Self {
        Self {
            sweep_interval_secs: 5,
            lock_acquire_timeout_ms: 500,
            owner_reclaim_secs: 300,
            queued_ceiling_secs: 3600,
            default_task_timeout_ms: 600_000,
            max_task_timeout_ms: 86_400_000,
            sync_cache_ttl_secs: 30,
            wait_ttl_secs: 7200,
            wait_cleanup_interval_secs: 600,
            assign_interval_secs: 5,
            missed_heartbeat_multiple: 3,
            rebroadcast_batch: 200,
        }
    }

    /// Sweep lock acquisition bound as a `Duration`.
    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }
}
