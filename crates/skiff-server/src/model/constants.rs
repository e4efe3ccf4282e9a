// Configuration keys and defaults for the Skiff server

pub const DEFAULT_CONFIG_FILE: &str = "conf/skiff.yml";
pub const ENV_PREFIX: &str = "SKIFF";

// Sync
pub const SYNC_WRITE_NAMESPACE: &str = "sync.write_namespace";
pub const SYNC_GENERATED_BY: &str = "sync.generated_by";
pub const SYNC_PERSIST_PROXY_SPEC: &str = "sync.persist_proxy_spec";
pub const SYNC_INVALID_CONFIG_POLICY: &str = "sync.invalid_config_policy";

// Declarative resource source
pub const RESOURCES_PATH: &str = "resources.path";
pub const RESOURCES_POLL_INTERVAL_MS: &str = "resources.poll_interval_ms";
pub const DEFAULT_RESOURCES_POLL_INTERVAL_MS: u64 = 2000;

// Snapshot cache
pub const CACHE_BACKUP_PATH: &str = "cache.backup_path";

// Debug snapshot server
pub const DEBUG_ENABLED: &str = "debug.enabled";
pub const DEBUG_ADDRESS: &str = "debug.address";
pub const DEBUG_PORT: &str = "debug.port";
pub const DEFAULT_DEBUG_PORT: u16 = 10010;

// Metrics
pub const METRICS_ENABLED: &str = "metrics.enabled";
pub const METRICS_ADDRESS: &str = "metrics.address";
pub const METRICS_PORT: &str = "metrics.port";
pub const DEFAULT_METRICS_PORT: u16 = 9091;

// Logging
pub const LOGS_PATH: &str = "logs.path";
pub const LOGS_LEVEL: &str = "logs.level";
pub const LOGS_CONSOLE: &str = "logs.console";
pub const LOGS_FILE: &str = "logs.file";

// Shutdown
pub const SHUTDOWN_TIMEOUT_MS: &str = "server.shutdown_timeout_ms";
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;
