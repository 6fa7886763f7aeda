use serde::Deserialize;

use crate::storage::StorageKind;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL. Default: "sqlite://motion.db?mode=rwc".
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Pool ceiling. Default: 20.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Pool floor. Default: 1.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://motion.db?mode=rwc".into()
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    1
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MqBackend {
    #[default]
    Redis,
    /// In-process queue. Jobs do not survive a restart.
    Memory,
}

/// App-level MQ configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Queue transport. Default: redis.
    #[serde(default)]
    pub backend: MqBackend,
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue carrying motion jobs. Default: "motion_jobs".
    #[serde(default = "default_mq_queue_name")]
    pub queue_name: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_mq_queue_name() -> String {
    "motion_jobs".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            backend: MqBackend::default(),
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            queue_name: default_mq_queue_name(),
        }
    }
}

/// S3-compatible object storage settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OssConfig {
    /// Endpoint URL, e.g. "https://oss-cn-hangzhou.aliyuncs.com".
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    /// Static access key. When absent the default credential chain is used
    /// and refreshed periodically.
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    /// STS security token paired with the static key.
    pub security_token: Option<String>,
    /// Use path-style addressing. Default: false.
    #[serde(default)]
    pub path_style: bool,
    /// Seconds between credential refreshes. Default: 600.
    #[serde(default = "default_credential_refresh_secs")]
    pub credential_refresh_secs: u64,
}

fn default_credential_refresh_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Backend for newly created records. Default: local.
    #[serde(default)]
    pub mode: StorageKind,
    /// Root directory of the local backend. Default: "./storage".
    #[serde(default = "default_local_root")]
    pub local_root: String,
    /// Key prefix shared by both backends. Default: "motion-data/".
    #[serde(default = "default_key_prefix")]
    pub prefix: String,
    /// Object storage settings. Required only when a record uses `oss`.
    #[serde(default)]
    pub oss: Option<OssConfig>,
}

fn default_local_root() -> String {
    "./storage".into()
}
fn default_key_prefix() -> String {
    "motion-data/".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageKind::default(),
            local_root: default_local_root(),
            prefix: default_key_prefix(),
            oss: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MotionConfig {
    /// Fixed UTC offset of device wall-clock values, in minutes. Default: 0.
    #[serde(default)]
    pub device_utc_offset_minutes: i32,
    /// JSON list of `{index, name}` CSV columns. Default: all frame fields.
    #[serde(default)]
    pub format_path: Option<String>,
    /// Where uploads are staged before the worker picks them up.
    /// Default: "./uploads/temp".
    #[serde(default = "default_upload_temp_dir")]
    pub upload_temp_dir: String,
    /// Where download archives are written. Default: "./uploads/temp/motion-data".
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    /// Nominal sampling rate stored on new records. Default: 100.
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: i32,
    /// Maximum files accepted per batch job. Default: 200.
    #[serde(default = "default_max_batch_files")]
    pub max_batch_files: usize,
}

fn default_upload_temp_dir() -> String {
    "./uploads/temp".into()
}
fn default_results_dir() -> String {
    "./uploads/temp/motion-data".into()
}
fn default_sample_rate_hz() -> i32 {
    100
}
fn default_max_batch_files() -> usize {
    200
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            device_utc_offset_minutes: 0,
            format_path: None,
            upload_temp_dir: default_upload_temp_dir(),
            results_dir: default_results_dir(),
            sample_rate_hz: default_sample_rate_hz(),
            max_batch_files: default_max_batch_files(),
        }
    }
}

/// How long finished jobs stay pollable.
#[derive(Debug, Deserialize, Clone)]
pub struct JobRetentionConfig {
    /// Completed jobs always kept, newest first. Default: 100.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: u64,
    /// Failed jobs always kept, newest first. Default: 50.
    #[serde(default = "default_keep_failed")]
    pub keep_failed: u64,
    /// Jobs younger than this are never pruned. Default: 86400.
    #[serde(default = "default_job_ttl_secs")]
    pub ttl_secs: u64,
    /// Default: 60.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

fn default_keep_completed() -> u64 {
    100
}
fn default_keep_failed() -> u64 {
    50
}
fn default_job_ttl_secs() -> u64 {
    24 * 3600
}
fn default_prune_interval_secs() -> u64 {
    60
}

impl Default for JobRetentionConfig {
    fn default() -> Self {
        Self {
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
            ttl_secs: default_job_ttl_secs(),
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

/// Periodic removal of stale upload temp files and download archives.
#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    /// Default: true.
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
    /// Default: 1800.
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
    /// Delay before the first sweep. Default: 30.
    #[serde(default = "default_cleanup_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Files older than this are deleted. Default: 86400.
    #[serde(default = "default_cleanup_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cleanup_enabled() -> bool {
    true
}
fn default_cleanup_interval_secs() -> u64 {
    30 * 60
}
fn default_cleanup_initial_delay_secs() -> u64 {
    30
}
fn default_cleanup_ttl_secs() -> u64 {
    24 * 3600
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_cleanup_enabled(),
            interval_secs: default_cleanup_interval_secs(),
            initial_delay_secs: default_cleanup_initial_delay_secs(),
            ttl_secs: default_cleanup_ttl_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sections_fall_back_to_defaults() {
        let storage: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(storage.mode, StorageKind::Local);
        assert_eq!(storage.prefix, "motion-data/");
        assert!(storage.oss.is_none());

        let jobs: JobRetentionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!((jobs.keep_completed, jobs.keep_failed), (100, 50));

        let mq: MqAppConfig = serde_json::from_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(mq.backend, MqBackend::Memory);
        assert_eq!(mq.queue_name, "motion_jobs");
    }
}
