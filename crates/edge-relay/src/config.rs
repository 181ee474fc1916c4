// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::collector::HubInfo;
use crate::error::ConfigError;

const DEFAULT_MQTT_URL: &str = "mqtt://localhost:1883";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_TOPIC_FILTER: &str = "zigbee2mqtt/#";
const DEFAULT_DB_PATH: &str = "history.db";
const DEFAULT_HUB_IP: &str = "192.168.1.123";
const DEFAULT_HUB_PORT: u16 = 1883;
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 60;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10_240;
const DEFAULT_UPDATE_BRANCH: &str = "main";
const DEFAULT_UPDATE_API_URL: &str = "https://api.github.com";
const DEFAULT_VERSION_FILE: &str = "last_commit.txt";
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 10;

/// Client certificate material for the collector channel.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
}

/// Configuration for the collector API client.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub url: String,
    pub account_id: String,
    pub write_token: String,
    pub timeout: Duration,
    pub tls: Option<TlsConfig>,
}

/// Configuration for the update supervisor.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub commits_url: String,
    pub version_file: PathBuf,
    pub repo_dir: PathBuf,
    pub timeout: Duration,
}

/// Agent configuration, read from `RELAY_*` environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub topic_filter: String,
    pub db_path: PathBuf,
    pub collector_url: String,
    pub account_id: String,
    pub write_token: String,
    pub hub_ip: String,
    pub hub_port: u16,
    pub tls: Option<TlsConfig>,
    pub flush_interval: Duration,
    pub update_interval: Duration,
    pub max_payload_bytes: usize,
    /// `owner/name` of the repository the agent runs from; self-update is
    /// disabled when unset.
    pub update_repo: Option<String>,
    pub update_branch: String,
    pub update_api_url: String,
    pub version_file: PathBuf,
    pub repo_dir: PathBuf,
    pub upload_timeout: Duration,
    pub check_timeout: Duration,
    pub log_level: String,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<RelayConfig, ConfigError> {
        let mqtt_url = env::var("RELAY_MQTT_URL").unwrap_or_else(|_| DEFAULT_MQTT_URL.to_string());
        let (mqtt_host, mqtt_port) = parse_broker_url(&mqtt_url)?;
        let topic_filter =
            env::var("RELAY_TOPIC_FILTER").unwrap_or_else(|_| DEFAULT_TOPIC_FILTER.to_string());
        let db_path = env::var("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        let collector_url =
            env::var("RELAY_COLLECTOR_URL").map_err(|_| ConfigError::Missing("RELAY_COLLECTOR_URL"))?;
        let account_id =
            env::var("RELAY_ACCOUNT_ID").map_err(|_| ConfigError::Missing("RELAY_ACCOUNT_ID"))?;
        let write_token =
            env::var("RELAY_WRITE_TOKEN").map_err(|_| ConfigError::Missing("RELAY_WRITE_TOKEN"))?;

        let hub_ip = env::var("RELAY_HUB_IP").unwrap_or_else(|_| DEFAULT_HUB_IP.to_string());
        let hub_port = env::var("RELAY_HUB_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_HUB_PORT);

        let tls = match (
            env::var("RELAY_TLS_CERT").ok(),
            env::var("RELAY_TLS_KEY").ok(),
            env::var("RELAY_TLS_CA").ok(),
        ) {
            (Some(cert), Some(key), Some(ca)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
                ca_path: ca.into(),
            }),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "RELAY_TLS_CERT, RELAY_TLS_KEY and RELAY_TLS_CA must be set together"
                        .to_string(),
                ))
            }
        };

        let config = RelayConfig {
            mqtt_host,
            mqtt_port,
            topic_filter,
            db_path,
            collector_url,
            account_id,
            write_token,
            hub_ip,
            hub_port,
            tls,
            flush_interval: Duration::from_secs(env_u64(
                "RELAY_FLUSH_INTERVAL_SECS",
                DEFAULT_FLUSH_INTERVAL_SECS,
            )),
            update_interval: Duration::from_secs(env_u64(
                "RELAY_UPDATE_INTERVAL_SECS",
                DEFAULT_UPDATE_INTERVAL_SECS,
            )),
            max_payload_bytes: env::var("RELAY_MAX_PAYLOAD_BYTES")
                .ok()
                .and_then(|val| val.parse::<usize>().ok())
                .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            update_repo: env::var("RELAY_UPDATE_REPO").ok(),
            update_branch: env::var("RELAY_UPDATE_BRANCH")
                .unwrap_or_else(|_| DEFAULT_UPDATE_BRANCH.to_string()),
            update_api_url: env::var("RELAY_UPDATE_API_URL")
                .unwrap_or_else(|_| DEFAULT_UPDATE_API_URL.to_string()),
            version_file: env::var("RELAY_VERSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_VERSION_FILE)),
            repo_dir: env::var("RELAY_REPO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            upload_timeout: Duration::from_secs(env_u64(
                "RELAY_UPLOAD_TIMEOUT_SECS",
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )),
            check_timeout: Duration::from_secs(env_u64(
                "RELAY_CHECK_TIMEOUT_SECS",
                DEFAULT_CHECK_TIMEOUT_SECS,
            )),
            log_level: env::var("RELAY_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "RELAY_COLLECTOR_URL cannot be empty".to_string(),
            ));
        }

        if self.account_id.trim().is_empty() || self.write_token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "RELAY_ACCOUNT_ID and RELAY_WRITE_TOKEN cannot be empty".to_string(),
            ));
        }

        if self.flush_interval.is_zero() || self.update_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "flush and update intervals must be greater than 0".to_string(),
            ));
        }

        if self.upload_timeout.is_zero() || self.check_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "upload and check timeouts must be greater than 0".to_string(),
            ));
        }

        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "RELAY_MAX_PAYLOAD_BYTES must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    pub fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            url: self.collector_url.clone(),
            account_id: self.account_id.clone(),
            write_token: self.write_token.clone(),
            timeout: self.upload_timeout,
            tls: self.tls.clone(),
        }
    }

    /// Update supervisor configuration, present only when a repository is
    /// configured.
    pub fn updater(&self) -> Option<UpdaterConfig> {
        self.update_repo.as_ref().map(|repo| UpdaterConfig {
            commits_url: format!(
                "{}/repos/{}/commits/{}",
                self.update_api_url.trim_end_matches('/'),
                repo,
                self.update_branch
            ),
            version_file: self.version_file.clone(),
            repo_dir: self.repo_dir.clone(),
            timeout: self.check_timeout,
        })
    }

    pub fn hub_info(&self) -> HubInfo {
        HubInfo {
            hub_ip: self.hub_ip.clone(),
            hub_port: self.hub_port,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Accepts `mqtt://host:port`, `tcp://host:port` or a bare `host[:port]`.
fn parse_broker_url(url: &str) -> Result<(String, u16), ConfigError> {
    let stripped = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    match stripped.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                ConfigError::Invalid(format!("invalid broker port in '{url}'"))
            })?;
            if host.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "invalid broker address '{url}'"
                )));
            }
            Ok((host.to_string(), port))
        }
        None if stripped.is_empty() => {
            Err(ConfigError::Invalid(format!("invalid broker address '{url}'")))
        }
        None => Ok((stripped.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_vars() {
        env::set_var("RELAY_COLLECTOR_URL", "https://collector.example.com/ingest");
        env::set_var("RELAY_ACCOUNT_ID", "11");
        env::set_var("RELAY_WRITE_TOKEN", "secret");
    }

    fn clear_vars() {
        for name in [
            "RELAY_COLLECTOR_URL",
            "RELAY_ACCOUNT_ID",
            "RELAY_WRITE_TOKEN",
            "RELAY_MQTT_URL",
            "RELAY_TLS_CERT",
            "RELAY_TLS_KEY",
            "RELAY_TLS_CA",
            "RELAY_UPDATE_REPO",
            "RELAY_LOG_LEVEL",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_with_required_vars() {
        clear_vars();
        set_required_vars();

        let config = RelayConfig::from_env().expect("config should be valid");
        assert_eq!(config.mqtt_host, "localhost");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.topic_filter, "zigbee2mqtt/#");
        assert_eq!(config.max_payload_bytes, 10_240);
        assert_eq!(config.flush_interval, Duration::from_secs(60));
        assert!(config.updater().is_none());

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_error_if_collector_url_missing() {
        clear_vars();
        env::set_var("RELAY_ACCOUNT_ID", "11");
        env::set_var("RELAY_WRITE_TOKEN", "secret");

        let config = RelayConfig::from_env();
        assert!(config.is_err());
        assert_eq!(
            config.unwrap_err().to_string(),
            "missing required environment variable RELAY_COLLECTOR_URL"
        );

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_error_if_tls_material_is_partial() {
        clear_vars();
        set_required_vars();
        env::set_var("RELAY_TLS_CERT", "/etc/relay/client.pem");

        assert!(RelayConfig::from_env().is_err());

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_error_if_invalid_log_level() {
        clear_vars();
        set_required_vars();
        env::set_var("RELAY_LOG_LEVEL", "loud");

        assert!(RelayConfig::from_env().is_err());

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_updater_config_builds_commits_url() {
        clear_vars();
        set_required_vars();
        env::set_var("RELAY_UPDATE_REPO", "acme/edge-relay");

        let config = RelayConfig::from_env().expect("config should be valid");
        let updater = config.updater().expect("updater should be configured");
        assert_eq!(
            updater.commits_url,
            "https://api.github.com/repos/acme/edge-relay/commits/main"
        );

        clear_vars();
    }

    #[test]
    #[serial]
    fn test_custom_broker_url() {
        clear_vars();
        set_required_vars();
        env::set_var("RELAY_MQTT_URL", "mqtt://broker.local:2883");

        let config = RelayConfig::from_env().expect("config should be valid");
        assert_eq!(config.mqtt_host, "broker.local");
        assert_eq!(config.mqtt_port, 2883);

        clear_vars();
    }

    #[test]
    fn test_parse_broker_url_without_port() {
        let (host, port) = parse_broker_url("broker.local").expect("should parse");
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_rejects_garbage() {
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("mqtt://broker.local:notaport").is_err());
        assert!(parse_broker_url("").is_err());
    }
}
