use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::model::catalog::DEFAULT_MODEL_ID;
use crate::model::ComputeDevice;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8100;
pub const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigin {
    Any,
    Exact(String),
}

impl CorsOrigin {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Exact(origin) => origin.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub model_id: String,
    pub device: ComputeDevice,
    /// IP literal or host name; names resolve when the listener binds.
    pub host: String,
    pub port: u16,
    pub cors_origin: CorsOrigin,
    pub model_endpoint: Option<Url>,
    pub model_timeout: Duration,
    pub serialize_inference: bool,
    pub body_limit_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_id: String::from(DEFAULT_MODEL_ID),
            device: ComputeDevice::Auto,
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            cors_origin: CorsOrigin::Any,
            model_endpoint: None,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            serialize_inference: true,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("INPAINT_MODEL_ENDPOINT is not a valid URL: {0}")]
    InvalidEndpoint(#[source] url::ParseError),
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through `lookup` so callers decide where values come from.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let host = match value("HOST") {
            Some(raw) => parse_host(raw.as_str()).ok_or(ConfigError::InvalidValue {
                key: "HOST",
                expected: "an IP address or host name",
                value: raw,
            })?,
            None => defaults.host,
        };
        let port = match value("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                key: "PORT",
                expected: "a port number",
                value: raw,
            })?,
            None => defaults.port,
        };
        let cors_origin = match value("CORS_ORIGIN") {
            Some(raw) if raw == "*" => CorsOrigin::Any,
            Some(raw) if raw.bytes().all(|b| b.is_ascii_graphic()) => CorsOrigin::Exact(raw),
            Some(raw) => {
                return Err(ConfigError::InvalidValue {
                    key: "CORS_ORIGIN",
                    expected: "'*' or a single origin",
                    value: raw,
                })
            }
            None => CorsOrigin::Any,
        };
        let model_endpoint = value("INPAINT_MODEL_ENDPOINT")
            .map(|raw| Url::parse(raw.as_str()))
            .transpose()
            .map_err(ConfigError::InvalidEndpoint)?;
        let model_timeout = match value("INPAINT_MODEL_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "INPAINT_MODEL_TIMEOUT_SECS",
                        expected: "a positive number of seconds",
                        value: raw,
                    })
                }
            },
            None => defaults.model_timeout,
        };
        let serialize_inference = match value("INPAINT_SERIALIZE_INFERENCE") {
            Some(raw) => parse_flag(raw.as_str()).ok_or(ConfigError::InvalidValue {
                key: "INPAINT_SERIALIZE_INFERENCE",
                expected: "a boolean",
                value: raw,
            })?,
            None => defaults.serialize_inference,
        };
        let body_limit_bytes = match value("INPAINT_BODY_LIMIT_BYTES") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "INPAINT_BODY_LIMIT_BYTES",
                        expected: "a positive byte count",
                        value: raw,
                    })
                }
            },
            None => defaults.body_limit_bytes,
        };

        Ok(Self {
            model_id: value("MODEL_ID").unwrap_or(defaults.model_id),
            device: value("DEVICE")
                .map(|raw| raw.parse().unwrap_or_default())
                .unwrap_or(defaults.device),
            host,
            port,
            cors_origin,
            model_endpoint,
            model_timeout,
            serialize_inference,
            body_limit_bytes,
        })
    }

    /// `host:port` as passed to the listener, IPv6 literals bracketed.
    pub fn bind_display(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Accepts IP literals (IPv6 with or without brackets) and DNS-style names.
fn parse_host(raw: &str) -> Option<String> {
    let unbracketed = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(raw);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    let valid_name = raw.len() <= 253
        && raw.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });
    valid_name.then(|| raw.to_ascii_lowercase())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
