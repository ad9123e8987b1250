use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fmt;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub http: HttpConfig,
    pub devices: Vec<DeviceConfig>,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
    /// CA certificate for broker TLS; plain TCP when absent.
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Sanitized name for use in MQTT topics (lowercase, spaces to underscores)
    pub topic_name: String,
    /// Base URL of the device, e.g. "http://192.168.2.48"
    pub url: String,
    /// Number of output channels the firmware exposes (RGBW2: 4)
    pub channels: u8,
}

/// Device password loaded from the credential file. Redacted in Debug and
/// Display so it can never end up in a log line.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// Serde struct for parsing the devices JSON file
#[derive(Deserialize)]
struct RawDevice {
    name: String,
    url: String,
    #[serde(default)]
    channels: Option<u8>,
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let devices_file = env_or_default("DEVICES_FILE", "devices.json".to_string());
        let devices = load_devices(&devices_file)?;

        let password_file = env_required("SHELLY_PASSWORD_FILE")?;
        let password = load_password(&password_file)?;

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env_required("MQTT_BROKER_HOST")?,
                broker_port: env_or_default("MQTT_BROKER_PORT", 1883),
                username: env_optional("MQTT_USERNAME"),
                password: env_optional("MQTT_PASSWORD"),
                topic_prefix: env_or_default("MQTT_TOPIC_PREFIX", "shelly".to_string()),
                client_id: env_or_default("MQTT_CLIENT_ID", "mqtt-to-shelly".to_string()),
                ca_file: env_optional("MQTT_CA_FILE"),
            },
            http: HttpConfig {
                timeout_secs: env_or_default("HTTP_TIMEOUT_SECS", 10),
                max_retries: env_or_default("HTTP_MAX_RETRIES", 3),
                retry_delay_secs: env_or_default("HTTP_RETRY_DELAY_SECS", 2),
            },
            devices,
            password,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_host.is_empty() {
            return Err(ConfigError::Invalid(
                "MQTT_BROKER_HOST must not be empty".into(),
            ));
        }
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid(
                "No devices found in devices file".into(),
            ));
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.topic_name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate device topic name '{}'",
                    device.topic_name
                )));
            }
        }
        if self.http.timeout_secs == 0 {
            return Err(ConfigError::Invalid("HTTP_TIMEOUT_SECS must be > 0".into()));
        }
        Ok(())
    }

    pub fn bridge_status_topic(&self) -> String {
        format!("{}/bridge_status", self.mqtt.topic_prefix)
    }

    pub fn device_status_topic(&self, topic_name: &str) -> String {
        format!("{}/{}/status", self.mqtt.topic_prefix, topic_name)
    }

    pub fn device_command_topic(&self, topic_name: &str) -> String {
        format!("{}/{}/channel/#", self.mqtt.topic_prefix, topic_name)
    }
}

fn load_devices(path: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_string(),
        source: e,
    })?;

    let raw_devices: Vec<RawDevice> = serde_json::from_str(&content)
        .map_err(|e| ConfigError::DeviceFile(e, path.to_string()))?;

    raw_devices
        .into_iter()
        .map(|raw| {
            if !raw.url.starts_with("http://") && !raw.url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "Device {} has invalid url '{}'",
                    raw.name, raw.url
                )));
            }
            let channels = raw.channels.unwrap_or(4);
            if channels == 0 || channels > 4 {
                return Err(ConfigError::Invalid(format!(
                    "Device {} has invalid channel count {} (expected 1-4)",
                    raw.name, channels
                )));
            }
            let topic_name = sanitize_topic_name(&raw.name);
            if topic_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "Device name '{}' yields an empty topic segment",
                    raw.name
                )));
            }
            Ok(DeviceConfig {
                topic_name,
                name: raw.name,
                url: raw.url.trim_end_matches('/').to_string(),
                channels,
            })
        })
        .collect()
}

/// Read and trim the device password. Missing, unreadable, or empty files are
/// fatal configuration errors.
fn load_password(path: &str) -> Result<Secret, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_string(),
        source: e,
    })?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyPassword(path.to_string()));
    }
    Ok(Secret::new(trimmed))
}

/// Convert a device name into a safe MQTT topic segment.
/// "Oak Light" → "oak_light"
fn sanitize_topic_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sanitizes_device_names() {
        assert_eq!(sanitize_topic_name("Oak Light"), "oak_light");
        assert_eq!(sanitize_topic_name("Number Sign"), "number_sign");
        assert_eq!(sanitize_topic_name("_RGBW2 Garden_"), "rgbw2_garden");
    }

    #[test]
    fn loads_and_trims_password() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s3cret  ").unwrap();
        let secret = load_password(file.path().to_str().unwrap()).unwrap();
        assert_eq!(secret.expose(), "s3cret");
    }

    #[test]
    fn empty_password_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();
        let err = load_password(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPassword(_)));
    }

    #[test]
    fn missing_password_file_is_fatal() {
        let err = load_password("/nonexistent/shelly_password.txt").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret("hunter2".into());
        assert_eq!(format!("{secret:?}"), "Secret(***)");
        assert_eq!(format!("{secret}"), "***");
    }

    #[test]
    fn parses_devices_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "Oak Light", "url": "http://192.168.2.48/"}},
                {{"name": "Number Sign", "url": "http://192.168.2.64", "channels": 1}}]"#
        )
        .unwrap();
        let devices = load_devices(file.path().to_str().unwrap()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].topic_name, "oak_light");
        assert_eq!(devices[0].url, "http://192.168.2.48");
        assert_eq!(devices[0].channels, 4);
        assert_eq!(devices[1].channels, 1);
    }

    #[test]
    fn rejects_non_http_device_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"name": "Oak", "url": "192.168.2.48"}}]"#).unwrap();
        let err = load_devices(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
