use thiserror::Error;

/// Fatal startup errors. Anything here prevents the bridge from running at all.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingEnv(String),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse {1}: {0}")]
    DeviceFile(serde_json::Error, String),

    #[error("Password file {0} is empty")]
    EmptyPassword(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-message translation failures. Logged and dropped; never fatal.
#[derive(Error, Debug, PartialEq)]
pub enum TranslateError {
    #[error("Unknown command attribute '{0}'")]
    UnknownAttribute(String),

    #[error("Invalid switch payload '{0}' (expected on/off/toggle)")]
    InvalidSwitch(String),

    #[error("Invalid brightness payload '{0}' (expected a number)")]
    InvalidBrightness(String),

    #[error("Brightness {0} out of range (0-100)")]
    BrightnessOutOfRange(f64),

    #[error("Invalid color payload '{0}' (expected R,G,B,W with components 0-255)")]
    InvalidColor(String),

    #[error("Channel {0} out of range (device has {1} channels)")]
    ChannelOutOfRange(u8, u8),
}

/// Per-request dispatch failures. Retried with backoff; logged on exhaustion.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Device returned HTTP {0}")]
    Status(reqwest::StatusCode),
}
