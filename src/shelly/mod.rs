pub mod client;
pub mod translate;

use std::fmt;

/// Desired switch state for an output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
    Toggle,
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwitchState::On => "on",
            SwitchState::Off => "off",
            SwitchState::Toggle => "toggle",
        })
    }
}

/// A normalized device action. Values are already validated and scaled to the
/// ranges the RGBW2 firmware accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Turn(SwitchState),
    /// White channel level, scaled to the device's 0-255 range.
    Brightness(u8),
    Color {
        red: u8,
        green: u8,
        blue: u8,
        white: u8,
    },
}

/// A translated command, ready for the HTTP dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub channel: u8,
    pub action: Action,
}

/// The outcome of a dispatched command, ready to publish to the device's
/// MQTT status topic.
pub struct StatusUpdate {
    pub topic_name: String,
    pub payload: String,
}

/// Render an error as the JSON object published to a device status topic.
pub fn error_status(err: &dyn fmt::Display) -> String {
    serde_json::json!({ "error": err.to_string() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslateError;

    #[test]
    fn renders_error_status_payload() {
        let err = TranslateError::InvalidBrightness("not-a-number".into());
        assert_eq!(
            error_status(&err),
            r#"{"error":"Invalid brightness payload 'not-a-number' (expected a number)"}"#
        );
    }

    #[test]
    fn renders_out_of_range_error_payload() {
        let err = TranslateError::BrightnessOutOfRange(101.0);
        assert_eq!(
            error_status(&err),
            r#"{"error":"Brightness 101 out of range (0-100)"}"#
        );
    }
}
