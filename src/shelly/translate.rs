use crate::config::DeviceConfig;
use crate::error::TranslateError;

use super::{Action, DeviceCommand, SwitchState};

/// Build a DeviceCommand from a parsed command topic and its payload.
///
/// Out-of-range values are rejected, not clamped.
pub fn build_command(
    device: &DeviceConfig,
    channel: u8,
    attribute: &str,
    payload: &str,
) -> Result<DeviceCommand, TranslateError> {
    if channel >= device.channels {
        return Err(TranslateError::ChannelOutOfRange(channel, device.channels));
    }

    let action = match attribute {
        "set" => Action::Turn(parse_switch(payload)?),
        "brightness" => Action::Brightness(parse_brightness(payload)?),
        "color" => parse_color(payload)?,
        other => return Err(TranslateError::UnknownAttribute(other.to_string())),
    };

    Ok(DeviceCommand { channel, action })
}

fn parse_switch(payload: &str) -> Result<SwitchState, TranslateError> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(SwitchState::On),
        "off" => Ok(SwitchState::Off),
        "toggle" => Ok(SwitchState::Toggle),
        _ => Err(TranslateError::InvalidSwitch(payload.to_string())),
    }
}

/// Parse a 0-100 brightness payload and scale it to the firmware's 0-255
/// white level. Accepts decimals ("42.5").
fn parse_brightness(payload: &str) -> Result<u8, TranslateError> {
    let value: f64 = payload
        .trim()
        .parse()
        .map_err(|_| TranslateError::InvalidBrightness(payload.to_string()))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(TranslateError::BrightnessOutOfRange(value));
    }
    Ok((value * 255.0 / 100.0).round() as u8)
}

/// Parse an "R,G,B,W" payload with each component in 0-255.
fn parse_color(payload: &str) -> Result<Action, TranslateError> {
    let invalid = || TranslateError::InvalidColor(payload.to_string());

    let mut parts = payload.split(',');
    let mut next = || -> Result<u8, TranslateError> {
        parts
            .next()
            .ok_or_else(invalid)?
            .trim()
            .parse()
            .map_err(|_| invalid())
    };

    let red = next()?;
    let green = next()?;
    let blue = next()?;
    let white = next()?;
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok(Action::Color {
        red,
        green,
        blue,
        white,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceConfig {
        DeviceConfig {
            name: "Oak Light".into(),
            topic_name: "oak_light".into(),
            url: "http://192.168.2.48".into(),
            channels: 4,
        }
    }

    #[test]
    fn translates_switch_payloads() {
        let cmd = build_command(&device(), 1, "set", "on").unwrap();
        assert_eq!(cmd.channel, 1);
        assert_eq!(cmd.action, Action::Turn(SwitchState::On));

        let cmd = build_command(&device(), 0, "set", "OFF").unwrap();
        assert_eq!(cmd.action, Action::Turn(SwitchState::Off));

        let cmd = build_command(&device(), 0, "set", " toggle\n").unwrap();
        assert_eq!(cmd.action, Action::Turn(SwitchState::Toggle));
    }

    #[test]
    fn rejects_invalid_switch_payload() {
        let err = build_command(&device(), 0, "set", "dim").unwrap_err();
        assert_eq!(err, TranslateError::InvalidSwitch("dim".into()));
    }

    #[test]
    fn scales_brightness_to_device_range() {
        let cases = [("0", 0u8), ("100", 255), ("50", 128), ("42.5", 108)];
        for (payload, expected) in cases {
            let cmd = build_command(&device(), 0, "brightness", payload).unwrap();
            assert_eq!(cmd.action, Action::Brightness(expected), "payload {payload}");
        }
    }

    #[test]
    fn rejects_brightness_outside_bounds() {
        for payload in ["-1", "101", "100.1", "-0.5"] {
            let err = build_command(&device(), 0, "brightness", payload).unwrap_err();
            assert!(
                matches!(err, TranslateError::BrightnessOutOfRange(_)),
                "payload {payload}: {err}"
            );
        }
    }

    #[test]
    fn accepts_brightness_at_bounds() {
        assert!(build_command(&device(), 0, "brightness", "0").is_ok());
        assert!(build_command(&device(), 0, "brightness", "100").is_ok());
    }

    #[test]
    fn rejects_non_numeric_brightness() {
        let err = build_command(&device(), 0, "brightness", "not-a-number").unwrap_err();
        assert_eq!(
            err,
            TranslateError::InvalidBrightness("not-a-number".into())
        );
    }

    #[test]
    fn parses_color_payload() {
        let cmd = build_command(&device(), 0, "color", "255, 0, 128, 0").unwrap();
        assert_eq!(
            cmd.action,
            Action::Color {
                red: 255,
                green: 0,
                blue: 128,
                white: 0
            }
        );
    }

    #[test]
    fn rejects_malformed_color_payloads() {
        for payload in ["256,0,0,0", "1,2,3", "1,2,3,4,5", "a,b,c,d", ""] {
            let err = build_command(&device(), 0, "color", payload).unwrap_err();
            assert!(
                matches!(err, TranslateError::InvalidColor(_)),
                "payload {payload:?}: {err}"
            );
        }
    }

    #[test]
    fn rejects_channel_beyond_device() {
        let err = build_command(&device(), 4, "set", "on").unwrap_err();
        assert_eq!(err, TranslateError::ChannelOutOfRange(4, 4));
    }

    #[test]
    fn rejects_unknown_attribute() {
        let err = build_command(&device(), 0, "gain", "50").unwrap_err();
        assert_eq!(err, TranslateError::UnknownAttribute("gain".into()));
    }
}
