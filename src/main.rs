mod backoff;
mod config;
mod error;
mod mqtt;
mod shelly;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use shelly::DeviceCommand;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting mqtt-to-shelly bridge (mqtt={}:{}, devices={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.devices.len(),
    );

    for device in &config.devices {
        info!(
            "  Device: {} at {} — {} channels",
            device.name, device.url, device.channels,
        );
    }

    // Channels
    let (mqtt_cmd_tx, mut mqtt_cmd_rx) = mpsc::channel::<mqtt::client::MqttMessage>(100);
    let (status_tx, status_rx) = mpsc::channel::<shelly::StatusUpdate>(200);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create MQTT client and spawn event loop (handles both MQTT I/O and
    // status publishing)
    let mqtt_client = match mqtt::client::MqttClient::new(&config) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(mqtt_cmd_tx, status_rx, shutdown_rx).await;
    });

    // Per-device channels: keyed by topic_name for command routing
    let mut device_cmd_txs: HashMap<String, mpsc::Sender<DeviceCommand>> = HashMap::new();

    // Spawn a dispatcher task for each device
    let mut device_handles = Vec::new();

    for device_config in &config.devices {
        let (cmd_tx, cmd_rx) = mpsc::channel::<DeviceCommand>(50);
        device_cmd_txs.insert(device_config.topic_name.clone(), cmd_tx);

        let client = match shelly::client::ShellyClient::new(
            device_config.clone(),
            config.http.clone(),
            config.password.clone(),
        ) {
            Ok(c) => c,
            Err(e) => {
                error!("Configuration error: {}", e);
                std::process::exit(1);
            }
        };
        let status_tx = status_tx.clone();

        let handle = tokio::spawn(async move {
            client.run(status_tx, cmd_rx).await;
        });
        device_handles.push(handle);
    }

    // Main keeps its own status sender to report translation failures; it is
    // dropped at shutdown so the status channel can close.

    // Build device lookup for command routing (keyed by topic_name)
    let device_configs: HashMap<String, config::DeviceConfig> = config
        .devices
        .iter()
        .map(|d| (d.topic_name.clone(), d.clone()))
        .collect();
    let topic_prefix = config.mqtt.topic_prefix.clone();

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to register SIGTERM handler");

    // Main loop: translate MQTT messages into device commands + handle shutdown
    loop {
        tokio::select! {
            Some(msg) = mqtt_cmd_rx.recv() => {
                // Parse topic: {prefix}/{device}/channel/{ch}/{attribute}
                let Some((topic_name, channel, attribute)) =
                    parse_command_topic(&msg.topic, &topic_prefix)
                else {
                    warn!("Ignoring message on unmatched topic {}", msg.topic);
                    continue;
                };
                let Some(device_config) = device_configs.get(topic_name) else {
                    warn!("Unknown device in command topic: {}", topic_name);
                    continue;
                };
                match shelly::translate::build_command(
                    device_config,
                    channel,
                    attribute,
                    &msg.payload,
                ) {
                    Ok(cmd) => {
                        if let Some(cmd_tx) = device_cmd_txs.get(topic_name) {
                            if cmd_tx.send(cmd).await.is_err() {
                                warn!("Command channel closed for device {}", topic_name);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Dropping message on {}: {}", msg.topic, e);
                        let update = shelly::StatusUpdate {
                            topic_name: topic_name.to_string(),
                            payload: shelly::error_status(&e),
                        };
                        if status_tx.send(update).await.is_err() {
                            warn!("Status channel closed");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    // Orderly shutdown: stop accepting commands, let dispatchers drain their
    // in-flight work, then disconnect from the broker.
    drop(mqtt_cmd_rx);
    drop(device_cmd_txs);
    drop(status_tx);
    for handle in device_handles {
        let _ = handle.await;
    }

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), mqtt_handle)
        .await
        .is_err()
    {
        warn!("MQTT disconnect timed out");
    }
    info!("mqtt-to-shelly bridge stopped");
}

/// Parse a command topic into (topic_name, channel, attribute).
/// Expected format: {prefix}/{topic_name}/channel/{ch}/{attribute}
fn parse_command_topic<'a>(topic: &'a str, prefix: &str) -> Option<(&'a str, u8, &'a str)> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    // rest = "{topic_name}/channel/{ch}/{attribute}"
    let (topic_name, rest) = rest.split_once('/')?;
    let rest = rest.strip_prefix("channel/")?;
    let (channel, attribute) = rest.split_once('/')?;
    if topic_name.is_empty() || attribute.is_empty() || attribute.contains('/') {
        return None;
    }
    let channel = channel.parse().ok()?;
    Some((topic_name, channel, attribute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_topics() {
        assert_eq!(
            parse_command_topic("shelly/rgbw2/channel/1/set", "shelly"),
            Some(("rgbw2", 1, "set"))
        );
        assert_eq!(
            parse_command_topic("garden/oak_light/channel/0/brightness", "garden"),
            Some(("oak_light", 0, "brightness"))
        );
    }

    #[test]
    fn rejects_malformed_topics() {
        // Wrong prefix
        assert_eq!(parse_command_topic("other/rgbw2/channel/1/set", "shelly"), None);
        // Missing channel segment
        assert_eq!(parse_command_topic("shelly/rgbw2/1/set", "shelly"), None);
        // Non-numeric channel
        assert_eq!(parse_command_topic("shelly/rgbw2/channel/x/set", "shelly"), None);
        // Trailing segments
        assert_eq!(
            parse_command_topic("shelly/rgbw2/channel/1/set/extra", "shelly"),
            None
        );
        // Missing attribute
        assert_eq!(parse_command_topic("shelly/rgbw2/channel/1", "shelly"), None);
    }
}
