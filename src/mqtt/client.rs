use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, TlsConfiguration, Transport};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::backoff;
use crate::config::Config;
use crate::error::ConfigError;
use crate::shelly::StatusUpdate;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    config: Config,
}

impl MqttClient {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let mut mqttopts = MqttOptions::new(
            &config.mqtt.client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        mqttopts.set_keep_alive(Duration::from_secs(30));

        if let (Some(user), Some(pass)) = (&config.mqtt.username, &config.mqtt.password) {
            mqttopts.set_credentials(user, pass);
        }

        if let Some(ca_file) = &config.mqtt.ca_file {
            let ca = std::fs::read(ca_file).map_err(|e| ConfigError::FileRead {
                path: ca_file.clone(),
                source: e,
            })?;
            mqttopts.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        // LWT: mark the bridge offline if the connection drops uncleanly.
        let lwt = rumqttc::LastWill::new(
            config.bridge_status_topic(),
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Ok(Self {
            client,
            eventloop,
            config: config.clone(),
        })
    }

    /// Run the MQTT event loop. Subscribes to each device's command topics on
    /// every ConnAck (so a reconnect restores the full topic set), forwards
    /// incoming publish messages through command_tx, and publishes dispatch
    /// outcomes received from status_rx to the device status topics.
    pub async fn run(
        mut self,
        command_tx: mpsc::Sender<MqttMessage>,
        mut status_rx: mpsc::Receiver<StatusUpdate>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let subscribe_topics: Vec<String> = self
            .config
            .devices
            .iter()
            .map(|d| self.config.device_command_topic(&d.topic_name))
            .collect();

        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => {
                            if let Event::Incoming(incoming) = &event {
                                match incoming {
                                    Incoming::ConnAck(_) => {
                                        info!("Connected to MQTT broker");
                                        reconnect_delay = INITIAL_RECONNECT_DELAY;

                                        let topic = self.config.bridge_status_topic();
                                        if let Err(e) = self
                                            .client
                                            .publish(&topic, QoS::AtLeastOnce, true, "online")
                                            .await
                                        {
                                            error!("Failed to publish online status: {}", e);
                                        }

                                        for topic in &subscribe_topics {
                                            info!("Subscribing to {}", topic);
                                            if let Err(e) = self
                                                .client
                                                .subscribe(topic, QoS::AtLeastOnce)
                                                .await
                                            {
                                                error!("Failed to subscribe to {}: {}", topic, e);
                                            }
                                        }
                                    }
                                    Incoming::Publish(publish) => {
                                        let payload =
                                            String::from_utf8_lossy(&publish.payload).to_string();
                                        let msg = MqttMessage {
                                            topic: publish.topic.clone(),
                                            payload,
                                        };
                                        if command_tx.send(msg).await.is_err() {
                                            warn!("Command channel closed");
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        Err(e) => {
                            error!(
                                "MQTT connection error: {}. Reconnecting in {:?}",
                                e, reconnect_delay
                            );
                            tokio::time::sleep(reconnect_delay).await;
                            reconnect_delay =
                                backoff::next_delay(reconnect_delay, MAX_RECONNECT_DELAY);
                        }
                    }
                }
                Some(update) = status_rx.recv() => {
                    let topic = self.config.device_status_topic(&update.topic_name);
                    info!("Publishing {}: {}", topic, update.payload);
                    if let Err(e) = self
                        .client
                        .publish(&topic, QoS::AtLeastOnce, false, update.payload.as_bytes())
                        .await
                    {
                        warn!("Failed to publish {}: {}", topic, e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    self.disconnect().await;
                    return;
                }
            }
        }
    }

    /// Clean shutdown: mark the bridge offline, send the MQTT disconnect, and
    /// drive the event loop briefly so both packets reach the socket.
    async fn disconnect(&mut self) {
        info!("Disconnecting from MQTT broker");
        let topic = self.config.bridge_status_topic();
        let _ = self
            .client
            .publish(&topic, QoS::AtLeastOnce, true, "offline")
            .await;
        let _ = self.client.disconnect().await;

        let deadline = tokio::time::sleep(Duration::from_secs(2));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = self.eventloop.poll() => {
                    if event.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
