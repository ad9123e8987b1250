use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backoff;
use crate::config::{DeviceConfig, HttpConfig, Secret};
use crate::error::{ConfigError, DispatchError};

use super::{Action, DeviceCommand, StatusUpdate};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// HTTP dispatcher for one Shelly RGBW2 device. Commands arrive serially over
/// a channel, which preserves per-device ordering.
pub struct ShellyClient {
    device: DeviceConfig,
    http: HttpConfig,
    password: Secret,
    client: reqwest::Client,
}

impl ShellyClient {
    pub fn new(
        device: DeviceConfig,
        http: HttpConfig,
        password: Secret,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            device,
            http,
            password,
            client,
        })
    }

    /// Main dispatch loop. Runs until the command channel closes, reporting
    /// each command's outcome on the status channel.
    pub async fn run(
        self,
        status_tx: mpsc::Sender<StatusUpdate>,
        mut cmd_rx: mpsc::Receiver<DeviceCommand>,
    ) {
        while let Some(cmd) = cmd_rx.recv().await {
            let payload = match self.dispatch(&cmd).await {
                Ok(body) => body,
                Err(e) => {
                    error!(
                        "Giving up on command for {} channel {}: {}",
                        self.device.name, cmd.channel, e
                    );
                    super::error_status(&e)
                }
            };

            let update = StatusUpdate {
                topic_name: self.device.topic_name.clone(),
                payload,
            };
            if status_tx.send(update).await.is_err() {
                warn!("Status channel closed for device {}", self.device.name);
                return;
            }
        }
        info!("Dispatcher for {} drained, exiting", self.device.name);
    }

    /// Send one command, retrying transport errors and non-success statuses up
    /// to the configured bound with exponential backoff.
    async fn dispatch(&self, cmd: &DeviceCommand) -> Result<String, DispatchError> {
        let url = request_url(&self.device.url, cmd);
        let mut delay = Duration::from_secs(self.http.retry_delay_secs);
        let mut attempt = 0;

        loop {
            match self.send_once(&url).await {
                Ok(body) => {
                    info!(
                        "Command to {} channel {} succeeded: {:?}",
                        self.device.name, cmd.channel, cmd.action
                    );
                    return Ok(body);
                }
                Err(e) if attempt < self.http.max_retries => {
                    warn!(
                        "Dispatch to {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        self.device.name,
                        attempt + 1,
                        self.http.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = backoff::next_delay(delay, MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, url: &str) -> Result<String, DispatchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth("admin", Some(self.password.expose()))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status));
        }
        Ok(response.text().await?)
    }
}

/// Render a DeviceCommand into the RGBW2 control URL. The firmware exposes
/// everything as GET query parameters on the per-channel color endpoint.
pub fn request_url(base_url: &str, cmd: &DeviceCommand) -> String {
    match cmd.action {
        Action::Turn(state) => format!("{}/color/{}?turn={}", base_url, cmd.channel, state),
        Action::Brightness(white) => format!("{}/color/{}?white={}", base_url, cmd.channel, white),
        Action::Color {
            red,
            green,
            blue,
            white,
        } => format!(
            "{}/color/{}?red={}&green={}&blue={}&white={}",
            base_url, cmd.channel, red, green, blue, white
        ),
    }
}
