use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ControlError;
use crate::transport::http::{HttpSettings, build_client, decode, send, trim_base_url};

/// Read-only client for the sleep analytics host. Display only; nothing here feeds the
/// matcher or the reconciler.
pub struct AnalyticsClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SleepResponse {
    sleep: f64,
}

#[derive(Debug, Deserialize)]
struct DelayResponse {
    delay: f64,
}

impl AnalyticsClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, ControlError> {
        Ok(Self {
            base_url: trim_base_url(&settings.base_url),
            client: build_client(settings)?,
        })
    }

    /// Hours slept in the last night, as estimated from bed sensor data.
    pub fn sleep_hours(&self) -> Result<f64, ControlError> {
        let op = "fetch sleep time";
        let response = send(op, self.client.get(self.url("/sleep_time")), None)?;
        decode::<SleepResponse>(op, response).map(|body| body.sleep)
    }

    /// Average device-to-backend delay in milliseconds.
    pub fn average_delay_ms(&self) -> Result<f64, ControlError> {
        let op = "fetch delay";
        let response = send(op, self.client.get(self.url("/delay")), None)?;
        decode::<DelayResponse>(op, response).map(|body| body.delay)
    }

    /// The prediction shape belongs to the model server, so it is passed through untouched.
    pub fn bed_state_prediction(&self) -> Result<Value, ControlError> {
        let op = "fetch bed state prediction";
        let response = send(op, self.client.get(self.url("/bed_state_pred")), None)?;
        decode(op, response)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
