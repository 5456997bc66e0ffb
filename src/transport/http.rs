use std::time::Duration;

use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::alarm::model::{Alarm, AlarmId, AlarmPatch, NewAlarm};
use crate::error::ControlError;
use crate::settings::model::{SamplingRatePayload, SettingsPayload};
use crate::transport::{AlarmBackend, AlarmResponse, DeviceCommands};

const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Client for the backend of record. The backend also relays commands to the device and
/// serves the weather lookup.
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherReport {
    pub weather: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WeatherLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl HttpBackend {
    pub fn new(settings: &HttpSettings) -> Result<Self, ControlError> {
        Ok(Self {
            base_url: trim_base_url(&settings.base_url),
            client: build_client(settings)?,
        })
    }

    pub fn weather(&self) -> Result<WeatherReport, ControlError> {
        let op = "fetch weather";
        let response = send(op, self.client.get(self.url("/weather")), None)?;
        decode(op, response)
    }

    pub fn update_weather_location(&self, location: WeatherLocation) -> Result<(), ControlError> {
        let op = "update weather location";
        let request = self.client.post(self.url("/weather")).json(&location);
        send(op, request, None).map(drop)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn alarm_url(&self, id: &AlarmId, suffix: &str) -> String {
        format!("{}/alarms/{}{}", self.base_url, id, suffix)
    }
}

impl AlarmBackend for HttpBackend {
    fn list_alarms(&self) -> Result<Vec<Alarm>, ControlError> {
        let op = "list alarms";
        let response = send(op, self.client.get(self.url("/alarms")), None)?;
        decode(op, response)
    }

    fn get_alarm(&self, id: &AlarmId) -> Result<Alarm, ControlError> {
        let op = "get alarm";
        let response = send(op, self.client.get(self.alarm_url(id, "")), Some(id))?;
        decode::<AlarmResponse>(op, response).map(AlarmResponse::into_alarm)
    }

    fn create_alarm(&self, alarm: &NewAlarm) -> Result<Alarm, ControlError> {
        let op = "create alarm";
        let response = send(op, self.client.post(self.url("/alarms")).json(alarm), None)?;
        decode::<AlarmResponse>(op, response).map(AlarmResponse::into_alarm)
    }

    fn update_alarm(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm, ControlError> {
        let op = "update alarm";
        let request = self.client.put(self.alarm_url(id, "")).json(patch);
        let response = send(op, request, Some(id))?;
        decode::<AlarmResponse>(op, response).map(AlarmResponse::into_alarm)
    }

    fn toggle_alarm(&self, id: &AlarmId) -> Result<Alarm, ControlError> {
        let op = "toggle alarm";
        let request = self.client.patch(self.alarm_url(id, "/toggle"));
        let response = send(op, request, Some(id))?;
        decode::<AlarmResponse>(op, response).map(AlarmResponse::into_alarm)
    }

    fn delete_alarm(&self, id: &AlarmId) -> Result<(), ControlError> {
        let op = "delete alarm";
        send(op, self.client.delete(self.alarm_url(id, "")), Some(id)).map(drop)
    }
}

impl DeviceCommands for HttpBackend {
    fn send_sampling_rate(&self, payload: &SamplingRatePayload) -> Result<(), ControlError> {
        let op = "send sampling rate";
        let request = self.client.post(self.url("/sampling_rate")).json(payload);
        send(op, request, None).map(drop)
    }

    fn send_settings(&self, payload: &SettingsPayload) -> Result<(), ControlError> {
        let op = "send settings";
        let request = self.client.post(self.url("/send_settings")).json(payload);
        send(op, request, None).map(drop)
    }

    fn stop_alarm(&self) -> Result<(), ControlError> {
        let op = "stop alarm";
        send(op, self.client.post(self.url("/stop_alarm")), None).map(drop)
    }

    fn start_alarm(&self) -> Result<(), ControlError> {
        let op = "start alarm";
        send(op, self.client.post(self.url("/start_alarm")), None).map(drop)
    }
}

pub(crate) fn build_client(settings: &HttpSettings) -> Result<Client, ControlError> {
    Client::builder()
        .timeout(settings.request_timeout)
        .connect_timeout(settings.connect_timeout)
        .build()
        .map_err(|err| ControlError::transport("build http client", err.to_string()))
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Sends once. Non-2xx answers become errors; a 404 on an alarm-scoped call becomes
/// `NotFound` for that id.
pub(crate) fn send(
    op: &'static str,
    request: RequestBuilder,
    alarm_id: Option<&AlarmId>,
) -> Result<Response, ControlError> {
    let response = request.send().map_err(|err| {
        debug!("{op}: request failed: {err}");
        ControlError::transport(op, describe_reqwest_error(&err))
    })?;

    let status = response.status();
    if status.is_success() {
        debug!("{op}: HTTP {status}");
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND
        && let Some(id) = alarm_id
    {
        return Err(ControlError::NotFound { id: id.clone() });
    }

    let body = response.text().unwrap_or_default();
    let detail = match backend_message(&body) {
        Some(message) => format!("HTTP {status}: {message}"),
        None => format!("HTTP {status}"),
    };
    debug!("{op}: {detail}");
    Err(ControlError::transport(op, detail))
}

pub(crate) fn decode<T: DeserializeOwned>(
    op: &'static str,
    response: Response,
) -> Result<T, ControlError> {
    response.json::<T>().map_err(|err| {
        debug!("{op}: undecodable response: {err}");
        ControlError::Decode {
            op,
            detail: err.to_string(),
        }
    })
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out: {err}")
    } else if err.is_connect() {
        format!("backend unreachable: {err}")
    } else {
        err.to_string()
    }
}

/// Pulls `message` (or `error`) out of a JSON error body, falling back to the raw text.
fn backend_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(trimmed)
        && let Some(message) = parsed.message.or(parsed.error)
    {
        return Some(message);
    }
    Some(trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect())
}
