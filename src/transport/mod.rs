pub mod analytics;
pub mod http;

use serde::Deserialize;

use crate::alarm::model::{Alarm, AlarmId, AlarmPatch, NewAlarm};
use crate::error::ControlError;
use crate::settings::model::{SamplingRatePayload, SettingsPayload};

/// Backend of record for alarms.
pub trait AlarmBackend: Send + Sync {
    fn list_alarms(&self) -> Result<Vec<Alarm>, ControlError>;
    fn get_alarm(&self, id: &AlarmId) -> Result<Alarm, ControlError>;
    fn create_alarm(&self, alarm: &NewAlarm) -> Result<Alarm, ControlError>;
    fn update_alarm(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm, ControlError>;
    fn toggle_alarm(&self, id: &AlarmId) -> Result<Alarm, ControlError>;
    fn delete_alarm(&self, id: &AlarmId) -> Result<(), ControlError>;
}

/// Commands relayed to the device. Each call is a single attempt.
pub trait DeviceCommands: Send + Sync {
    fn send_sampling_rate(&self, payload: &SamplingRatePayload) -> Result<(), ControlError>;
    fn send_settings(&self, payload: &SettingsPayload) -> Result<(), ControlError>;
    fn stop_alarm(&self) -> Result<(), ControlError>;
    fn start_alarm(&self) -> Result<(), ControlError>;
}

/// Create and toggle wrap the record in `{ "alarm": ... }`, update returns it bare.
/// Either shape is accepted everywhere.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum AlarmResponse {
    Wrapped { alarm: Alarm },
    Bare(Alarm),
}

impl AlarmResponse {
    pub(crate) fn into_alarm(self) -> Alarm {
        match self {
            AlarmResponse::Wrapped { alarm } | AlarmResponse::Bare(alarm) => alarm,
        }
    }
}
