use std::sync::Arc;

use log::{error, info};

use crate::error::ControlError;
use crate::settings::model::{SamplingRatePayload, SettingsDraft, SettingsPayload};
use crate::settings::validate::{validate_draft, validate_sampling_rate};
use crate::transport::DeviceCommands;

/// Validates drafts and relays them to the device. Nothing is retried.
pub struct SettingsReconciler {
    device: Arc<dyn DeviceCommands>,
}

impl SettingsReconciler {
    pub fn new(device: Arc<dyn DeviceCommands>) -> Self {
        Self { device }
    }

    /// A fresh draft for each time the configuration surface opens.
    pub fn open_draft(&self) -> SettingsDraft {
        SettingsDraft::default()
    }

    /// Sends only the rate, independent of the rest of the draft.
    pub fn send_sampling_rate(&self, rate: &str) -> Result<SamplingRatePayload, ControlError> {
        let sampling_rate =
            validate_sampling_rate(rate).map_err(|err| ControlError::Validation(vec![err]))?;
        let payload = SamplingRatePayload { sampling_rate };
        self.device.send_sampling_rate(&payload).inspect_err(|err| {
            error!("sending sampling rate {sampling_rate} failed: {err}");
        })?;
        info!("sampling rate {sampling_rate} sent");
        Ok(payload)
    }

    pub fn save_settings(&self, draft: &SettingsDraft) -> Result<SettingsPayload, ControlError> {
        let payload = validate_draft(draft)?;
        self.device.send_settings(&payload).inspect_err(|err| {
            error!("saving settings failed: {err}");
        })?;
        info!(
            "settings saved (mqtt={}, async_http={}, angry={}, rate={}, w_size={}, vol={})",
            payload.use_mqtt,
            payload.use_async_http,
            payload.angry_mode,
            payload.sampling_rate,
            payload.w_size,
            payload.vol
        );
        Ok(payload)
    }

    pub fn stop_active_alarm(&self) -> Result<(), ControlError> {
        self.device.stop_alarm().inspect_err(|err| {
            error!("stopping the active alarm failed: {err}");
        })?;
        info!("active alarm stopped");
        Ok(())
    }

    pub fn start_alarm(&self) -> Result<(), ControlError> {
        self.device.start_alarm().inspect_err(|err| {
            error!("starting the device alarm failed: {err}");
        })?;
        info!("device alarm started");
        Ok(())
    }
}
