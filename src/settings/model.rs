use serde::Serialize;

pub const SETTINGS_COMMAND: &str = "settings";
pub const VOLUME_MIN: u8 = 0;
pub const VOLUME_MAX: u8 = 50;

const DEFAULT_SAMPLING_RATE: &str = "1";
const DEFAULT_WINDOW_SIZE: &str = "10";
const DEFAULT_VOLUME: u8 = 20;

/// An in-progress settings edit. Numeric fields hold the operator's raw input so that
/// unparseable values surface as validation errors rather than being coerced.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsDraft {
    pub use_mqtt: bool,
    pub use_async_http: bool,
    pub angry_mode: bool,
    pub sampling_rate: String,
    pub window_size: String,
    volume: u8,
}

impl Default for SettingsDraft {
    fn default() -> Self {
        Self {
            use_mqtt: false,
            use_async_http: false,
            angry_mode: false,
            sampling_rate: DEFAULT_SAMPLING_RATE.to_string(),
            window_size: DEFAULT_WINDOW_SIZE.to_string(),
            volume: DEFAULT_VOLUME,
        }
    }
}

impl SettingsDraft {
    pub fn volume(&self) -> u8 {
        self.volume
    }

    /// Clamped to the slider range; volume never produces a validation error.
    pub fn set_volume(&mut self, volume: i64) {
        self.volume = volume.clamp(i64::from(VOLUME_MIN), i64::from(VOLUME_MAX)) as u8;
    }
}

/// Full configuration snapshot. The device reads it as a whole, so field names are fixed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsPayload {
    pub command: &'static str,
    pub use_mqtt: bool,
    pub use_async_http: bool,
    pub angry_mode: bool,
    pub sampling_rate: f64,
    pub w_size: f64,
    pub vol: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplingRatePayload {
    pub sampling_rate: f64,
}
