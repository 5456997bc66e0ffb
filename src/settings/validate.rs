use crate::error::{ControlError, FieldError};
use crate::settings::model::{SETTINGS_COMMAND, SettingsDraft, SettingsPayload};

pub const SAMPLING_RATE_MIN: f64 = 0.01;
pub const SAMPLING_RATE_MAX: f64 = 10.0;

pub fn validate_sampling_rate(input: &str) -> Result<f64, FieldError> {
    match parse_number(input) {
        Some(rate) if (SAMPLING_RATE_MIN..=SAMPLING_RATE_MAX).contains(&rate) => Ok(rate),
        _ => Err(FieldError {
            field: "sampling_rate",
            message: format!(
                "sampling rate must be between {SAMPLING_RATE_MIN} and {SAMPLING_RATE_MAX} (got '{}')",
                input.trim()
            ),
        }),
    }
}

/// Fractional sizes pass; the device rounds them.
pub fn validate_window_size(input: &str) -> Result<f64, FieldError> {
    match parse_number(input) {
        Some(size) if size > 0.0 => Ok(size),
        _ => Err(FieldError {
            field: "w_size",
            message: format!(
                "window size must be a positive number (got '{}')",
                input.trim()
            ),
        }),
    }
}

/// Runs both field checks and reports every failure, not just the first.
pub fn validate_draft(draft: &SettingsDraft) -> Result<SettingsPayload, ControlError> {
    let sampling_rate = validate_sampling_rate(&draft.sampling_rate);
    let window_size = validate_window_size(&draft.window_size);

    match (sampling_rate, window_size) {
        (Ok(sampling_rate), Ok(w_size)) => Ok(SettingsPayload {
            command: SETTINGS_COMMAND,
            use_mqtt: draft.use_mqtt,
            use_async_http: draft.use_async_http,
            angry_mode: draft.angry_mode,
            sampling_rate,
            w_size,
            vol: draft.volume(),
        }),
        (sampling_rate, window_size) => Err(ControlError::Validation(
            [sampling_rate.err(), window_size.err()]
                .into_iter()
                .flatten()
                .collect(),
        )),
    }
}

fn parse_number(input: &str) -> Option<f64> {
    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
