use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{NaiveTime, Timelike, Weekday};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

pub const DEFAULT_ALARM_TIME: &str = "08:00";

/// Backend-assigned identifier. The backend hands these out as integers, but nothing on this
/// side depends on that.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AlarmId(String);

impl AlarmId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AlarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AlarmId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AlarmId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(i64),
            Text(String),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Number(value) => Ok(AlarmId(value.to_string())),
            RawId::Text(value) if value.trim().is_empty() => {
                Err(de::Error::custom("alarm id must not be empty"))
            }
            RawId::Text(value) => Ok(AlarmId(value)),
        }
    }
}

/// Time of day at minute precision, always rendered as zero-padded `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlarmTime(NaiveTime);

impl AlarmTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    /// Seconds and below are ignored.
    pub fn matches(&self, now: NaiveTime) -> bool {
        self.0.hour() == now.hour() && self.0.minute() == now.minute()
    }
}

impl Default for AlarmTime {
    fn default() -> Self {
        Self::new(8, 0).unwrap_or(Self(NaiveTime::MIN))
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for AlarmTime {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self> {
        parse_alarm_time(input)
    }
}

pub fn parse_alarm_time(input: &str) -> Result<AlarmTime> {
    let trimmed = input.trim();
    let well_formed = trimmed.len() == 5
        && trimmed.as_bytes()[2] == b':'
        && trimmed
            .bytes()
            .enumerate()
            .all(|(idx, byte)| idx == 2 || byte.is_ascii_digit());
    if !well_formed {
        bail!("invalid alarm time '{input}', expected HH:MM");
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map(AlarmTime)
        .with_context(|| format!("invalid alarm time '{input}', expected HH:MM"))
}

impl Serialize for AlarmTime {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AlarmTime {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_alarm_time(&raw).map_err(|err| de::Error::custom(format!("{err:#}")))
    }
}

/// Recurring weekdays of an alarm. Kept as a bitmask so duplicates cannot exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & bit(day) != 0
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= bit(day);
    }

    pub fn remove(&mut self, day: Weekday) {
        self.0 &= !bit(day);
    }

    pub fn toggled(mut self, day: Weekday) -> Self {
        if self.contains(day) {
            self.remove(day);
        } else {
            self.insert(day);
        }
        self
    }

    /// Monday first.
    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        ALL_WEEKDAYS
            .iter()
            .copied()
            .filter(move |day| self.contains(*day))
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::empty();
        for day in iter {
            set.insert(day);
        }
        set
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let names = self.iter().map(weekday_name).collect::<Vec<_>>();
        f.write_str(&names.join(","))
    }
}

impl Serialize for WeekdaySet {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.len()))?;
        for day in self.iter() {
            seq.serialize_element(weekday_name(day))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|token| parse_weekday(token))
            .collect::<Result<WeekdaySet>>()
            .map_err(|err| de::Error::custom(format!("{err:#}")))
    }
}

const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn bit(day: Weekday) -> u8 {
    1 << day.num_days_from_monday()
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Accepts full names and three-letter abbreviations, any case.
pub fn parse_weekday(input: &str) -> Result<Weekday> {
    Weekday::from_str(input.trim())
        .map_err(|_| anyhow::anyhow!("invalid weekday '{input}', expected Monday..Sunday"))
}

/// Parses a comma separated list such as `Mon,Wed,Friday`. An empty string is the empty set.
pub fn parse_weekday_list(input: &str) -> Result<WeekdaySet> {
    input
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(parse_weekday)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alarm {
    pub id: AlarmId,
    pub time: AlarmTime,
    #[serde(default, alias = "days")]
    pub weekdays: WeekdaySet,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Alarm {
    pub fn summary(&self) -> String {
        format!(
            "#{:<4} {}  {:<5}  {}",
            self.id,
            self.time,
            if self.active { "on" } else { "off" },
            self.weekdays
        )
    }
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAlarm {
    pub time: AlarmTime,
    pub weekdays: WeekdaySet,
    pub active: bool,
}

impl Default for NewAlarm {
    fn default() -> Self {
        Self {
            time: AlarmTime::default(),
            weekdays: WeekdaySet::empty(),
            active: true,
        }
    }
}

/// Body of an update request; only the fields being changed are sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlarmPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<AlarmTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekdays: Option<WeekdaySet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl AlarmPatch {
    pub fn is_empty(&self) -> bool {
        self.time.is_none() && self.weekdays.is_none() && self.active.is_none()
    }

    #[cfg(test)]
    pub fn apply_to(&self, alarm: &mut Alarm) {
        if let Some(time) = self.time {
            alarm.time = time;
        }
        if let Some(weekdays) = self.weekdays {
            alarm.weekdays = weekdays;
        }
        if let Some(active) = self.active {
            alarm.active = active;
        }
    }
}

fn default_active() -> bool {
    true
}
