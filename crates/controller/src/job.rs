//! Watering job model: trigger types, plant selection, start-time parsing and
//! the edit-buffer DTO the presentation layer fills.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::macros::format_description;
use time::{PrimitiveDateTime, Time};

/// Device default for `moisture_min` when a job omits it.
pub const DEFAULT_MOISTURE_MIN: i32 = 20;
/// Device default for `moisture_max` when a job omits it.
pub const DEFAULT_MOISTURE_MAX: i32 = 80;

// ---------------------------------------------------------------------------
// Trigger type
// ---------------------------------------------------------------------------

/// Which condition arms a job. Encoded on the wire as 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TriggerType {
    #[default]
    TimeBased,
    MoistureBased,
    TimeAndMoisture,
}

/// Job fields whose applicability depends on the trigger type. `name` and
/// `plant` always apply and are not listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    StartTime,
    Everyday,
    MoistureMin,
    MoistureMax,
    VolumeMl,
    DurationSec,
}

impl TriggerType {
    /// Whether the trigger includes a clock time, i.e. needs a start time
    /// unless the job repeats every day.
    pub fn has_time_component(self) -> bool {
        matches!(self, Self::TimeBased | Self::TimeAndMoisture)
    }

    /// Whether `field` is enabled for this trigger type. Disabled fields keep
    /// their values but are ignored.
    pub fn applies(self, field: Field) -> bool {
        match self {
            Self::TimeBased => !matches!(field, Field::MoistureMin | Field::MoistureMax),
            Self::MoistureBased => matches!(field, Field::MoistureMin | Field::MoistureMax),
            Self::TimeAndMoisture => field != Field::MoistureMax,
        }
    }
}

impl TryFrom<u8> for TriggerType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::TimeBased),
            1 => Ok(Self::MoistureBased),
            2 => Ok(Self::TimeAndMoisture),
            _ => Err(format!("unknown trigger type {v}")),
        }
    }
}

impl From<TriggerType> for u8 {
    fn from(t: TriggerType) -> u8 {
        match t {
            TriggerType::TimeBased => 0,
            TriggerType::MoistureBased => 1,
            TriggerType::TimeAndMoisture => 2,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeBased => write!(f, "time"),
            Self::MoistureBased => write!(f, "moisture"),
            Self::TimeAndMoisture => write!(f, "time+moisture"),
        }
    }
}

// ---------------------------------------------------------------------------
// Plant selector
// ---------------------------------------------------------------------------

/// Which plant a job waters. Encoded on the wire as 0 for all plants or the
/// 1-based plant index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlantSelector {
    #[default]
    AllPlants,
    Plant(u8),
}

impl PlantSelector {
    pub fn from_index(index: u8) -> Self {
        if index == 0 {
            Self::AllPlants
        } else {
            Self::Plant(index)
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Self::AllPlants => 0,
            Self::Plant(n) => n,
        }
    }

    /// Parse the forms the UI and device use: `all-plants`, `all`, or a
    /// number (`0` meaning all plants).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all-plants") || s.eq_ignore_ascii_case("all") {
            return Some(Self::AllPlants);
        }
        s.parse::<u8>().ok().map(Self::from_index)
    }
}

impl fmt::Display for PlantSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllPlants => write!(f, "all plants"),
            Self::Plant(n) => write!(f, "plant {n}"),
        }
    }
}

impl Serialize for PlantSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

impl<'de> Deserialize<'de> for PlantSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u8),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(Self::from_index(n)),
            Raw::Text(s) => Self::parse(&s)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid plant selector '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Start time
// ---------------------------------------------------------------------------

/// A parsed `starttime` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTime {
    /// Absolute local date and time.
    At(PrimitiveDateTime),
    /// Time of day only; meaningful for everyday jobs.
    Daily(Time),
}

impl StartTime {
    /// Accepts `YYYY-MM-DDTHH:MM`, an optional `:SS`, a space instead of
    /// `T`, or a bare `HH:MM`.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        let datetime_formats = [
            format_description!("[year]-[month]-[day]T[hour]:[minute]"),
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
            format_description!("[year]-[month]-[day] [hour]:[minute]"),
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ];
        for fmt in datetime_formats {
            if let Ok(dt) = PrimitiveDateTime::parse(s, fmt) {
                return Some(Self::At(dt));
            }
        }
        Time::parse(s, format_description!("[hour]:[minute]"))
            .ok()
            .map(Self::Daily)
    }

    pub fn time_of_day(self) -> Time {
        match self {
            Self::At(dt) => dt.time(),
            Self::Daily(t) => t,
        }
    }
}

// ---------------------------------------------------------------------------
// Job + edit buffer
// ---------------------------------------------------------------------------

/// One scheduled watering action as held in the local list. The positional
/// id is not stored; it is assigned when the list is sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub trigger_type: TriggerType,
    pub moisture_min: i32,
    pub moisture_max: i32,
    pub plant: PlantSelector,
    pub volume_ml: u32,
    pub duration_sec: u32,
    pub start_time: String,
    pub everyday: bool,
    pub active: bool,
}

/// Edit buffer filled by the presentation layer. Carries every job field
/// except `active`, which the edit session tracks on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobForm {
    pub name: String,
    pub trigger_type: TriggerType,
    pub moisture_min: i32,
    pub moisture_max: i32,
    pub plant: PlantSelector,
    pub volume_ml: u32,
    pub duration_sec: u32,
    pub start_time: String,
    pub everyday: bool,
}

impl Default for JobForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            trigger_type: TriggerType::TimeBased,
            moisture_min: DEFAULT_MOISTURE_MIN,
            moisture_max: DEFAULT_MOISTURE_MAX,
            plant: PlantSelector::AllPlants,
            volume_ml: 0,
            duration_sec: 0,
            start_time: String::new(),
            everyday: false,
        }
    }
}

impl JobForm {
    pub fn from_job(job: &Job) -> Self {
        Self {
            name: job.name.clone(),
            trigger_type: job.trigger_type,
            moisture_min: job.moisture_min,
            moisture_max: job.moisture_max,
            plant: job.plant,
            volume_ml: job.volume_ml,
            duration_sec: job.duration_sec,
            start_time: job.start_time.clone(),
            everyday: job.everyday,
        }
    }

    pub fn to_job(&self, active: bool) -> Job {
        Job {
            name: self.name.trim().to_string(),
            trigger_type: self.trigger_type,
            moisture_min: self.moisture_min,
            moisture_max: self.moisture_max,
            plant: self.plant,
            volume_ml: self.volume_ml,
            duration_sec: self.duration_sec,
            start_time: self.start_time.trim().to_string(),
            everyday: self.everyday,
            active,
        }
    }

    pub fn is_enabled(&self, field: Field) -> bool {
        self.trigger_type.applies(field)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ({})",
            self.name,
            self.trigger_type,
            self.plant,
            if self.active { "active" } else { "inactive" }
        )?;
        let t = self.trigger_type;
        if t.applies(Field::StartTime) {
            if self.everyday {
                match StartTime::parse(&self.start_time) {
                    Some(st) => {
                        let at = st.time_of_day();
                        write!(f, " daily at {:02}:{:02}", at.hour(), at.minute())?;
                    }
                    None => write!(f, " daily")?,
                }
            } else if !self.start_time.is_empty() {
                write!(f, " at {}", self.start_time)?;
            }
        }
        if t.applies(Field::MoistureMin) {
            write!(f, " below {}%", self.moisture_min)?;
        }
        if t.applies(Field::MoistureMax) {
            write!(f, " until {}%", self.moisture_max)?;
        }
        if t.applies(Field::VolumeMl) {
            write!(f, " {}ml/{}s", self.volume_ml, self.duration_sec)?;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
