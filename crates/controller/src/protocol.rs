use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{Job, PlantSelector, TriggerType, DEFAULT_MOISTURE_MAX, DEFAULT_MOISTURE_MIN};

/// Plant count assumed when the device does not report one.
pub const DEFAULT_PLANT_COUNT: u8 = 3;

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// Every frame the controller sends. Serialized as a flat JSON object with
/// an `action` discriminator, e.g. `{"action":"getjoblist"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum OutboundMessage {
    GetValues,
    GetMoistureSensors,
    GetSettings,
    GetJobList,
    AddJobToList(WireJob),
    SaveJobList,
    DeleteJobList,
}

impl OutboundMessage {
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetValues => "getvalues",
            Self::GetMoistureSensors => "getmoisturesensors",
            Self::GetSettings => "getsettings",
            Self::GetJobList => "getjoblist",
            Self::AddJobToList(_) => "addjobtolist",
            Self::SaveJobList => "savejoblist",
            Self::DeleteJobList => "deletejoblist",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).with_context(|| format!("failed to encode {}", self.action()))
    }
}

/// A job as it travels over the wire, in either direction. Missing fields
/// take the device's defaults; the device's snake_case moisture keys are
/// accepted on the way in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireJob {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub trigger_type: TriggerType,
    #[serde(
        rename = "moistureMin",
        alias = "moisture_min",
        default = "default_moisture_min"
    )]
    pub moisture_min: i32,
    #[serde(
        rename = "moistureMax",
        alias = "moisture_max",
        default = "default_moisture_max"
    )]
    pub moisture_max: i32,
    #[serde(default)]
    pub plant: PlantSelector,
    #[serde(default)]
    pub volume: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub starttime: String,
    #[serde(default)]
    pub everyday: bool,
}

fn default_moisture_min() -> i32 {
    DEFAULT_MOISTURE_MIN
}

fn default_moisture_max() -> i32 {
    DEFAULT_MOISTURE_MAX
}

impl WireJob {
    pub fn from_job(id: u32, job: &Job) -> Self {
        Self {
            id,
            active: job.active,
            name: job.name.clone(),
            trigger_type: job.trigger_type,
            moisture_min: job.moisture_min,
            moisture_max: job.moisture_max,
            plant: job.plant,
            volume: job.volume_ml,
            duration: job.duration_sec,
            starttime: job.start_time.clone(),
            everyday: job.everyday,
        }
    }
}

impl From<WireJob> for Job {
    fn from(w: WireJob) -> Self {
        Job {
            name: w.name,
            trigger_type: w.trigger_type,
            moisture_min: w.moisture_min,
            moisture_max: w.moisture_max,
            plant: w.plant,
            volume_ml: w.volume,
            duration_sec: w.duration,
            start_time: w.starttime,
            everyday: w.everyday,
            active: w.active,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound frames
// ---------------------------------------------------------------------------

/// Actions the controller knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundAction {
    SetValues,
    SetSettings,
    SetJobList,
}

impl FromStr for InboundAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setvalues" => Ok(Self::SetValues),
            "setsettings" => Ok(Self::SetSettings),
            "setjoblist" => Ok(Self::SetJobList),
            _ => Err(format!("unknown action '{s}'")),
        }
    }
}

impl fmt::Display for InboundAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetValues => write!(f, "setvalues"),
            Self::SetSettings => write!(f, "setsettings"),
            Self::SetJobList => write!(f, "setjoblist"),
        }
    }
}

/// Device settings as reported by `setsettings`. Only `plant_count` feeds
/// the scheduler; the rest is carried for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_plant_count", deserialize_with = "plant_count_or_default")]
    pub plant_count: u8,
    #[serde(default)]
    pub use_moisturesensor: bool,
    #[serde(default)]
    pub use_flowsensor: bool,
    #[serde(default)]
    pub use_webserial: bool,
    #[serde(default)]
    pub auto_switch_enabled: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            plant_count: DEFAULT_PLANT_COUNT,
            use_moisturesensor: false,
            use_flowsensor: false,
            use_webserial: false,
            auto_switch_enabled: false,
        }
    }
}

fn default_plant_count() -> u8 {
    DEFAULT_PLANT_COUNT
}

/// A zero or null plant count means "not configured".
fn plant_count_or_default<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v = Option::<u8>::deserialize(deserializer)?;
    Ok(match v {
        Some(n) if n > 0 => n,
        _ => DEFAULT_PLANT_COUNT,
    })
}

/// Extract the `action` discriminator of a frame, if any.
pub fn frame_action(frame: &Value) -> Option<&str> {
    frame.get("action").and_then(Value::as_str)
}

/// Unsolicited sensor telemetry: no `action`, but a `sensors` field.
pub fn is_telemetry(frame: &Value) -> bool {
    frame_action(frame).is_none() && frame.get("sensors").is_some()
}

/// Decode the `joblist` payload of a `setjoblist` frame. Anything but an
/// array is rejected.
pub fn parse_job_list(frame: &Value) -> Result<Vec<Job>> {
    let Some(list) = frame.get("joblist") else {
        bail!("setjoblist frame has no joblist field");
    };
    if !list.is_array() {
        bail!("joblist is not an array: {list}");
    }
    let wire: Vec<WireJob> =
        serde_json::from_value(list.clone()).context("invalid job in joblist")?;
    Ok(wire.into_iter().map(Job::from).collect())
}

pub fn parse_settings(frame: &Value) -> Result<DeviceSettings> {
    serde_json::from_value(frame.clone()).context("invalid setsettings frame")
}

// ===========================================================================
// Tests
// ===========================================================================
