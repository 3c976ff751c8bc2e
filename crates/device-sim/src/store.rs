//! Device-side job list semantics.
//!
//! The device keeps two lists. `addjobtolist` appends to the pending list;
//! `savejoblist` promotes pending to active and announces it to every client.
//! An append with id 0 starts a fresh pending list, which is how a sync run
//! replaces the previous one.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const DEFAULT_MOISTURE_MIN: i32 = 20;
const DEFAULT_MOISTURE_MAX: i32 = 80;

/// Pin of the first moisture sensor; the rest follow on consecutive pins.
const MOISTURE_SENSOR_START_PIN: u8 = 32;
/// 12-bit ADC reading of bone-dry soil. Fully wet reads 0.
const DRY_ANALOG: u16 = 4095;
/// Readings below this percentage flag the plant as dry.
const DRY_THRESHOLD_PERCENT: u16 = 20;

/// A job as the device stores and reports it. Accepts the controller's
/// camelCase moisture keys, answers with snake_case. A missing id reads as
/// -1, which the append path skips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJob {
    #[serde(default = "missing_id")]
    pub id: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub trigger_type: u8,
    #[serde(alias = "moistureMin", default = "default_moisture_min")]
    pub moisture_min: i32,
    #[serde(alias = "moistureMax", default = "default_moisture_max")]
    pub moisture_max: i32,
    #[serde(default)]
    pub plant: u8,
    #[serde(default)]
    pub volume: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub starttime: String,
    #[serde(default)]
    pub everyday: bool,
}

fn missing_id() -> i64 {
    -1
}

fn default_moisture_min() -> i32 {
    DEFAULT_MOISTURE_MIN
}

fn default_moisture_max() -> i32 {
    DEFAULT_MOISTURE_MAX
}

/// What to do with the result of one inbound frame.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Answer the sender only.
    Reply(Value),
    /// Announce to every connected client.
    Broadcast(Value),
    Nothing,
}

pub struct DeviceStore {
    pending: Vec<StoredJob>,
    active: Vec<StoredJob>,
    plant_count: u8,
}

impl DeviceStore {
    pub fn new(plant_count: u8) -> Self {
        Self {
            pending: Vec::new(),
            active: Vec::new(),
            plant_count,
        }
    }

    pub fn active(&self) -> &[StoredJob] {
        &self.active
    }

    pub fn pending(&self) -> &[StoredJob] {
        &self.pending
    }

    /// Apply one text frame from a client.
    pub fn handle(&mut self, text: &str) -> Outcome {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("malformed frame: {e}");
                return Outcome::Nothing;
            }
        };
        let Some(action) = frame.get("action").and_then(Value::as_str) else {
            warn!("frame without action");
            return Outcome::Nothing;
        };
        debug!(action, "frame received");

        match action {
            "getjoblist" => Outcome::Reply(self.job_list_frame()),
            "addjobtolist" => {
                match serde_json::from_value::<StoredJob>(frame.clone()) {
                    Ok(job) => self.append(job),
                    Err(e) => warn!("invalid job: {e}"),
                }
                Outcome::Nothing
            }
            "savejoblist" => {
                self.active = std::mem::take(&mut self.pending);
                info!(jobs = self.active.len(), "job list committed");
                Outcome::Broadcast(self.job_list_frame())
            }
            "deletejoblist" => {
                self.pending.clear();
                self.active.clear();
                info!("job list cleared");
                Outcome::Broadcast(self.job_list_frame())
            }
            "getsettings" => Outcome::Reply(json!({
                "action": "setsettings",
                "plant_count": self.plant_count,
                "use_moisturesensor": true,
                "use_flowsensor": false,
                "use_webserial": false,
                "auto_switch_enabled": false,
            })),
            "getvalues" => Outcome::Reply(json!({
                "action": "setvalues",
                "active_jobs": self.active.len(),
                "pending_jobs": self.pending.len(),
            })),
            "getmoisturesensors" => Outcome::Broadcast(self.sensor_frame()),
            other => {
                warn!(action = other, "unknown action");
                Outcome::Nothing
            }
        }
    }

    fn append(&mut self, job: StoredJob) {
        if job.id < 0 {
            warn!(id = job.id, "negative job id, skipping");
            return;
        }
        if job.id == 0 {
            self.pending.clear();
        } else if self.pending.iter().any(|j| j.id == job.id) {
            warn!(id = job.id, "duplicate job id, skipping");
            return;
        }
        debug!(id = job.id, name = %job.name, "job appended");
        self.pending.push(job);
    }

    fn job_list_frame(&self) -> Value {
        json!({ "action": "setjoblist", "joblist": self.active })
    }

    /// Telemetry frame: no action, one simulated reading per plant.
    fn sensor_frame(&self) -> Value {
        let sensors: Vec<Value> = (1..=self.plant_count)
            .map(|id| sensor_reading(id, fastrand::u16(0..=DRY_ANALOG)))
            .collect();
        let count = sensors.len();
        json!({
            "sensors": sensors,
            "enabled": true,
            "count": count,
        })
    }
}

/// One sensor entry. Moisture falls linearly from 100% at 0 to 0% at
/// [`DRY_ANALOG`].
fn sensor_reading(id: u8, analog: u16) -> Value {
    let analog = analog.min(DRY_ANALOG);
    let percent = u32::from(DRY_ANALOG - analog) * 100 / u32::from(DRY_ANALOG);
    json!({
        "id": id,
        "pin": MOISTURE_SENSOR_START_PIN + id - 1,
        "analog": analog,
        "percent": percent,
        "isDry": percent < u32::from(DRY_THRESHOLD_PERCENT),
    })
}

// ===========================================================================
// Tests
// ===========================================================================
