//! Job validation. Rules run in a fixed order and the first failure wins.

use thiserror::Error;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::job::{Field, JobForm, PlantSelector, StartTime};

/// Why a job form was rejected. Display strings are what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name required")]
    NameRequired,
    #[error("start time required")]
    StartTimeRequired,
    #[error("start time must be in the future")]
    StartTimeNotInFuture,
    #[error("start time '{0}' is not a valid date and time")]
    StartTimeInvalid(String),
    #[error("plant {plant} does not exist (only {plant_count} configured)")]
    PlantOutOfRange { plant: u8, plant_count: u8 },
    #[error("moisture bounds must be within 0-100% (got {min}-{max})")]
    MoistureOutOfRange { min: i32, max: i32 },
    #[error("minimum moisture ({min}%) must not exceed maximum ({max}%)")]
    MoistureBoundsInverted { min: i32, max: i32 },
}

/// What the validator needs to know about the outside world.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    /// Local wall-clock time the form is being confirmed at.
    pub now: PrimitiveDateTime,
    /// Number of plants currently configured on the device.
    pub plant_count: u8,
}

impl ValidationContext {
    pub fn new(now: PrimitiveDateTime, plant_count: u8) -> Self {
        Self { now, plant_count }
    }
}

/// Current local wall-clock time, which is what start times are entered in.
/// Falls back to UTC when the local offset cannot be determined.
pub fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    PrimitiveDateTime::new(now.date(), now.time())
}

pub fn validate(form: &JobForm, ctx: &ValidationContext) -> Result<(), ValidationError> {
    if form.name.trim().is_empty() {
        return Err(ValidationError::NameRequired);
    }

    if form.trigger_type.has_time_component() && !form.everyday {
        let raw = form.start_time.trim();
        if raw.is_empty() {
            return Err(ValidationError::StartTimeRequired);
        }
        match StartTime::parse(raw) {
            Some(StartTime::At(at)) => {
                if at <= ctx.now {
                    return Err(ValidationError::StartTimeNotInFuture);
                }
            }
            // A bare time of day only makes sense for everyday jobs.
            Some(StartTime::Daily(_)) | None => {
                return Err(ValidationError::StartTimeInvalid(raw.to_string()));
            }
        }
    }

    if let PlantSelector::Plant(n) = form.plant {
        if n > ctx.plant_count {
            return Err(ValidationError::PlantOutOfRange {
                plant: n,
                plant_count: ctx.plant_count,
            });
        }
    }

    if form.is_enabled(Field::MoistureMin) && form.is_enabled(Field::MoistureMax) {
        let (min, max) = (form.moisture_min, form.moisture_max);
        if !(0..=100).contains(&min) || !(0..=100).contains(&max) {
            return Err(ValidationError::MoistureOutOfRange { min, max });
        }
        if min > max {
            return Err(ValidationError::MoistureBoundsInverted { min, max });
        }
    }

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::TriggerType;
    use time::macros::datetime;

    fn ctx() -> ValidationContext {
        ValidationContext::new(datetime!(2026-10-17 12:00), 3)
    }

    /// A time-based form that passes every rule.
    fn valid_form() -> JobForm {
        JobForm {
            name: "Tomatoes".into(),
            trigger_type: TriggerType::TimeBased,
            start_time: "2026-10-17T13:00".into(),
            volume_ml: 200,
            duration_sec: 30,
            ..JobForm::default()
        }
    }

    #[test]
    fn valid_form_passes() {
        validate(&valid_form(), &ctx()).unwrap();
    }

    // -- Rule 1: name --------------------------------------------------------

    #[test]
    fn empty_name_rejected_regardless_of_other_fields() {
        let forms = [
            JobForm::default(),
            JobForm {
                name: String::new(),
                ..valid_form()
            },
            JobForm {
                name: "   ".into(),
                everyday: true,
                ..valid_form()
            },
            JobForm {
                name: String::new(),
                trigger_type: TriggerType::MoistureBased,
                moisture_min: 90,
                moisture_max: 10,
                ..valid_form()
            },
        ];
        for form in forms {
            assert_eq!(validate(&form, &ctx()), Err(ValidationError::NameRequired));
        }
    }

    // -- Rules 2 and 3: start time ---------------------------------------------

    #[test]
    fn missing_start_time_rejected() {
        let form = JobForm {
            start_time: String::new(),
            ..valid_form()
        };
        assert_eq!(validate(&form, &ctx()), Err(ValidationError::StartTimeRequired));
    }

    #[test]
    fn start_time_equal_to_now_rejected() {
        let form = JobForm {
            start_time: "2026-10-17T12:00".into(),
            ..valid_form()
        };
        assert_eq!(
            validate(&form, &ctx()),
            Err(ValidationError::StartTimeNotInFuture)
        );
    }

    #[test]
    fn start_time_in_past_rejected() {
        let form = JobForm {
            start_time: "2025-01-01T08:00".into(),
            ..valid_form()
        };
        assert_eq!(
            validate(&form, &ctx()),
            Err(ValidationError::StartTimeNotInFuture)
        );
    }

    #[test]
    fn start_time_one_minute_ahead_accepted() {
        let form = JobForm {
            start_time: "2026-10-17T12:01".into(),
            ..valid_form()
        };
        validate(&form, &ctx()).unwrap();
    }

    #[test]
    fn everyday_accepts_any_start_time_content() {
        for start in ["", "2020-01-01T00:00", "07:30", "whenever"] {
            let form = JobForm {
                everyday: true,
                start_time: start.into(),
                ..valid_form()
            };
            validate(&form, &ctx()).unwrap();
        }
    }

    #[test]
    fn unparseable_start_time_rejected() {
        let form = JobForm {
            start_time: "next tuesday".into(),
            ..valid_form()
        };
        assert_eq!(
            validate(&form, &ctx()),
            Err(ValidationError::StartTimeInvalid("next tuesday".into()))
        );
    }

    #[test]
    fn time_of_day_without_everyday_rejected() {
        let form = JobForm {
            start_time: "07:30".into(),
            ..valid_form()
        };
        assert!(matches!(
            validate(&form, &ctx()),
            Err(ValidationError::StartTimeInvalid(_))
        ));
    }

    #[test]
    fn time_and_moisture_requires_start_time() {
        let form = JobForm {
            trigger_type: TriggerType::TimeAndMoisture,
            start_time: String::new(),
            ..valid_form()
        };
        assert_eq!(validate(&form, &ctx()), Err(ValidationError::StartTimeRequired));
    }

    #[test]
    fn moisture_based_ignores_start_time() {
        let form = JobForm {
            trigger_type: TriggerType::MoistureBased,
            start_time: "2000-01-01T00:00".into(),
            ..valid_form()
        };
        validate(&form, &ctx()).unwrap();
    }

    #[test]
    fn name_checked_before_start_time() {
        let form = JobForm {
            name: String::new(),
            start_time: String::new(),
            ..valid_form()
        };
        assert_eq!(validate(&form, &ctx()), Err(ValidationError::NameRequired));
    }

    // -- Plant range -----------------------------------------------------------

    #[test]
    fn plant_within_count_accepted() {
        let form = JobForm {
            plant: PlantSelector::Plant(3),
            ..valid_form()
        };
        validate(&form, &ctx()).unwrap();
    }

    #[test]
    fn plant_beyond_count_rejected() {
        let form = JobForm {
            plant: PlantSelector::Plant(4),
            ..valid_form()
        };
        assert_eq!(
            validate(&form, &ctx()),
            Err(ValidationError::PlantOutOfRange {
                plant: 4,
                plant_count: 3
            })
        );
    }

    // -- Moisture bounds -------------------------------------------------------

    #[test]
    fn moisture_bounds_inverted_rejected() {
        let form = JobForm {
            trigger_type: TriggerType::MoistureBased,
            moisture_min: 60,
            moisture_max: 40,
            ..valid_form()
        };
        assert_eq!(
            validate(&form, &ctx()),
            Err(ValidationError::MoistureBoundsInverted { min: 60, max: 40 })
        );
    }

    #[test]
    fn moisture_bounds_out_of_range_rejected() {
        let form = JobForm {
            trigger_type: TriggerType::MoistureBased,
            moisture_min: -5,
            moisture_max: 120,
            ..valid_form()
        };
        assert!(matches!(
            validate(&form, &ctx()),
            Err(ValidationError::MoistureOutOfRange { .. })
        ));
    }

    #[test]
    fn disabled_moisture_max_not_checked() {
        // Time-and-moisture jobs have no upper bound, so a stale max is ignored.
        let form = JobForm {
            trigger_type: TriggerType::TimeAndMoisture,
            moisture_min: 60,
            moisture_max: 10,
            ..valid_form()
        };
        validate(&form, &ctx()).unwrap();
    }

    #[test]
    fn error_messages_are_user_facing() {
        assert_eq!(ValidationError::NameRequired.to_string(), "name required");
        assert_eq!(
            ValidationError::StartTimeRequired.to_string(),
            "start time required"
        );
        assert_eq!(
            ValidationError::StartTimeNotInFuture.to_string(),
            "start time must be in the future"
        );
    }
}
