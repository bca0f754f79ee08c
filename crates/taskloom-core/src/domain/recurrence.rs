//! Recurrence rules attached to tasks.

use serde::{Deserialize, Serialize};

use super::cron::{CronError, CronSchedule};

/// How a task repeats.
///
/// Serialized as an internally tagged object, e.g.
/// `{"kind":"INTERVAL","every_secs":3600}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecurrenceRule {
    /// One-shot task.
    #[default]
    None,

    /// Fire every `every_secs` seconds.
    Interval { every_secs: u64 },

    /// Fire on minutes matching a 5-field cron expression.
    CronLike { expression: String },
}

impl RecurrenceRule {
    /// Validate the rule without computing anything.
    pub fn validate(&self) -> Result<(), CronError> {
        match self {
            RecurrenceRule::None => Ok(()),
            RecurrenceRule::Interval { every_secs } => {
                if *every_secs == 0 {
                    Err(CronError::ZeroInterval)
                } else {
                    Ok(())
                }
            }
            RecurrenceRule::CronLike { expression } => {
                CronSchedule::parse(expression).map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_is_internally_tagged() {
        let rule = RecurrenceRule::Interval { every_secs: 60 };
        let v = serde_json::to_value(&rule).unwrap();
        assert_eq!(v["kind"], "INTERVAL");
        assert_eq!(v["every_secs"], 60);

        let none = serde_json::to_value(RecurrenceRule::None).unwrap();
        assert_eq!(none["kind"], "NONE");
    }

    #[test]
    fn validate_rejects_zero_interval_and_bad_cron() {
        assert!(RecurrenceRule::None.validate().is_ok());
        assert!(RecurrenceRule::Interval { every_secs: 0 }.validate().is_err());
        assert!(
            RecurrenceRule::CronLike {
                expression: "61 * * * *".into()
            }
            .validate()
            .is_err()
        );
    }
}
