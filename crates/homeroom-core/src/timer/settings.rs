//! Timer settings value object.
//!
//! Settings are immutable once built; changing them means replacing the whole
//! value through [`Settings::validate`] first.

use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::error::SettingsError;
use crate::signal::CompletionSignal;

/// Display options. They never affect timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationFlags {
    #[serde(default = "default_true")]
    pub show_remaining_in_title: bool,
    #[serde(default = "default_true")]
    pub show_progress_ring: bool,
    #[serde(default)]
    pub visual_flourish: bool,
}

impl Default for PresentationFlags {
    fn default() -> Self {
        Self {
            show_remaining_in_title: true,
            show_progress_ring: true,
            visual_flourish: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub cycles_until_long_break: u32,
    #[serde(default)]
    pub presentation: PresentationFlags,
    #[serde(default)]
    pub completion_signal: CompletionSignal,
    #[serde(default = "default_volume")]
    pub signal_volume: u8,
}

fn default_true() -> bool {
    true
}

fn default_volume() -> u8 {
    70
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            cycles_until_long_break: 4,
            presentation: PresentationFlags::default(),
            completion_signal: CompletionSignal::Bell,
            signal_volume: default_volume(),
        }
    }
}

impl Settings {
    /// Reject non-positive durations, a zero cycle count and out-of-range volume.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let durations = [
            ("work_minutes", self.work_minutes),
            ("short_break_minutes", self.short_break_minutes),
            ("long_break_minutes", self.long_break_minutes),
        ];
        for (field, minutes) in durations {
            if minutes == 0 {
                return Err(SettingsError::invalid(field, "duration must be positive"));
            }
        }
        if self.cycles_until_long_break == 0 {
            return Err(SettingsError::invalid(
                "cycles_until_long_break",
                "must be at least 1",
            ));
        }
        if self.signal_volume > 100 {
            return Err(SettingsError::invalid(
                "signal_volume",
                format!("{} is above 100", self.signal_volume),
            ));
        }
        Ok(())
    }

    /// Whether a break entered after `cycles_completed` work phases is the long one.
    pub fn is_long_break(&self, cycles_completed: u32) -> bool {
        let every = self.cycles_until_long_break.max(1);
        cycles_completed > 0 && cycles_completed % every == 0
    }

    /// Length of `phase` in seconds, given the cycle count at which it starts.
    ///
    /// Uses saturating arithmetic so absurd minute values cannot overflow.
    pub fn phase_secs(&self, phase: Phase, cycles_completed: u32) -> u64 {
        let minutes = match phase {
            Phase::Work => self.work_minutes,
            Phase::Break if self.is_long_break(cycles_completed) => self.long_break_minutes,
            Phase::Break => self.short_break_minutes,
        };
        u64::from(minutes).saturating_mul(60).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn zero_durations_rejected() {
        let s = Settings {
            short_break_minutes: 0,
            ..Settings::default()
        };
        let err = s.validate().unwrap_err();
        assert_eq!(
            err,
            SettingsError::InvalidValue {
                field: "short_break_minutes".into(),
                message: "duration must be positive".into(),
            }
        );
    }

    #[test]
    fn zero_cycles_rejected() {
        let s = Settings {
            cycles_until_long_break: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn loud_volume_rejected() {
        let s = Settings {
            signal_volume: 101,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn long_break_every_nth_cycle() {
        let s = Settings::default();
        assert!(!s.is_long_break(0));
        assert!(!s.is_long_break(3));
        assert!(s.is_long_break(4));
        assert!(s.is_long_break(8));
        assert_eq!(s.phase_secs(Phase::Break, 3), 5 * 60);
        assert_eq!(s.phase_secs(Phase::Break, 4), 15 * 60);
        assert_eq!(s.phase_secs(Phase::Work, 4), 25 * 60);
    }

    #[test]
    fn single_cycle_makes_every_break_long() {
        let s = Settings {
            cycles_until_long_break: 1,
            ..Settings::default()
        };
        assert!(s.is_long_break(1));
        assert!(s.is_long_break(2));
    }

    #[test]
    fn camel_case_on_the_wire() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["workMinutes"], 25);
        assert_eq!(json["cyclesUntilLongBreak"], 4);
        assert_eq!(json["completionSignal"], "bell");
        assert_eq!(json["presentation"]["showProgressRing"], true);
    }

    #[test]
    fn missing_optional_fields_default() {
        let s: Settings = serde_json::from_str(
            r#"{"workMinutes":50,"shortBreakMinutes":10,"longBreakMinutes":30,"cyclesUntilLongBreak":2}"#,
        )
        .unwrap();
        assert_eq!(s.work_minutes, 50);
        assert_eq!(s.signal_volume, 70);
        assert_eq!(s.completion_signal, CompletionSignal::Bell);
    }
}
