//! MLPerf v0.5 compliance lines.

use std::{
    panic::Location,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::Value;

/// The log target compliance lines are written to.
pub const TARGET: &str = "mlperf";

const VERSION: &str = "0.5.0";
const BENCHMARK: &str = "ncf";

/// The milestones of a run the compliance log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    TrainLoop,
    TrainEpoch,
    EvalStart,
    EvalTarget,
    EvalAccuracy,
    EvalHpNumNeg,
    EvalStop,
    RunStop,
    RunFinal,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrainLoop => "train_loop",
            Self::TrainEpoch => "train_epoch",
            Self::EvalStart => "eval_start",
            Self::EvalTarget => "eval_target",
            Self::EvalAccuracy => "eval_accuracy",
            Self::EvalHpNumNeg => "eval_hp_num_neg",
            Self::EvalStop => "eval_stop",
            Self::RunStop => "run_stop",
            Self::RunFinal => "run_final",
        }
    }
}

/// Prints compliance lines when enabled, does nothing otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlPerfLogger {
    enabled: bool,
}

impl MlPerfLogger {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Logs `key` with an optional json value, tagged with the caller's location.
    #[track_caller]
    pub fn ncf_print(&self, key: Tag, value: Option<Value>) {
        if !self.enabled {
            return;
        }

        let line = format_line(key, value.as_ref(), Location::caller(), now());
        log::info!(target: TARGET, "{line}");
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn format_line(key: Tag, value: Option<&Value>, location: &Location<'_>, timestamp: f64) -> String {
    let mut line = format!(
        ":::MLPv{VERSION} {BENCHMARK} {timestamp:.3} ({}:{}) {}",
        location.file(),
        location.line(),
        key.as_str()
    );

    if let Some(value) = value {
        line.push_str(&format!(": {value}"));
    }

    line
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lines_follow_the_compliance_format() {
        let location = Location::caller();
        let line = format_line(
            Tag::EvalAccuracy,
            Some(&json!({"epoch": 0, "value": 0.5})),
            location,
            1.25,
        );

        let prefix = format!(
            ":::MLPv0.5.0 ncf 1.250 ({}:{}) eval_accuracy: ",
            location.file(),
            location.line()
        );
        assert!(line.starts_with(&prefix));
        assert!(line.ends_with(r#"{"epoch":0,"value":0.5}"#));
    }

    #[test]
    fn valueless_tags_end_with_the_key() {
        let line = format_line(Tag::RunFinal, None, Location::caller(), 0.0);
        assert!(line.ends_with(") run_final"));
    }
}
