//! Mission lifecycle transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MissionError;
use crate::models::MissionStatus;

/// Operator commands that move a mission between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionCommand {
    Start,
    Pause,
    Resume,
    Abort,
}

impl MissionCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionCommand::Start => "start",
            MissionCommand::Pause => "pause",
            MissionCommand::Resume => "resume",
            MissionCommand::Abort => "abort",
        }
    }

    /// Status the mission ends up in after the command succeeds.
    pub fn target(&self) -> MissionStatus {
        match self {
            MissionCommand::Start | MissionCommand::Resume => MissionStatus::Running,
            MissionCommand::Pause => MissionStatus::Paused,
            MissionCommand::Abort => MissionStatus::Aborted,
        }
    }
}

impl fmt::Display for MissionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check whether `command` is allowed from `from`.
///
/// ```text
/// planned --start--> running --pause--> paused --resume--> running
/// running|paused --abort--> aborted
/// running --(progress reaches 100 on last waypoint)--> completed
/// ```
pub fn check_transition(from: MissionStatus, command: MissionCommand) -> Result<MissionStatus, MissionError> {
    let allowed = matches!(
        (from, command),
        (MissionStatus::Planned, MissionCommand::Start)
            | (MissionStatus::Running, MissionCommand::Pause)
            | (MissionStatus::Paused, MissionCommand::Resume)
            | (MissionStatus::Running | MissionStatus::Paused, MissionCommand::Abort)
    );

    if allowed {
        Ok(command.target())
    } else {
        Err(MissionError::InvalidTransition {
            from,
            command: command.as_str(),
        })
    }
}

/// Only a running mission may complete.
pub fn can_complete(from: MissionStatus) -> bool {
    from == MissionStatus::Running
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [MissionStatus; 5] = [
        MissionStatus::Planned,
        MissionStatus::Running,
        MissionStatus::Paused,
        MissionStatus::Completed,
        MissionStatus::Aborted,
    ];

    const ALL_COMMANDS: [MissionCommand; 4] = [
        MissionCommand::Start,
        MissionCommand::Pause,
        MissionCommand::Resume,
        MissionCommand::Abort,
    ];

    #[test]
    fn transition_table() {
        use MissionCommand::*;
        use MissionStatus::*;

        let expected = [
            (Planned, Start, Some(Running)),
            (Running, Pause, Some(Paused)),
            (Paused, Resume, Some(Running)),
            (Running, Abort, Some(Aborted)),
            (Paused, Abort, Some(Aborted)),
        ];

        for from in ALL_STATUSES {
            for command in ALL_COMMANDS {
                let want = expected
                    .iter()
                    .find(|(f, c, _)| *f == from && *c == command)
                    .and_then(|(_, _, to)| *to);
                match (check_transition(from, command), want) {
                    (Ok(got), Some(want)) => assert_eq!(got, want),
                    (Err(MissionError::InvalidTransition { from: f, .. }), None) => assert_eq!(f, from),
                    (got, want) => panic!("{from} + {command}: got {got:?}, want {want:?}"),
                }
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for command in ALL_COMMANDS {
            assert!(check_transition(MissionStatus::Completed, command).is_err());
            assert!(check_transition(MissionStatus::Aborted, command).is_err());
        }
    }

    #[test]
    fn only_running_can_complete() {
        assert!(can_complete(MissionStatus::Running));
        assert!(!can_complete(MissionStatus::Paused));
        assert!(!can_complete(MissionStatus::Aborted));
    }
}
