//! Poll-cycle decisions.
//!
//! The monitor's control flow reduced to a pure function of the status the
//! job had when loaded and the status the batch system reports now. Keeping
//! it free of I/O lets every branch be checked without a scheduler.

use std::time::Duration;

use thiserror::Error;

use super::types::PredictionJobStatus;

/// What the monitor does after advancing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Poll again after the delay.
    Reschedule(Duration),
    /// Process the job's results; the polling chain ends here.
    RunPipeline,
}

/// Status to persist and action to take for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: PredictionJobStatus,
    pub action: MonitorAction,
}

/// The batch system reported a status the job cannot move to.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Invalid state transition from '{from}' to '{to}'")]
pub struct InvalidTransition {
    pub from: PredictionJobStatus,
    pub to: PredictionJobStatus,
}

/// Decides the next step after the batch system advanced a job.
pub fn transition(
    current: PredictionJobStatus,
    advanced: PredictionJobStatus,
    reschedule_delay: Duration,
) -> Result<Transition, InvalidTransition> {
    if !current.can_transition_to(advanced) {
        return Err(InvalidTransition {
            from: current,
            to: advanced,
        });
    }

    let action = match advanced {
        PredictionJobStatus::Completed => MonitorAction::RunPipeline,
        // Anything short of completion keeps the chain alive, failure included.
        PredictionJobStatus::Pending
        | PredictionJobStatus::Running
        | PredictionJobStatus::Failed => MonitorAction::Reschedule(reschedule_delay),
    };

    Ok(Transition {
        status: advanced,
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use PredictionJobStatus::*;

    const DELAY: Duration = Duration::from_secs(60);

    #[test]
    fn test_unfinished_job_reschedules_with_delay() {
        for (from, to) in [(Pending, Pending), (Pending, Running), (Running, Running)] {
            let step = transition(from, to, DELAY).expect("valid transition");
            assert_eq!(step.status, to);
            assert_eq!(step.action, MonitorAction::Reschedule(DELAY));
        }
    }

    #[test]
    fn test_completion_runs_pipeline() {
        let step = transition(Running, Completed, DELAY).expect("valid transition");
        assert_eq!(
            step,
            Transition {
                status: Completed,
                action: MonitorAction::RunPipeline,
            }
        );

        let step = transition(Pending, Completed, DELAY).expect("valid transition");
        assert_eq!(step.action, MonitorAction::RunPipeline);
    }

    #[test]
    fn test_failure_keeps_polling() {
        let step = transition(Running, Failed, DELAY).expect("valid transition");
        assert_eq!(
            step,
            Transition {
                status: Failed,
                action: MonitorAction::Reschedule(DELAY),
            }
        );

        let step = transition(Failed, Running, DELAY).expect("resubmitted job");
        assert_eq!(step.action, MonitorAction::Reschedule(DELAY));

        let step = transition(Failed, Completed, DELAY).expect("resubmitted job");
        assert_eq!(step.action, MonitorAction::RunPipeline);
    }

    #[test]
    fn test_completed_job_cannot_move() {
        assert!(transition(Completed, Running, DELAY).is_err());
        assert!(transition(Completed, Failed, DELAY).is_err());
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let err = transition(Running, Pending, DELAY).unwrap_err();
        assert_eq!(
            err,
            InvalidTransition {
                from: Running,
                to: Pending,
            }
        );
        assert!(err.to_string().contains("'running' to 'pending'"));
    }
}
