use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::query::validator::{QueryValidator, ValidationVerdict};
use crate::schema::DatabaseSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    Pending,
    Validating,
    Rejected,
    Admitted,
    Executing,
    Completed,
    Failed,
}

impl GateState {
    fn can_transition_to(self, next: GateState) -> bool {
        use GateState::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rejected)
                | (Validating, Admitted)
                | (Admitted, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GateState::Rejected | GateState::Completed | GateState::Failed)
    }
}

/// Admission control around one execution. A query reaches EXECUTING only through an
/// admitting verdict; a rejection is terminal.
#[derive(Debug)]
pub struct AdmissionGate {
    state: GateState,
    verdict: Option<ValidationVerdict>,
    started_at: Option<Instant>,
    elapsed: Option<Duration>,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Pending,
            verdict: None,
            started_at: None,
            elapsed: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn verdict(&self) -> Option<&ValidationVerdict> {
        self.verdict.as_ref()
    }

    /// Elapsed time of the EXECUTING phase, once it has finished.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    fn transition(&mut self, next: GateState) -> Result<(), PipelineError> {
        if self.state.is_terminal() {
            return Err(PipelineError::Execution(format!(
                "Admission gate already finished in {:?}",
                self.state
            )));
        }
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::Execution(format!(
                "Invalid admission transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!("Admission gate {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// PENDING -> VALIDATING -> REJECTED | ADMITTED. Rejection yields a policy error,
    /// except for blank input, which is malformed rather than forbidden.
    pub fn admit(
        &mut self,
        sql: &str,
        schema: Option<&DatabaseSchema>,
    ) -> Result<&ValidationVerdict, PipelineError> {
        self.transition(GateState::Validating)?;
        let verdict = QueryValidator::validate(sql, schema);

        if verdict.is_valid {
            self.transition(GateState::Admitted)?;
        } else {
            self.transition(GateState::Rejected)?;
            let message = verdict.errors.join("; ");
            warn!("Query rejected: {}", message);
            self.verdict = Some(verdict);
            if sql.trim().is_empty() {
                return Err(PipelineError::Validation(message));
            }
            return Err(PipelineError::Policy(message));
        }

        Ok(self.verdict.insert(verdict))
    }

    /// ADMITTED -> EXECUTING; starts the clock.
    pub fn begin(&mut self) -> Result<(), PipelineError> {
        self.transition(GateState::Executing)?;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    /// EXECUTING -> COMPLETED | FAILED; elapsed time is recorded on either outcome.
    pub fn finish(&mut self, success: bool) -> Result<Duration, PipelineError> {
        let next = if success {
            GateState::Completed
        } else {
            GateState::Failed
        };
        self.transition(next)?;
        let elapsed = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.elapsed = Some(elapsed);
        Ok(elapsed)
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::validator::EMPTY_QUERY_ERROR;

    #[test]
    fn admitted_queries_run_to_completion() {
        let mut gate = AdmissionGate::new();
        assert_eq!(gate.state(), GateState::Pending);

        let verdict = gate.admit("SELECT 1;", None).unwrap();
        assert!(verdict.is_valid);
        assert_eq!(gate.state(), GateState::Admitted);

        gate.begin().unwrap();
        assert_eq!(gate.state(), GateState::Executing);
        gate.finish(true).unwrap();
        assert_eq!(gate.state(), GateState::Completed);
        assert!(gate.elapsed().is_some());
        assert!(gate.state().is_terminal());
    }

    #[test]
    fn rejection_is_terminal_and_a_policy_error() {
        let mut gate = AdmissionGate::new();
        let err = gate.admit("TRUNCATE orders;", None).unwrap_err();
        assert_eq!(err.kind(), "policy_error");
        assert_eq!(gate.state(), GateState::Rejected);
        assert!(!gate.verdict().unwrap().is_valid);

        assert!(gate.begin().is_err());
        assert_eq!(gate.state(), GateState::Rejected);
        assert!(gate.elapsed().is_none());
    }

    #[test]
    fn blank_queries_are_malformed_not_forbidden() {
        for sql in ["", "   \n\t"] {
            let mut gate = AdmissionGate::new();
            let err = gate.admit(sql, None).unwrap_err();
            assert_eq!(err, PipelineError::Validation(EMPTY_QUERY_ERROR.to_string()));
            assert_eq!(err.kind(), "validation_error");
            assert_eq!(gate.state(), GateState::Rejected);
        }
    }

    #[test]
    fn failures_still_record_elapsed_time() {
        let mut gate = AdmissionGate::new();
        gate.admit("SELECT 1;", None).unwrap();
        gate.begin().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = gate.finish(false).unwrap();
        assert_eq!(gate.state(), GateState::Failed);
        assert!(elapsed >= Duration::from_millis(5));
    }

    #[test]
    fn execution_requires_admission() {
        let mut gate = AdmissionGate::new();
        assert!(gate.begin().is_err());
        assert!(gate.finish(true).is_err());
        assert_eq!(gate.state(), GateState::Pending);
    }
}
