use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::Stage;

/// Lifecycle of one run. `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Received,
    Normalized,
    Classified,
    Extracting,
    Reconciled,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Normalized => "normalized",
            Self::Classified => "classified",
            Self::Extracting => "extracting",
            Self::Reconciled => "reconciled",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Received, Normalized)
            | (Normalized, Classified)
            | (Classified, Extracting)
            | (Extracting, Reconciled)
            | (Reconciled, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Illegal run state transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Progress notification emitted on every state change.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusEvent {
    pub run_id: Uuid,
    pub state: RunState,
    /// Set on failure.
    pub stage: Option<Stage>,
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Owns the state of one run and publishes its transitions.
///
/// Events go to an optional unbounded channel; dropped receivers are ignored.
/// The latest state is also observable through a `watch` channel.
pub struct RunTracker {
    run_id: Uuid,
    state: RunState,
    events: Option<mpsc::UnboundedSender<RunStatusEvent>>,
    watch: watch::Sender<RunState>,
}

impl RunTracker {
    pub fn new(run_id: Uuid, events: Option<mpsc::UnboundedSender<RunStatusEvent>>) -> Self {
        let (watch, _) = watch::channel(RunState::Received);
        let tracker = Self {
            run_id,
            state: RunState::Received,
            events,
            watch,
        };
        tracker.emit(None, None);
        tracker
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.watch.subscribe()
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), IllegalTransition> {
        if !self.state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.set(next, None, None);
        Ok(())
    }

    /// Move to `Failed`. No-op when the run already ended.
    pub fn fail(&mut self, stage: Stage, message: String) {
        if self.state.is_terminal() {
            tracing::warn!(
                run_id = %self.run_id,
                state = self.state.as_str(),
                "Ignoring failure of a finished run"
            );
            return;
        }
        self.set(RunState::Failed, Some(stage), Some(message));
    }

    fn set(&mut self, next: RunState, stage: Option<Stage>, message: Option<String>) {
        tracing::debug!(
            run_id = %self.run_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "Run state transition"
        );
        self.state = next;
        self.watch.send_replace(next);
        self.emit(stage, message);
    }

    fn emit(&self, stage: Option<Stage>, message: Option<String>) {
        if let Some(events) = &self.events {
            let _ = events.send(RunStatusEvent {
                run_id: self.run_id,
                state: self.state,
                stage,
                message,
                at: Utc::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_linear() {
        let mut tracker = RunTracker::new(Uuid::new_v4(), None);
        for next in [
            RunState::Normalized,
            RunState::Classified,
            RunState::Extracting,
            RunState::Reconciled,
            RunState::Done,
        ] {
            tracker.advance(next).unwrap();
        }
        assert_eq!(tracker.state(), RunState::Done);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut tracker = RunTracker::new(Uuid::new_v4(), None);
        let err = tracker.advance(RunState::Extracting).unwrap_err();
        assert_eq!(err.from, RunState::Received);
        assert_eq!(err.to, RunState::Extracting);
        assert_eq!(tracker.state(), RunState::Received);
    }

    #[test]
    fn terminal_states_are_final() {
        assert!(RunState::Extracting.can_transition_to(RunState::Failed));
        assert!(RunState::Received.can_transition_to(RunState::Failed));
        assert!(!RunState::Done.can_transition_to(RunState::Failed));
        assert!(!RunState::Failed.can_transition_to(RunState::Received));
        assert!(!RunState::Failed.can_transition_to(RunState::Failed));
    }

    #[test]
    fn events_and_watch_follow_transitions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = RunTracker::new(Uuid::new_v4(), Some(tx));
        let watch = tracker.subscribe();

        tracker.advance(RunState::Normalized).unwrap();
        tracker.fail(Stage::Classifying, "boom".into());
        tracker.fail(Stage::Extracting, "ignored".into());

        assert_eq!(*watch.borrow(), RunState::Failed);
        let states: Vec<RunState> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![RunState::Received, RunState::Normalized, RunState::Failed]
        );
    }

    #[test]
    fn failure_event_carries_stage() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = RunTracker::new(Uuid::new_v4(), Some(tx));
        tracker.fail(Stage::Normalizing, "corrupt".into());
        let failed = std::iter::from_fn(|| rx.try_recv().ok()).last().unwrap();
        assert_eq!(failed.stage, Some(Stage::Normalizing));
        assert_eq!(failed.message.as_deref(), Some("corrupt"));
    }

    #[test]
    fn stage_follows_state() {
        assert_eq!(Stage::following(RunState::Received), Stage::Normalizing);
        assert_eq!(Stage::following(RunState::Classified), Stage::Extracting);
    }
}
