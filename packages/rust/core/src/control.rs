//! Run configuration and the shared state behind stop / continue.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};

use nexus_shared::{NexusError, Result, StepId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Running,
    /// Supervised mode: a step finished and the run waits for `continue_run`.
    WaitingConfirmation,
    Stopped,
    Completed,
    Failed,
}

impl RunState {
    /// An execution context exists for this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::WaitingConfirmation)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingConfirmation => "waiting for confirmation",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Normal,
    /// Pause after every completed step.
    Supervised,
}

/// The set of steps a run executes, always in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepSelection(BTreeSet<StepId>);

impl StepSelection {
    pub fn new(steps: impl IntoIterator<Item = StepId>) -> Self {
        Self(steps.into_iter().collect())
    }

    pub fn all() -> Self {
        Self::new(StepId::ALL)
    }

    /// Parse a comma-separated list of step numbers such as `"1,2,5"`.
    pub fn parse(list: &str) -> Result<Self> {
        let mut steps = BTreeSet::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let step = part
                .parse::<u8>()
                .ok()
                .and_then(StepId::from_index)
                .ok_or_else(|| NexusError::validation(format!("invalid step '{part}' (expected 1-5)")))?;
            steps.insert(step);
        }
        Ok(Self(steps))
    }

    pub fn contains(&self, step: StepId) -> bool {
        self.0.contains(&step)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = StepId> + '_ {
        self.0.iter().copied()
    }

    /// Selected steps up to and including `step`.
    pub fn count_through(&self, step: StepId) -> usize {
        self.0.range(..=step).count()
    }
}

/// Model ids for the three model-driven steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepModels {
    pub step3: Option<String>,
    pub step4: Option<String>,
    pub step5: Option<String>,
}

impl StepModels {
    pub fn for_step(&self, step: StepId) -> Option<&str> {
        let model = match step {
            StepId::Step3 => &self.step3,
            StepId::Step4 => &self.step4,
            StepId::Step5 => &self.step5,
            StepId::Step1 | StepId::Step2 => return None,
        };
        model.as_deref().filter(|m| !m.trim().is_empty())
    }
}

/// Where step 1 gets its URLs from. A URL list file wins over a sitemap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepInputs {
    pub sitemap_url: Option<String>,
    /// Substring filter for sitemap URLs; the configured default applies when unset.
    pub url_filter: Option<String>,
    pub urls_file: Option<PathBuf>,
}

impl StepInputs {
    pub fn has_source(&self) -> bool {
        self.urls_file.is_some() || self.sitemap_url.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Everything `configure` sets, snapshotted by each execution context.
#[derive(Debug, Clone, Default)]
pub(crate) struct RunConfig {
    pub selection: StepSelection,
    pub mode: RunMode,
    pub models: StepModels,
    pub inputs: StepInputs,
}

// ---------------------------------------------------------------------------
// RunControl
// ---------------------------------------------------------------------------

/// State shared between the front end and the execution context.
///
/// All methods are synchronous and never wait on the running workflow.
#[derive(Debug)]
pub(crate) struct RunControl {
    state: watch::Sender<RunState>,
    cancel: Mutex<CancellationToken>,
    last_completed: AtomicU8,
    last_error: Mutex<Option<String>>,
}

pub(crate) fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            state,
            cancel: Mutex::new(CancellationToken::new()),
            last_completed: AtomicU8::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Move to `to` only if the current state is one of `from`.
    pub fn transition(&self, from: &[RunState], to: RunState) -> bool {
        self.state.send_if_modified(|current| {
            if from.contains(current) {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    pub fn set_state(&self, to: RunState) {
        self.state.send_replace(to);
    }

    /// Install a fresh token for a new execution context.
    pub fn new_context(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *locked(&self.cancel) = token.clone();
        token
    }

    pub fn token(&self) -> CancellationToken {
        locked(&self.cancel).clone()
    }

    pub fn cancel(&self) {
        locked(&self.cancel).cancel();
    }

    pub fn last_completed(&self) -> u8 {
        self.last_completed.load(Ordering::SeqCst)
    }

    pub fn set_last_completed(&self, step: u8) {
        self.last_completed.store(step, Ordering::SeqCst);
    }

    pub fn last_error(&self) -> Option<String> {
        locked(&self.last_error).clone()
    }

    pub fn set_last_error(&self, error: Option<String>) {
        *locked(&self.last_error) = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_parses_and_orders() {
        let selection = StepSelection::parse("5, 1,3,3").unwrap();
        assert_eq!(
            selection.iter().collect::<Vec<_>>(),
            vec![StepId::Step1, StepId::Step3, StepId::Step5]
        );
        assert_eq!(selection.count_through(StepId::Step3), 2);
        assert!(StepSelection::parse("0").is_err());
        assert!(StepSelection::parse("1,x").is_err());
        assert!(StepSelection::parse("").unwrap().is_empty());
    }

    #[test]
    fn blank_model_counts_as_missing() {
        let models = StepModels {
            step3: Some("openai/gpt-4o-mini".into()),
            step4: Some("  ".into()),
            step5: None,
        };
        assert_eq!(models.for_step(StepId::Step3), Some("openai/gpt-4o-mini"));
        assert_eq!(models.for_step(StepId::Step4), None);
        assert_eq!(models.for_step(StepId::Step1), None);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let control = RunControl::new();
        let mut rx = control.subscribe();

        assert!(!control.transition(&[RunState::Running], RunState::Stopped));
        assert_eq!(control.state(), RunState::Idle);
        assert!(!rx.has_changed().unwrap());

        assert!(control.transition(&[RunState::Idle, RunState::Stopped], RunState::Running));
        assert_eq!(control.state(), RunState::Running);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn cancel_hits_current_context_only() {
        let control = RunControl::new();
        let first = control.new_context();
        control.cancel();
        assert!(first.is_cancelled());

        let second = control.new_context();
        assert!(!second.is_cancelled());
        assert!(!control.token().is_cancelled());
    }
}
