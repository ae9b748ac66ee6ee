//! The workflow engine: step sequencing, supervised pauses, stop and resume.
//!
//! A run is driven by one execution context, a tokio task spawned by
//! [`WorkflowEngine::start`] or by [`WorkflowEngine::continue_run`] after a
//! stop. The front end only touches shared state (a `watch` channel for the
//! run state, a cancellation token and an atomic cursor), so every control
//! call returns immediately.

use std::sync::{Arc, Mutex, OnceLock};

use nexus_shared::{NexusError, Result, RunId, StepId, WorkflowSettings};
use nexus_storage::{ArtifactStore, ProjectManager};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::control::{
    RunConfig, RunControl, RunMode, RunState, StepInputs, StepModels, StepSelection, locked,
};
use crate::observer::WorkflowObserver;
use crate::prompts::PromptSet;
use crate::services::Services;
use crate::steps::{self, StepContext, StepOutcome};

/// Runs the five-step taxonomy workflow against one artifact store.
///
/// Cloning is cheap; clones share the same run.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Inner>,
}

struct Inner {
    store: ArtifactStore,
    settings: WorkflowSettings,
    prompts: PromptSet,
    services: Services,
    observer: Arc<dyn WorkflowObserver>,
    project: OnceLock<ProjectManager>,
    config: Mutex<RunConfig>,
    control: RunControl,
}

impl WorkflowEngine {
    pub fn new(
        store: ArtifactStore,
        settings: WorkflowSettings,
        prompts: PromptSet,
        services: Services,
        observer: Arc<dyn WorkflowObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                prompts,
                services,
                observer,
                project: OnceLock::new(),
                config: Mutex::new(RunConfig::default()),
                control: RunControl::new(),
            }),
        }
    }

    /// Record step completion in this project's settings file as steps finish.
    pub fn with_project(self, project: ProjectManager) -> Self {
        if self.inner.project.set(project).is_err() {
            warn!("project already attached to engine; ignoring");
        }
        self
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Choose the steps, mode and per-step models for the next run.
    pub fn configure(
        &self,
        selection: StepSelection,
        mode: RunMode,
        models: StepModels,
    ) -> Result<()> {
        self.ensure_inactive()?;
        let mut config = locked(&self.inner.config);
        config.selection = selection;
        config.mode = mode;
        config.models = models;
        Ok(())
    }

    /// Where step 1 takes its URLs from.
    pub fn set_inputs(&self, inputs: StepInputs) -> Result<()> {
        self.ensure_inactive()?;
        locked(&self.inner.config).inputs = inputs;
        Ok(())
    }

    fn ensure_inactive(&self) -> Result<()> {
        if self.state().is_active() {
            return Err(NexusError::validation(
                "cannot reconfigure while a run is active",
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Validate the configuration and spawn a fresh run.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all)]
    pub fn start(&self) -> Result<RunId> {
        let inner = &self.inner;
        let config = locked(&inner.config).clone();
        if inner.control.state().is_active() {
            return Err(NexusError::validation("a run is already active"));
        }
        inner.validate(&config)?;

        let idle = [
            RunState::Idle,
            RunState::Stopped,
            RunState::Completed,
            RunState::Failed,
        ];
        if !inner.control.transition(&idle, RunState::Running) {
            return Err(NexusError::validation("a run is already active"));
        }
        inner.control.set_last_completed(0);
        inner.control.set_last_error(None);
        let token = inner.control.new_context();
        inner.observer.state_changed(RunState::Running);

        let run_id = RunId::new();
        info!(%run_id, steps = config.selection.len(), mode = ?config.mode, "starting workflow");
        tokio::spawn(Arc::clone(inner).execute(run_id, config, token, false));
        Ok(run_id)
    }

    /// Ask the current run to stop. A no-op when nothing is running.
    pub fn stop(&self) {
        let state = self.state();
        if state.is_active() {
            info!(%state, "stop requested");
            self.inner.observer.log("Stopping...");
            self.inner.control.cancel();
        }
    }

    /// Resume a paused or stopped run.
    ///
    /// From `WaitingConfirmation` the paused run proceeds with its next step.
    /// From `Stopped` a new execution context runs the selected steps after
    /// the last completed one.
    pub fn continue_run(&self) -> Result<()> {
        let inner = &self.inner;
        let control = &inner.control;

        match control.state() {
            RunState::WaitingConfirmation if !control.token().is_cancelled() => {
                if control.transition(&[RunState::WaitingConfirmation], RunState::Running) {
                    inner.observer.state_changed(RunState::Running);
                    inner.log("Continuing");
                    return Ok(());
                }
            }
            RunState::Stopped => {
                if control.transition(&[RunState::Stopped], RunState::Running) {
                    control.set_last_error(None);
                    let token = control.new_context();
                    inner.observer.state_changed(RunState::Running);

                    let config = locked(&inner.config).clone();
                    let run_id = RunId::new();
                    info!(%run_id, after_step = control.last_completed(), "resuming workflow");
                    tokio::spawn(Arc::clone(inner).execute(run_id, config, token, true));
                    return Ok(());
                }
            }
            _ => {}
        }

        Err(NexusError::validation(format!(
            "nothing to continue (run is {})",
            control.state()
        )))
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn state(&self) -> RunState {
        self.inner.control.state()
    }

    /// Highest step completed by the current run; 0 before the first.
    pub fn last_completed_step(&self) -> u8 {
        self.inner.control.last_completed()
    }

    /// Message of the error that failed the last run.
    pub fn last_error(&self) -> Option<String> {
        self.inner.control.last_error()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.inner.control.subscribe()
    }

    /// Wait until the run leaves `Running` and return the state it settled in.
    pub async fn wait_settled(&self) -> RunState {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| *s != RunState::Running).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    /// Artifact presence per step.
    pub fn step_status(&self) -> Vec<(StepId, bool)> {
        self.inner.store.step_status()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

impl Inner {
    fn log(&self, message: &str) {
        debug!("{message}");
        self.observer.log(message);
    }

    fn set_state(&self, state: RunState) {
        self.control.set_state(state);
        self.observer.state_changed(state);
    }

    /// Pre-flight checks; a failing run never starts.
    fn validate(&self, config: &RunConfig) -> Result<()> {
        let selection = &config.selection;
        if selection.is_empty() {
            return Err(NexusError::validation("no steps selected"));
        }

        if selection.contains(StepId::Step1) && !config.inputs.has_source() {
            return Err(NexusError::validation(
                "step 1 needs a sitemap URL or a URL list file",
            ));
        }
        if selection.contains(StepId::Step2) {
            if self.services.reader.is_none() {
                return Err(NexusError::validation(
                    "step 2 needs a content reader (set the Jina API key)",
                ));
            }
            if self.settings.reader_threads == 0 {
                return Err(NexusError::validation("reader_threads must be at least 1"));
            }
        }

        let model_steps: Vec<StepId> = selection.iter().filter(|s| s.needs_model()).collect();
        if !model_steps.is_empty() {
            if self.services.llm.is_none() {
                return Err(NexusError::validation(
                    "steps 3-5 need a language model (set the OpenRouter API key)",
                ));
            }
            if let Some(step) = model_steps
                .iter()
                .find(|s| config.models.for_step(**s).is_none())
            {
                return Err(NexusError::validation(format!(
                    "no model selected for {step}"
                )));
            }
            self.prompts.validate()?;
        }

        if selection.contains(StepId::Step3) && self.settings.extract_threads == 0 {
            return Err(NexusError::validation("extract_threads must be at least 1"));
        }
        if selection.contains(StepId::Step4)
            && (self.settings.batch_size == 0 || self.settings.batch_threads == 0)
        {
            return Err(NexusError::validation(
                "batch_size and batch_threads must be at least 1",
            ));
        }

        for step in selection.iter() {
            let Some(previous) = step.previous() else {
                continue;
            };
            if !selection.contains(previous) && !self.store.exists(previous.artifact()) {
                return Err(NexusError::validation(format!(
                    "{step} needs {} from step {}; select that step too",
                    previous.artifact(),
                    previous.index()
                )));
            }
        }

        Ok(())
    }

    async fn execute(
        self: Arc<Self>,
        run_id: RunId,
        config: RunConfig,
        token: CancellationToken,
        resume: bool,
    ) {
        let span = info_span!("run", %run_id, resume);
        let result = self
            .run_steps(&config, &token, resume)
            .instrument(span)
            .await;

        let state = match result {
            Ok(true) => {
                self.log("Workflow completed");
                RunState::Completed
            }
            Ok(false) => {
                self.log(&format!(
                    "Workflow stopped after step {}",
                    self.control.last_completed()
                ));
                RunState::Stopped
            }
            Err(e) => {
                error!(%run_id, error = %e, "workflow failed");
                self.observer.log(&format!("Error: {e}"));
                self.control.set_last_error(Some(e.to_string()));
                RunState::Failed
            }
        };
        self.set_state(state);
    }

    /// Run the selected steps in order. `Ok(false)` means the run was stopped.
    async fn run_steps(
        &self,
        config: &RunConfig,
        token: &CancellationToken,
        resume: bool,
    ) -> Result<bool> {
        let total = config.selection.len();
        let skip_through = if resume { self.control.last_completed() } else { 0 };
        let pending = config
            .selection
            .iter()
            .filter(|s| s.index() > skip_through);

        for step in pending {
            if token.is_cancelled() {
                return Ok(false);
            }
            self.log(&format!("=== Step {}: {} ===", step.index(), step.label()));
            self.observer.progress(step.label(), None);

            let ctx = StepContext {
                store: &self.store,
                settings: &self.settings,
                prompts: &self.prompts,
                services: &self.services,
                models: &config.models,
                inputs: &config.inputs,
                observer: &self.observer,
                cancel: token,
            };
            let outcome = match step {
                StepId::Step1 => steps::collect_products(&ctx).await,
                StepId::Step2 => steps::fetch_content(&ctx).await,
                StepId::Step3 => steps::extract_attributes(&ctx).await,
                StepId::Step4 => steps::build_structure(&ctx).await,
                StepId::Step5 => steps::finalize_categories(&ctx).await,
            }
            .map_err(|e| step_error(step, e))?;

            match outcome {
                StepOutcome::Cancelled => {
                    self.log(&format!("Step {} interrupted", step.index()));
                    return Ok(false);
                }
                StepOutcome::Written => self.mark_completed(step),
                StepOutcome::NotWritten => {}
            }

            self.control.set_last_completed(step.index());
            info!(step = step.index(), ?outcome, "step finished");
            let done = config.selection.count_through(step);
            self.observer.progress(
                &format!("Step {} done ({done}/{total})", step.index()),
                Some(done as f64 / total as f64 * 100.0),
            );

            if config.mode == RunMode::Supervised
                && !self.wait_for_confirmation(step, token).await
            {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn mark_completed(&self, step: StepId) {
        if let Some(project) = self.project.get() {
            if let Err(e) = project.update_step_status(step, true) {
                warn!(step = step.index(), error = %e, "could not update project status");
            }
        }
    }

    /// Park until `continue_run` or `stop`. Returns whether to carry on.
    async fn wait_for_confirmation(&self, step: StepId, token: &CancellationToken) -> bool {
        let mut rx = self.control.subscribe();
        if !self
            .control
            .transition(&[RunState::Running], RunState::WaitingConfirmation)
        {
            return !token.is_cancelled();
        }
        self.observer.state_changed(RunState::WaitingConfirmation);
        self.log(&format!(
            "Step {} complete. Waiting for confirmation to continue...",
            step.index()
        ));

        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            resumed = async { rx.wait_for(|s| *s == RunState::Running).await.is_ok() } => resumed,
        }
    }
}

/// Fatal step errors are tagged with the step; input and validation errors
/// already name what went wrong.
fn step_error(step: StepId, error: NexusError) -> NexusError {
    match error {
        NexusError::MissingInput { .. } | NexusError::Validation { .. } => error,
        other => NexusError::Step {
            step: step.index(),
            message: other.to_string(),
        },
    }
}
