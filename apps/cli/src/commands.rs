//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use nexus_core::{
    ContentReader, LanguageModel, PromptSet, RunMode, RunState, Services, StepInputs, StepModels,
    StepSelection, WorkflowEngine, WorkflowObserver, suggest_models,
};
use nexus_openrouter::OpenRouterClient;
use nexus_reader::ReaderClient;
use nexus_shared::{AppConfig, api_key_from_env, init_config, load_config};
use nexus_sitemap::SitemapParser;
use nexus_storage::{ArtifactStore, ProjectManager};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Nexus Navigation Architect: product sitemap in, category tree out.
#[derive(Parser)]
#[command(
    name = "nexus",
    version,
    about = "Build an e-commerce navigation taxonomy from a product sitemap.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create, list and inspect projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// List the models OpenRouter offers and suggest defaults.
    Models {
        /// Print the full listing as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run workflow steps for a project.
    Run(RunArgs),
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

#[derive(Subcommand)]
pub(crate) enum ProjectAction {
    /// Create a new project directory.
    New {
        name: String,
        /// Parent directory (defaults to `defaults.projects_dir`).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List projects, most recently modified first.
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Show which step artifacts a project has.
    Status { path: PathBuf },
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Project directory.
    #[arg(long)]
    project: PathBuf,

    /// Steps to run, e.g. `1,2,3`. Defaults to the steps without an artifact.
    #[arg(long)]
    steps: Option<String>,

    /// Pause after each step until `continue` is entered.
    #[arg(long)]
    supervised: bool,

    /// Sitemap URL for step 1.
    #[arg(long)]
    sitemap: Option<String>,

    /// Substring product URLs must contain (overrides `workflow.url_filter`).
    #[arg(long)]
    filter: Option<String>,

    /// File with one product URL per line; used instead of a sitemap.
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// Model for step 3 (attribute extraction).
    #[arg(long)]
    model3: Option<String>,

    /// Model for step 4 (category structure).
    #[arg(long)]
    model4: Option<String>,

    /// Model for step 5 (finalization).
    #[arg(long)]
    model5: Option<String>,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nexus=info",
        1 => "nexus=debug",
        _ => "nexus=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
        Command::Project { action } => match action {
            ProjectAction::New { name, dir } => cmd_project_new(&name, dir),
            ProjectAction::List { dir } => cmd_project_list(dir),
            ProjectAction::Status { path } => cmd_project_status(&path),
        },
        Command::Models { json } => cmd_models(json).await,
        Command::Run(args) => cmd_run(args).await,
    }
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

fn projects_dir(config: &AppConfig, dir: Option<PathBuf>) -> PathBuf {
    dir.unwrap_or_else(|| PathBuf::from(&config.defaults.projects_dir))
}

/// A manager with `path` loaded as the current project.
fn open_project(path: &Path) -> Result<ProjectManager> {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut projects = ProjectManager::new(parent);
    projects.load_project(path)?;
    Ok(projects)
}

fn cmd_project_new(name: &str, dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let mut projects = ProjectManager::new(projects_dir(&config, dir));
    let path = projects.create_project(name)?;

    // editable copy of the default prompts
    projects.save_prompt_config(&PromptSet::default().to_config())?;

    println!("Project created at: {}", path.display());
    Ok(())
}

fn cmd_project_list(dir: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let projects = ProjectManager::new(projects_dir(&config, dir));
    let list = projects.list_projects()?;

    if list.is_empty() {
        println!("No projects in {}", projects.base_dir().display());
        return Ok(());
    }
    for project in list {
        println!(
            "  {:<24} {}  {}",
            project.name,
            project.last_modified.format("%Y-%m-%d %H:%M"),
            project.path.display()
        );
    }
    Ok(())
}

fn cmd_project_status(path: &Path) -> Result<()> {
    let projects = open_project(path)?;
    let config = projects.project_config()?;
    let store = projects.artifact_store()?;

    println!();
    println!("  Project:  {}", config.project_name);
    println!("  Created:  {}", config.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Modified: {}", config.last_modified.format("%Y-%m-%d %H:%M"));
    println!();
    print_step_status(&store);
    println!();
    Ok(())
}

fn print_step_status(store: &ArtifactStore) {
    for (step, done) in store.step_status() {
        let mark = if done { "x" } else { " " };
        println!(
            "  [{mark}] Step {}: {:<28} {}",
            step.index(),
            step.label(),
            step.artifact()
        );
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

fn openrouter_client(config: &AppConfig) -> Result<Option<OpenRouterClient>> {
    let Some(key) = api_key_from_env(&config.openrouter.api_key_env) else {
        return Ok(None);
    };
    Ok(Some(OpenRouterClient::new(key, &config.openrouter.base_url)?))
}

async fn cmd_models(json: bool) -> Result<()> {
    let config = load_config()?;
    let client = openrouter_client(&config)?.ok_or_else(|| {
        eyre!(
            "OpenRouter API key not found. Set the {} environment variable.",
            config.openrouter.api_key_env
        )
    })?;

    let models = client.list_models().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    for model in &models {
        println!("  {:<48} {}", model.id, model.name);
    }
    let picks = suggest_models(&models);
    println!();
    println!("  {} models available", models.len());
    println!(
        "  Suggested for steps 3-4: {}",
        picks.fast.as_deref().unwrap_or("-")
    );
    println!(
        "  Suggested for step 5:    {}",
        picks.reasoning.as_deref().unwrap_or("-")
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

fn build_services(config: &AppConfig) -> Result<Services> {
    let reader: Option<Arc<dyn ContentReader>> = match api_key_from_env(&config.reader.api_key_env)
    {
        Some(key) => Some(Arc::new(ReaderClient::new(key, &config.reader.base_url)?)),
        None => {
            warn!(var = %config.reader.api_key_env, "reader API key not set; step 2 unavailable");
            None
        }
    };

    let llm: Option<Arc<dyn LanguageModel>> = match openrouter_client(config)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!(var = %config.openrouter.api_key_env, "OpenRouter API key not set; steps 3-5 unavailable");
            None
        }
    };

    Ok(Services {
        sitemap: Arc::new(SitemapParser::new()?),
        reader,
        llm,
    })
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let projects = open_project(&args.project)?;
    let store = projects.artifact_store()?;
    let prompts = PromptSet::with_overrides(projects.load_prompt_config()?.as_ref());

    let selection = match args.steps.as_deref() {
        Some(list) => StepSelection::parse(list)?,
        None => StepSelection::new(
            store
                .step_status()
                .into_iter()
                .filter(|(_, done)| !done)
                .map(|(step, _)| step),
        ),
    };
    if selection.is_empty() {
        println!("All steps are complete. Use --steps to re-run some of them.");
        return Ok(());
    }

    let mode = if args.supervised {
        RunMode::Supervised
    } else {
        RunMode::Normal
    };
    let models = StepModels {
        step3: args.model3.or_else(|| config.models.step3.clone()),
        step4: args.model4.or_else(|| config.models.step4.clone()),
        step5: args.model5.or_else(|| config.models.step5.clone()),
    };
    let inputs = StepInputs {
        sitemap_url: args.sitemap,
        url_filter: args.filter,
        urls_file: args.urls_file,
    };

    let observer = Arc::new(CliObserver::new());
    let engine = WorkflowEngine::new(
        store,
        config.workflow.clone(),
        prompts,
        build_services(&config)?,
        observer.clone(),
    )
    .with_project(projects);
    engine.configure(selection.clone(), mode, models)?;
    engine.set_inputs(inputs)?;

    let steps: Vec<String> = selection.iter().map(|s| s.index().to_string()).collect();
    info!(project = %args.project.display(), steps = %steps.join(","), ?mode, "running workflow");
    let run_id = engine.start()?;
    observer.println(&format!(
        "Run {run_id} started. Commands: continue (c), stop (s), quit (q)"
    ));

    let state = drive(&engine, &observer).await?;
    observer.finish();

    println!();
    println!("  Finished: {state} (last completed step: {})", engine.last_completed_step());
    print_step_status(engine.store());
    println!();

    match state {
        RunState::Failed => Err(eyre!(
            "workflow failed: {}",
            engine.last_error().unwrap_or_default()
        )),
        _ => Ok(()),
    }
}

/// Feed stdin commands to the engine until the run ends or the user quits.
async fn drive(engine: &WorkflowEngine, observer: &CliObserver) -> Result<RunState> {
    let mut states = engine.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut prompted = None;

    loop {
        let state = *states.borrow_and_update();
        match state {
            RunState::Completed | RunState::Failed => return Ok(state),
            RunState::WaitingConfirmation | RunState::Stopped if !stdin_open => {
                // Nobody can answer; leave the run stopped.
                engine.stop();
                return Ok(wait_inactive(engine).await);
            }
            RunState::WaitingConfirmation if prompted != Some(state) => {
                observer.println("Step complete. Type 'continue' to go on or 'stop' to halt.");
            }
            RunState::Stopped if prompted != Some(state) => {
                observer.println("Run stopped. Type 'continue' to resume or 'quit' to exit.");
            }
            _ => {}
        }
        prompted = Some(state);

        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    return Ok(engine.state());
                }
            }
            line = lines.next_line(), if stdin_open => match line? {
                None => stdin_open = false,
                Some(line) => match line.trim() {
                    "continue" | "c" => {
                        if let Err(e) = engine.continue_run() {
                            observer.println(&e.to_string());
                        }
                    }
                    "stop" | "s" => engine.stop(),
                    "quit" | "q" => {
                        engine.stop();
                        return Ok(wait_inactive(engine).await);
                    }
                    "" => {}
                    other => observer.println(&format!(
                        "Unknown command '{other}'. Use continue (c), stop (s) or quit (q)."
                    )),
                },
            },
        }
    }
}

/// Wait until no execution context is active.
async fn wait_inactive(engine: &WorkflowEngine) -> RunState {
    let mut states = engine.subscribe();
    match states.wait_for(|s| !s.is_active()).await {
        Ok(state) => *state,
        Err(_) => engine.state(),
    }
}

// ---------------------------------------------------------------------------
// CLI observer
// ---------------------------------------------------------------------------

/// Prints workflow log lines above an indicatif spinner.
struct CliObserver {
    spinner: ProgressBar,
}

impl CliObserver {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn println(&self, message: &str) {
        self.spinner.println(message);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl WorkflowObserver for CliObserver {
    fn log(&self, message: &str) {
        self.spinner.println(message);
    }

    fn progress(&self, message: &str, percent: Option<f64>) {
        match percent {
            Some(p) => self.spinner.set_message(format!("[{p:>3.0}%] {message}")),
            None => self.spinner.set_message(message.to_string()),
        }
    }

    fn state_changed(&self, state: RunState) {
        self.spinner.set_prefix(state.to_string());
    }
}
