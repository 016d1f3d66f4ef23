use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::conductor_config::{CONFIG_FILE, ConductorToml};
use crate::orchestrator::OrchestratorConfig;
use crate::plan::PlanReader;
use crate::progress::ProgressStore;
use crate::review::ReviewCycleController;
use crate::worker::{CommandWorker, CommandWorkerConfig, ExecutionWorker, WorkerRole, WorkerSet};

/// Directory holding conductor's state inside a project.
pub const CONDUCTOR_DIR: &str = ".conductor";
/// Progress index file name inside [`CONDUCTOR_DIR`].
pub const PROGRESS_FILE: &str = "progress.json";

/// Runtime configuration for conductor.
///
/// Resolves the on-disk layout of a project and turns the layered settings
/// into the store, reader and workers the orchestrator runs with.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub conductor_dir: PathBuf,
    pub progress_file: PathBuf,
    pub plans_dir: PathBuf,
    pub verbose: bool,
    /// File settings with the environment applied.
    pub settings: ConductorToml,
}

impl Config {
    /// Load the configuration for `project_dir` (file, then environment).
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let mut settings = ConductorToml::load_or_default(&conductor_dir)?;
        settings.apply_env();
        Ok(Self::from_settings(project_dir, settings, verbose))
    }

    /// Build a configuration from already-resolved settings.
    pub fn from_settings(project_dir: PathBuf, settings: ConductorToml, verbose: bool) -> Self {
        let conductor_dir = project_dir.join(CONDUCTOR_DIR);
        let progress_file = conductor_dir.join(PROGRESS_FILE);
        let plans_dir = resolve(&project_dir, &settings.paths.plans_dir);
        Self {
            project_dir,
            conductor_dir,
            progress_file,
            plans_dir,
            verbose,
            settings,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.conductor_dir.join(CONFIG_FILE)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.conductor_dir)
            .context("Failed to create .conductor directory")?;
        std::fs::create_dir_all(&self.plans_dir).context("Failed to create plans directory")?;
        Ok(())
    }

    pub fn progress_store(&self) -> ProgressStore {
        ProgressStore::new(&self.progress_file)
            .with_lock_settings(self.settings.lock.to_settings())
            .with_policy(self.settings.orchestrator.issues_policy)
    }

    pub fn plan_reader(&self) -> PlanReader {
        PlanReader::new(&self.plans_dir)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        self.settings.orchestrator_config()
    }

    /// Command-backed workers for the three roles.
    pub fn workers(&self) -> Result<WorkerSet> {
        let worker = |role: WorkerRole, command: &Option<String>, key: &str| {
            let command = command
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    anyhow!(
                        "No {} command configured. Set worker.{} in {} or CONDUCTOR_{}",
                        role,
                        key,
                        CONFIG_FILE,
                        key.to_uppercase()
                    )
                })?;
            let config = CommandWorkerConfig::new(command, self.project_dir.clone())
                .with_timeout(self.settings.worker.timeout());
            Ok::<Arc<dyn ExecutionWorker>, anyhow::Error>(Arc::new(CommandWorker::new(
                role, config,
            )))
        };

        let worker_settings = &self.settings.worker;
        Ok(WorkerSet::new(
            worker(
                WorkerRole::Implementer,
                &worker_settings.implement_cmd,
                "implement_cmd",
            )?,
            worker(WorkerRole::Verifier, &worker_settings.verify_cmd, "verify_cmd")?,
            worker(WorkerRole::Reviewer, &worker_settings.review_cmd, "review_cmd")?,
        ))
    }

    pub fn review_controller(&self) -> Result<ReviewCycleController> {
        Ok(ReviewCycleController::new(self.workers()?)
            .with_max_fix_attempts(self.settings.review.max_fix_attempts))
    }
}

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
