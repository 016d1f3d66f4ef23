//! Project initialization and plan registration commands.

use anyhow::{Context, Result};
use conductor::conductor_config::ConductorToml;
use conductor::config::Config;
use std::path::Path;

use super::super::Cli;
use super::load_config;

pub fn cmd_init(project_dir: &Path, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(project_dir).context("Failed to create project directory")?;
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    let was_initialized = config.progress_file.exists();

    config.ensure_directories()?;

    let config_file = config.config_file();
    if !config_file.exists() {
        ConductorToml::default().save(&config_file)?;
    }

    if was_initialized {
        println!(
            "Conductor project already initialized at {}",
            config.conductor_dir.display()
        );
        return Ok(());
    }

    config
        .progress_store()
        .with_lock(|_| Ok(()))
        .context("Failed to create progress index")?;

    println!(
        "Initialized conductor project at {}",
        config.conductor_dir.display()
    );
    println!();
    println!("  .conductor/");
    println!("  ├── conductor.toml   # settings and worker commands");
    println!("  └── progress.json    # shared progress index");
    println!("  {}/", display_relative(project_dir, &config.plans_dir));
    println!();
    println!("Next steps:");
    println!("  1. Write a plan file, e.g. plans/auth.md");
    println!("  2. Run `conductor register auth --phase 1`");
    println!("  3. Configure [worker] commands and run `conductor run`");
    Ok(())
}

pub fn cmd_register(
    project_dir: &Path,
    cli: &Cli,
    plan_id: &str,
    phase: u32,
    depends_on: Option<Vec<u32>>,
) -> Result<()> {
    let config = load_config(project_dir, cli)?;
    let definition = config.plan_reader().read_plan(plan_id)?;

    let summary = config
        .progress_store()
        .with_lock(|index| {
            let summary = index.register_plan(&definition, phase)?;
            if let Some(depends_on) = depends_on {
                index.set_phase_dependencies(phase, depends_on);
            }
            Ok(summary)
        })
        .with_context(|| format!("Failed to register plan '{}'", plan_id))?;

    let verb = if summary.created {
        "Registered"
    } else {
        "Refreshed"
    };
    println!(
        "{} plan {} in phase {} ({} added, {} updated)",
        verb,
        console::style(&summary.plan).bold(),
        phase,
        summary.added.len(),
        summary.updated.len()
    );

    for task in definition.tasks.iter().filter(|t| !t.schedulable) {
        println!(
            "  {} {} will not be scheduled: {}",
            console::style("warning:").yellow(),
            task.id,
            task.issues.join("; ")
        );
    }
    Ok(())
}

fn display_relative(base: &Path, path: &Path) -> String {
    let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    path.strip_prefix(&base)
        .unwrap_or(path)
        .display()
        .to_string()
}
