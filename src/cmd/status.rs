//! Read-only views of the progress index: status, eligible, batches.

use anyhow::{Context, Result};
use conductor::dag::{DependencyResolver, GroupCandidate, ParallelGrouper, Resolution};
use conductor::progress::{PhaseStatus, PlanStatus, ProgressIndex};
use std::path::Path;

use super::super::Cli;
use super::load_config;

fn load_index(project_dir: &Path, cli: &Cli) -> Result<ProgressIndex> {
    let config = load_config(project_dir, cli)?;
    config
        .progress_store()
        .load()
        .context("Failed to load progress index")
}

fn print_warnings(resolution: &Resolution) {
    for warning in &resolution.warnings {
        println!("  {} {}", console::style("warning:").yellow(), warning);
    }
}

pub fn cmd_status(project_dir: &Path, cli: &Cli) -> Result<()> {
    let index = load_index(project_dir, cli)?;

    if index.task_count() == 0 {
        println!();
        println!("No plans registered. Run 'conductor register <plan-id> --phase <n>' first.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "Progress index v{} ({} policy)",
        index.version,
        index.policy()
    );
    if let Some(updated) = index.last_updated {
        println!("Last updated: {}", updated.to_rfc3339());
    }
    println!();

    for phase in index.phases() {
        let status = match phase.status {
            PhaseStatus::Completed => console::style(phase.status.to_string()).green(),
            PhaseStatus::Ready => console::style(phase.status.to_string()).cyan(),
            PhaseStatus::Blocked => console::style(phase.status.to_string()).dim(),
        };
        println!("Phase {} [{}]", phase.index, status);

        for plan in index.plans().filter(|p| p.phase == phase.index) {
            let settled = plan
                .tasks
                .values()
                .filter(|t| index.policy().settles(t.status))
                .count();
            let plan_status = match plan.status {
                PlanStatus::Completed => console::style(plan.status.to_string()).green(),
                _ => console::style(plan.status.to_string()),
            };
            println!(
                "  {:<24} {:<12} {}/{} tasks",
                plan.id,
                plan_status,
                settled,
                plan.tasks.len()
            );
        }
    }

    println!();
    let counts = index
        .count_by_status()
        .into_iter()
        .map(|(status, count)| format!("{} {}", count, status))
        .collect::<Vec<_>>()
        .join(", ");
    println!("{} tasks: {}", index.task_count(), counts);
    println!();
    Ok(())
}

pub fn cmd_eligible(project_dir: &Path, cli: &Cli) -> Result<()> {
    let index = load_index(project_dir, cli)?;
    let resolution = DependencyResolver::new().resolve(&index);

    if resolution.eligible.is_empty() {
        println!("No eligible tasks.");
    } else {
        for key in &resolution.eligible {
            println!("{}", key);
        }
    }
    print_warnings(&resolution);
    Ok(())
}

pub fn cmd_batches(project_dir: &Path, cli: &Cli, max_batch_size: Option<usize>) -> Result<()> {
    let index = load_index(project_dir, cli)?;
    let resolution = DependencyResolver::new().resolve(&index);

    let mut grouper = ParallelGrouper::new();
    if let Some(max) = max_batch_size {
        grouper = grouper.with_max_batch_size(max);
    }
    let candidates = GroupCandidate::from_index(&index, &resolution.eligible);
    let batches = grouper.group(&candidates);

    if batches.is_empty() {
        println!("No eligible tasks.");
    }
    for (number, batch) in batches.iter().enumerate() {
        let label = if batch.exclusive {
            console::style(" (exclusive)").dim().to_string()
        } else {
            String::new()
        };
        let tasks = batch
            .tasks
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("Batch {}{}: {}", number + 1, label, tasks);
    }
    print_warnings(&resolution);
    Ok(())
}
