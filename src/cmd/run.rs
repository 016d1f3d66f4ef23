//! The `run` command: drive eligible tasks through their review cycles.

use anyhow::{Context, Result};
use conductor::orchestrator::{Orchestrator, RunEvent, RunReport};
use conductor::progress::TaskStatus;
use std::path::Path;
use tokio::sync::mpsc;

use super::super::Cli;
use super::load_config;

pub async fn cmd_run(
    project_dir: &Path,
    cli: &Cli,
    max_steps: Option<u32>,
    max_parallel: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(project_dir, cli)?;
    if let Some(steps) = max_steps {
        config.settings.orchestrator.max_steps = steps;
    }
    if let Some(parallel) = max_parallel {
        config.settings.orchestrator.max_parallel = parallel;
    }

    let controller = config.review_controller()?;
    let orchestrator = Orchestrator::new(
        config.progress_store(),
        config.plan_reader(),
        controller,
    )
    .with_config(config.orchestrator_config());

    let report = if json {
        orchestrator.run().await?
    } else {
        println!(
            "{}",
            console::style(format!(
                "Running with up to {} parallel review cycles",
                orchestrator.config().max_parallel
            ))
            .bold()
        );
        let (tx, rx) = mpsc::channel(100);
        let printer = tokio::spawn(print_events(rx));
        let report = orchestrator.with_event_channel(tx).run().await;
        printer.await.ok();
        report?
    };

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
        println!("{}", rendered);
    } else {
        print_summary(&report);
    }

    if !report.no_failures() {
        anyhow::bail!("{} task(s) failed", report.failed.len());
    }
    Ok(())
}

async fn print_events(mut rx: mpsc::Receiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::BatchStarted { batch, tasks } => {
                println!(
                    "{} {}",
                    console::style(format!("Batch {}:", batch)).cyan(),
                    tasks.join(", ")
                );
            }
            RunEvent::TaskStarted { .. } => {}
            RunEvent::TaskFinished {
                task,
                status,
                review_iterations,
                ..
            } => {
                let status = match status {
                    TaskStatus::Completed => console::style(status.to_string()).green(),
                    TaskStatus::CompletedWithIssues => console::style(status.to_string()).yellow(),
                    _ => console::style(status.to_string()).red(),
                };
                println!(
                    "  {} {} ({} review iteration(s))",
                    task, status, review_iterations
                );
            }
            RunEvent::BatchCompleted { .. } | RunEvent::RunCompleted { .. } => {}
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "{} completed, {} completed with issues, {} failed, {} blocked ({} batches, {:.1}s)",
        report.completed.len(),
        report.completed_with_issues.len(),
        report.failed.len(),
        report.blocked.len(),
        report.steps,
        report.duration.as_secs_f64()
    );

    for result in &report.results {
        if let Some(reason) = &result.failure_reason {
            println!("  {} {}: {}", console::style("failed").red(), result.task, reason);
        }
    }
    for warning in &report.warnings {
        println!("  {} {}", console::style("warning:").yellow(), warning);
    }
    if report.step_budget_exhausted {
        println!(
            "{}",
            console::style("Step budget exhausted; run again to continue.").yellow()
        );
    }
}
