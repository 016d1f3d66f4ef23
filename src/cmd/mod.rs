//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                  |
//! |-----------------|-----------------------------------|
//! | `project`       | `Init`, `Register`                |
//! | `status`        | `Status`, `Eligible`, `Batches`   |
//! | `run`           | `Run`                             |

pub mod project;
pub mod run;
pub mod status;

pub use project::{cmd_init, cmd_register};
pub use run::cmd_run;
pub use status::{cmd_batches, cmd_eligible, cmd_status};

use anyhow::Result;
use conductor::config::Config;
use std::path::Path;

use super::Cli;

/// Load the layered configuration and print its warnings when verbose.
fn load_config(project_dir: &Path, cli: &Cli) -> Result<Config> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;
    if cli.verbose {
        for warning in config.settings.validate() {
            eprintln!("{} {}", console::style("warning:").yellow(), warning);
        }
    }
    Ok(config)
}
