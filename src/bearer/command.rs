//! Trait abstraction for external tool invocations to enable testing

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CellscanError, Result};

/// Runs OS and modem-manager commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    ///
    /// # Returns
    ///
    /// * `Result<String>` - Captured stdout on a zero exit status
    ///
    /// # Errors
    ///
    /// Returns `ExternalTool` if the program cannot be started or exits non-zero
    async fn run(&self, program: &str, args: &[String]) -> Result<String>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CellscanError::ExternalTool {
                program: program.to_string(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CellscanError::ExternalTool {
                program: program.to_string(),
                detail: format!(
                    "{} {} ({}): {}",
                    program,
                    args.join(" "),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
