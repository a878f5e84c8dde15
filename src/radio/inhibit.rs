//! # Modem Manager Inhibition
//!
//! While the scanner owns the AT port, ModemManager must keep its hands off the
//! modem. `mmcli --inhibit` holds the inhibition for as long as the mmcli
//! process lives, so the guard keeps that child alive and kills it on release.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{CellscanError, Result};

/// Time allowed for mmcli to register the inhibition before the port is used
const INHIBIT_SETTLE: Duration = Duration::from_millis(500);

/// Live ModemManager inhibition
///
/// Dropping the guard also kills the child, so an aborted scanner task cannot
/// leave the modem inhibited.
#[derive(Debug)]
pub struct ModemInhibitor {
    child: Child,
    modem_index: u32,
}

impl ModemInhibitor {
    /// Ask ModemManager to release modem `modem_index`
    ///
    /// # Errors
    ///
    /// Returns `ExternalTool` if mmcli cannot be started or exits right away
    /// (modem unknown to ModemManager, insufficient privileges, ...).
    pub async fn acquire(mmcli_path: &str, modem_index: u32) -> Result<Self> {
        debug!("Inhibiting ModemManager on modem {}", modem_index);

        let index = modem_index.to_string();
        let mut child = Command::new(mmcli_path)
            .args(["-m", index.as_str(), "--inhibit"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CellscanError::ExternalTool {
                program: mmcli_path.to_string(),
                detail: e.to_string(),
            })?;

        tokio::time::sleep(INHIBIT_SETTLE).await;

        if let Some(status) = child.try_wait()? {
            let output = child.wait_with_output().await?;
            return Err(CellscanError::ExternalTool {
                program: mmcli_path.to_string(),
                detail: format!(
                    "inhibit exited early ({}): {}",
                    status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        info!("ModemManager inhibited on modem {}", modem_index);
        Ok(Self { child, modem_index })
    }

    /// End the inhibition so ModemManager can reclaim the modem
    pub async fn release(mut self) {
        match self.child.kill().await {
            Ok(()) => info!("ModemManager inhibition released on modem {}", self.modem_index),
            Err(e) => warn!("Failed to end inhibition on modem {}: {}", self.modem_index, e),
        }
    }
}

/// Stand-in for mmcli that records its PID and holds until killed
#[cfg(test)]
pub(crate) mod fake_mmcli {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write the script into `dir`, returning its path and the PID file path
    pub fn install(dir: &Path) -> (PathBuf, PathBuf) {
        let script = dir.join("mmcli");
        let pid_file = dir.join("mmcli.pid");
        let body = format!("#!/bin/sh\necho $$ > {}\nexec sleep 30\n", pid_file.display());
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script, pid_file)
    }

    pub fn pid(pid_file: &Path) -> u32 {
        std::fs::read_to_string(pid_file).unwrap().trim().parse().unwrap()
    }

    pub fn is_running(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
}
