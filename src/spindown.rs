use crate::error::{MonitorError, Result};
use std::process::{Command, Stdio};
use tracing::info;

/// Puts a device into standby. Implementations must tolerate being called
/// again on a device that is already spun down.
pub trait SpinDown {
    fn spin_down(&mut self, device: &str) -> Result<()>;
}

/// Runs an external utility, `hdparm -y -- <device>` by default.
#[derive(Debug, Clone)]
pub struct CommandSpinDown {
    pub program: String,
    pub args:    Vec<String>,
}

impl Default for CommandSpinDown {
    fn default() -> Self {
        Self { program: "hdparm".into(), args: vec!["-y".into()] }
    }
}

impl CommandSpinDown {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl SpinDown for CommandSpinDown {
    fn spin_down(&mut self, device: &str) -> Result<()> {
        // The tool's chatter goes to our stderr alongside the log.
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg("--")
            .arg(device)
            .stdin(Stdio::null())
            .stdout(std::io::stderr())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| MonitorError::Action {
                device: device.to_string(),
                detail: format!("cannot run {}: {}", self.program, e),
            })?;

        if !status.success() {
            return Err(MonitorError::Action {
                device: device.to_string(),
                detail: format!("{} exited with {}", self.program, status),
            });
        }
        Ok(())
    }
}

/// Logs instead of acting. Used by `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunSpinDown;

impl SpinDown for DryRunSpinDown {
    fn spin_down(&mut self, device: &str) -> Result<()> {
        info!(device = %device, "dry run, not spinning down");
        Ok(())
    }
}
