//! Mode-driven launch and stop of the supervised program set.
//!
//! The program set is small and fixed: a driver control command (short-lived,
//! invoked with `start`/`stop`), a state server, and a monitor. Which of them
//! run is decided by the configured mode. Individual launch failures are
//! logged and absorbed; the daemon keeps running with whatever came up.

use crate::config::{Mode, ProgramsConfig};
use std::path::Path;
use std::process::{Child, Command};
use tracing::{error, info, warn};

/// Owner of the supervised children.
///
/// All supervision state lives here; there are no process-wide PIDs. Stopping
/// asks politely (SIGTERM) and reaps whatever has already exited.
pub struct Supervisor {
    programs: ProgramsConfig,
    children: Vec<ManagedChild>,
    started_mode: Option<Mode>,
}

struct ManagedChild {
    name: &'static str,
    child: Child,
}

impl Supervisor {
    pub fn new(programs: ProgramsConfig) -> Self {
        Self {
            programs,
            children: Vec::new(),
            started_mode: None,
        }
    }

    /// Launch the program set for `mode`.
    pub fn start(&mut self, mode: Mode) {
        self.started_mode = Some(mode);

        match mode {
            Mode::None => {
                info!("supervision disabled, running relay only");
            }
            Mode::Standalone => {
                self.run_driver_control("start");
                self.launch("state-server", self.programs.state_server.clone());
                self.launch("monitor", self.programs.monitor.clone());
            }
            Mode::NetClient => {
                self.launch("monitor", self.programs.monitor.clone());
            }
        }
    }

    /// Stop everything started by `start`.
    pub fn stop(&mut self) {
        if self.started_mode == Some(Mode::Standalone) {
            self.run_driver_control("stop");
        }

        for managed in &mut self.children {
            terminate(managed);
        }
        self.children.clear();
        self.started_mode = None;
    }

    /// Number of children currently under supervision.
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Spawn a long-running program and keep its handle.
    fn launch(&mut self, name: &'static str, path: Option<std::path::PathBuf>) {
        let Some(path) = path else {
            warn!(program = name, "not configured, skipping");
            return;
        };

        match Command::new(&path).spawn() {
            Ok(child) => {
                info!(program = name, pid = child.id(), path = %path.display(), "started");
                self.children.push(ManagedChild { name, child });
            }
            Err(e) => {
                error!(program = name, path = %path.display(), error = %e, "failed to start");
            }
        }
    }

    /// Run the driver control command to completion with the given action.
    fn run_driver_control(&self, action: &str) {
        let Some(path) = self.programs.driver_control.as_deref() else {
            warn!(program = "driver-control", "not configured, skipping");
            return;
        };

        match run_to_completion(path, action) {
            Ok(status) if status => {
                info!(program = "driver-control", action, "completed");
            }
            Ok(_) => {
                warn!(program = "driver-control", action, "exited with failure");
            }
            Err(e) => {
                error!(program = "driver-control", action, error = %e, "failed to run");
            }
        }
    }
}

fn run_to_completion(path: &Path, action: &str) -> std::io::Result<bool> {
    let status = Command::new(path).arg(action).status()?;
    Ok(status.success())
}

/// Ask a child to exit and reap it if it already has.
///
/// SIGTERM rather than `Child::kill`: the supervised programs get a chance
/// to shut down in order. A child that lingers past our exit is reaped by
/// init.
fn terminate(managed: &mut ManagedChild) {
    let pid = managed.child.id() as libc::pid_t;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            program = managed.name,
            pid,
            error = %std::io::Error::last_os_error(),
            "failed to signal"
        );
    }

    match managed.child.try_wait() {
        Ok(Some(status)) => {
            info!(program = managed.name, pid, %status, "stopped");
        }
        Ok(None) => {
            info!(program = managed.name, pid, "stop requested");
        }
        Err(e) => {
            warn!(program = managed.name, pid, error = %e, "failed to reap");
        }
    }
}
