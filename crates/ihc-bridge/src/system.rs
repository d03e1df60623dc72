//! Privileged host actions
//!
//! Restarting the controller service and rebooting the host both leave the
//! process. [`CommandSystemActions`] runs the configured commands;
//! [`RecordingActions`] only records what was asked.

use async_trait::async_trait;
use ihc_config::SystemConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ActionError, ActionResult};

/// Capability to run privileged actions
#[async_trait]
pub trait SystemActions: Send + Sync {
    /// Restart the controller service and wait for the command to finish
    async fn restart_service(&self) -> ActionResult<()>;

    /// Reboot the host
    async fn restart_host(&self) -> ActionResult<()>;
}

/// [`SystemActions`] backed by external commands
#[derive(Debug, Clone)]
pub struct CommandSystemActions {
    service_restart: Vec<String>,
    host_restart: Vec<String>,
}

impl CommandSystemActions {
    pub fn new(config: &SystemConfig) -> Self {
        Self {
            service_restart: config.service_restart_command.clone(),
            host_restart: config.host_restart_command.clone(),
        }
    }
}

async fn run_command(action: &'static str, argv: &[String]) -> ActionResult<()> {
    let (program, args) = argv.split_first().ok_or(ActionError::EmptyCommand(action))?;
    let command = argv.join(" ");
    debug!(action, command = %command, "Running command");

    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|source| ActionError::Spawn {
            command: command.clone(),
            source,
        })?;

    if status.success() {
        info!(action, command = %command, "Command finished");
        Ok(())
    } else {
        Err(ActionError::Failed {
            command,
            code: status.code(),
        })
    }
}

#[async_trait]
impl SystemActions for CommandSystemActions {
    async fn restart_service(&self) -> ActionResult<()> {
        run_command("service restart", &self.service_restart).await
    }

    async fn restart_host(&self) -> ActionResult<()> {
        run_command("host restart", &self.host_restart).await
    }
}

/// Actions [`RecordingActions`] was asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    RestartService,
    RestartHost,
}

/// [`SystemActions`] that records calls instead of running anything
#[derive(Debug, Default)]
pub struct RecordingActions {
    calls: Mutex<Vec<SystemAction>>,
    fail_service: AtomicBool,
    fail_host: AtomicBool,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_service_restart(&self, fail: bool) {
        self.fail_service.store(fail, Ordering::SeqCst);
    }

    pub fn fail_host_restart(&self, fail: bool) {
        self.fail_host.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SystemAction> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, action: SystemAction, fail: &AtomicBool) -> ActionResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
        if fail.load(Ordering::SeqCst) {
            Err(ActionError::Failed {
                command: format!("{:?}", action),
                code: Some(1),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SystemActions for RecordingActions {
    async fn restart_service(&self) -> ActionResult<()> {
        self.record(SystemAction::RestartService, &self.fail_service)
    }

    async fn restart_host(&self) -> ActionResult<()> {
        self.record(SystemAction::RestartHost, &self.fail_host)
    }
}
