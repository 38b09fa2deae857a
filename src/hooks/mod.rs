//! Lifecycle script execution.
//!
//! `preinstall`, `install`, and `postinstall` run around materialization;
//! arbitrary manifest scripts run via `pantry run`. Every script executes
//! in the project's script shell with the activation environment, the
//! project root as CWD, and a timeout that reaches the child as a kill.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::core::NormalizedManifest;
use crate::error::PantryError;
use crate::util::process::{script_shell, CancelFlag, ProcessBuilder, WaitOutcome};

/// The lifecycle phases run around an install, in order.
pub const INSTALL_PHASES: &[&str] = &["preinstall", "install", "postinstall"];

/// Script execution policy.
#[derive(Debug, Clone)]
pub struct HookOptions {
    /// Per-script timeout
    pub timeout: Option<Duration>,

    /// Skip all scripts
    pub ignore_scripts: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        HookOptions {
            timeout: Some(Duration::from_secs(300)),
            ignore_scripts: false,
        }
    }
}

/// Run a single named script.
pub fn run_script(
    name: &str,
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    options: &HookOptions,
    cancel: &CancelFlag,
) -> Result<(), PantryError> {
    if options.ignore_scripts {
        tracing::debug!("skipping script `{}` (ignore-scripts)", name);
        return Ok(());
    }

    tracing::info!("running script `{}`: {}", name, command);

    let (shell, flag) = script_shell();
    let builder = ProcessBuilder::new(&shell)
        .arg(flag)
        .arg(command)
        .cwd(cwd)
        .envs(env.iter());

    match builder
        .status_supervised(options.timeout, cancel)
        .map_err(PantryError::Other)?
    {
        WaitOutcome::Exited(status) if status.success() => Ok(()),
        WaitOutcome::Exited(status) => Err(PantryError::LifecycleScriptFailed {
            name: name.to_string(),
            code: status.code().unwrap_or(-1),
        }),
        WaitOutcome::TimedOut => Err(PantryError::Timeout {
            operation: format!("script `{name}`"),
        }),
        WaitOutcome::Cancelled => Err(PantryError::Cancelled),
    }
}

/// Run the install lifecycle phases declared by the manifest.
pub fn run_install_phases(
    manifest: &NormalizedManifest,
    env: &BTreeMap<String, String>,
    options: &HookOptions,
    cancel: &CancelFlag,
) -> Result<(), PantryError> {
    for phase in INSTALL_PHASES {
        if let Some(command) = manifest.scripts.get(*phase) {
            run_script(phase, command, manifest.dir(), env, options, cancel)?;
        }
    }
    Ok(())
}

/// A script queued for parallel execution.
#[derive(Debug, Clone)]
pub struct ScriptJob {
    pub name: String,
    pub command: String,
}

/// A bounded pool running scripts in parallel.
///
/// Workers pull jobs through a lock-protected index. A worker hitting a
/// fatal error raises the shared flag; the others finish their current
/// child and exit without starting new ones.
pub struct ScriptPool {
    workers: usize,
}

impl ScriptPool {
    pub fn new(workers: usize) -> Self {
        ScriptPool {
            workers: workers.max(1),
        }
    }

    pub fn run_all(
        &self,
        jobs: &[ScriptJob],
        cwd: &Path,
        env: &BTreeMap<String, String>,
        options: &HookOptions,
    ) -> Result<(), PantryError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let cancel = CancelFlag::new();
        let next = Mutex::new(0usize);
        let first_error: Mutex<Option<PantryError>> = Mutex::new(None);
        let workers = self.workers.min(jobs.len());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        return;
                    }

                    let index = {
                        let mut guard = next.lock().unwrap();
                        let index = *guard;
                        *guard += 1;
                        index
                    };
                    if index >= jobs.len() {
                        return;
                    }

                    let job = &jobs[index];
                    if let Err(err) =
                        run_script(&job.name, &job.command, cwd, env, options, &cancel)
                    {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                        drop(slot);
                        cancel.cancel();
                        return;
                    }
                });
            }
        });

        match first_error.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
