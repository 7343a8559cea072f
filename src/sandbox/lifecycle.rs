//! One sandbox unit per node execution: workdir, input file, launch, wait,
//! classify, clean up.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use xpipeline_types::{
    SandboxContext, SandboxInput, SandboxOutput, SandboxViolation, SecurityPolicy, ViolationKind,
    INPUT_FILE_NAME, KILLED_EXIT_CODE, OUTPUT_FILE_NAME,
};

use super::error::SandboxError;
use super::launcher::{DockerLauncher, LaunchSpec, Launcher, ProcessLauncher, UnitExit};
use super::types::{EntryPoint, Mount, SandboxConfig, SandboxMode, SandboxRequest};
use crate::core::ExecutionContext;

/// Result of one unit that ran to a classified end.
#[derive(Debug, Clone)]
pub struct SandboxRun {
    pub unit: String,
    pub output: SandboxOutput,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy)]
enum Ended {
    Exited(Option<ExitStatus>),
    TimedOut,
    Cancelled,
}

pub struct SandboxLifecycle {
    config: SandboxConfig,
    security: SecurityPolicy,
    launcher: Arc<dyn Launcher>,
    env: Vec<(String, String)>,
    /// run id -> unit name -> stop token
    active: DashMap<String, HashMap<String, CancellationToken>>,
}

impl SandboxLifecycle {
    pub fn new(config: SandboxConfig, security: SecurityPolicy, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            security,
            launcher,
            env: Vec::new(),
            active: DashMap::new(),
        }
    }

    /// Pick the launcher that matches `config.mode`.
    pub fn from_config(config: SandboxConfig, security: SecurityPolicy) -> Self {
        let launcher: Arc<dyn Launcher> = match config.mode {
            SandboxMode::Process => Arc::new(ProcessLauncher::from_config(&config)),
            SandboxMode::Docker => Arc::new(DockerLauncher::new(config.clone())),
        };
        Self::new(config, security, launcher)
    }

    /// Environment variable passed to every unit.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn security(&self) -> &SecurityPolicy {
        &self.security
    }

    pub fn launcher_name(&self) -> &'static str {
        self.launcher.name()
    }

    pub fn live_units(&self, run_id: &str) -> usize {
        self.active.get(run_id).map_or(0, |units| units.len())
    }

    pub fn total_live_units(&self) -> usize {
        self.active.iter().map(|entry| entry.value().len()).sum()
    }

    /// Stop every unit tracked for `run_id`. Returns how many were signalled.
    pub fn cancel_run(&self, run_id: &str) -> usize {
        let Some(units) = self.active.get(run_id) else {
            return 0;
        };
        for token in units.values() {
            token.cancel();
        }
        units.len()
    }

    pub async fn run(&self, request: SandboxRequest, ctx: &ExecutionContext) -> Result<SandboxRun, SandboxError> {
        let started = Instant::now();
        let workdir = self.create_workdir()?;
        self.launcher.prepare_workdir(workdir.path())?;
        let unit_name = format!(
            "xp-{}-{}",
            sanitize(&request.node_id),
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );

        let mut mounts = Vec::new();
        let mut datasets = BTreeMap::new();
        for (name, host_path) in &request.datasets {
            let mount = Mount {
                name: format!("dataset-{}", sanitize(name)),
                host_path: host_path.clone(),
            };
            datasets.insert(name.clone(), path_string(&self.launcher.guest_mount_path(&mount)));
            mounts.push(mount);
        }
        let (entry, code) = match &request.entry {
            EntryPoint::Catalog(name) => (Some(name.clone()), None),
            EntryPoint::Inline(code) => (None, Some(code.clone())),
            EntryPoint::File { dir, file } => {
                let mount = Mount {
                    name: "entry".to_string(),
                    host_path: dir.clone(),
                };
                let guest = self.launcher.guest_mount_path(&mount).join(file);
                mounts.push(mount);
                (Some(path_string(&guest)), None)
            }
        };

        let input = SandboxInput {
            node_type: request.node_type.clone(),
            params: request.params,
            inputs: request.inputs,
            context: SandboxContext {
                run_id: ctx.run_id.clone(),
                pipeline_id: ctx.pipeline_id.clone(),
                node_id: request.node_id.clone(),
                language: request.language,
                datasets,
                entry,
                code,
                scan_entry: request.scan_entry,
                security: self.security.clone(),
            },
        };
        tokio::fs::write(
            workdir.path().join(INPUT_FILE_NAME),
            serde_json::to_vec(&input)?,
        )
        .await?;

        let spec = LaunchSpec {
            unit_name: unit_name.clone(),
            workdir: workdir.path().to_path_buf(),
            input_file: INPUT_FILE_NAME.to_string(),
            output_file: OUTPUT_FILE_NAME.to_string(),
            mounts,
            env: self.env.clone(),
        };

        let token = ctx.cancellation_token().child_token();
        let registration = Registration::new(self, &ctx.run_id, &unit_name, token.clone());
        let mut unit = self.launcher.launch(&spec).await?;
        tracing::debug!(
            run_id = %ctx.run_id,
            node_id = %request.node_id,
            unit = %unit_name,
            launcher = self.launcher.name(),
            "sandbox unit started"
        );

        let limit = Duration::from_secs(self.config.timeout_secs.max(1));
        let ended = tokio::select! {
            status = unit.wait() => Ended::Exited(status.ok()),
            _ = tokio::time::sleep(limit) => Ended::TimedOut,
            _ = token.cancelled() => Ended::Cancelled,
        };
        if let Ended::TimedOut | Ended::Cancelled = ended {
            tracing::warn!(run_id = %ctx.run_id, unit = %unit_name, reason = ?ended, "killing sandbox unit");
        }
        unit.kill().await;
        let status = match ended {
            Ended::Exited(Some(status)) => Some(status),
            _ => unit.wait().await.ok(),
        };
        let exit = unit.finish(status).await;
        drop(registration);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let output = match ended {
            Ended::Cancelled => return Err(SandboxError::Cancelled),
            Ended::TimedOut => SandboxOutput::violation(
                SandboxViolation::new(
                    ViolationKind::Timeout,
                    format!("sandbox unit exceeded the {}s wall-clock limit", limit.as_secs()),
                )
                .with_details(serde_json::json!({ "elapsedMs": elapsed_ms })),
            ),
            Ended::Exited(_) => classify(&exit, &workdir.path().join(OUTPUT_FILE_NAME)).await?,
        };
        Ok(SandboxRun {
            unit: unit_name,
            output,
            elapsed_ms,
        })
    }

    fn create_workdir(&self) -> Result<tempfile::TempDir, SandboxError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("xpipeline-");
        let dir = match &self.config.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    fn register(&self, run_id: &str, unit: &str, token: CancellationToken) {
        self.active
            .entry(run_id.to_string())
            .or_default()
            .insert(unit.to_string(), token);
    }

    fn unregister(&self, run_id: &str, unit: &str) {
        if let Some(mut units) = self.active.get_mut(run_id) {
            units.remove(unit);
        }
        self.active.remove_if(run_id, |_, units| units.is_empty());
    }
}

impl std::fmt::Debug for SandboxLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLifecycle")
            .field("launcher", &self.launcher.name())
            .field("config", &self.config)
            .field("live_units", &self.total_live_units())
            .finish()
    }
}

/// Keeps a unit listed under its run until dropped.
struct Registration<'a> {
    lifecycle: &'a SandboxLifecycle,
    run_id: String,
    unit: String,
}

impl<'a> Registration<'a> {
    fn new(lifecycle: &'a SandboxLifecycle, run_id: &str, unit: &str, token: CancellationToken) -> Self {
        lifecycle.register(run_id, unit, token);
        Self {
            lifecycle,
            run_id: run_id.to_string(),
            unit: unit.to_string(),
        }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.lifecycle.unregister(&self.run_id, &self.unit);
    }
}

/// Turn a finished unit into a classified output.
async fn classify(exit: &UnitExit, output_path: &Path) -> Result<SandboxOutput, SandboxError> {
    if exit.was_killed() {
        return Ok(failure(with_tail(
            format!(
                "sandbox unit was forcibly killed (exit code {}); it may have exceeded its memory limit",
                KILLED_EXIT_CODE
            ),
            exit,
        )));
    }
    match tokio::fs::read(output_path).await {
        Ok(bytes) => Ok(match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => SandboxOutput::from_value(value),
            Err(e) => failure(format!("sandbox produced unreadable output: {}", e)),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let message = match exit.code {
                Some(0) => "sandbox did not produce output".to_string(),
                Some(code) => format!("sandbox did not produce output (exit code {})", code),
                None => "sandbox did not produce output (terminated by signal)".to_string(),
            };
            Ok(failure(with_tail(message, exit)))
        }
        Err(e) => Err(e.into()),
    }
}

fn failure(error: String) -> SandboxOutput {
    SandboxOutput::Failure {
        error,
        violation: None,
        logs: Vec::new(),
    }
}

fn with_tail(message: String, exit: &UnitExit) -> String {
    if exit.stderr_tail.is_empty() {
        message
    } else {
        format!("{}: {}", message, exit.stderr_tail)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
