//! Starting and stopping sandbox units.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use xpipeline_types::KILLED_EXIT_CODE;

use super::error::SandboxError;
use super::types::{Mount, SandboxConfig};

const STDERR_TAIL_BYTES: usize = 4096;
const CONTAINER_WORKDIR: &str = "/work";

/// Everything needed to start one unit.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub unit_name: String,
    /// Host work directory holding the input and output files.
    pub workdir: PathBuf,
    pub input_file: String,
    pub output_file: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<(String, String)>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Where the guest sees the unit's work directory.
    fn guest_workdir(&self, host_workdir: &Path) -> PathBuf;

    /// Where the guest sees a read-only mount.
    fn guest_mount_path(&self, mount: &Mount) -> PathBuf;

    /// Adjust the fresh work directory before the input file is written.
    fn prepare_workdir(&self, _workdir: &Path) -> std::io::Result<()> {
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxUnit, SandboxError>;
}

/// Runs the guest command as a direct child in its own process group.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(config.guest_command.clone())
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn name(&self) -> &'static str {
        "process"
    }

    fn guest_workdir(&self, host_workdir: &Path) -> PathBuf {
        host_workdir.to_path_buf()
    }

    fn guest_mount_path(&self, mount: &Mount) -> PathBuf {
        mount.host_path.clone()
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxUnit, SandboxError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SandboxError::LaunchFailed("guest command is empty".to_string()))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(spec.workdir.join(&spec.input_file))
            .arg(spec.workdir.join(&spec.output_file))
            .current_dir(&spec.workdir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!(unit = %spec.unit_name, command = ?self.command, "spawning sandbox process");
        let child = cmd
            .spawn()
            .map_err(|e| SandboxError::LaunchFailed(format!("{}: {}", program, e)))?;
        let group = child.id().map(|pid| pid as i32);
        Ok(SandboxUnit::new(&spec.unit_name, child, StopStrategy::ProcessGroup(group)))
    }
}

/// Runs each unit as a locked-down container through the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    config: SandboxConfig,
}

impl DockerLauncher {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Full `docker run` argument list for a unit.
    pub fn run_args(&self, spec: &LaunchSpec) -> Vec<String> {
        let c = &self.config;
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            spec.unit_name.clone(),
            "--network".into(),
            c.network.clone(),
            "--read-only".into(),
            "--tmpfs".into(),
            format!("/tmp:rw,noexec,nosuid,size={}m", c.scratch_mb),
            "--user".into(),
            c.user.clone(),
            "--memory".into(),
            format!("{}m", c.memory_mb),
            "--memory-swap".into(),
            format!("{}m", c.memory_mb),
            "--cpus".into(),
            c.cpu_cores.to_string(),
            "--pids-limit".into(),
            c.pids_limit.to_string(),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "-v".into(),
            format!("{}:{}:rw", spec.workdir.display(), CONTAINER_WORKDIR),
            "-w".into(),
            CONTAINER_WORKDIR.into(),
        ];
        for mount in &spec.mounts {
            args.push("-v".into());
            args.push(format!(
                "{}:{}:ro",
                mount.host_path.display(),
                self.guest_mount_path(mount).display()
            ));
        }
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(c.image.clone());
        args.extend(c.guest_command.iter().cloned());
        args.push(format!("{}/{}", CONTAINER_WORKDIR, spec.input_file));
        args.push(format!("{}/{}", CONTAINER_WORKDIR, spec.output_file));
        args
    }
}

#[async_trait]
impl Launcher for DockerLauncher {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn guest_workdir(&self, _host_workdir: &Path) -> PathBuf {
        PathBuf::from(CONTAINER_WORKDIR)
    }

    fn guest_mount_path(&self, mount: &Mount) -> PathBuf {
        PathBuf::from("/mnt").join(&mount.name)
    }

    fn prepare_workdir(&self, workdir: &Path) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(workdir, std::fs::Permissions::from_mode(0o777))?;
        }
        #[cfg(not(unix))]
        let _ = workdir;
        Ok(())
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<SandboxUnit, SandboxError> {
        let args = self.run_args(spec);
        tracing::debug!(unit = %spec.unit_name, args = ?args, "starting container");
        let child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::SandboxUnavailable(format!("{}: {}", self.config.docker_binary, e)))?;
        Ok(SandboxUnit::new(
            &spec.unit_name,
            child,
            StopStrategy::Container {
                docker: self.config.docker_binary.clone(),
            },
        ))
    }
}

#[derive(Debug)]
enum StopStrategy {
    ProcessGroup(Option<i32>),
    Container { docker: String },
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub stderr_tail: String,
}

impl UnitExit {
    /// Exit code 137 or death by SIGKILL.
    pub fn was_killed(&self) -> bool {
        self.code == Some(KILLED_EXIT_CODE) || self.signal == Some(9)
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A started unit. Dropping it kills the direct child.
#[derive(Debug)]
pub struct SandboxUnit {
    name: String,
    child: Child,
    stop: StopStrategy,
    stderr: Option<JoinHandle<String>>,
    reaped: bool,
}

impl SandboxUnit {
    fn new(name: &str, mut child: Child, stop: StopStrategy) -> Self {
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));
        Self {
            name: name.to_string(),
            child,
            stop,
            stderr,
            reaped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        Ok(status)
    }

    /// Forcibly stop the unit and everything it spawned.
    pub async fn kill(&mut self) {
        match &self.stop {
            StopStrategy::ProcessGroup(group) => kill_group(&self.name, *group),
            StopStrategy::Container { docker } => {
                let removed = Command::new(docker)
                    .args(["rm", "-f", &self.name])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await;
                if let Err(err) = removed {
                    tracing::warn!(unit = %self.name, error = %err, "docker rm -f failed");
                }
            }
        }
        if let Err(err) = self.child.kill().await {
            tracing::debug!(unit = %self.name, error = %err, "child already gone");
        }
    }

    /// Collect the exit description once the unit has stopped.
    pub async fn finish(mut self, status: Option<ExitStatus>) -> UnitExit {
        let stderr_tail = match self.stderr.take() {
            Some(handle) => tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default(),
            None => String::new(),
        };
        UnitExit {
            code: status.and_then(|s| s.code()),
            signal: status.and_then(exit_signal),
            stderr_tail,
        }
    }
}

impl Drop for SandboxUnit {
    fn drop(&mut self) {
        if let (false, StopStrategy::ProcessGroup(group)) = (self.reaped, &self.stop) {
            kill_group(&self.name, *group);
        }
    }
}

#[cfg(unix)]
fn kill_group(unit: &str, group: Option<i32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => tracing::warn!(unit, error = %err, "killpg failed"),
    }
}

#[cfg(not(unix))]
fn kill_group(_unit: &str, _group: Option<i32>) {}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

async fn read_tail(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > STDERR_TAIL_BYTES {
                    let cut = buf.len() - STDERR_TAIL_BYTES;
                    buf.drain(..cut);
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}
