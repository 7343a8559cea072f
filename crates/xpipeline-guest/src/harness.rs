//! One guest execution: read the input file, check the source, run the
//! interpreter under the monitor, write the classified output file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use xpipeline_types::{
    GuestLanguage, SandboxInput, SandboxOutput, SandboxViolation, ViolationKind,
};

use crate::monitor::{MemorySampler, MonitorOutcome, ProcSampler, ResourceMonitor};
use crate::restrict::CapabilityGuard;

pub const NODES_DIR_ENV: &str = "XPIPELINE_NODES_DIR";
pub const PYTHON_ENV: &str = "XPIPELINE_PYTHON";
pub const NODE_ENV: &str = "XPIPELINE_NODE";
/// Where container images install the catalog node scripts.
pub const DEFAULT_NODES_DIR: &str = "/opt/xpipeline/nodes";

const MAX_LOG_LINES: usize = 200;
const STDERR_TAIL_LINES: usize = 20;

// Inline code never shares a scope with the modules that do the I/O: the
// payload is a literal and the result leaves on a marked stdout line.
const PYTHON_PRELUDE: &str = r#"def _xp_load():
    import json
    return json.loads(__XP_PAYLOAD__)
_xp_payload = _xp_load()
del _xp_load
params = _xp_payload.get("params", {})
inputs = _xp_payload.get("inputs", {})
context = _xp_payload.get("context", {})
del _xp_payload
result = None
"#;

const PYTHON_EPILOGUE: &str = r#"
def _xp_emit(value):
    import json
    print(__XP_MARKER__ + json.dumps({"success": True, "result": value}, default=str), flush=True)
_xp_emit(result)
"#;

const JS_PRELUDE: &str = r#"const __xp_payload = JSON.parse(__XP_PAYLOAD__);
const params = __xp_payload.params || {};
const inputs = __xp_payload.inputs || {};
const context = __xp_payload.context || {};
let result = null;
"#;

const JS_EPILOGUE: &str = r#"
console.log(__XP_MARKER__ + JSON.stringify({ success: true, result }));
"#;

const PAYLOAD_SLOT: &str = "__XP_PAYLOAD__";
const MARKER_SLOT: &str = "__XP_MARKER__";

/// Failures of the harness itself, as opposed to failures of guest code.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("cannot read sandbox input {path}: {source}")]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid sandbox input: {0}")]
    InvalidInput(#[from] serde_json::Error),
    #[error("cannot write sandbox output {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interpreter and script lookup, normally taken from the environment.
#[derive(Debug, Clone)]
pub struct GuestEnvironment {
    pub python: String,
    pub node: String,
    pub nodes_dir: PathBuf,
}

impl GuestEnvironment {
    pub fn from_env() -> Self {
        Self {
            python: std::env::var(PYTHON_ENV).unwrap_or_else(|_| "python3".to_string()),
            node: std::env::var(NODE_ENV).unwrap_or_else(|_| "node".to_string()),
            nodes_dir: std::env::var_os(NODES_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_NODES_DIR)),
        }
    }

    pub fn interpreter(&self, language: GuestLanguage) -> &str {
        match language {
            GuestLanguage::Python => &self.python,
            GuestLanguage::JavaScript => &self.node,
        }
    }
}

pub struct Harness {
    env: GuestEnvironment,
    sampler: Box<dyn MemorySampler>,
}

impl Harness {
    pub fn new(env: GuestEnvironment) -> Self {
        Self {
            env,
            sampler: Box::new(ProcSampler),
        }
    }

    pub fn with_sampler(mut self, sampler: Box<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Run the guest described by `input_path` and write its output to `output_path`.
    pub async fn run_files(&self, input_path: &Path, output_path: &Path) -> Result<SandboxOutput, HarnessError> {
        let raw = tokio::fs::read(input_path)
            .await
            .map_err(|source| HarnessError::ReadInput {
                path: input_path.to_path_buf(),
                source,
            })?;
        let input: SandboxInput = serde_json::from_slice(&raw)?;
        let output = self.run(&input, input_path, output_path).await?;
        let bytes = serde_json::to_vec(&output.to_value())?;
        tokio::fs::write(output_path, bytes)
            .await
            .map_err(|source| HarnessError::WriteOutput {
                path: output_path.to_path_buf(),
                source,
            })?;
        Ok(output)
    }

    async fn run(&self, input: &SandboxInput, input_path: &Path, output_path: &Path) -> Result<SandboxOutput, HarnessError> {
        let ctx = &input.context;
        let language = ctx.language;
        let guard = CapabilityGuard::new(ctx.security.clone());

        // Scratch space for the generated script and the raw guest output.
        let scratch = tempfile::Builder::new().prefix("xpipeline-guest-").tempdir()?;
        let marker = result_marker(scratch.path());
        let (script, inline) = match (&ctx.code, &ctx.entry) {
            (Some(code), _) => {
                if let Err(violation) = guard.check(language, code) {
                    return Ok(reject(&ctx.node_id, violation));
                }
                let path = scratch.path().join(format!("node.{}", extension(language)));
                let source = wrap_inline(language, code, &inline_payload(input)?, &marker)?;
                tokio::fs::write(&path, source).await?;
                (path, true)
            }
            (None, Some(entry)) => {
                let path = self.resolve_entry(entry);
                if !path.is_file() {
                    return Ok(failure(format!("entry script not found: {}", path.display())));
                }
                if ctx.scan_entry {
                    let source = tokio::fs::read_to_string(&path).await?;
                    if let Err(violation) = guard.check(language, &source) {
                        return Ok(reject(&ctx.node_id, violation));
                    }
                }
                (path, false)
            }
            (None, None) => return Ok(failure("sandbox input names neither code nor an entry script".to_string())),
        };

        let guest_output = scratch.path().join("guest-output.json");
        let interpreter = self.env.interpreter(language);
        tracing::debug!(
            node_id = %ctx.node_id,
            interpreter,
            script = %script.display(),
            "starting guest"
        );
        let mut command = Command::new(interpreter);
        command.arg(&script);
        if !inline {
            command.arg(input_path).arg(&guest_output);
        }
        command
            .current_dir(output_path.parent().unwrap_or_else(|| Path::new(".")))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return Ok(failure(format!("cannot start interpreter '{}': {}", interpreter, e))),
        };

        let result_line = inline.then(|| marker.clone());
        let stdout = child.stdout.take().map(|s| collect_lines(s, MAX_LOG_LINES, false, result_line));
        let stderr = child.stderr.take().map(|s| collect_lines(s, STDERR_TAIL_LINES, true, None));

        let monitor = ResourceMonitor::from_policy(&ctx.security);
        let outcome = monitor.supervise(&mut child, self.sampler.as_ref()).await?;
        let stdout = join_lines(stdout).await;
        let logs = stdout.lines;
        let stderr_tail = join_lines(stderr).await.lines;

        let output = match outcome {
            MonitorOutcome::Breached { violation, .. } => {
                tracing::warn!(node_id = %ctx.node_id, violation = %violation.kind, "resource ceiling crossed");
                with_logs(SandboxOutput::violation(violation), logs)
            }
            MonitorOutcome::Exited { status, stats } => match raw_output(inline, stdout.marked, &guest_output).await {
                Some(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => match with_logs(SandboxOutput::from_value(value), logs) {
                        SandboxOutput::Success { result, logs, .. } => SandboxOutput::Success {
                            result,
                            stats: Some(stats),
                            logs,
                        },
                        failed => failed,
                    },
                    Err(e) => failure(format!("guest wrote unreadable output: {}", e)),
                },
                None => {
                    let code = status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "signal".to_string());
                    let mut message = format!("guest exited ({}) without writing output", code);
                    if !stderr_tail.is_empty() {
                        message.push_str(": ");
                        message.push_str(&stderr_tail.join("\n"));
                    }
                    let violation = SandboxViolation::new(ViolationKind::RuntimeError, message)
                        .with_details(json!({ "exitCode": status.code(), "elapsedMs": stats.elapsed_ms }));
                    with_logs(SandboxOutput::violation(violation), logs)
                }
            },
        };
        Ok(output)
    }

    fn resolve_entry(&self, entry: &str) -> PathBuf {
        let path = Path::new(entry);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.env.nodes_dir.join(path)
        }
    }
}

fn extension(language: GuestLanguage) -> &'static str {
    match language {
        GuestLanguage::Python => "py",
        GuestLanguage::JavaScript => "js",
    }
}

/// Surround user code with the payload literal and the result line.
pub fn wrap_inline(language: GuestLanguage, code: &str, payload: &Value, marker: &str) -> Result<String, serde_json::Error> {
    let (prelude, epilogue) = match language {
        GuestLanguage::Python => (PYTHON_PRELUDE, PYTHON_EPILOGUE),
        GuestLanguage::JavaScript => (JS_PRELUDE, JS_EPILOGUE),
    };
    // A JSON string literal is a valid string literal in both languages.
    let payload = serde_json::to_string(&serde_json::to_string(payload)?)?;
    let marker = serde_json::to_string(marker)?;
    let prelude = prelude.replace(PAYLOAD_SLOT, &payload);
    let epilogue = epilogue.replace(MARKER_SLOT, &marker);

    let mut script = String::with_capacity(prelude.len() + code.len() + epilogue.len() + 1);
    script.push_str(&prelude);
    script.push_str(code);
    if !code.ends_with('\n') {
        script.push('\n');
    }
    script.push_str(&epilogue);
    Ok(script)
}

/// What inline code sees as `params`, `inputs` and `context`.
fn inline_payload(input: &SandboxInput) -> Result<Value, serde_json::Error> {
    let mut payload = serde_json::to_value(input)?;
    if let Some(context) = payload.get_mut("context").and_then(Value::as_object_mut) {
        context.remove("code");
    }
    Ok(payload)
}

/// Prefix of the stdout line carrying an inline result, unique per execution.
fn result_marker(scratch: &Path) -> String {
    let nonce: String = scratch
        .file_name()
        .map(|name| name.to_string_lossy().chars().filter(char::is_ascii_alphanumeric).collect())
        .unwrap_or_default();
    format!("__xpipeline_result_{}__", nonce)
}

async fn raw_output(inline: bool, marked: Option<String>, guest_output: &Path) -> Option<Vec<u8>> {
    if inline {
        marked.map(String::into_bytes)
    } else {
        tokio::fs::read(guest_output).await.ok()
    }
}

fn reject(node_id: &str, violation: SandboxViolation) -> SandboxOutput {
    tracing::warn!(node_id, violation = %violation.kind, "guest source rejected before execution");
    SandboxOutput::violation(violation)
}

fn failure(error: String) -> SandboxOutput {
    SandboxOutput::Failure {
        error,
        violation: None,
        logs: Vec::new(),
    }
}

fn with_logs(output: SandboxOutput, extra: Vec<String>) -> SandboxOutput {
    if extra.is_empty() {
        return output;
    }
    match output {
        SandboxOutput::Success { result, stats, mut logs } => {
            logs.extend(extra);
            SandboxOutput::Success { result, stats, logs }
        }
        SandboxOutput::Failure { error, violation, mut logs } => {
            logs.extend(extra);
            SandboxOutput::Failure { error, violation, logs }
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    lines: Vec<String>,
    /// Remainder of the last line that started with the result marker.
    marked: Option<String>,
}

/// Read lines from a pipe, keeping the first (or last, with `tail`) `limit`.
/// Lines starting with `marker` are set aside and never count as logs.
fn collect_lines<R>(reader: R, limit: usize, tail: bool, marker: Option<String>) -> JoinHandle<Captured>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut kept = std::collections::VecDeque::new();
        let mut marked = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(rest) = marker.as_deref().and_then(|m| line.strip_prefix(m)) {
                marked = Some(rest.to_string());
                continue;
            }
            if kept.len() == limit {
                if !tail {
                    continue;
                }
                kept.pop_front();
            }
            kept.push_back(line);
        }
        Captured {
            lines: kept.into_iter().collect(),
            marked,
        }
    })
}

async fn join_lines(handle: Option<JoinHandle<Captured>>) -> Captured {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Captured::default(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use serde_json::Map;
    use xpipeline_types::{SandboxContext, SecurityPolicy};

    /// Uses `/bin/sh` as the "python" interpreter so tests need no runtime installed.
    fn harness(nodes_dir: &Path) -> Harness {
        Harness::new(GuestEnvironment {
            python: "/bin/sh".to_string(),
            node: "/bin/sh".to_string(),
            nodes_dir: nodes_dir.to_path_buf(),
        })
    }

    fn input(entry: Option<&str>, code: Option<&str>, security: SecurityPolicy) -> SandboxInput {
        SandboxInput {
            node_type: "TestNode".into(),
            params: Map::new(),
            inputs: Map::new(),
            context: SandboxContext {
                run_id: "run".into(),
                pipeline_id: "p".into(),
                node_id: "n1".into(),
                language: GuestLanguage::Python,
                datasets: BTreeMap::new(),
                entry: entry.map(str::to_string),
                code: code.map(str::to_string),
                scan_entry: false,
                security,
            },
        }
    }

    async fn run(dir: &Path, input: &SandboxInput) -> SandboxOutput {
        let input_path = dir.join("input.json");
        let output_path = dir.join("output.json");
        std::fs::write(&input_path, serde_json::to_vec(input).unwrap()).unwrap();
        let out = harness(dir).run_files(&input_path, &output_path).await.unwrap();
        let written: Value = serde_json::from_slice(&std::fs::read(&output_path).unwrap()).unwrap();
        assert_eq!(SandboxOutput::from_value(written).as_violation().map(|v| v.kind), out.as_violation().map(|v| v.kind));
        out
    }

    #[tokio::test]
    async fn test_entry_script_output_gets_stats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("TestNode.py"),
            "echo working\nprintf '{\"type\":\"dataframe\",\"data\":[]}' > \"$2\"\n",
        )
        .unwrap();
        let out = run(dir.path(), &input(Some("TestNode.py"), None, SecurityPolicy::default())).await;
        match out {
            SandboxOutput::Success { result, stats, logs } => {
                assert_eq!(result["type"], "dataframe");
                assert!(stats.is_some());
                assert_eq!(logs, vec!["working"]);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guest_error_payload_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("TestNode.py"),
            "printf '{\"error\":\"no close column\",\"type\":\"execution_error\"}' > \"$2\"\n",
        )
        .unwrap();
        let out = run(dir.path(), &input(Some("TestNode.py"), None, SecurityPolicy::default())).await;
        match out {
            SandboxOutput::Failure { error, violation, .. } => {
                assert_eq!(error, "no close column");
                assert!(violation.is_none());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_crash_without_output_is_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("TestNode.py"), "echo boom >&2\nexit 3\n").unwrap();
        let out = run(dir.path(), &input(Some("TestNode.py"), None, SecurityPolicy::default())).await;
        let violation = out.as_violation().unwrap();
        assert_eq!(violation.kind, ViolationKind::RuntimeError);
        assert!(violation.message.contains("exited (3)"));
        assert!(violation.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_time_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("TestNode.py"), "sleep 30\n").unwrap();
        let policy = SecurityPolicy {
            max_execution_ms: 200,
            sample_interval_ms: 10,
            ..Default::default()
        };
        let out = run(dir.path(), &input(Some("TestNode.py"), None, policy)).await;
        assert_eq!(out.as_violation().unwrap().kind, ViolationKind::Timeout);
    }

    #[tokio::test]
    async fn test_inline_code_is_checked_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(dir.path(), &input(None, Some("import socket\nresult = 1\n"), SecurityPolicy::default())).await;
        assert_eq!(out.as_violation().unwrap().kind, ViolationKind::RestrictedModule);
    }

    #[tokio::test]
    async fn test_scan_entry_applies_to_custom_scripts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("TestNode.py"), "exec(open('x').read())\n").unwrap();
        let mut custom = input(Some("TestNode.py"), None, SecurityPolicy::default());
        custom.context.scan_entry = true;
        let out = run(dir.path(), &custom).await;
        assert_eq!(out.as_violation().unwrap().kind, ViolationKind::DynamicCode);
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(dir.path(), &input(Some("Nope.py"), None, SecurityPolicy::default())).await;
        match out {
            SandboxOutput::Failure { error, .. } => assert!(error.contains("entry script not found")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_wrap_inline_keeps_io_modules_out_of_user_scope() {
        let payload = json!({"params": {"x": 2, "quote": "it's \"q\"\n"}});
        let script = wrap_inline(GuestLanguage::Python, "result = params['x'] * 2", &payload, "__m__").unwrap();
        let code_at = script.find("result = params['x'] * 2").unwrap();
        let before = &script[..code_at];
        assert!(!before.contains("import sys"));
        assert!(!before.contains("argv"));
        // Imports only ever happen indented inside helper functions.
        for line in script.lines().filter(|l| l.contains("import ")) {
            assert!(line.starts_with("    "), "top-level import: {}", line);
        }
        assert!(script[code_at..].contains("\"__m__\""));

        let js = wrap_inline(GuestLanguage::JavaScript, "result = 1;\n", &payload, "__m__").unwrap();
        assert!(!js.contains("require("));
        assert!(!js.contains("process.argv"));
        assert!(js.contains("console.log(\"__m__\""));
    }

    fn installed(program: &str) -> bool {
        std::process::Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_or(false, |s| s.success())
    }

    fn real_harness(dir: &Path) -> Harness {
        Harness::new(GuestEnvironment {
            python: "python3".to_string(),
            node: "node".to_string(),
            nodes_dir: dir.to_path_buf(),
        })
    }

    async fn run_inline(dir: &Path, language: GuestLanguage, code: &str) -> SandboxOutput {
        let mut inline = input(None, Some(code), SecurityPolicy::default());
        inline.context.language = language;
        inline.params.insert("x".into(), json!(21));
        let input_path = dir.join("input.json");
        std::fs::write(&input_path, serde_json::to_vec(&inline).unwrap()).unwrap();
        real_harness(dir).run_files(&input_path, &dir.join("output.json")).await.unwrap()
    }

    #[tokio::test]
    async fn test_inline_python_result_comes_back() {
        if !installed("python3") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let out = run_inline(dir.path(), GuestLanguage::Python, "print('hello')\nresult = params['x'] * 2\n").await;
        match out {
            SandboxOutput::Success { result, logs, .. } => {
                assert_eq!(result, json!(42));
                assert_eq!(logs, vec!["hello"]);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inline_python_cannot_reach_wrapper_modules() {
        if !installed("python3") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("escaped");
        let code = format!(
            "_xp_sys.modules['os'].system('touch {}')\nresult = 1\n",
            marker.display()
        );
        let out = run_inline(dir.path(), GuestLanguage::Python, &code).await;
        assert!(!marker.exists());
        let violation = out.as_violation().unwrap();
        assert_eq!(violation.kind, ViolationKind::RuntimeError);
        assert!(violation.message.contains("NameError"), "{}", violation.message);

        let out = run_inline(dir.path(), GuestLanguage::Python, "_xp_json.dumps(1)\n").await;
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn test_inline_javascript_cannot_reach_wrapper_modules() {
        if !installed("node") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("escaped");
        let code = format!("__xp_fs.writeFileSync('{}', 'x');\nresult = 1;\n", marker.display());
        let out = run_inline(dir.path(), GuestLanguage::JavaScript, &code).await;
        assert!(!marker.exists());
        assert_eq!(out.as_violation().unwrap().kind, ViolationKind::RuntimeError);

        let out = run_inline(dir.path(), GuestLanguage::JavaScript, "result = params.x + 1;\n").await;
        match out {
            SandboxOutput::Success { result, .. } => assert_eq!(result, json!(22)),
            other => panic!("expected success, got {:?}", other),
        }
    }
}
