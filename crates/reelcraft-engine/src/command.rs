//! Capabilities backed by an external program.
//!
//! The program receives one JSON line on stdin,
//! `{"capability": "<name>", "params": {...}}`, and must print a
//! [`CapabilityResult`] as JSON on stdout. A non-zero exit status or output
//! that does not decode is a [`FailureReason::SubprocessError`].
//!
//! The child is spawned with `kill_on_drop`, so a registry timeout or task
//! cancellation that drops the call also kills the process.

use async_trait::async_trait;
use reelcraft_core::{
    Capability, CapabilityMetadata, CapabilityResult, FailureReason, ParameterSchema, Params,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const STDOUT_PREVIEW_CHARS: usize = 2_000;
const STDERR_PREVIEW_CHARS: usize = 1_000;

#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    capability: &'a str,
    params: &'a Params,
}

/// A capability that delegates to an external program.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    name: String,
    description: String,
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    parameters: ParameterSchema,
    metadata: CapabilityMetadata,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            name: name.into(),
            description: format!("Runs '{}' and exchanges JSON over stdin/stdout", program),
            program,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            parameters: ParameterSchema::new(),
            metadata: CapabilityMetadata::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_metadata(mut self, metadata: CapabilityMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
impl Capability for CommandCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParameterSchema {
        self.parameters.clone()
    }

    fn metadata(&self) -> CapabilityMetadata {
        self.metadata.clone()
    }

    async fn invoke(&self, params: Params) -> Result<CapabilityResult, FailureReason> {
        let request = serde_json::to_string(&CommandRequest {
            capability: &self.name,
            params: &params,
        })
        .map_err(|e| FailureReason::internal(format!("failed to encode request: {}", e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(&self.env)
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(capability = %self.name, program = %self.program, "Spawning subprocess");
        let mut child = cmd.spawn().map_err(|e| FailureReason::IoError {
            message: format!("failed to spawn '{}': {}", self.program, e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(request.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.shutdown().await
            }
            .await;
            // A program that ignores stdin may exit before we finish writing.
            if let Err(e) = written {
                debug!(capability = %self.name, error = %e, "Subprocess did not consume stdin");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| FailureReason::IoError {
                message: format!("failed to wait for '{}': {}", self.program, e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                capability = %self.name,
                status = %output.status,
                "Subprocess exited unsuccessfully"
            );
            return Err(FailureReason::SubprocessError {
                message: format!(
                    "'{}' exited with {}: {}",
                    self.program,
                    output.status,
                    preview(stderr.trim(), STDERR_PREVIEW_CHARS)
                ),
            });
        }

        serde_json::from_str::<CapabilityResult>(stdout.trim()).map_err(|e| {
            FailureReason::SubprocessError {
                message: format!(
                    "invalid output from '{}': {}. stdout={}",
                    self.program,
                    e,
                    preview(stdout.trim(), STDOUT_PREVIEW_CHARS)
                ),
            }
        })
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcraft_core::{CancellationToken, CapabilityRegistry, ParameterSpec};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn shell(name: &str, script: &str) -> CommandCapability {
        CommandCapability::new(name, "sh").arg("-c").arg(script)
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[tokio::test]
    async fn parses_result_from_stdout() {
        let capability = shell(
            "generate_script",
            r#"cat > /dev/null; echo '{"success":true,"data":{"title":"Tides"},"resources":{"script":"/tmp/script.txt"},"message":"script ready"}'"#,
        );
        let result = capability.invoke(Params::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["title"], "Tides");
        assert_eq!(result.resources["script"], "/tmp/script.txt");
    }

    #[tokio::test]
    async fn writes_request_line_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let captured = dir.path().join("request.json");
        let capability = CommandCapability::new("generate_voice", "sh")
            .arg("-c")
            .arg(r#"cat > "$0"; echo '{"success":true,"message":"ok"}'"#)
            .arg(captured.to_string_lossy().to_string());

        capability
            .invoke(params(json!({"text": "hello"})))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&captured).unwrap();
        let request: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(request["capability"], "generate_voice");
        assert_eq!(request["params"]["text"], "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_subprocess_error() {
        let capability = shell("render_video", "cat > /dev/null; echo 'encoder crashed' >&2; exit 3");
        let err = capability.invoke(Params::new()).await.unwrap_err();
        match err {
            FailureReason::SubprocessError { message } => {
                assert!(message.contains("encoder crashed"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_output_is_subprocess_error() {
        let capability = shell("render_video", "cat > /dev/null; echo 'not json'");
        let err = capability.invoke(Params::new()).await.unwrap_err();
        assert!(matches!(err, FailureReason::SubprocessError { .. }));
        assert!(err.message().contains("stdout=not json"));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let capability = CommandCapability::new("render_video", "/nonexistent/reelcraft-renderer");
        let err = capability.invoke(Params::new()).await.unwrap_err();
        assert!(matches!(err, FailureReason::IoError { .. }));
    }

    /// A killed child is either reaped or left as a zombie.
    #[cfg(target_os = "linux")]
    fn process_is_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(str::trim_start)
                .is_some_and(|state| state.starts_with('Z') || state.starts_with('X')),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn registry_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let capability = CommandCapability::new("render_video", "sh")
            .arg("-c")
            .arg(r#"echo $$ > "$0"; exec sleep 30"#)
            .arg(pid_file.to_string_lossy().to_string())
            .with_metadata(CapabilityMetadata::new().with_timeout(Duration::from_millis(500)));
        let registry = CapabilityRegistry::new().with(Arc::new(capability));

        let started = std::time::Instant::now();
        let dispatch = registry
            .dispatch("render_video", Params::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!dispatch.result.success);
        assert!(matches!(
            dispatch.result.failure,
            Some(FailureReason::Timeout { .. })
        ));

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = false;
        for _ in 0..100 {
            if process_is_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "child {pid} still running after timeout");
    }

    #[tokio::test]
    async fn schema_is_checked_before_spawning() {
        let capability = shell("generate_voice", "exit 1").with_parameters(
            ParameterSchema::new().required("text", ParameterSpec::string("Narration text")),
        );
        let registry = CapabilityRegistry::new().with(Arc::new(capability));
        let err = registry
            .dispatch("generate_voice", Params::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENTS");
    }

    #[test]
    fn preview_truncates_long_text() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
