use crate::{ProtoError, ProtoResult};
use async_trait::async_trait;
use std::{process::Stdio, sync::Arc, time::Duration};
use strum::{AsRefStr, Display, EnumString};
use tokio::io::AsyncWriteExt;
use wgsync_lib::constant::WG_QUICK_TIMEOUT_SECS;

const PERMISSION_MARKERS: &[&str] = &[
    "must be run as root",
    "Permission denied",
    "Operation not permitted",
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Bytes fed to the child's stdin. `None` binds stdin to the null device.
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
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
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stderr, or stdout when the tool wrote its complaint there instead.
    pub fn message(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if stderr.is_empty() {
            return self.stdout_lossy().trim().to_string();
        }
        stderr
    }

    fn into_tool_error(self, tool: impl Into<String>) -> ProtoError {
        ProtoError::ToolFailed {
            tool: tool.into(),
            code: self.code,
            message: self.message(),
        }
    }
}

/// Runs external programs. Business logic only ever talks to this trait so
/// tests can substitute a scripted runner.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec) -> ProtoResult<CommandOutput>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: CommandSpec) -> ProtoResult<CommandOutput> {
        tracing::debug!("Running `{}`", spec.display());

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(input).await?;
        }

        // On timeout only the wait is abandoned; the child keeps running.
        let output = match spec.timeout {
            Some(after) => tokio::time::timeout(after, child.wait_with_output())
                .await
                .map_err(|_| ProtoError::Timeout {
                    program: spec.program.clone(),
                    after,
                })??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum QuickAction {
    Up,
    Down,
}

/// The `wg` and `wg-quick` invocations wgsync depends on.
#[derive(Clone)]
pub struct WgTool {
    runner: Arc<dyn CommandRunner>,
    quick_timeout: Duration,
}

impl WgTool {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            quick_timeout: Duration::from_secs(WG_QUICK_TIMEOUT_SECS),
        }
    }

    pub fn with_quick_timeout(mut self, timeout: Duration) -> Self {
        self.quick_timeout = timeout;
        self
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// `wg showconf <name>`: the live state of `name` as wg-quick text.
    pub async fn showconf(&self, name: &str) -> ProtoResult<Vec<u8>> {
        let spec = CommandSpec::new("wg").args(["showconf", name]);
        let output = self.runner.run(spec).await?;
        if !output.success() {
            return Err(output.into_tool_error("wg showconf"));
        }
        Ok(output.stdout)
    }

    pub async fn quick(&self, action: QuickAction, name: &str) -> ProtoResult<()> {
        let spec = CommandSpec::new("wg-quick")
            .args([action.as_ref(), name])
            .env("SUDO_ASKPASS", "/bin/false")
            .env("SSH_ASKPASS", "/bin/false")
            .timeout(self.quick_timeout);

        let output = match self.runner.run(spec).await {
            Ok(output) => output,
            Err(ProtoError::Timeout { .. }) => {
                return Err(ProtoError::QuickTimeout { action })
            }
            Err(e) => return Err(e),
        };

        if output.success() {
            tracing::info!("wg-quick {action} {name} succeeded");
            return Ok(());
        }

        let message = output.message();
        if PERMISSION_MARKERS.iter().any(|m| message.contains(m)) {
            return Err(ProtoError::PermissionRequired { action, message });
        }

        Err(output.into_tool_error(format!("wg-quick {action}")))
    }

    pub async fn version(&self) -> String {
        let spec = CommandSpec::new("wg").arg("--version");
        match self.runner.run(spec).await {
            Ok(output) if output.success() => output.stdout_lossy().trim().to_string(),
            Ok(output) => {
                tracing::debug!("wg --version failed: {}", output.message());
                "unknown".to_string()
            }
            Err(e) => {
                tracing::debug!("wg --version failed: {e}");
                "unknown".to_string()
            }
        }
    }
}
