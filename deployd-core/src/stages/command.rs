//! Stage that runs an external program inside the deployment workspace.
//!
//! Output is streamed line by line as it is produced. Stdout lines are
//! classified using the markers common to configuration-management tools
//! (`TASK [`, `ok: [`, ...); stderr lines become warnings, or errors when
//! they look fatal.

use crate::config::CommandPlan;
use crate::pipeline::{EventSink, Stage, StageContext, StageOutcome};
use async_trait::async_trait;
use deployd_sdk::objects::LogLevel;
use handlebars::RenderError;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

pub struct CommandStage {
    plan: CommandPlan,
}

impl CommandStage {
    pub fn new(plan: CommandPlan) -> Self {
        Self { plan }
    }

    fn failed(&self, reason: String) -> StageOutcome {
        if self.plan.optional {
            StageOutcome::SoftFailure(reason)
        } else {
            StageOutcome::HardFailure(reason)
        }
    }

    fn command(&self, ctx: &StageContext) -> Result<Command, RenderError> {
        let request = ctx.request();
        let args = self
            .plan
            .args
            .iter()
            .map(|arg| ctx.expand(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let mut cmd = Command::new(&self.plan.program);
        cmd.args(args)
            .current_dir(ctx.workspace())
            .env("DEPLOY_ID", ctx.deployment_id().as_str())
            .env("DEPLOY_WORKSPACE", ctx.workspace())
            .env("DEPLOY_REPO_URL", &request.repo_url)
            .env("DEPLOY_USERNAME", &request.username)
            .env("DEPLOY_GITHUB_TOKEN", &request.github_token)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &request.env_variables {
            cmd.env(format!("DEPLOY_ENV_{}", env_key(key)), value);
        }
        for (key, value) in &self.plan.env {
            cmd.env(key, ctx.expand(value)?);
        }
        Ok(cmd)
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.plan.name
    }

    async fn run(&self, ctx: &StageContext, sink: &EventSink) -> StageOutcome {
        let program = &self.plan.program;
        sink.info(format!("Running {program}"));

        let mut cmd = match self.command(ctx) {
            Ok(cmd) => cmd,
            Err(e) => return self.failed(format!("invalid template for {program}: {e}")),
        };
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return self.failed(format!("failed to start {program}: {e}")),
        };
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let capture = self.plan.capture.is_some();

        let finished = {
            let work = async {
                let (captured, (), status) = tokio::join!(
                    pump_stdout(stdout, sink, capture),
                    pump_stderr(stderr, sink),
                    child.wait()
                );
                (captured, status)
            };
            match self.plan.timeout {
                Some(limit) => tokio::time::timeout(limit, work).await.ok(),
                None => Some(work.await),
            }
        };

        let (captured, status) = match finished {
            Some(done) => done,
            None => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Failed to kill timed out command");
                }
                let limit = self.plan.timeout.unwrap_or_default();
                return self.failed(format!("{program} timed out after {}s", limit.as_secs()));
            }
        };

        match status {
            Ok(status) if status.success() => {
                if let Some(name) = &self.plan.capture {
                    ctx.set_output(name.clone(), captured.trim());
                }
                sink.success(format!("{program} finished"));
                StageOutcome::Success
            }
            Ok(status) => self.failed(format!("{program} {}", describe_exit(status))),
            Err(e) => self.failed(format!("failed to wait for {program}: {e}")),
        }
    }
}

async fn pump_stdout<R>(stdout: Option<R>, sink: &EventSink, capture: bool) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = String::new();
    let Some(stdout) = stdout else {
        return captured;
    };
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if capture {
                    captured.push_str(&line);
                    captured.push('\n');
                }
                if let Some((level, message)) = classify_stdout(&line) {
                    sink.emit(level, message);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped reading stdout");
                break;
            }
        }
    }
    captured
}

async fn pump_stderr<R>(stderr: Option<R>, sink: &EventSink)
where
    R: AsyncRead + Unpin,
{
    let Some(stderr) = stderr else {
        return;
    };
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(level) = classify_stderr(&line) {
                    sink.emit(level, line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Stopped reading stderr");
                break;
            }
        }
    }
}

/// Level and message for one stdout line. Blank lines are skipped.
pub fn classify_stdout(line: &str) -> Option<(LogLevel, String)> {
    if line.trim().is_empty() {
        return None;
    }
    if let Some(start) = line.find("TASK [") {
        let task = line[start + "TASK [".len()..]
            .trim_end()
            .trim_end_matches('*')
            .trim_end()
            .trim_end_matches(']');
        return Some((LogLevel::Info, format!("Task: {}", task.trim())));
    }
    let level = if line.contains("ok: [") {
        LogLevel::Success
    } else if line.contains("changed: [") || line.contains("skipping: [") {
        LogLevel::Info
    } else {
        LogLevel::Debug
    };
    Some((level, line.to_owned()))
}

/// Level for one stderr line. Blank lines are skipped.
pub fn classify_stderr(line: &str) -> Option<LogLevel> {
    if line.trim().is_empty() {
        None
    } else if line.contains("ERROR!") || line.contains("failed:") {
        Some(LogLevel::Error)
    } else {
        Some(LogLevel::Warn)
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, open_deployment, request};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_classify_stdout() {
        assert_eq!(classify_stdout("   "), None);
        assert_eq!(
            classify_stdout("TASK [Install packages] ******"),
            Some((LogLevel::Info, "Task: Install packages".into()))
        );
        assert_eq!(
            classify_stdout("ok: [web1]").map(|c| c.0),
            Some(LogLevel::Success)
        );
        assert_eq!(
            classify_stdout("changed: [web1]").map(|c| c.0),
            Some(LogLevel::Info)
        );
        assert_eq!(
            classify_stdout("skipping: [web1]").map(|c| c.0),
            Some(LogLevel::Info)
        );
        assert_eq!(
            classify_stdout("PLAY RECAP").map(|c| c.0),
            Some(LogLevel::Debug)
        );
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(classify_stderr(""), None);
        assert_eq!(classify_stderr("ERROR! no hosts"), Some(LogLevel::Error));
        assert_eq!(classify_stderr("fatal: failed: [web1]"), Some(LogLevel::Error));
        assert_eq!(classify_stderr("deprecation notice"), Some(LogLevel::Warn));
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("db-url"), "DB_URL");
        assert_eq!(env_key("Secret.Key"), "SECRET_KEY");
    }

    fn sh(name: &str, script: &str) -> CommandPlan {
        CommandPlan::new(name, "sh").args(["-c", script])
    }

    fn context(workspace: &Path) -> StageContext {
        let mut request = request();
        request.env_variables.insert("db-url".into(), "postgres://db".into());
        StageContext::new(
            "dep-cmd".into(),
            workspace.to_path_buf(),
            Arc::new(request),
        )
    }

    #[tokio::test]
    async fn test_streams_output_and_captures() {
        let (_store, broadcaster, id) = open_deployment(64);
        let mut sub = broadcaster.subscribe(&id).unwrap();
        let sink = EventSink::new(broadcaster.clone(), id, "configure");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut plan = sh(
            "configure",
            "echo 'TASK [setup]'; echo 'ok: [web1]'; echo \"$DEPLOY_USERNAME $DEPLOY_ENV_DB_URL\"; echo 'ERROR! boom' >&2",
        );
        plan.capture = Some("out".into());
        let outcome = CommandStage::new(plan).run(&ctx, &sink).await;
        assert_eq!(outcome, StageOutcome::Success);

        let events = drain(&mut sub);
        assert!(events.iter().all(|e| e.step == "configure"));
        let levels: Vec<_> = events.iter().map(|e| (e.level, e.message.as_str())).collect();
        assert!(levels.contains(&(LogLevel::Info, "Task: setup")));
        assert!(levels.contains(&(LogLevel::Success, "ok: [web1]")));
        assert!(levels.contains(&(LogLevel::Debug, "alice postgres://db")));
        assert!(levels.contains(&(LogLevel::Error, "ERROR! boom")));

        let captured = ctx.output("out").unwrap();
        assert!(captured.ends_with("alice postgres://db"));
    }

    #[tokio::test]
    async fn test_templates_expand_outputs() {
        let (_store, broadcaster, id) = open_deployment(64);
        let sink = EventSink::new(broadcaster, id, "echo");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.set_output("public_ip", "10.0.0.7");

        let mut plan = sh("echo", "printf '%s' \"$0\"");
        plan.args.push("{{public_ip}}:{{repo_name}}".into());
        plan.capture = Some("addr".into());
        let outcome = CommandStage::new(plan).run(&ctx, &sink).await;
        assert_eq!(outcome, StageOutcome::Success);
        assert_eq!(ctx.output("addr").as_deref(), Some("10.0.0.7:shop"));
    }

    #[tokio::test]
    async fn test_malformed_template_fails_before_spawn() {
        let (_store, broadcaster, id) = open_deployment(8);
        let sink = EventSink::new(broadcaster, id, "broken");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut plan = sh("broken", "touch spawned");
        plan.args.push("{{#if public_ip}}".into());
        let outcome = CommandStage::new(plan).run(&ctx, &sink).await;
        assert!(matches!(outcome, StageOutcome::HardFailure(reason) if reason.starts_with("invalid template for sh")));
        assert!(!dir.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_hard_failure() {
        let (_store, broadcaster, id) = open_deployment(8);
        let sink = EventSink::new(broadcaster, id, "fail");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let outcome = CommandStage::new(sh("fail", "exit 3")).run(&ctx, &sink).await;
        assert_eq!(
            outcome,
            StageOutcome::HardFailure("sh exited with status 3".into())
        );
    }

    #[tokio::test]
    async fn test_optional_failure_is_soft() {
        let (_store, broadcaster, id) = open_deployment(8);
        let sink = EventSink::new(broadcaster, id, "missing");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut plan = CommandPlan::new("missing", "definitely-not-a-real-program-4711");
        plan.optional = true;
        let outcome = CommandStage::new(plan).run(&ctx, &sink).await;
        assert!(matches!(outcome, StageOutcome::SoftFailure(reason) if reason.starts_with("failed to start")));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let (_store, broadcaster, id) = open_deployment(8);
        let sink = EventSink::new(broadcaster, id, "slow");
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());

        let mut plan = sh("slow", "exec sleep 30");
        plan.timeout = Some(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let outcome = CommandStage::new(plan).run(&ctx, &sink).await;
        assert!(matches!(outcome, StageOutcome::HardFailure(reason) if reason.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
