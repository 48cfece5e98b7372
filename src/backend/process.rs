//! Process engine - runs a target's command as a child process, either
//! directly or inside a throwaway docker container

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::Endpoint;
use crate::context::Context;
use crate::core::{BuildEngine, BuildRequest, BuildResult};
use crate::error::EngineError;
use crate::progress::{EventSink, OutputStream};

/// Image used for docker endpoints when a target names none.
pub const DEFAULT_IMAGE: &str = "alpine:3.20";

/// Mount point of the workspace inside containers.
const CONTAINER_ROOT: &str = "/src";

static NEXT_CONTAINER: AtomicUsize = AtomicUsize::new(0);

/// What the process engine expects in [`BuildRequest::spec`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecSpec {
    /// Shell command line.
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Working directory, relative to the workspace root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub force_pull: bool,
}

pub struct ProcessEngine {
    endpoint: Endpoint,
    root: PathBuf,
}

impl ProcessEngine {
    pub fn new(endpoint: Endpoint, root: PathBuf) -> Self {
        Self { endpoint, root }
    }

    /// `container` names the docker container so it can be killed on cancel.
    fn command(&self, spec: &ExecSpec, container: Option<&str>) -> Command {
        match &self.endpoint {
            Endpoint::Local => {
                if spec.image.is_some() {
                    log::debug!("ignoring image for local endpoint");
                }
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(&spec.run).envs(&spec.env);
                cmd.current_dir(match &spec.workdir {
                    Some(dir) => self.root.join(dir),
                    None => self.root.clone(),
                });
                cmd
            }
            Endpoint::Docker { host } => {
                let workdir = match &spec.workdir {
                    Some(dir) => format!("{}/{}", CONTAINER_ROOT, dir.trim_start_matches('/')),
                    None => CONTAINER_ROOT.to_string(),
                };

                let mut cmd = Command::new("docker");
                if let Some(host) = host {
                    cmd.arg("-H").arg(host);
                }
                cmd.args(["run", "--rm"]);
                if let Some(name) = container {
                    cmd.arg("--name").arg(name);
                }
                cmd.arg("-v")
                    .arg(format!("{}:{}:ro", self.root.display(), CONTAINER_ROOT))
                    .arg("-w")
                    .arg(workdir);
                for (key, value) in &spec.env {
                    cmd.arg("-e").arg(format!("{}={}", key, value));
                }
                if spec.force_pull {
                    cmd.args(["--pull", "always"]);
                }
                cmd.arg(spec.image.as_deref().unwrap_or(DEFAULT_IMAGE))
                    .args(["sh", "-c"])
                    .arg(&spec.run);
                cmd
            }
        }
    }

    /// `docker kill` the named container; killing the client leaves it running.
    async fn kill_container(&self, name: &str) {
        let mut kill = Command::new("docker");
        if let Endpoint::Docker { host: Some(host) } = &self.endpoint {
            kill.arg("-H").arg(host);
        }
        kill.args(["kill", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        match kill.status().await {
            Ok(status) if status.success() => log::debug!("killed container {}", name),
            Ok(status) => log::debug!("docker kill {}: {}", name, status),
            Err(e) => log::warn!("docker kill {}: {}", name, e),
        }
    }
}

/// SIGKILL every process in the group led by `pgid`. A group that is already
/// gone is not an error.
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal and touches no memory.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

#[async_trait]
impl BuildEngine for ProcessEngine {
    fn name(&self) -> &str {
        match self.endpoint {
            Endpoint::Local => "local",
            Endpoint::Docker { .. } => "docker",
        }
    }

    async fn build(
        &self,
        ctx: &Context,
        request: BuildRequest,
        sink: &EventSink,
    ) -> Result<BuildResult, EngineError> {
        let spec: ExecSpec = serde_json::from_value(request.spec)
            .map_err(|e| EngineError::Spawn(format!("bad request for {}: {}", request.target, e)))?;

        if ctx.is_done() {
            return Err(EngineError::Canceled);
        }

        let container = match self.endpoint {
            Endpoint::Docker { .. } => Some(format!(
                "fanbuild-{}-{}",
                std::process::id(),
                NEXT_CONTAINER.fetch_add(1, Ordering::Relaxed)
            )),
            Endpoint::Local => None,
        };
        let mut cmd = self.command(&spec, container.as_deref());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so everything the shell forks can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);

        sink.step(spec.run.as_str());
        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| EngineError::Spawn(e.to_string()))?;
        let group = child.id();
        log::debug!("[{}] spawned pid {:?}", request.target, group);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = async {
            let wait = async {
                let status = child.wait().await;
                // Leftover background jobs would keep the pipes open.
                kill_group(group);
                status
            };
            let (status, _, _) = tokio::join!(
                wait,
                pump_lines(stdout, OutputStream::Stdout, sink),
                pump_lines(stderr, OutputStream::Stderr, sink),
            );
            status
        };

        let status = tokio::select! {
            biased;
            _ = ctx.done() => None,
            status = finished => Some(status),
        };

        let Some(status) = status else {
            log::debug!("[{}] stopping after cancel", request.target);
            if let Some(name) = &container {
                self.kill_container(name).await;
            }
            kill_group(group);
            if let Err(e) = child.kill().await {
                log::warn!("[{}] failed to kill child: {}", request.target, e);
            }
            return Err(EngineError::Canceled);
        };

        let status = status.map_err(|e| EngineError::Failed(e.to_string()))?;
        match status.code() {
            Some(0) => Ok(BuildResult {
                exit_code: 0,
                elapsed: started.elapsed(),
            }),
            Some(code) => Err(EngineError::Failed(format!(
                "process {:?} did not complete successfully: exit code: {}",
                spec.run, code
            ))),
            None => Err(EngineError::Failed(format!(
                "process {:?} was terminated by a signal",
                spec.run
            ))),
        }
    }
}

/// Forward every line of `reader` to `sink` until EOF.
async fn pump_lines<R>(reader: Option<R>, stream: OutputStream, sink: &EventSink)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                sink.output(stream, line.trim_end_matches(|c: char| c == '\n' || c == '\r'));
            }
            Err(e) => {
                log::debug!("reading child {:?}: {}", stream, e);
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use std::time::Duration;

    fn request(spec: ExecSpec) -> BuildRequest {
        BuildRequest {
            target: "t".into(),
            spec: serde_json::to_value(spec).unwrap(),
        }
    }

    fn local(root: PathBuf) -> ProcessEngine {
        ProcessEngine::new(Endpoint::Local, root)
    }

    fn drain(mut rx: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_streams_both_outputs() {
        let engine = local(std::env::temp_dir());
        let (sink, rx) = EventSink::new();
        let spec = ExecSpec {
            run: "echo out; echo err >&2".into(),
            ..Default::default()
        };

        let result = engine
            .build(&Context::background(), request(spec), &sink)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);

        let events = drain(rx);
        assert!(matches!(&events[0], ProgressEvent::Step { name } if name.contains("echo out")));
        assert!(events.contains(&ProgressEvent::Output {
            stream: OutputStream::Stdout,
            line: "out".into()
        }));
        assert!(events.contains(&ProgressEvent::Output {
            stream: OutputStream::Stderr,
            line: "err".into()
        }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let engine = local(std::env::temp_dir());
        let (sink, _rx) = EventSink::new();
        let spec = ExecSpec {
            run: "exit 3".into(),
            ..Default::default()
        };

        let err = engine
            .build(&Context::background(), request(spec), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Failed(msg) if msg.ends_with("exit code: 3")));
    }

    #[tokio::test]
    async fn test_env_and_workdir() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        let engine = local(root.path().to_path_buf());
        let (sink, rx) = EventSink::new();
        let spec = ExecSpec {
            run: "echo \"$GREETING from $(basename \"$(pwd -P)\")\"".into(),
            workdir: Some("sub".into()),
            env: BTreeMap::from([("GREETING".to_string(), "hello".to_string())]),
            ..Default::default()
        };

        engine
            .build(&Context::background(), request(spec), &sink)
            .await
            .unwrap();
        assert!(drain(rx).contains(&ProgressEvent::Output {
            stream: OutputStream::Stdout,
            line: "hello from sub".into()
        }));
    }

    #[tokio::test]
    async fn test_cancel_kills_child() {
        let engine = local(std::env::temp_dir());
        let (ctx, cancel) = Context::background().with_cancel();
        let (sink, _rx) = EventSink::new();
        let spec = ExecSpec {
            run: "sleep 30".into(),
            ..Default::default()
        };

        let started = Instant::now();
        let build = engine.build(&ctx, request(spec), &sink);
        let cancel_later = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(build, cancel_later);

        assert_eq!(result.unwrap_err(), EngineError::Canceled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_reaches_forked_subshells() {
        let root = tempfile::tempdir().unwrap();
        let engine = local(root.path().to_path_buf());
        let (ctx, cancel) = Context::background().with_cancel();
        let (sink, _rx) = EventSink::new();
        let spec = ExecSpec {
            run: "(sleep 1; touch marker); echo done".into(),
            ..Default::default()
        };

        let build = engine.build(&ctx, request(spec), &sink);
        let cancel_later = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(build, cancel_later);
        assert_eq!(result.unwrap_err(), EngineError::Canceled);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!root.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_background_job_does_not_hold_the_build() {
        let engine = local(std::env::temp_dir());
        let (sink, rx) = EventSink::new();
        let spec = ExecSpec {
            run: "sleep 30 & echo started".into(),
            ..Default::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            engine.build(&Context::background(), request(spec), &sink),
        )
        .await
        .expect("build should return once the shell exits");
        assert_eq!(result.unwrap().exit_code, 0);
        assert!(drain(rx).contains(&ProgressEvent::Output {
            stream: OutputStream::Stdout,
            line: "started".into()
        }));
    }

    #[tokio::test]
    async fn test_canceled_context_never_spawns() {
        let root = tempfile::tempdir().unwrap();
        let engine = local(root.path().to_path_buf());
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let (sink, rx) = EventSink::new();
        let spec = ExecSpec {
            run: "touch spawned".into(),
            ..Default::default()
        };

        let err = engine.build(&ctx, request(spec), &sink).await.unwrap_err();
        assert_eq!(err, EngineError::Canceled);
        assert!(drain(rx).is_empty());
        assert!(!root.path().join("spawned").exists());
    }

    #[tokio::test]
    async fn test_bad_request_is_a_spawn_error() {
        let engine = local(std::env::temp_dir());
        let (sink, _rx) = EventSink::new();
        let bad = BuildRequest {
            target: "t".into(),
            spec: serde_json::json!({ "image": "alpine" }),
        };

        let err = engine.build(&Context::background(), bad, &sink).await.unwrap_err();
        assert_eq!(err.as_label(), "engine_spawn");
    }

    #[test]
    fn test_docker_command_line() {
        let engine = ProcessEngine::new(
            Endpoint::Docker {
                host: Some("tcp://dockerd:2375".into()),
            },
            PathBuf::from("/work"),
        );
        let spec = ExecSpec {
            run: "go vet ./...".into(),
            image: Some("golang:1.22".into()),
            workdir: Some("cmd".into()),
            env: BTreeMap::from([("CGO_ENABLED".to_string(), "0".to_string())]),
            force_pull: true,
        };

        let cmd = engine.command(&spec, Some("fanbuild-1-0"));
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.as_std().get_program(), "docker");
        assert_eq!(
            args,
            vec![
                "-H", "tcp://dockerd:2375", "run", "--rm", "--name", "fanbuild-1-0", "-v",
                "/work:/src:ro", "-w", "/src/cmd", "-e", "CGO_ENABLED=0", "--pull", "always",
                "golang:1.22", "sh", "-c", "go vet ./...",
            ]
        );
    }
}
