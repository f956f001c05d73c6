use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use crate::error::ProbeError;

/// A cluster node reachable over the remote execution channel.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
}

impl RemoteTarget {
    pub fn new(host: &str, user: &str) -> Self {
        RemoteTarget {
            host: host.to_string(),
            user: user.to_string(),
        }
    }

    fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// One open connection to a remote node. Callers own the lifecycle: obtain
/// it from a [`ChannelProvider`], use it, and release it with `close`
/// exactly once on every exit path.
#[async_trait]
pub trait RemoteChannel: Send {
    async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), ProbeError>;

    async fn run(&mut self, command: &str) -> Result<CommandOutput, ProbeError>;

    /// Release the connection. Best effort, never fails the workflow.
    async fn close(&mut self);
}

#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteChannel>, ProbeError>;
}

static SSH_OPTS: &[&str] = &[
    "-o",
    "BatchMode=yes",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "StrictHostKeyChecking=accept-new",
];

/// Channel provider backed by OpenSSH connection multiplexing: `connect`
/// establishes a control master, every operation rides the control socket
/// and `close` tears the master down.
pub struct SshProvider;

pub struct SshChannel {
    host: String,
    login: String,
    socket: String,
    closed: bool,
}

#[async_trait]
impl ChannelProvider for SshProvider {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteChannel>, ProbeError> {
        let socket = format!("/tmp/pvc-probe-{}.sock", Uuid::new_v4());
        let login = target.login();
        let status = Command::new("ssh")
            .args(SSH_OPTS)
            .args(["-M", "-S", &socket, "-fN", &login])
            .status()
            .await
            .map_err(|err| ProbeError::Connection {
                host: target.host.clone(),
                detail: err.to_string(),
            })?;
        if !status.success() {
            return Err(ProbeError::Connection {
                host: target.host.clone(),
                detail: format!("control master setup exited with {}", status),
            });
        }
        debug!("control master for {} listening on {}", login, socket);
        Ok(Box::new(SshChannel {
            host: target.host.clone(),
            login,
            socket,
            closed: false,
        }))
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    async fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), ProbeError> {
        let command = format!("cat > {}", shell_quote(path));
        let mut child = Command::new("ssh")
            .args(["-S", &self.socket, &self.login, &command])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| ProbeError::Connection {
            host: self.host.clone(),
            detail: "remote write stream unavailable".to_string(),
        })?;
        stdin.write_all(data).await?;
        // close the stream so the remote cat observes EOF
        drop(stdin);
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ProbeError::Command {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn run(&mut self, command: &str) -> Result<CommandOutput, ProbeError> {
        let output = Command::new("ssh")
            .args(["-S", &self.socket, &self.login, command])
            .output()
            .await?;
        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let result = Command::new("ssh")
            .args(["-S", &self.socket, "-O", "exit", &self.login])
            .output()
            .await;
        if let Err(err) = result {
            warn!("failed to tear down control socket for {}: {}", self.host, err);
        }
    }
}

fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}
