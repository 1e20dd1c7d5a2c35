//! Obtaining a byte-stream connection to the tool server.
//!
//! The client never spawns processes itself; it asks a [`Launcher`] for a
//! [`Connection`]. Production uses [`ProcessLauncher`]; tests hand in one end
//! of an in-memory pipe through [`PreparedLauncher`].

use overlay_config::LaunchCommand;
use overlay_core::error::RpcError;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// The two directions of a tool server connection, plus the process behind
/// them when there is one.
pub struct Connection {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub child: Option<Child>,
}

impl Connection {
    /// A connection with no process behind it.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Produces a fresh connection each time the client starts.
pub trait Launcher: Send + Sync {
    fn launch(&self) -> Result<Connection, RpcError>;
}

/// Spawns the tool server as a child process speaking over stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: LaunchCommand,
}

impl ProcessLauncher {
    pub fn new(command: LaunchCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &LaunchCommand {
        &self.command
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self) -> Result<Connection, RpcError> {
        let program = &self.command.program;
        let mut child = Command::new(program)
            .args(&self.command.args)
            .envs(&self.command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RpcError::Startup(format!("failed to spawn {}: {e}", program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RpcError::Startup("tool server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RpcError::Startup("tool server stdout unavailable".into()))?;

        // Server diagnostics go to our log instead of the terminal
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "overlay_mcp::server", "{line}");
                }
            });
        }

        info!(
            program = %program.display(),
            pid = child.id(),
            "Spawned tool server"
        );

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }
}

/// Hands out one pre-built connection, then refuses.
///
/// For in-process servers such as test doubles.
pub struct PreparedLauncher {
    connection: Mutex<Option<Connection>>,
}

impl PreparedLauncher {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
        }
    }
}

impl Launcher for PreparedLauncher {
    fn launch(&self) -> Result<Connection, RpcError> {
        self.connection
            .lock()
            .map_err(|_| RpcError::Startup("launcher lock poisoned".into()))?
            .take()
            .ok_or_else(|| RpcError::Startup("connection already used".into()))
    }
}
