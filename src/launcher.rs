//! Spawns the browser child process and wires up whichever transport the
//! configuration asked for.
//!
//! Locating the executable and building the flag list are delegated to
//! [`crate::platform`] and [`crate::config`]; this module's only job is the
//! process/transport plumbing: create the pipe pair (or ask for a debugger
//! port), spawn, and hand back a ready [`Transport`] plus the child handle.

use std::path::PathBuf;
use std::time::Duration;

use futures::io::BufReader;
use futures::{AsyncBufReadExt, StreamExt};

use crate::config::{OutputDir, SessionConfig, TransportKind, UserDataDir};
use crate::error::{CdpError, Result};
use crate::platform;
use crate::process::{Child, Command, Stdio};
use crate::transport::pipe::PipeTransport;
use crate::transport::websocket::{parse_debugger_url, WebSocketTransport};
use crate::transport::Transport;

/// How long to scan the child's stderr for the `DevTools listening on`
/// line before giving up on a WebSocket launch.
const DEBUGGER_URL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Launched {
    pub child: Child,
    pub transport: Box<dyn Transport>,
    /// Kept alive so the directory isn't removed while the browser still
    /// has it open; `None` when the caller supplied their own path.
    pub user_data_dir: Option<tempfile::TempDir>,
    pub output_dir: Option<tempfile::TempDir>,
    pub executable: PathBuf,
}

pub async fn launch(config: &SessionConfig) -> Result<Launched> {
    let executable = config
        .executable
        .clone()
        .or_else(platform::locate_browser)
        .ok_or_else(|| {
            CdpError::Launch("no Chrome/Chromium executable found on this system".into())
        })?;

    let (user_data_dir, user_data_path) = match &config.user_data_dir {
        UserDataDir::Path(path) => {
            std::fs::create_dir_all(path).map_err(|e| CdpError::Launch(e.to_string()))?;
            (None, path.clone())
        }
        UserDataDir::Auto => {
            let dir = tempfile::Builder::new()
                .prefix("devtoxide-profile-")
                .tempdir()
                .map_err(|e| CdpError::Launch(e.to_string()))?;
            let path = dir.path().to_path_buf();
            (Some(dir), path)
        }
    };

    let (output_dir, output_path) = match &config.output_dir {
        OutputDir::Path(path) => {
            std::fs::create_dir_all(path).map_err(|e| CdpError::Launch(e.to_string()))?;
            (None, path.clone())
        }
        OutputDir::Auto => {
            let dir = tempfile::Builder::new()
                .prefix("devtoxide-output-")
                .tempdir()
                .map_err(|e| CdpError::Launch(e.to_string()))?;
            let path = dir.path().to_path_buf();
            (Some(dir), path)
        }
    };

    tracing::debug!(output_dir = %output_path.display(), "resolved output directory");

    let mut flags = config.resolve_flags();
    flags.retain(|f| f != "--remote-debugging-pipe");
    match config.transport {
        TransportKind::Pipe => flags.push("--remote-debugging-pipe".to_string()),
        TransportKind::WebSocket => flags.push("--remote-debugging-port=0".to_string()),
    }
    flags.push(format!("--user-data-dir={}", user_data_path.display()));

    tracing::info!(executable = %executable.display(), ?flags, "launching browser");

    let (child, transport) = match config.transport {
        TransportKind::Pipe => launch_with_pipe(&executable, &flags, config).await?,
        TransportKind::WebSocket => launch_with_websocket(&executable, &flags, config).await?,
    };

    Ok(Launched {
        child,
        transport,
        user_data_dir,
        output_dir,
        executable,
    })
}

#[cfg(unix)]
async fn launch_with_pipe(
    executable: &std::path::Path,
    flags: &[String],
    config: &SessionConfig,
) -> Result<(Child, Box<dyn Transport>)> {
    use std::os::unix::io::FromRawFd;

    let pair =
        crate::transport::pipe::create_pipe_pair().map_err(|e| CdpError::Launch(e.to_string()))?;

    let mut cmd = Command::new(executable);
    cmd.args(flags)
        .envs(config.process_envs.clone())
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .inherit_pipe_fds(pair.child_read_fd, pair.child_write_fd);

    let spawn_result = cmd.spawn();

    // The parent's copies of the child-side fds must be closed regardless
    // of whether spawn succeeded: otherwise this process keeps the write
    // end of the response pipe open forever, and `recv()` never sees EOF
    // even after the browser exits.
    unsafe {
        drop(std::fs::File::from_raw_fd(pair.child_read_fd));
        drop(std::fs::File::from_raw_fd(pair.child_write_fd));
    }

    let child = spawn_result.map_err(|e| CdpError::Launch(e.to_string()))?;
    let transport = PipeTransport::new(pair);
    Ok((child, Box::new(transport)))
}

#[cfg(not(unix))]
async fn launch_with_pipe(
    _executable: &std::path::Path,
    _flags: &[String],
    _config: &SessionConfig,
) -> Result<(Child, Box<dyn Transport>)> {
    Err(CdpError::Launch(
        "pipe transport is only supported on unix; use TransportKind::WebSocket".into(),
    ))
}

async fn launch_with_websocket(
    executable: &std::path::Path,
    flags: &[String],
    config: &SessionConfig,
) -> Result<(Child, Box<dyn Transport>)> {
    let mut cmd = Command::new(executable);
    cmd.args(flags)
        .envs(config.process_envs.clone())
        .stdin(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| CdpError::Launch(e.to_string()))?;

    match connect_over_websocket(&mut child).await {
        Ok(transport) => Ok((child, transport)),
        Err(err) => {
            let _ = child.kill().await;
            Err(err)
        }
    }
}

/// Everything that can fail after the child is already running: finding the
/// debugger url on its stderr and connecting the WebSocket to it. Kept
/// separate so every failure here funnels through the single `kill()` call
/// in [`launch_with_websocket`] instead of needing one at each call site.
async fn connect_over_websocket(child: &mut Child) -> Result<Box<dyn Transport>> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CdpError::Launch("child stderr was not captured".into()))?;

    let find_url = async {
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next().await {
            let line = line.map_err(CdpError::Io)?;
            tracing::trace!(%line, "chrome stderr");
            if let Some(url) = parse_debugger_url(&line) {
                return Ok(url);
            }
        }
        Err(CdpError::Launch(
            "browser exited before printing a debugger url".into(),
        ))
    };

    let debugger_url = match futures::future::select(
        Box::pin(find_url),
        futures_timer::Delay::new(DEBUGGER_URL_TIMEOUT),
    )
    .await
    {
        futures::future::Either::Left((result, _)) => result?,
        futures::future::Either::Right(_) => {
            return Err(CdpError::Launch(format!(
                "timed out after {DEBUGGER_URL_TIMEOUT:?} waiting for the debugger url"
            )));
        }
    };

    url::Url::parse(&debugger_url)
        .map_err(|e| CdpError::Launch(format!("malformed debugger url {debugger_url:?}: {e}")))?;
    let transport = WebSocketTransport::connect(&debugger_url).await?;
    Ok(Box::new(transport))
}
