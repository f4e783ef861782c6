//! The public entry point: launches (or attaches to) a browser and composes
//! the supervisor, transport, dispatcher, and root session into one handle.

use std::path::PathBuf;

use futures::FutureExt;

use crate::config::SessionConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::launcher;
use crate::process::Child;
use crate::session::Session;
use crate::transport::websocket::WebSocketTransport;

/// A running (or attached-to) browser: the root [`Session`] plus whatever
/// process/tempdir state needs to outlive it.
pub struct Browser {
    session: Session,
    user_data_dir: Option<tempfile::TempDir>,
    output_dir: Option<tempfile::TempDir>,
    executable: Option<PathBuf>,
}

impl Browser {
    /// Spawns a new browser process per `config` and connects to it.
    pub async fn launch(config: SessionConfig) -> Result<Self> {
        let launched = launcher::launch(&config).await?;
        let dispatcher = Dispatcher::spawn(launched.transport, config.subscription_queue_cap);
        let session = Session::root(dispatcher.clone(), config.close_grace);

        // The watcher task owns the child from here on: it kills the process
        // if the dispatcher closes before the process exits on its own (a
        // graceful `close()`, or a session `cancel()`), and force-closes the
        // dispatcher once the process exits, which is a no-op if `close()`
        // already tore things down gracefully.
        spawn_process_exit_watcher(launched.child, dispatcher.clone());
        Ok(Browser {
            session,
            user_data_dir: launched.user_data_dir,
            output_dir: launched.output_dir,
            executable: Some(launched.executable),
        })
    }

    /// Attaches to an already-running browser over its debugger WebSocket,
    /// without spawning or owning a child process.
    pub async fn connect(debugger_ws_url: &str) -> Result<Self> {
        url::Url::parse(debugger_ws_url).map_err(|e| {
            crate::error::CdpError::Launch(format!("malformed debugger url {debugger_ws_url:?}: {e}"))
        })?;
        let transport = WebSocketTransport::connect(debugger_ws_url).await?;
        let dispatcher = Dispatcher::spawn(Box::new(transport), SessionConfig::default().subscription_queue_cap);
        let session = Session::root(dispatcher, SessionConfig::default().close_grace);
        Ok(Browser {
            session,
            user_data_dir: None,
            output_dir: None,
            executable: None,
        })
    }

    /// The path to the executable that was launched, if this handle owns a
    /// process (`None` for a handle obtained via [`Self::connect`]).
    pub fn executable(&self) -> Option<&PathBuf> {
        self.executable.as_ref()
    }

    /// The root session: every command/event/child-session operation goes
    /// through this (or a session spawned from it).
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// A new session scoped to `session_id`, cancelled whenever this browser's
    /// root session is.
    pub fn new_session(&self, session_id: impl Into<String>) -> Session {
        self.session.new_child(session_id)
    }

    /// Best-effort `Browser.close`, grace period, then full teardown. The
    /// owned process's exit is observed by the watcher task spawned in
    /// [`Self::launch`], which then force-closes the dispatcher if it
    /// somehow outlived the session close.
    pub async fn close(&mut self) -> Result<()> {
        self.session.close().await
    }

    /// Blocks until the underlying connection (and, for an owned process,
    /// the process itself) has fully shut down.
    pub async fn wait(&self) {
        self.session.wait().await;
    }
}

/// Owns the child process for its whole lifetime: races its natural exit
/// against the dispatcher reaching `Closed` (a graceful `close()`, or a
/// session cancellation force-closing it). Whichever loses the race still
/// needs handling - if the dispatcher closed first, the process is still
/// running and gets killed; if the process exited first, the dispatcher is
/// force-closed as a safety net in case that wasn't already in progress.
fn spawn_process_exit_watcher(mut child: Child, dispatcher: Dispatcher) {
    crate::process::spawn(async move {
        let mut needs_kill = false;
        {
            let exited = child.wait().fuse();
            futures::pin_mut!(exited);
            let closed = dispatcher.wait_closed().fuse();
            futures::pin_mut!(closed);

            futures::select! {
                status = exited => match status {
                    Ok(status) => tracing::info!(?status, "browser process exited"),
                    Err(err) => tracing::warn!(error = %err, "failed to wait on browser process"),
                },
                _ = closed => needs_kill = true,
            }
        }

        if needs_kill {
            tracing::debug!("session torn down before the browser process exited, killing it");
            if let Err(err) = child.kill().await {
                tracing::warn!(error = %err, "failed to kill browser process");
            }
        }
        dispatcher.force_close();
    });
}
