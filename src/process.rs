//! Internal async child-process abstraction for `async-std` or `tokio`.
//!
//! The session supervisor needs to spawn, poll, kill, and read the stderr of
//! the browser child regardless of which executor the caller selected via
//! cargo feature, so the divergent bits are behind `cfg_if!` here and nowhere
//! else.

use std::ffi::OsStr;
use std::pin::Pin;
pub use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};

cfg_if::cfg_if! {
    if #[cfg(feature = "async-std-runtime")] {
        use ::async_std::process;
    } else if #[cfg(feature = "tokio-runtime")] {
        use ::tokio::process;
    }
}

#[derive(Debug)]
pub struct Command {
    inner: process::Command,
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            inner: process::Command::new(program),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.inner.args(args);
        self
    }

    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.inner.envs(vars);
        self
    }

    pub fn stdin<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.inner.stdin(cfg);
        self
    }

    pub fn stderr<T: Into<Stdio>>(&mut self, cfg: T) -> &mut Self {
        self.inner.stderr(cfg);
        self
    }

    /// Wires up the raw fds the browser's pipe transport expects on 3 and 4.
    ///
    /// On Unix this is a `pre_exec` hook that `dup2`s the given fds into
    /// place; `fd3`/`fd4` are consumed (their `Drop` would otherwise close
    /// them before the child inherits them).
    #[cfg(unix)]
    pub fn inherit_pipe_fds(
        &mut self,
        fd3: std::os::unix::io::RawFd,
        fd4: std::os::unix::io::RawFd,
    ) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: `pre_exec` runs after fork, before exec, in the child only;
        // `dup2` here only touches fds already owned by that child.
        unsafe {
            self.inner.pre_exec(move || {
                if libc::dup2(fd3, 3) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::dup2(fd4, 4) < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }

    pub fn spawn(&mut self) -> std::io::Result<Child> {
        let inner = self.inner.spawn()?;
        Ok(Child::new(inner))
    }
}

#[derive(Debug)]
pub struct Child {
    pub stderr: Option<ChildStderr>,
    pub inner: process::Child,
}

/// Wrapper for an async child process.
///
/// The inner implementation depends on the selected async runtime (features
/// `async-std-runtime` or `tokio-runtime`).
impl Child {
    fn new(mut inner: process::Child) -> Self {
        let stderr = inner.stderr.take();
        Self {
            inner,
            stderr: stderr.map(|inner| ChildStderr { inner }),
        }
    }

    /// Kill the child process, asynchronously if possible.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                self.inner.kill()
            } else if #[cfg(feature = "tokio-runtime")] {
                self.inner.kill().await
            }
        }
    }

    /// Asynchronously wait for the child process to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                self.inner.status().await
            } else if #[cfg(feature = "tokio-runtime")] {
                self.inner.wait().await
            }
        }
    }

    /// If the child process has exited, get its status (non-blocking).
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                self.inner.try_status()
            } else if #[cfg(feature = "tokio-runtime")] {
                self.inner.try_wait()
            }
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id()
    }
}

#[derive(Debug)]
pub struct ChildStderr {
    pub inner: process::ChildStderr,
}

impl futures::AsyncRead for ChildStderr {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        cfg_if::cfg_if! {
            if #[cfg(feature = "async-std-runtime")] {
                Pin::new(&mut self.inner).poll_read(cx, buf)
            } else if #[cfg(feature = "tokio-runtime")] {
                let mut buf = tokio::io::ReadBuf::new(buf);
                futures::ready!(tokio::io::AsyncRead::poll_read(
                    Pin::new(&mut self.inner),
                    cx,
                    &mut buf
                ))?;
                Poll::Ready(Ok(buf.filled().len()))
            }
        }
    }
}

/// Spawns a future on whichever runtime is active.
pub fn spawn<F>(fut: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    cfg_if::cfg_if! {
        if #[cfg(feature = "async-std-runtime")] {
            async_std::task::spawn(fut);
        } else if #[cfg(feature = "tokio-runtime")] {
            tokio::spawn(fut);
        }
    }
}
