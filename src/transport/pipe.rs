//! OS-pipe transport: writes on the child's fd 3, reads on fd 4, NUL-framed.
//!
//! Parent-side pipe ends are plain blocking `std::fs::File`s, so a dedicated
//! OS thread each drives the blocking read loop and the blocking write path,
//! bridging into async code through channels. That keeps the runtime-specific
//! bits out of the hot path entirely - the pipe transport is the same under
//! `async-std` or `tokio`.

use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;

use futures::channel::{mpsc, oneshot};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};

use crate::error::CdpError;
use crate::transport::{InboundFrame, Transport, TransportReader, TransportWriter};

/// Parent-side handles to the two pipe pairs used for `--remote-debugging-pipe`.
///
/// `child_read_fd`/`child_write_fd` are raw fds meant to be `dup2`'d onto the
/// child's fd 3/4 in a `pre_exec` hook before the pipes are handed off.
#[cfg(unix)]
pub struct PipePair {
    pub parent_writer: os_pipe::PipeWriter,
    pub parent_reader: os_pipe::PipeReader,
    pub child_read_fd: std::os::unix::io::RawFd,
    pub child_write_fd: std::os::unix::io::RawFd,
}

/// Creates the command pipe (parent -> child, child reads fd 3) and the
/// response pipe (child -> parent, child writes fd 4).
#[cfg(unix)]
pub fn create_pipe_pair() -> std::io::Result<PipePair> {
    use std::os::unix::io::IntoRawFd;

    let (cmd_reader, cmd_writer) = os_pipe::pipe()?;
    let (resp_reader, resp_writer) = os_pipe::pipe()?;

    Ok(PipePair {
        parent_writer: cmd_writer,
        parent_reader: resp_reader,
        child_read_fd: cmd_reader.into_raw_fd(),
        child_write_fd: resp_writer.into_raw_fd(),
    })
}

type WriteRequest = (Vec<u8>, oneshot::Sender<Result<(), CdpError>>);

/// The pipe transport: a reader thread producing NUL-delimited frames onto
/// an async channel, and a writer thread draining a request queue in order.
/// `split` hands the two channel ends to independent halves so a pending
/// read never blocks a write.
pub struct PipeTransport {
    reader: PipeTransportReader,
    writer: PipeTransportWriter,
}

pub struct PipeTransportReader {
    frames: mpsc::UnboundedReceiver<InboundFrame>,
    _reader_thread: std::thread::JoinHandle<()>,
}

pub struct PipeTransportWriter {
    writes: std_mpsc::Sender<WriteRequest>,
    closed: bool,
    _writer_thread: std::thread::JoinHandle<()>,
}

impl PipeTransport {
    #[cfg(unix)]
    pub fn new(pair: PipePair) -> Self {
        use std::os::unix::io::IntoRawFd;

        let writer_fd = pair.parent_writer.into_raw_fd();
        let reader_fd = pair.parent_reader.into_raw_fd();
        // SAFETY: fds are freshly created and owned exclusively by us here.
        let writer_file = unsafe { std::fs::File::from_raw_fd(writer_fd) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(reader_fd) };

        Self::from_files(reader_file, writer_file)
    }

    fn from_files(mut reader: std::fs::File, mut writer: std::fs::File) -> Self {
        let (frame_tx, frame_rx) = mpsc::unbounded();
        let reader_thread = std::thread::spawn(move || {
            let mut buf = Vec::with_capacity(4096);
            let mut byte = [0u8; 1];
            loop {
                match reader.read(&mut byte) {
                    Ok(0) => break,
                    Ok(_) => {
                        if byte[0] == 0 {
                            if frame_tx.unbounded_send(std::mem::take(&mut buf)).is_err() {
                                break;
                            }
                        } else {
                            buf.push(byte[0]);
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            tracing::debug!("pipe reader thread exiting, peer closed fd 4");
        });

        let (write_tx, write_rx) = std_mpsc::channel::<WriteRequest>();
        let writer_thread = std::thread::spawn(move || {
            for (mut bytes, ack) in write_rx {
                bytes.push(0);
                let result = writer
                    .write_all(&bytes)
                    .and_then(|_| writer.flush())
                    .map_err(CdpError::Io);
                let _ = ack.send(result);
            }
        });

        Self {
            reader: PipeTransportReader {
                frames: frame_rx,
                _reader_thread: reader_thread,
            },
            writer: PipeTransportWriter {
                writes: write_tx,
                closed: false,
                _writer_thread: writer_thread,
            },
        }
    }
}

impl Transport for PipeTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportWriter>, Box<dyn TransportReader>) {
        (Box::new(self.writer), Box::new(self.reader))
    }
}

impl TransportWriter for PipeTransportWriter {
    fn write(&mut self, frame: Vec<u8>) -> BoxFuture<'_, Result<(), CdpError>> {
        async move {
            if self.closed {
                return Err(CdpError::TransportClosed);
            }
            let (tx, rx) = oneshot::channel();
            if self.writes.send((frame, tx)).is_err() {
                self.closed = true;
                return Err(CdpError::TransportClosed);
            }
            match rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => {
                    self.closed = true;
                    Err(CdpError::TransportClosed)
                }
                Err(_) => {
                    self.closed = true;
                    Err(CdpError::TransportClosed)
                }
            }
        }
        .boxed()
    }
}

impl TransportReader for PipeTransportReader {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<InboundFrame>, CdpError>> {
        async move { Ok(self.frames.next().await) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn frames_split_on_nul_terminator() {
        let (mock_chrome_reader, parent_writer) = os_pipe::pipe().unwrap();
        let (parent_reader, mock_chrome_writer) = os_pipe::pipe().unwrap();
        drop(mock_chrome_reader);

        let mut transport = PipeTransport::from_files(parent_reader, parent_writer).reader;

        let handle = std::thread::spawn(move || {
            let mut w = mock_chrome_writer;
            w.write_all(br#"{"id":1,"result":{}}"#).unwrap();
            w.write_all(&[0]).unwrap();
            w.write_all(br#"{"method":"Page.loadEventFired","params":{}}"#)
                .unwrap();
            w.write_all(&[0]).unwrap();
            w.flush().unwrap();
        });

        let first = block_on(transport.recv()).unwrap().unwrap();
        assert_eq!(first, br#"{"id":1,"result":{}}"#);
        let second = block_on(transport.recv()).unwrap().unwrap();
        assert_eq!(second, br#"{"method":"Page.loadEventFired","params":{}}"#);

        handle.join().unwrap();
    }

    #[test]
    fn recv_yields_none_once_peer_closes() {
        let (mock_chrome_reader, parent_writer) = os_pipe::pipe().unwrap();
        let (parent_reader, mock_chrome_writer) = os_pipe::pipe().unwrap();
        drop(mock_chrome_reader);
        drop(mock_chrome_writer);

        let mut transport = PipeTransport::from_files(parent_reader, parent_writer).reader;
        assert!(block_on(transport.recv()).unwrap().is_none());
    }
}
