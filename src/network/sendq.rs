//! Fixed-capacity asynchronous send queue.
//!
//! A `SendQueue` buffers outbound bytes for exactly one sink and drains
//! them from a background task, so producers never block on a slow
//! peer. Writes always succeed synchronously; overflow and sink
//! failures are fatal and reported once through the error channel,
//! after which the queue silently discards everything.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::SendQueueError;

/// The sink type a queue drains into.
pub type SendSink = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug)]
struct QueueState {
    buf: BytesMut,
    capacity: usize,
    /// All writing suspended; terminal.
    shutdown: bool,
    /// Drain the buffer, then close the sink and stop.
    flush_and_close: bool,
    /// Present until the single fatal error has been reported.
    err_tx: Option<mpsc::Sender<SendQueueError>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    /// Signals the drainer that bytes (or a state change) are waiting.
    data_available: Notify,
    /// Aborts an in-flight sink write on immediate shutdown.
    aborted: Notify,
}

/// Handle to a fixed-capacity send queue. Cheap to clone; all clones
/// feed the same buffer and drainer.
#[derive(Debug, Clone)]
pub struct SendQueue {
    shared: Arc<Shared>,
}

impl SendQueue {
    /// Create a queue draining into `sink` and spawn its drainer task.
    /// Returns the queue and the error stream: at most one fatal error
    /// is ever delivered, after which the stream ends.
    pub fn new(sink: SendSink, capacity: usize) -> (Self, mpsc::Receiver<SendQueueError>) {
        let (err_tx, err_rx) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                buf: BytesMut::with_capacity(capacity.min(64 * 1024)),
                capacity,
                shutdown: false,
                flush_and_close: false,
                err_tx: Some(err_tx),
            }),
            data_available: Notify::new(),
            aborted: Notify::new(),
        });

        tokio::spawn(drain_loop(Arc::clone(&shared), sink));

        (Self { shared }, err_rx)
    }

    /// Queue bytes for sending. Always reports success: if the queue is
    /// shut down the bytes are silently dropped, and on overflow the
    /// bytes are dropped and the fatal error surfaces asynchronously.
    pub fn write(&self, bytes: &[u8]) {
        let mut state = self.shared.state.lock().expect("send queue poisoned");

        if state.shutdown || state.flush_and_close {
            return;
        }

        if state.buf.len() + bytes.len() > state.capacity {
            flag_error(&mut state, SendQueueError::Overflow);
            self.shared.data_available.notify_one();
            self.shared.aborted.notify_one();
            return;
        }

        state.buf.extend_from_slice(bytes);
        self.shared.data_available.notify_one();
    }

    /// Mark the queue for drain: the drainer empties the buffer, closes
    /// the sink and exits. Further writes are dropped.
    pub fn flush_and_close(&self) {
        let mut state = self.shared.state.lock().expect("send queue poisoned");
        state.flush_and_close = true;
        drop(state);
        self.shared.data_available.notify_one();
    }

    /// Immediate shutdown: unsent bytes are dropped and the sink is
    /// closed, aborting any write in flight.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().expect("send queue poisoned");
        state.shutdown = true;
        drop(state);
        self.shared.data_available.notify_one();
        self.shared.aborted.notify_one();
    }
}

/// Report the single fatal error and shut the queue down. The queue
/// can only error once; the second caller finds `shutdown` already set
/// and never reaches this.
fn flag_error(state: &mut QueueState, err: SendQueueError) {
    debug_assert!(!state.shutdown, "error raised on a send queue that is already shut down");
    state.shutdown = true;
    if let Some(err_tx) = state.err_tx.take() {
        // Capacity one and a single producer: this cannot fail full.
        let _ = err_tx.try_send(err);
    }
}

enum Step {
    Exit,
    FlushDone,
    Write(Bytes),
    Wait,
}

async fn drain_loop(shared: Arc<Shared>, mut sink: SendSink) {
    loop {
        let step = {
            let mut state = shared.state.lock().expect("send queue poisoned");
            if state.shutdown {
                Step::Exit
            } else if !state.buf.is_empty() {
                Step::Write(state.buf.split().freeze())
            } else if state.flush_and_close {
                state.shutdown = true;
                Step::FlushDone
            } else {
                Step::Wait
            }
        };

        match step {
            Step::Exit | Step::FlushDone => {
                let _ = sink.shutdown().await;
                return;
            }
            Step::Wait => {
                shared.data_available.notified().await;
            }
            Step::Write(chunk) => {
                tokio::select! {
                    result = write_chunk(&mut sink, &chunk) => {
                        if let Err(err) = result {
                            trace!(error = %err, "send queue sink error");
                            {
                                let mut state =
                                    shared.state.lock().expect("send queue poisoned");
                                if !state.shutdown {
                                    flag_error(&mut state, SendQueueError::Io(err));
                                }
                            }
                            let _ = sink.shutdown().await;
                            return;
                        }
                    }
                    _ = shared.aborted.notified() => {
                        let _ = sink.shutdown().await;
                        return;
                    }
                }
            }
        }
    }
}

async fn write_chunk(sink: &mut SendSink, chunk: &[u8]) -> std::io::Result<()> {
    sink.write_all(chunk).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn startup_and_shutdown() {
        let (near, mut far) = tokio::io::duplex(64);
        let (sq, _err_rx) = SendQueue::new(Box::new(near), 100);
        sq.close();

        let mut buf = Vec::new();
        far.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn buffers_and_delivers_writes() {
        let (near, mut far) = tokio::io::duplex(64);
        let (sq, _err_rx) = SendQueue::new(Box::new(near), 100);
        sq.write(b"hello ");
        sq.write(b"world");
        sq.flush_and_close();

        let mut buf = Vec::new();
        far.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn overflow_reports_one_error_then_closes_stream() {
        let (near, _far) = tokio::io::duplex(64);
        let (sq, mut err_rx) = SendQueue::new(Box::new(near), 10);
        sq.write(b"hello world!");

        assert!(matches!(err_rx.recv().await, Some(SendQueueError::Overflow)));
        assert!(err_rx.recv().await.is_none());

        // The queue is terminal: further writes are dropped silently.
        sq.write(b"more");
    }

    #[tokio::test]
    async fn sink_failure_surfaces_asynchronously() {
        let (near, far) = tokio::io::duplex(64);
        drop(far);
        let (sq, mut err_rx) = SendQueue::new(Box::new(near), 100);
        sq.write(b"hi");

        assert!(matches!(err_rx.recv().await, Some(SendQueueError::Io(_))));
    }

    #[tokio::test]
    async fn writes_after_flush_are_dropped() {
        let (near, mut far) = tokio::io::duplex(64);
        let (sq, _err_rx) = SendQueue::new(Box::new(near), 100);
        sq.write(b"kept");
        sq.flush_and_close();
        sq.write(b" dropped");

        let mut buf = Vec::new();
        far.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"kept");
    }
}
