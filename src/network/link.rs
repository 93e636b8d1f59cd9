//! One bidirectional peer connection.
//!
//! A link owns a framed reader, a send-queue-backed writer and two
//! worker tasks. The read loop decodes one message at a time and pushes
//! it into an internal transfer channel until an error ends it; the
//! control loop forwards transfer items to the node's inbound channel,
//! interleaved with send-queue error delivery and exit handling. Every
//! inbound item — decoded message, decode error, send-queue error —
//! reaches the node as a single [`LinkEvent`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::BytesMut;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{Encoder, FramedRead};
use tracing::trace;

use crate::error::{LinkError, WireError};
use crate::network::sendq::{SendQueue, SendSink};
use crate::network::LinkId;
use crate::wire::{WireCodec, WireMessage};

/// The reader type a link consumes.
pub type LinkSource = Box<dyn AsyncRead + Send + Unpin>;

/// One item from a link: a decoded message or a fatal error. After an
/// error the link is dead from the node's perspective and must be
/// removed.
#[derive(Debug)]
pub struct LinkEvent {
    pub link: LinkId,
    pub msg: Option<WireMessage>,
    pub err: Option<LinkError>,
}

/// A transport endpoint toward one directly-connected peer.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    name: Mutex<String>,
    sendq: SendQueue,
    exit: watch::Sender<bool>,
    /// Guarantees the exit signal fires once.
    closed: AtomicBool,
    /// Once set by the node, further events from this link are dropped
    /// by the event loop; in-flight traffic from a split peer must not
    /// be processed.
    silence: AtomicBool,
}

impl Link {
    /// Adopt a byte-stream pair and spawn the read and control loops.
    /// Everything the link produces is delivered to `inbound`.
    pub fn spawn(
        id: LinkId,
        reader: LinkSource,
        writer: SendSink,
        send_capacity: usize,
        inbound: mpsc::Sender<LinkEvent>,
    ) -> std::sync::Arc<Self> {
        let (sendq, sq_errors) = SendQueue::new(writer, send_capacity);
        let (exit, exit_rx) = watch::channel(false);
        let (transfer_tx, transfer_rx) = mpsc::channel(1);

        tokio::spawn(read_loop(id, reader, exit_rx.clone(), transfer_tx));
        tokio::spawn(control_loop(id, exit_rx, transfer_rx, sq_errors, inbound));

        std::sync::Arc::new(Self {
            id,
            name: Mutex::new("unnamed".to_string()),
            sendq,
            exit,
            closed: AtomicBool::new(false),
            silence: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Identifier used in diagnostics.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().expect("link name poisoned") = name.into();
    }

    pub fn name(&self) -> String {
        self.name.lock().expect("link name poisoned").clone()
    }

    /// Synchronously frame and enqueue one message. Errors are
    /// codec-level only; queue overflow surfaces later through the
    /// link's event stream.
    pub fn write_message(&self, msg: &WireMessage) -> Result<(), WireError> {
        let mut buf = BytesMut::new();
        WireCodec.encode(msg, &mut buf)?;
        self.sendq.write(&buf);
        Ok(())
    }

    /// Abrupt close: stop both loops and drop any unsent bytes.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.exit.send(true);
        }
        self.sendq.close();
    }

    /// Graceful close: stop both loops but flush the send queue first.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.exit.send(true);
        }
        self.sendq.flush_and_close();
    }

    pub fn silenced(&self) -> bool {
        self.silence.load(Ordering::SeqCst)
    }

    pub fn set_silenced(&self) {
        self.silence.store(true, Ordering::SeqCst);
    }
}

async fn read_loop(
    id: LinkId,
    reader: LinkSource,
    mut exit: watch::Receiver<bool>,
    transfer: mpsc::Sender<LinkEvent>,
) {
    let mut framed = FramedRead::new(reader, WireCodec);
    loop {
        tokio::select! {
            _ = exit.changed() => return,
            item = framed.next() => {
                let event = match item {
                    Some(Ok(msg)) => LinkEvent { link: id, msg: Some(msg), err: None },
                    Some(Err(err)) => LinkEvent { link: id, msg: None, err: Some(err.into()) },
                    None => LinkEvent {
                        link: id,
                        msg: None,
                        err: Some(WireError::ConnectionClosed.into()),
                    },
                };
                let fatal = event.err.is_some();
                if transfer.send(event).await.is_err() || fatal {
                    return;
                }
            }
        }
    }
}

async fn control_loop(
    id: LinkId,
    mut exit: watch::Receiver<bool>,
    mut transfer: mpsc::Receiver<LinkEvent>,
    mut sq_errors: mpsc::Receiver<crate::error::SendQueueError>,
    inbound: mpsc::Sender<LinkEvent>,
) {
    let mut transfer_open = true;
    let mut sq_open = true;
    loop {
        tokio::select! {
            _ = exit.changed() => {
                // Drain the transfer channel so a blocked read loop can
                // observe its own exit signal and finish.
                transfer.close();
                while transfer.recv().await.is_some() {}
                trace!(link = id, "link control loop exiting");
                return;
            }
            item = transfer.recv(), if transfer_open => {
                match item {
                    Some(event) => {
                        if inbound.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => transfer_open = false,
                }
            }
            err = sq_errors.recv(), if sq_open => {
                match err {
                    Some(err) => {
                        let event = LinkEvent { link: id, msg: None, err: Some(err.into()) };
                        if inbound.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => sq_open = false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Hello, PROTOCOL_VERSION};
    use tokio::io::split;

    fn hello() -> WireMessage {
        WireMessage::Hello(Hello {
            protocol: PROTOCOL_VERSION,
            local_time_ms: 123,
            name: "server.name".into(),
            description: "server description".into(),
            default_subnet: "test".into(),
        })
    }

    #[tokio::test]
    async fn startup_and_shutdown() {
        let (near, _far) = tokio::io::duplex(4096);
        let (reader, writer) = split(near);
        let (tx, mut rx) = mpsc::channel(4);
        let link = Link::spawn(1, Box::new(reader), Box::new(writer), 1024, tx);
        link.close();

        // Both loops exit and drop their inbound senders.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn loopback_delivers_one_message() {
        let (near, far) = tokio::io::duplex(4096);
        let (reader, _) = split(near);
        let (_, writer) = split(far);
        let (tx, mut rx) = mpsc::channel(4);
        let link = Link::spawn(1, Box::new(reader), Box::new(writer), 1024, tx);

        link.write_message(&hello()).unwrap();
        let event = rx.recv().await.expect("one event");
        assert_eq!(event.link, 1);
        assert!(event.err.is_none());
        assert_eq!(event.msg, Some(hello()));

        link.close();
    }

    #[tokio::test]
    async fn shutdown_flushes_pending_messages() {
        let (near, far) = tokio::io::duplex(4096);
        let (near_r, near_w) = split(near);
        let (far_r, far_w) = split(far);

        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let l1 = Link::spawn(1, Box::new(near_r), Box::new(near_w), 4096, tx1);
        let l2 = Link::spawn(2, Box::new(far_r), Box::new(far_w), 4096, tx2);

        for _ in 0..4 {
            l1.write_message(&hello()).unwrap();
        }
        l1.shutdown();

        for _ in 0..4 {
            let event = rx2.recv().await.expect("flushed message");
            assert_eq!(event.msg, Some(hello()));
        }

        // After the flush the stream ends and l2 reports the close.
        let event = rx2.recv().await.expect("close event");
        assert!(matches!(
            event.err,
            Some(LinkError::Wire(WireError::ConnectionClosed))
        ));

        l2.close();
    }

    #[tokio::test]
    async fn peer_disconnect_surfaces_as_error_event() {
        let (near, far) = tokio::io::duplex(4096);
        let (near_r, near_w) = split(near);
        let (tx, mut rx) = mpsc::channel(4);
        let _link = Link::spawn(1, Box::new(near_r), Box::new(near_w), 1024, tx);

        drop(far);
        let event = rx.recv().await.expect("error event");
        assert!(event.err.is_some());
    }
}
