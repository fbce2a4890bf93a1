//! Transport: owns the server child process and its pipes.
//!
//! Three tasks run per process. The writer drains an unbounded channel of
//! frame bodies into stdin; being the only consumer, it serializes every
//! write so two messages can never interleave. The reader decodes stdout
//! into frames and forwards them as [`TransportEvent`]s. The waiter owns
//! the [`Child`] and reports its exit status to the reader, which emits
//! `Exited` only after the last frame so events stay in stream order.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};

/// Channel capacity for events flowing from the reader task to the session.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    Started,
    /// One complete frame body.
    Frame(Vec<u8>),
    /// The process is gone. `code` is `None` when it was killed by a signal
    /// or its status could not be read.
    Exited { code: Option<i32> },
}

pub(crate) struct Transport {
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    event_rx: mpsc::Receiver<TransportEvent>,
    /// Set once `Exited` has been observed.
    exited: bool,
    /// Dropping this asks the waiter to kill the process. The writer stops
    /// when `writer_tx` goes with it.
    _kill_tx: Option<oneshot::Sender<()>>,
}

impl Transport {
    /// Spawn `program` with `args`. Must be called within a tokio runtime.
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", program.display()))?;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (status_tx, status_rx) = oneshot::channel::<Option<i32>>();

        tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(body) = writer_rx.recv().await {
                if let Err(e) = writer.write_frame(&body).await {
                    tracing::warn!("LSP write error: {e:#}");
                    break;
                }
            }
        });

        tokio::spawn(wait_for_exit(child, kill_rx, status_tx));

        tokio::spawn(async move {
            if event_tx.send(TransportEvent::Started).await.is_err() {
                return;
            }
            let mut reader = FrameReader::new(stdout);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        if event_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("LSP server closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP reader error: {e:#}");
                        break;
                    }
                }
            }
            let code = status_rx.await.ok().flatten();
            let _ = event_tx.send(TransportEvent::Exited { code }).await;
        });

        Ok(Self {
            writer_tx,
            event_rx,
            exited: false,
            _kill_tx: Some(kill_tx),
        })
    }

    /// Queue one frame body for writing. `false` once the process is gone.
    pub fn send(&self, body: Vec<u8>) -> bool {
        !self.exited && self.writer_tx.send(body).is_ok()
    }

    /// Next event if one is ready, without waiting.
    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        let event = self.event_rx.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    /// Wait for the next event. `None` after the last event has been taken.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.event_rx.recv().await?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &TransportEvent) {
        if matches!(event, TransportEvent::Exited { .. }) {
            self.exited = true;
        }
    }

    /// A transport with no process behind it. Outgoing bodies and the
    /// event feed are exposed through the returned [`DetachedPeer`].
    #[cfg(test)]
    pub fn detached() -> (Self, DetachedPeer) {
        let (writer_tx, outgoing) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Self {
            writer_tx,
            event_rx,
            exited: false,
            _kill_tx: None,
        };
        (transport, DetachedPeer { outgoing, events })
    }
}

async fn wait_for_exit(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    status_tx: oneshot::Sender<Option<i32>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill LSP server: {e}");
            }
            child.wait().await
        }
    };
    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("Failed to read LSP server exit status: {e}");
            None
        }
    };
    let _ = status_tx.send(code);
}

#[cfg(test)]
pub(crate) struct DetachedPeer {
    pub outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    pub events: mpsc::Sender<TransportEvent>,
}

#[cfg(test)]
impl DetachedPeer {
    /// Inject one inbound JSON frame.
    pub fn push_json(&self, value: &serde_json::Value) {
        let body = serde_json::to_vec(value).unwrap();
        self.events.try_send(TransportEvent::Frame(body)).unwrap();
    }

    pub fn push(&self, event: TransportEvent) {
        self.events.try_send(event).unwrap();
    }

    /// Every body written so far, parsed as JSON.
    pub fn drain_json(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(body) = self.outgoing.try_recv() {
            out.push(serde_json::from_slice(&body).unwrap());
        }
        out
    }
}
