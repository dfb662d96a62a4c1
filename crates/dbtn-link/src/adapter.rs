//! One open connection to a device
//!
//! A [`LinkAdapter`] owns the endpoint for its whole lifetime. A background
//! reader task frames incoming bytes into lines and fans them out to every
//! [`CommandStream`]. Writes go straight to the port under a lock so each
//! command lands as one contiguous line.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use dbtn_core::prelude::*;

use crate::framing::LineFramer;
use crate::port::{LinkStream, PortProvider};
use crate::protocol::{OutboundCommand, PONG};

/// Lines kept while nobody is subscribed; oldest are dropped first
pub const BACKLOG_LIMIT: usize = 64;

const READ_CHUNK: usize = 256;

/// Fan-out state shared with the reader task
#[derive(Debug, Default)]
struct Inbound {
    senders: Vec<mpsc::UnboundedSender<String>>,
    backlog: VecDeque<String>,
    /// Probes waiting for a `PONG`; a waited-for `PONG` is not fanned out
    pong_waiters: Vec<oneshot::Sender<()>>,
    closed: bool,
}

impl Inbound {
    fn deliver(&mut self, line: String) {
        if line == PONG {
            self.pong_waiters.retain(|tx| !tx.is_closed());
            if !self.pong_waiters.is_empty() {
                for tx in self.pong_waiters.drain(..) {
                    let _ = tx.send(());
                }
                return;
            }
        }

        self.senders.retain(|tx| !tx.is_closed());

        if self.senders.is_empty() {
            if self.backlog.len() == BACKLOG_LIMIT {
                self.backlog.pop_front();
            }
            self.backlog.push_back(line);
            return;
        }

        let last = self.senders.len() - 1;
        for tx in &self.senders[..last] {
            let _ = tx.send(line.clone());
        }
        let _ = self.senders[last].send(line);
    }

    fn close(&mut self) {
        self.closed = true;
        self.senders.clear();
        self.pong_waiters.clear();
    }
}

fn lock_inbound(inbound: &Mutex<Inbound>) -> MutexGuard<'_, Inbound> {
    inbound.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Stream of raw, trimmed lines received from the device.
///
/// Ends when the link closes.
#[derive(Debug)]
pub struct CommandStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl CommandStream {
    /// Wait for the next line, or `None` once the link is closed
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl Stream for CommandStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

/// An open, exclusively owned connection to one endpoint
pub struct LinkAdapter {
    port_name: String,
    baud_rate: u32,
    writer: tokio::sync::Mutex<Option<WriteHalf<LinkStream>>>,
    inbound: Arc<Mutex<Inbound>>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LinkAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkAdapter")
            .field("port_name", &self.port_name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.is_connected())
            .finish()
    }
}

impl LinkAdapter {
    /// Open `port_name` through `provider` and start reading
    pub fn connect(provider: &dyn PortProvider, port_name: &str, baud_rate: u32) -> Result<Self> {
        let stream = provider.open(port_name, baud_rate)?;
        Ok(Self::from_stream(port_name, baud_rate, stream))
    }

    /// Wrap an already-open stream. Must be called inside a Tokio runtime.
    pub fn from_stream(port_name: impl Into<String>, baud_rate: u32, stream: LinkStream) -> Self {
        let port_name = port_name.into();
        let (reader, writer) = tokio::io::split(stream);

        let inbound = Arc::new(Mutex::new(Inbound::default()));
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(read_loop(
            reader,
            Arc::clone(&inbound),
            Arc::clone(&open),
            cancel.clone(),
            port_name.clone(),
        ));

        info!("Serial port {} opened at {} baud", port_name, baud_rate);

        Self {
            port_name,
            baud_rate,
            writer: tokio::sync::Mutex::new(Some(writer)),
            inbound,
            open,
            cancel,
            reader: Mutex::new(Some(handle)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// Whether the endpoint is still open. Flips to false on read EOF, a
    /// read or write failure, or [`disconnect`](Self::disconnect).
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Subscribe to received lines.
    ///
    /// The first subscriber after a quiet period also receives the backlog
    /// buffered while nobody was listening.
    pub fn commands(&self) -> CommandStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inbound = lock_inbound(&self.inbound);
        if !inbound.closed {
            for line in inbound.backlog.drain(..) {
                let _ = tx.send(line);
            }
            inbound.senders.push(tx);
        }
        CommandStream { rx }
    }

    /// Write one command followed by `\n`
    pub async fn send(&self, command: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::link_io(format!("{} is not open", self.port_name)));
        }

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::link_io(format!("{} is not open", self.port_name)))?;

        let line = format!("{}\n", command);
        let written: std::io::Result<()> = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            self.open.store(false, Ordering::Release);
            return Err(Error::link_io(format!(
                "write to {} failed: {}",
                self.port_name, e
            )));
        }

        trace!("→ {} {}", self.port_name, command);
        Ok(())
    }

    pub async fn send_command(&self, command: OutboundCommand) -> Result<()> {
        self.send(&command.to_string()).await
    }

    /// Send `PING` and wait up to `timeout` for an exact `PONG` line.
    ///
    /// Only the answering `PONG` is consumed. Every other line, including one
    /// in the same burst, stays on the normal subscriber/backlog path.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        {
            let mut inbound = lock_inbound(&self.inbound);
            if inbound.closed {
                return false;
            }
            inbound.pong_waiters.push(tx);
        }

        if let Err(e) = self.send_command(OutboundCommand::Ping).await {
            debug!("Probe of {} failed: {}", self.port_name, e);
            return false;
        }

        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }

    /// Close the endpoint and stop the reader. Safe to call more than once.
    pub async fn disconnect(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        lock_inbound(&self.inbound).close();

        if was_open {
            info!("Serial port {} closed", self.port_name);
        }
    }
}

impl Drop for LinkAdapter {
    fn drop(&mut self) {
        self.cancel.cancel();
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = reader {
            handle.abort();
        }
    }
}

async fn read_loop(
    mut reader: ReadHalf<LinkStream>,
    inbound: Arc<Mutex<Inbound>>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    port_name: String,
) {
    let mut framer = LineFramer::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!("Serial port {} reached end of stream", port_name);
                break;
            }
            Ok(n) => {
                let lines = framer.push(&buf[..n]);
                if lines.is_empty() {
                    continue;
                }
                let mut inbound = lock_inbound(&inbound);
                for line in lines {
                    trace!("← {} {}", port_name, line);
                    inbound.deliver(line);
                }
            }
            Err(e) => {
                warn!("Read from {} failed: {}", port_name, e);
                break;
            }
        }
    }

    open.store(false, Ordering::Release);
    lock_inbound(&inbound).close();
    debug!("Reader for {} stopped", port_name);
}
