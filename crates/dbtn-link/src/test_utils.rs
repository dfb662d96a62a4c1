//! In-memory devices for tests
//!
//! [`MemoryPortProvider`] hands out `tokio::io::duplex` pipes instead of real
//! serial ports. Each endpoint is backed by a [`FakeDevice`] that speaks the
//! device protocol and records what the host sent it.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dbtn_core::prelude::*;

use crate::port::{LinkStream, PortProvider};
use crate::protocol::{PING, PONG};

const PIPE_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct OpenCounter {
    open: AtomicUsize,
    max_open: AtomicUsize,
    total_opens: AtomicUsize,
}

impl OpenCounter {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.total_opens.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Host side of a fake endpoint; decrements the open count on drop
struct TrackedStream {
    inner: DuplexStream,
    counter: Arc<OpenCounter>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.counter.closed();
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Debug, Default)]
struct DeviceInner {
    responsive: AtomicBool,
    plugged: AtomicBool,
    refuse_open: AtomicBool,
    received: Mutex<Vec<String>>,
    outbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
    session: Mutex<Option<CancellationToken>>,
}

/// Handle to a simulated device
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    inner: Arc<DeviceInner>,
}

impl FakeDevice {
    /// A plugged-in device that answers `PING` with `PONG`
    pub fn responsive() -> Self {
        let device = Self::default();
        device.inner.responsive.store(true, Ordering::SeqCst);
        device.inner.plugged.store(true, Ordering::SeqCst);
        device
    }

    /// A plugged-in endpoint that never answers (some other serial gadget)
    pub fn silent() -> Self {
        let device = Self::default();
        device.inner.plugged.store(true, Ordering::SeqCst);
        device
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.inner.responsive.store(responsive, Ordering::SeqCst);
    }

    /// Make `open` fail as if another process held the port
    pub fn set_refuse_open(&self, refuse: bool) {
        self.inner.refuse_open.store(refuse, Ordering::SeqCst);
    }

    /// Every line the host has written to this device, across sessions
    pub fn received(&self) -> Vec<String> {
        self.inner
            .received
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Received lines excluding probe pings
    pub fn received_commands(&self) -> Vec<String> {
        self.received().into_iter().filter(|l| l != PING).collect()
    }

    /// Write a line to the host on the current session.
    ///
    /// Returns false when no session is open.
    pub fn send_line(&self, line: &str) -> bool {
        match self.inner.outbox.lock() {
            Ok(outbox) => outbox
                .as_ref()
                .map(|tx| tx.send(line.to_string()).is_ok())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    pub fn press(&self) -> bool {
        self.send_line("BUTTONPRESS")
    }

    pub fn release(&self) -> bool {
        self.send_line("BUTTONRELEASE")
    }

    /// Drop the device end of the current session and hide the endpoint
    pub fn unplug(&self) {
        self.inner.plugged.store(false, Ordering::SeqCst);
        if let Ok(mut session) = self.inner.session.lock() {
            if let Some(token) = session.take() {
                token.cancel();
            }
        }
    }

    pub fn plug(&self) {
        self.inner.plugged.store(true, Ordering::SeqCst);
    }

    pub fn is_plugged(&self) -> bool {
        self.inner.plugged.load(Ordering::SeqCst)
    }

    fn start_session(&self, device_end: DuplexStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        if let Ok(mut outbox) = self.inner.outbox.lock() {
            *outbox = Some(tx);
        }
        if let Ok(mut session) = self.inner.session.lock() {
            if let Some(previous) = session.replace(token.clone()) {
                previous.cancel();
            }
        }

        tokio::spawn(run_session(Arc::clone(&self.inner), device_end, rx, token));
    }
}

async fn run_session(
    inner: Arc<DeviceInner>,
    device_end: DuplexStream,
    mut outbox: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
) {
    let (read, mut write) = tokio::io::split(device_end);
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_string();
                if let Ok(mut received) = inner.received.lock() {
                    received.push(line.clone());
                }
                if line == PING && inner.responsive.load(Ordering::SeqCst) {
                    let reply = format!("{}\n", PONG);
                    if write.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            Some(line) = outbox.recv() => {
                let framed = format!("{}\n", line);
                if write.write_all(framed.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// [`PortProvider`] over a fixed set of named [`FakeDevice`]s
#[derive(Debug, Clone, Default)]
pub struct MemoryPortProvider {
    devices: Arc<Mutex<BTreeMap<String, FakeDevice>>>,
    order: Arc<Mutex<Vec<String>>>,
    counter: Arc<OpenCounter>,
}

impl MemoryPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device; ports enumerate in insertion order
    pub fn with_device(self, port_name: &str, device: FakeDevice) -> Self {
        self.add_device(port_name, device);
        self
    }

    pub fn add_device(&self, port_name: &str, device: FakeDevice) {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(port_name.to_string(), device);
        }
        if let Ok(mut order) = self.order.lock() {
            if !order.iter().any(|p| p == port_name) {
                order.push(port_name.to_string());
            }
        }
    }

    pub fn device(&self, port_name: &str) -> Option<FakeDevice> {
        self.devices.lock().ok()?.get(port_name).cloned()
    }

    /// Streams currently open
    pub fn open_count(&self) -> usize {
        self.counter.open.load(Ordering::SeqCst)
    }

    /// Highest number of streams ever open at once
    pub fn max_open(&self) -> usize {
        self.counter.max_open.load(Ordering::SeqCst)
    }

    /// Successful `open` calls so far
    pub fn total_opens(&self) -> usize {
        self.counter.total_opens.load(Ordering::SeqCst)
    }
}

impl PortProvider for MemoryPortProvider {
    fn available_ports(&self) -> Vec<String> {
        let order = match self.order.lock() {
            Ok(order) => order.clone(),
            Err(_) => return Vec::new(),
        };
        order
            .into_iter()
            .filter(|p| self.device(p).map(|d| d.is_plugged()).unwrap_or(false))
            .collect()
    }

    fn open(&self, port_name: &str, _baud_rate: u32) -> Result<LinkStream> {
        let device = self
            .device(port_name)
            .filter(FakeDevice::is_plugged)
            .ok_or_else(|| Error::port_open(port_name, "no such port"))?;

        if device.inner.refuse_open.load(Ordering::SeqCst) {
            return Err(Error::port_open(port_name, "access denied"));
        }

        let (host_end, device_end) = tokio::io::duplex(PIPE_CAPACITY);
        device.start_session(device_end);
        self.counter.opened();

        Ok(Box::new(TrackedStream {
            inner: host_end,
            counter: Arc::clone(&self.counter),
        }))
    }
}
