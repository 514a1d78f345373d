//! Scripted serial backend for link tests
#![allow(dead_code)]

use futures::task::noop_waker;
use sensorlink_core::link::{
    BoxedPort, LinkConfig, LinkPort, OpenError, PortInfo, PortSettings, SerialBackend,
};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_serial::FlowControl;

pub const MOCK_PORT: &str = "/dev/ttyMOCK0";

/// Timings as shipped, without the forced-release sequence
pub fn test_config() -> LinkConfig {
    LinkConfig {
        force_release: false,
        ..LinkConfig::default()
    }
}

/// How a mock port behaves when the link manager closes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseBehavior {
    Normal,
    /// Shutdown never completes
    Hang,
    /// Shutdown reports an error
    Fail,
}

struct Inner {
    /// Outcomes of upcoming opens; empty means success
    script: VecDeque<Result<(), OpenError>>,
    opens: Vec<(String, PortSettings)>,
    devices: VecDeque<DuplexStream>,
    close: CloseBehavior,
    dtr: Vec<bool>,
    /// Bytes the device has already sent when a port opens
    greeting: Vec<u8>,
}

pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    panic_on_open: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Result<(), OpenError>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Inner {
                script: script.into(),
                opens: Vec::new(),
                devices: VecDeque::new(),
                close: CloseBehavior::Normal,
                dtr: Vec::new(),
                greeting: Vec::new(),
            })),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            panic_on_open: AtomicBool::new(false),
        })
    }

    pub fn set_close_behavior(&self, close: CloseBehavior) {
        self.inner.lock().unwrap().close = close;
    }

    /// Bytes written by the device before the host starts reading
    pub fn set_greeting(&self, bytes: &[u8]) {
        self.inner.lock().unwrap().greeting = bytes.to_vec();
    }

    /// Make `open` panic, as a misbehaving driver would
    pub fn set_panic_on_open(&self, panic: bool) {
        self.panic_on_open.store(panic, Ordering::SeqCst);
    }

    /// Device side of the most recently opened port
    pub fn take_device(&self) -> DuplexStream {
        self.inner
            .lock()
            .unwrap()
            .devices
            .pop_back()
            .expect("no port was opened")
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().unwrap().opens.len()
    }

    pub fn flows(&self) -> Vec<FlowControl> {
        self.inner
            .lock()
            .unwrap()
            .opens
            .iter()
            .map(|(_, settings)| settings.flow_control)
            .collect()
    }

    pub fn opens(&self) -> Vec<(String, PortSettings)> {
        self.inner.lock().unwrap().opens.clone()
    }

    pub fn dtr_levels(&self) -> Vec<bool> {
        self.inner.lock().unwrap().dtr.clone()
    }

    /// Ports currently open
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Most ports ever open at the same time
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

impl SerialBackend for MockBackend {
    fn open(&self, path: &str, settings: &PortSettings) -> Result<BoxedPort, OpenError> {
        if self.panic_on_open.load(Ordering::SeqCst) {
            panic!("driver crashed while opening {path}");
        }
        let mut inner = self.inner.lock().unwrap();
        inner.opens.push((path.to_string(), *settings));
        if let Some(Err(e)) = inner.script.pop_front() {
            return Err(e);
        }

        let (host, mut device) = tokio::io::duplex(1024);
        if !inner.greeting.is_empty() {
            let waker = noop_waker();
            let mut cx = Context::from_waker(&waker);
            // Fits the duplex buffer, so this completes immediately
            let written = Pin::new(&mut device).poll_write(&mut cx, &inner.greeting);
            assert!(matches!(written, Poll::Ready(Ok(n)) if n == inner.greeting.len()));
        }
        inner.devices.push_back(device);
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MockPort {
            stream: host,
            close: inner.close,
            live: Arc::clone(&self.live),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn available_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::bare(MOCK_PORT)]
    }
}

struct MockPort {
    stream: DuplexStream,
    close: CloseBehavior,
    live: Arc<AtomicUsize>,
    inner: Arc<Mutex<Inner>>,
}

impl Drop for MockPort {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for MockPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockPort {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.close {
            CloseBehavior::Normal => Pin::new(&mut self.stream).poll_shutdown(cx),
            CloseBehavior::Hang => Poll::Pending,
            CloseBehavior::Fail => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                "device refused to close",
            ))),
        }
    }
}

impl LinkPort for MockPort {
    fn set_data_terminal_ready(&mut self, level: bool) -> io::Result<()> {
        self.inner.lock().unwrap().dtr.push(level);
        Ok(())
    }
}
