//! Demo Mode - Simulated sensor board for testing without hardware
//!
//! [`DemoSimulator`] generates plausible room telemetry: temperature and
//! humidity drift slowly, the counter increments every sample and motion
//! arrives in random bursts. [`DemoBackend`] serves that telemetry as a
//! serial device so the whole link/ingest path can run without a board.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, ReadHalf,
};

use crate::link::{BoxedPort, LinkPort, OpenError, PortInfo, PortSettings, SerialBackend};
use crate::telemetry::Reading;

/// Path under which the demo device is listed
pub const DEMO_PORT: &str = "demo://sensor";

/// Simulated sensor sketch
pub struct DemoSimulator {
    /// Time when simulation started (ms)
    start_time_ms: Option<u64>,
    /// Sequence counter of the next sample
    counter: u64,
    /// Current motion state
    motion: MotionState,
    /// Time of next motion burst (ms from start)
    next_motion_at_ms: u64,
    /// Random number generator
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MotionState {
    /// Nobody in front of the PIR sensor
    Quiet,
    /// Motion detected until the given time
    Active { until_ms: u64 },
}

impl Default for DemoSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoSimulator {
    /// Create a new simulator seeded from entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a reproducible simulator
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let first_motion = rng.gen_range(5_000..12_000);
        Self {
            start_time_ms: None,
            counter: 0,
            motion: MotionState::Quiet,
            next_motion_at_ms: first_motion,
            rng,
        }
    }

    /// Produce the sample for `elapsed_ms` since the simulation started
    pub fn update(&mut self, elapsed_ms: u64) -> Reading {
        let start = *self.start_time_ms.get_or_insert(elapsed_ms);
        let sim_time = elapsed_ms.saturating_sub(start);
        self.update_motion(sim_time);

        let t = sim_time as f64 / 1000.0;
        // Slow daily-style drift with a little sensor noise
        let temperature = 23.0 + 2.5 * (t / 90.0).sin() + self.rng.gen_range(-0.2..0.2);
        let humidity = 52.0 - 8.0 * (t / 120.0).sin() + self.rng.gen_range(-0.5..0.5);

        self.counter += 1;
        Reading {
            temperature: (temperature * 10.0).round() / 10.0,
            humidity: (humidity.clamp(0.0, 100.0) * 10.0).round() / 10.0,
            counter: self.counter,
            presence: matches!(self.motion, MotionState::Active { .. }),
        }
    }

    fn update_motion(&mut self, sim_time: u64) {
        match self.motion {
            MotionState::Quiet => {
                if sim_time >= self.next_motion_at_ms {
                    let duration = self.rng.gen_range(2_000..6_000);
                    self.motion = MotionState::Active {
                        until_ms: sim_time + duration,
                    };
                }
            }
            MotionState::Active { until_ms } => {
                if sim_time >= until_ms {
                    self.motion = MotionState::Quiet;
                    self.next_motion_at_ms = sim_time + self.rng.gen_range(8_000..20_000);
                }
            }
        }
    }
}

/// Render a reading the way the sensor sketch prints it
///
/// Odd counters use the JSON record, even counters the labelled text, so
/// both decoders get exercised.
pub fn format_line(reading: &Reading) -> String {
    if reading.counter % 2 == 1 {
        format!(
            "{{\"temp\":{:.1},\"hum\":{:.1},\"count\":{},\"presc\":{}}}\n",
            reading.temperature,
            reading.humidity,
            reading.counter,
            u8::from(reading.presence)
        )
    } else {
        format!(
            "Temperatura: {:.1} Umidade: {:.1} Leitura n°: {} Presenca: {}\n",
            reading.temperature,
            reading.humidity,
            reading.counter,
            u8::from(reading.presence)
        )
    }
}

/// In-process port connected to a simulated device task
pub struct DemoPort {
    stream: DuplexStream,
}

impl AsyncRead for DemoPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for DemoPort {
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
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl LinkPort for DemoPort {
    fn set_data_terminal_ready(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Backend serving a single simulated device at [`DEMO_PORT`]
#[derive(Debug, Clone)]
pub struct DemoBackend {
    interval: Duration,
}

impl DemoBackend {
    /// Device emitting one line every `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Shared handle for use with the link manager
    pub fn shared(interval: Duration) -> Arc<dyn SerialBackend> {
        Arc::new(Self::new(interval))
    }
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SerialBackend for DemoBackend {
    fn open(&self, path: &str, settings: &PortSettings) -> Result<BoxedPort, OpenError> {
        if path != DEMO_PORT {
            return Err(OpenError::not_found(format!("no demo device at {path}")));
        }
        tracing::debug!("Demo device opened at {} baud", settings.baud_rate);

        let (host, device) = tokio::io::duplex(4096);
        tokio::spawn(run_device(device, self.interval));
        Ok(Box::new(DemoPort { stream: host }))
    }

    fn available_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo {
            product: Some("Simulated sensor board".to_string()),
            manufacturer: Some("SensorLink".to_string()),
            ..PortInfo::bare(DEMO_PORT)
        }]
    }
}

async fn run_device(stream: DuplexStream, interval: Duration) {
    let (commands, mut output) = tokio::io::split(stream);
    let listener = tokio::spawn(log_commands(commands));
    let mut simulator = DemoSimulator::new();
    let mut ticker = tokio::time::interval(interval);
    let started = tokio::time::Instant::now();

    loop {
        ticker.tick().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let line = format_line(&simulator.update(elapsed_ms));
        // Fails once the host side of the port is dropped
        if output.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }

    listener.abort();
    tracing::debug!("Demo device stopped");
}

async fn log_commands(mut commands: ReadHalf<DuplexStream>) {
    let mut buf = [0u8; 256];
    loop {
        match commands.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tracing::info!(
                "Demo device received: {}",
                String::from_utf8_lossy(&buf[..n]).trim()
            ),
        }
    }
}
