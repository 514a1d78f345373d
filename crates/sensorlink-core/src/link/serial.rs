//! Serial port handling
//!
//! Device enumeration plus the backend seam through which the link manager
//! opens ports. [`SystemBackend`] talks to real hardware through
//! `tokio-serial`; tests and the demo mode plug in their own backends.

use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::OpenError;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Port entry with no USB metadata
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                serial_number: usb_info.serial_number,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key so that ttyACM* (the usual Arduino CDC name) comes first, then
/// ttyUSB*, both numerically, then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("COM") {
        if let Ok(num) = rest.parse::<usize>() {
            return (2, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::warn!("Serial port enumeration failed: {e}"),
    }

    // Some udev setups hide CDC devices from the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Framing and flow control used to open a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity checking
    pub parity: Parity,
    /// Flow control mode
    pub flow_control: FlowControl,
}

impl PortSettings {
    /// Standard 8N1 framing with the given flow control
    pub fn framed_8n1(baud_rate: u32, flow_control: FlowControl) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control,
        }
    }
}

/// An open byte stream to the device
pub trait LinkPort: AsyncRead + AsyncWrite + Send + Unpin {
    /// Drive the DTR control line
    fn set_data_terminal_ready(&mut self, level: bool) -> io::Result<()>;
}

/// Type-erased open port
pub type BoxedPort = Box<dyn LinkPort>;

/// Opens ports on behalf of the link manager
///
/// `open` is called from inside the Tokio runtime and must not block for
/// longer than the OS open call itself.
pub trait SerialBackend: Send + Sync {
    /// Open `path` with the given settings
    fn open(&self, path: &str, settings: &PortSettings) -> Result<BoxedPort, OpenError>;

    /// Devices this backend can currently reach
    fn available_ports(&self) -> Vec<PortInfo>;
}

impl LinkPort for SerialStream {
    fn set_data_terminal_ready(&mut self, level: bool) -> io::Result<()> {
        tokio_serial::SerialPort::write_data_terminal_ready(self, level)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Backend for real serial hardware
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackend;

impl SystemBackend {
    /// Shared handle for use with the link manager
    pub fn shared() -> Arc<dyn SerialBackend> {
        Arc::new(SystemBackend)
    }
}

impl SerialBackend for SystemBackend {
    fn open(&self, path: &str, settings: &PortSettings) -> Result<BoxedPort, OpenError> {
        let port = tokio_serial::new(path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .stop_bits(settings.stop_bits)
            .parity(settings.parity)
            .flow_control(settings.flow_control)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;
        Ok(Box::new(port))
    }

    fn available_ports(&self) -> Vec<PortInfo> {
        list_ports()
    }
}
