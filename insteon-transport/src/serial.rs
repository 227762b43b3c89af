//! Serial transport for PowerLinc modems (2413U/2413S, 19200 8-N-1)

use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::packet::TimestampedPacket;
use crate::parser::PacketParser;
use crate::protocol::{self, BAUD_RATE};
use crate::types::{PortInfo, PortKind};
use crate::Transport;

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;
/// FT232R product ID (PowerLinc USB modems)
pub const FT232R_PID: u16 = 0x6001;

/// Broadcast channel capacity for decoded packets
const PACKET_CHANNEL_CAPACITY: usize = 256;
/// Read timeout; bounds how often the reader checks for shutdown
const READ_TIMEOUT_MS: u64 = 50;
/// Back-off after a non-fatal read error
const ERROR_SLEEP_MS: u64 = 100;

pub struct SerialTransport {
    writer: Mutex<Box<dyn SerialPort>>,
    info: PortInfo,
    packet_tx: broadcast::Sender<TimestampedPacket>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl SerialTransport {
    /// Open a modem at `path` and start the reader thread
    pub fn open(path: &str) -> Result<Self, TransportError> {
        let port = serialport::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(READ_TIMEOUT_MS))
            .open()?;
        let reader = port.try_clone()?;

        let info = list_ports()
            .into_iter()
            .find(|p| p.path == path)
            .unwrap_or_else(|| PortInfo {
                path: path.to_string(),
                kind: PortKind::Serial,
                vid: None,
                pid: None,
                serial_number: None,
                product: None,
            });

        let (packet_tx, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let tx = packet_tx.clone();
        let shutdown_clone = Arc::clone(&shutdown);
        let connected_clone = Arc::clone(&connected);
        std::thread::Builder::new()
            .name("plm-reader".into())
            .spawn(move || run_packet_reader_loop(reader, tx, shutdown_clone, connected_clone))
            .map_err(|e| TransportError::Internal(format!("spawn reader thread: {e}")))?;

        info!("Opened modem on {} at {} baud", path, BAUD_RATE);
        Ok(Self {
            writer: Mutex::new(port),
            info,
            packet_tx,
            shutdown,
            connected,
        })
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(TransportError::Disconnected);
        }
        let mut port = self.writer.lock();
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }

    fn subscribe_packets(&self) -> broadcast::Receiver<TimestampedPacket> {
        self.packet_tx.subscribe()
    }

    fn port_info(&self) -> &PortInfo {
        &self.info
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}

/// Reader loop run on a dedicated thread: bytes → parser → broadcast
fn run_packet_reader_loop(
    mut port: Box<dyn SerialPort>,
    tx: broadcast::Sender<TimestampedPacket>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
) {
    debug!("PLM reader thread started");
    let mut parser = PacketParser::new();
    let mut buf = [0u8; 256];
    let start_time = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(len) => {
                let timestamp = start_time.elapsed().as_secs_f64();
                debug!("← [{}]", protocol::hex(&buf[..len]));
                for packet in parser.push(&buf[..len]) {
                    // Ignored when nobody listens
                    let _ = tx.send(TimestampedPacket::new(timestamp, packet));
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) if matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::NotConnected) => {
                warn!("Modem disconnected: {}", e);
                break;
            }
            Err(e) => {
                warn!("PLM reader error: {}", e);
                std::thread::sleep(Duration::from_millis(ERROR_SLEEP_MS));
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    debug!("PLM reader thread exiting");
}

/// Every serial port on the system
pub fn list_ports() -> Vec<PortInfo> {
    let ports = match serialport::available_ports() {
        Ok(p) => p,
        Err(e) => {
            warn!("Serial port enumeration failed: {}", e);
            return Vec::new();
        }
    };
    ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                path: p.port_name,
                kind: PortKind::Usb,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number,
                product: usb.product,
            },
            _ => PortInfo {
                path: p.port_name,
                kind: PortKind::Serial,
                vid: None,
                pid: None,
                serial_number: None,
                product: None,
            },
        })
        .collect()
}

/// Ports that look like PowerLinc modems (FTDI FT232R bridges)
pub fn list_modems() -> Vec<PortInfo> {
    list_ports()
        .into_iter()
        .filter(PortInfo::is_likely_modem)
        .collect()
}
