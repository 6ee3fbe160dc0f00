// USB-serial bus bridge
//
// The bridge MCU forwards raw transfers onto the motor bus. Every transfer is
// one request packet answered by exactly one reply packet:
//   request: [0xFF, 0xFF, address, length, op, params..., checksum]
//   reply:   [0xFF, 0xFF, address, length, status, data..., checksum]
// `length` counts the bytes that follow it.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, trace};

use super::{BusDevice, BusError, Result};

pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

const SYNC: [u8; 2] = [0xFF, 0xFF];

const OP_READ: u8 = 0x02;
const OP_WRITE: u8 = 0x03;

/// Inverted byte sum
fn checksum<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u8 {
    !bytes.into_iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

fn frame_request(address: u8, op: u8, params: &[u8]) -> Result<Vec<u8>> {
    // op + params + checksum
    let length = u8::try_from(params.len() + 2).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} parameter bytes do not fit one packet", params.len()),
        )
    })?;

    let mut packet = Vec::with_capacity(params.len() + 6);
    packet.extend_from_slice(&SYNC);
    packet.extend_from_slice(&[address, length, op]);
    packet.extend_from_slice(params);
    packet.push(checksum(&packet[SYNC.len()..]));
    Ok(packet)
}

/// Validate a reply body (the `length` bytes after the length byte).
/// A nonzero status byte means the bridge could not complete the transfer.
fn parse_reply(address: u8, length: u8, body: &[u8]) -> Result<Vec<u8>> {
    let invalid = |reason: &str| BusError::InvalidResponse {
        address,
        reason: reason.to_string(),
    };

    let (&sum, rest) = body.split_last().ok_or_else(|| invalid("empty reply"))?;
    let (&status, data) = rest.split_first().ok_or_else(|| invalid("reply without status"))?;

    if checksum([address, length].iter().chain(rest)) != sum {
        return Err(BusError::ChecksumMismatch { address });
    }
    if status != 0 {
        return Err(BusError::Nack { address, status });
    }
    Ok(data.to_vec())
}

fn timeout_or_io(address: u8, e: io::Error) -> BusError {
    match e.kind() {
        io::ErrorKind::TimedOut => BusError::Timeout { address },
        _ => BusError::Io(e),
    }
}

/// Connection to the bus bridge over any byte stream, a serial port by default
pub struct SerialBridge<P = Box<dyn SerialPort>> {
    port: P,
}

impl SerialBridge {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;
        Ok(Self::new(port))
    }
}

impl<P: Read + Write> SerialBridge<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Send one request and wait for its reply, returning the reply data
    fn transfer(&mut self, address: u8, op: u8, params: &[u8]) -> Result<Vec<u8>> {
        let packet = frame_request(address, op, params)?;
        trace!("Bridge -> {:02X?}", packet);
        self.port.write_all(&packet)?;
        self.port.flush()?;

        let mut head = [0u8; 4];
        self.port
            .read_exact(&mut head)
            .map_err(|e| timeout_or_io(address, e))?;
        let [sync @ .., from, length] = head;
        if sync != SYNC {
            return Err(BusError::InvalidResponse {
                address,
                reason: format!("Bad sync bytes {:02X?}", sync),
            });
        }
        if from != address {
            return Err(BusError::InvalidResponse {
                address,
                reason: format!("Reply came from 0x{:02X}", from),
            });
        }

        let mut body = vec![0u8; usize::from(length)];
        self.port
            .read_exact(&mut body)
            .map_err(|e| timeout_or_io(address, e))?;
        trace!("Bridge <- {:02X?}", body);

        parse_reply(address, length, &body)
    }
}

impl<P: Read + Write + Send + 'static> BusDevice for SerialBridge<P> {
    fn write(&mut self, address: u8, frame: &[u8]) -> Result<()> {
        debug!("Bridge write to 0x{:02X}: {:02X?}", address, frame);
        self.transfer(address, OP_WRITE, frame)?;
        Ok(())
    }

    fn read(&mut self, address: u8, len: usize) -> Result<Vec<u8>> {
        let count = u8::try_from(len).map_err(|_| BusError::InvalidResponse {
            address,
            reason: format!("Read length {} exceeds bridge limit", len),
        })?;

        let data = self.transfer(address, OP_READ, &[count])?;
        if data.len() != len {
            return Err(BusError::InvalidResponse {
                address,
                reason: format!("Expected {} bytes, got {}", len, data.len()),
            });
        }
        debug!("Bridge read from 0x{:02X}: {:02X?}", address, data);
        Ok(data)
    }
}
