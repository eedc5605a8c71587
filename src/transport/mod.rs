//! The byte-pipe seam the session orchestrator is generic over, decoupling it from the concrete
//! USB backend (and letting tests drive the orchestrator without real hardware attached).

#[cfg(feature = "usb")]
mod usb;
#[cfg(feature = "usb")]
pub use usb::UsbTransport;

#[cfg(test)]
pub(crate) mod mock;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no device found matching vid={vid:#06x} pid={pid:#06x} after {attempts} attempts")]
    DeviceNotFound { vid: u16, pid: u16, attempts: u32 },
    #[error("device exposes no usable bulk IN/OUT endpoint pair")]
    EndpointNotFound,
    #[error("transport write failed: {0}")]
    Write(String),
    #[error("transport read failed: {0}")]
    Read(String),
    #[error("transport I/O timed out")]
    Timeout,
}

/// Abstracts the raw byte pipe to the device: a single bulk OUT write, a single bulk IN read
/// (sized by the caller), the negotiated max packet size, and device re-enumeration after the
/// device identity changes (e.g. once FDL1 starts running).
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Performs one bulk IN transaction into `buf`, returning the number of bytes read. A short
    /// read (fewer bytes than `buf.len()`) signals the end of a multi-transfer logical response.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn max_packet_size(&self) -> usize;

    /// Disposes the current handle, waits briefly, and re-enumerates the same device identity.
    /// Called once, right after `ExecData(fdl1)` causes the device to re-enumerate under the
    /// same VID/PID with a new USB identity.
    fn reconnect(&mut self) -> Result<(), TransportError>;
}
