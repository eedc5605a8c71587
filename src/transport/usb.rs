//! A `rusb` (libusb)-backed [`Transport`] implementation.

use super::{Transport, TransportError};
use log::{debug, trace, warn};
use std::time::Duration;

const RECONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECONNECT_SETTLE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_ATTEMPTS: u32 = 100;
const IO_TIMEOUT: Duration = Duration::from_secs(120);

pub struct UsbTransport {
    vid: u16,
    pid: u16,
    handle: rusb::DeviceHandle<rusb::GlobalContext>,
    interface: u8,
    ep_in: u8,
    ep_out: u8,
    max_packet_size: usize,
}

impl UsbTransport {
    /// Opens the first device matching `vid:pid`, claims its first interface (alt-setting 0),
    /// and resolves the first bulk IN/OUT endpoint pair. Blocks, polling, until a matching device
    /// appears.
    pub fn open(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let handle = Self::wait_for_device(vid, pid)?;
        Self::from_handle(vid, pid, handle)
    }

    fn wait_for_device(
        vid: u16,
        pid: u16,
    ) -> Result<rusb::DeviceHandle<rusb::GlobalContext>, TransportError> {
        for attempt in 0..RECONNECT_MAX_ATTEMPTS {
            if let Some(handle) = rusb::open_device_with_vid_pid(vid, pid) {
                debug!("found device {vid:#06x}:{pid:#06x} after {attempt} attempts");
                return Ok(handle);
            }
            trace!("device {vid:#06x}:{pid:#06x} not present yet, retrying");
            std::thread::sleep(RECONNECT_POLL_INTERVAL);
        }
        Err(TransportError::DeviceNotFound { vid, pid, attempts: RECONNECT_MAX_ATTEMPTS })
    }

    fn from_handle(
        vid: u16,
        pid: u16,
        handle: rusb::DeviceHandle<rusb::GlobalContext>,
    ) -> Result<Self, TransportError> {
        handle
            .set_active_configuration(1)
            .map_err(|e| TransportError::Write(e.to_string()))?;

        let device = handle.device();
        let config = device
            .active_config_descriptor()
            .map_err(|_| TransportError::EndpointNotFound)?;
        let interface_descriptor = config
            .interfaces()
            .next()
            .and_then(|intf| intf.descriptors().next())
            .ok_or(TransportError::EndpointNotFound)?;
        let interface_number = interface_descriptor.interface_number();

        handle
            .claim_interface(interface_number)
            .map_err(|e| TransportError::Write(e.to_string()))?;

        let mut ep_in = None;
        let mut ep_out = None;
        let mut max_packet_size = None;
        for endpoint in interface_descriptor.endpoint_descriptors() {
            max_packet_size.get_or_insert(endpoint.max_packet_size() as usize);
            match endpoint.direction() {
                rusb::Direction::In if ep_in.is_none() => ep_in = Some(endpoint.address()),
                rusb::Direction::Out if ep_out.is_none() => ep_out = Some(endpoint.address()),
                _ => {}
            }
        }
        let max_packet_size = max_packet_size.unwrap_or(64);
        let (ep_in, ep_out) =
            ep_in.zip(ep_out).ok_or(TransportError::EndpointNotFound)?;

        Ok(Self {
            vid,
            pid,
            handle,
            interface: interface_number,
            ep_in,
            ep_out,
            max_packet_size,
        })
    }
}

impl Transport for UsbTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.handle
            .write_bulk(self.ep_out, bytes, IO_TIMEOUT)
            .map_err(|e| TransportError::Write(e.to_string()))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.handle
            .read_bulk(self.ep_in, buf, IO_TIMEOUT)
            .map_err(|e| TransportError::Read(e.to_string()))
    }

    fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    fn reconnect(&mut self) -> Result<(), TransportError> {
        let _ = self.handle.release_interface(self.interface);
        warn!("releasing USB handle for {:#06x}:{:#06x}, waiting for re-enumeration", self.vid, self.pid);
        std::thread::sleep(RECONNECT_SETTLE_DELAY);
        let handle = Self::wait_for_device(self.vid, self.pid)?;
        let reopened = Self::from_handle(self.vid, self.pid, handle)?;
        *self = reopened;
        Ok(())
    }
}
