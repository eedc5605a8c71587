//! The session orchestrator: drives a device through the two-stage FDL bootstrap and the
//! resulting flash read/write/erase workflows, generic over any [`Transport`].

use crate::commands::{self, rep};
use crate::frame::{self, CrcMode, CrcPolicy, FrameError};
use crate::commands::ResponseError;
use crate::transport::{Transport, TransportError};
use log::{debug, info, warn};
use thiserror::Error;

/// Default identity of the reference chipset family; overridable per [`SessionConfig`].
pub const DEFAULT_VID: u16 = 0x1782;
pub const DEFAULT_PID: u16 = 0x4D00;
pub const FLASH_BASE_ADDR: u32 = 0x1000_0000;
pub const FLASH_BASE_ADDR_OLD: u32 = 0x3000_0000;
const BOOT_MTU: usize = 1024;
const DEFAULT_CHANGE_BAUD: u32 = 921_600;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("expected {expected} to ack, got response code {code:#04x}")]
    UnexpectedResponse { expected: &'static str, code: u16 },
    #[error("frame CRC mismatch while reading a response")]
    CrcMismatchOnRead,
}

/// Configuration the orchestrator is constructed with — no process-global state, unlike the
/// reference implementation's rebound globals.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub vid: u16,
    pub pid: u16,
    pub flash_base: u32,
    pub flash_noremap: bool,
    pub boot_mtu: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            flash_base: FLASH_BASE_ADDR,
            flash_noremap: false,
            boot_mtu: BOOT_MTU,
        }
    }
}

/// Where the orchestrator currently is in the bootstrap sequence. Exposed for diagnostics and
/// tests; the methods that advance it enforce the real ordering, this is not itself checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    BootHandshaked,
    Fdl1Running,
    Fdl1Handshaked,
    Ready,
}

pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    crc_mode: CrcMode,
    mtu: usize,
    state: Option<SessionState>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let mtu = transport.max_packet_size().max(1);
        Self { transport, config, crc_mode: CrcMode::Boot, mtu, state: None }
    }

    pub fn state(&self) -> Option<SessionState> {
        self.state
    }

    fn request_framed(&mut self, payload: &[u8]) -> Result<commands::Response, SessionError> {
        let framed = frame::encode(payload, self.crc_mode);
        self.transport.write(&framed)?;

        let mut buf = vec![0u8; self.mtu];
        let n = self.transport.read(&mut buf)?;
        buf.truncate(n);

        let decoded = frame::decode(&buf, self.crc_mode, CrcPolicy::Strict)?
            .ok_or(SessionError::CrcMismatchOnRead)?;
        let response = commands::parse_response(&decoded)?;
        if response.code == rep::LOG {
            info!("device: {}", String::from_utf8_lossy(&response.body));
        }
        Ok(response)
    }

    fn expect_ack(&self, response: &commands::Response, expected: &'static str) -> Result<(), SessionError> {
        if response.code != rep::ACK {
            return Err(SessionError::UnexpectedResponse { expected, code: response.code });
        }
        Ok(())
    }

    /// Sends `CheckBaud` then `Connect`, surfacing any `REP_LOG` passthrough lines.
    pub fn handshake(&mut self) -> Result<(), SessionError> {
        self.request_framed(&commands::check_baud())?;
        self.request_framed(&commands::connect())?;
        Ok(())
    }

    /// Uploads `data` to `target_addr` in MTU-sized chunks, acking each chunk in strict FIFO
    /// order. In flash-write mode (`flash_mode = true`), three `EndData` response codes are
    /// tolerated instead of raised as errors: `WRITE_ERROR`, `FLASH_CFG_ERROR`, and the passthrough
    /// `LOG` code — a firmware quirk observed on real devices.
    pub fn send_data(
        &mut self,
        target_addr: u32,
        data: &[u8],
        flash_mode: bool,
        chunk_size: usize,
    ) -> Result<(), SessionError> {
        let external_crc = flash_mode.then(|| frame::chksum32(data));
        let start = commands::start_data(target_addr, data.len() as u32, external_crc);
        let response = self.request_framed(&start)?;
        self.expect_ack(&response, "StartData")?;

        for chunk in data.chunks(chunk_size.max(1)) {
            let response = self.request_framed(&commands::midst_data(chunk))?;
            self.expect_ack(&response, "MidstData")?;
        }

        let response = self.request_framed(&commands::end_data())?;
        let soft_tolerated = flash_mode
            && matches!(response.code, rep::WRITE_ERROR | rep::FLASH_CFG_ERROR | rep::LOG);
        if soft_tolerated {
            warn!("tolerating soft EndData response {:#04x} in flash-write mode", response.code);
        } else {
            self.expect_ack(&response, "EndData")?;
        }
        Ok(())
    }

    pub fn exec(&mut self, target_addr: u32) -> Result<(), SessionError> {
        let response = self.request_framed(&commands::exec_data(target_addr))?;
        self.expect_ack(&response, "ExecData")
    }

    /// Loads and starts FDL1: handshake in Boot mode, upload, execute, then re-enumerate and
    /// switch the frame CRC mode to `Fdl` — the protocol mode flips exactly once, here.
    pub fn boot_fdl1(&mut self, fdl1_addr: u32, fdl1_bytes: &[u8]) -> Result<(), SessionError> {
        self.handshake()?;
        self.send_data(fdl1_addr, fdl1_bytes, false, self.config.boot_mtu)?;
        self.exec(fdl1_addr)?;
        self.state = Some(SessionState::Fdl1Running);

        self.transport.reconnect()?;
        self.crc_mode = CrcMode::Fdl;
        self.handshake()?;
        self.state = Some(SessionState::Fdl1Handshaked);
        Ok(())
    }

    /// Loads and starts FDL2 (or, in single-FDL mode, is simply not called), then negotiates the
    /// final baud rate, completing the bootstrap.
    pub fn boot_fdl2(&mut self, fdl2_addr: u32, fdl2_bytes: &[u8], chunk_size: usize) -> Result<(), SessionError> {
        self.send_data(fdl2_addr, fdl2_bytes, false, chunk_size)?;
        self.exec(fdl2_addr)?;
        self.finalize_baud(DEFAULT_CHANGE_BAUD)
    }

    /// Single-FDL chipsets skip FDL2 entirely and go straight to baud finalization once FDL1 (in
    /// this mode, the only loader) is running.
    pub fn finalize_single_fdl(&mut self) -> Result<(), SessionError> {
        self.finalize_baud(DEFAULT_CHANGE_BAUD)
    }

    fn finalize_baud(&mut self, baud: u32) -> Result<(), SessionError> {
        let response = self.request_framed(&commands::change_baud(baud))?;
        self.expect_ack(&response, "ChangeBaud")?;
        self.state = Some(SessionState::Ready);
        Ok(())
    }

    pub fn enable_write_flash(&mut self) -> Result<(), SessionError> {
        let response = self.request_framed(&commands::enable_write_flash())?;
        self.expect_ack(&response, "EnableWriteFlash")
    }

    pub fn erase_flash(&mut self, target_addr: u32, length: u32) -> Result<(), SessionError> {
        let response = self.request_framed(&commands::erase_flash(target_addr, length))?;
        self.expect_ack(&response, "EraseFlash")
    }

    /// Writes `data` into flash at `offset` from the configured flash base (or `offset` directly
    /// when `flash_noremap` is set), optionally erasing the target region first.
    pub fn write_flash(
        &mut self,
        offset: u32,
        data: &[u8],
        block_size: usize,
        force_erase: bool,
    ) -> Result<(), SessionError> {
        let start_addr = if self.config.flash_noremap { offset } else { self.config.flash_base + offset };
        if force_erase {
            debug!("erasing {} bytes at {:#010x} before writing", data.len(), start_addr);
            self.erase_flash(start_addr, data.len() as u32)?;
        }
        self.send_data(start_addr, data, true, block_size)
    }

    /// Issues one `ReadFlash` request and drains bulk IN transfers until a short read signals the
    /// end of this logical response.
    fn read_flash_chunk(&mut self, part_id: u32, size: u32, offset: u32) -> Result<commands::Response, SessionError> {
        let framed = frame::encode(&commands::read_flash(part_id, size, offset), self.crc_mode);
        self.transport.write(&framed)?;

        let mut raw = Vec::new();
        loop {
            let mut buf = vec![0u8; self.mtu];
            let n = self.transport.read(&mut buf)?;
            raw.extend_from_slice(&buf[..n]);
            if n < self.mtu {
                break;
            }
        }
        let decoded = frame::decode(&raw, self.crc_mode, CrcPolicy::Strict)?
            .ok_or(SessionError::CrcMismatchOnRead)?;
        Ok(commands::parse_response(&decoded)?)
    }

    /// Reads `length` bytes starting at `offset` within partition `part_id`, in `block_size`
    /// chunks, returning the concatenated bytes.
    pub fn read_partition(
        &mut self,
        part_id: u32,
        length: u32,
        offset: u32,
        block_size: usize,
    ) -> Result<Vec<u8>, SessionError> {
        let mut out = Vec::with_capacity(length as usize);
        let mut remaining = length;
        let mut cur_offset = offset;
        while remaining > 0 {
            let this_len = remaining.min(block_size as u32);
            let response = self.read_flash_chunk(part_id, this_len, cur_offset)?;
            if response.length == 0 {
                break;
            }
            out.extend_from_slice(&response.body);
            remaining = remaining.saturating_sub(u32::from(response.length));
            cur_offset += u32::from(response.length);
        }
        Ok(out)
    }

    pub fn reset(&mut self) -> Result<(), SessionError> {
        let response = self.request_framed(&commands::normal_reset())?;
        self.expect_ack(&response, "NormalReset")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn ack_frame(mode: CrcMode) -> Vec<u8> {
        let mut payload = rep::ACK.to_be_bytes().to_vec();
        payload.extend_from_slice(&0u16.to_be_bytes());
        frame::encode(&payload, mode)
    }

    #[test]
    fn handshake_sends_check_baud_then_connect_and_expects_two_acks() {
        let mut transport = MockTransport::new(64);
        transport.queue_response(ack_frame(CrcMode::Boot));
        transport.queue_response(ack_frame(CrcMode::Boot));
        let mut session = Session::new(transport, SessionConfig::default());

        session.handshake().unwrap();
        assert_eq!(session.transport.written.len(), 2);
    }

    #[test]
    fn send_data_chunks_and_acks_every_midst_data() {
        let mut transport = MockTransport::new(64);
        // StartData ack, 3 MidstData acks (10 bytes / chunk_size 4 => 3 chunks), EndData ack.
        for _ in 0..5 {
            transport.queue_response(ack_frame(CrcMode::Boot));
        }
        let mut session = Session::new(transport, SessionConfig::default());

        session.send_data(0x5000_0000, &[0u8; 10], false, 4).unwrap();
        // StartData + 3 chunks + EndData = 5 writes.
        assert_eq!(session.transport.written.len(), 5);
    }

    #[test]
    fn send_data_tolerates_soft_end_data_errors_in_flash_mode() {
        let mut transport = MockTransport::new(64);
        transport.queue_response(ack_frame(CrcMode::Boot)); // StartData
        transport.queue_response(ack_frame(CrcMode::Boot)); // MidstData
        let mut soft = rep::FLASH_CFG_ERROR.to_be_bytes().to_vec();
        soft.extend_from_slice(&0u16.to_be_bytes());
        transport.queue_response(frame::encode(&soft, CrcMode::Boot)); // EndData (soft error)

        let mut session = Session::new(transport, SessionConfig::default());
        session.send_data(0x0, &[1, 2, 3], true, 8).unwrap();
    }

    #[test]
    fn send_data_raises_on_unexpected_non_soft_end_data_error() {
        let mut transport = MockTransport::new(64);
        transport.queue_response(ack_frame(CrcMode::Boot)); // StartData
        transport.queue_response(ack_frame(CrcMode::Boot)); // MidstData
        let mut hard = rep::UNKNOWN_CMD.to_be_bytes().to_vec();
        hard.extend_from_slice(&0u16.to_be_bytes());
        transport.queue_response(frame::encode(&hard, CrcMode::Boot)); // EndData (fatal)

        let mut session = Session::new(transport, SessionConfig::default());
        let err = session.send_data(0x0, &[1, 2, 3], true, 8).unwrap_err();
        assert!(matches!(err, SessionError::UnexpectedResponse { code, .. } if code == rep::UNKNOWN_CMD));
    }

    #[test]
    fn boot_fdl1_flips_crc_mode_and_reconnects_once() {
        let mut transport = MockTransport::new(64);
        // handshake (boot): check_baud, connect
        transport.queue_response(ack_frame(CrcMode::Boot));
        transport.queue_response(ack_frame(CrcMode::Boot));
        // send_data: StartData + 1 chunk + EndData
        transport.queue_response(ack_frame(CrcMode::Boot));
        transport.queue_response(ack_frame(CrcMode::Boot));
        transport.queue_response(ack_frame(CrcMode::Boot));
        // ExecData
        transport.queue_response(ack_frame(CrcMode::Boot));
        // post-reconnect handshake (fdl mode): check_baud, connect
        transport.queue_response(ack_frame(CrcMode::Fdl));
        transport.queue_response(ack_frame(CrcMode::Fdl));

        let mut session = Session::new(transport, SessionConfig::default());
        session.boot_fdl1(0x5000_0000, b"loader bytes").unwrap();

        assert_eq!(session.crc_mode, CrcMode::Fdl);
        assert_eq!(session.transport.reconnect_count, 1);
        assert_eq!(session.state(), Some(SessionState::Fdl1Handshaked));
    }

    #[test]
    fn read_partition_concatenates_chunks_until_length_satisfied() {
        let mut transport = MockTransport::new(64);
        let mut body = rep::READ_FLASH.to_be_bytes().to_vec();
        body.extend_from_slice(&4u16.to_be_bytes());
        body.extend_from_slice(b"data");
        transport.queue_response(frame::encode(&body, CrcMode::Fdl));

        let mut session = Session::new(transport, SessionConfig::default());
        session.crc_mode = CrcMode::Fdl;
        let data = session.read_partition(0x8000_0003, 4, 0, 16).unwrap();
        assert_eq!(data, b"data");
    }
}
