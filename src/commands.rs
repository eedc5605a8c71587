//! Command packet builders and response parsing for the BSL command set.
//!
//! A command packet is a big-endian `(type: u16, length: u16)` header followed by `length`
//! bytes of payload. Response packets share the same shape; the response `type` is drawn from
//! the fixed code table below. This module only builds/parses packet bytes — framing (escape +
//! CRC) is [`crate::frame`]'s job, and interpreting whether a response means success is the
//! session orchestrator's job, not this parser's.

use thiserror::Error;

/// PC -> phone command opcodes.
pub mod cmd {
    pub const CONNECT: u16 = 0x00;
    pub const START_DATA: u16 = 0x01;
    pub const MIDST_DATA: u16 = 0x02;
    pub const END_DATA: u16 = 0x03;
    pub const EXEC_DATA: u16 = 0x04;
    pub const NORMAL_RESET: u16 = 0x05;
    pub const READ_FLASH: u16 = 0x06;
    pub const READ_CHIP_TYPE: u16 = 0x07;
    pub const READ_NVITEM: u16 = 0x08;
    pub const CHANGE_BAUD: u16 = 0x09;
    pub const ERASE_FLASH: u16 = 0x0A;
    pub const REPARTITION: u16 = 0x0B;
    pub const READ_FLASH_TYPE: u16 = 0x0C;
    pub const READ_FLASH_INFO: u16 = 0x0D;
    pub const READ_SECTOR_SIZE: u16 = 0x0F;
    pub const READ_START: u16 = 0x10;
    pub const READ_MIDST: u16 = 0x11;
    pub const READ_END: u16 = 0x12;
    pub const KEEP_CHARGE: u16 = 0x13;
    pub const READ_FLASH_UID: u16 = 0x15;
    pub const POWER_OFF: u16 = 0x17;
    pub const READ_CHIP_UID: u16 = 0x1A;
    pub const ENABLE_WRITE_FLASH: u16 = 0x1B;
    pub const ENABLE_SECUREBOOT: u16 = 0x1C;
    pub const EXEC_NAND_INIT: u16 = 0x21;
    /// Bare 2-byte probe with no length header, `0x00 0x7E`; still frame-encoded normally.
    pub const CHECK_BAUD: u16 = 0x7E;
    pub const END_PROCESS: u16 = 0x7F;
}

/// Phone -> PC response codes.
pub mod rep {
    pub const ACK: u16 = 0x80;
    pub const VER: u16 = 0x81;
    pub const INVALID_CMD: u16 = 0x82;
    pub const UNKNOWN_CMD: u16 = 0x83;
    pub const OPERATION_FAILED: u16 = 0x84;
    pub const NOT_SUPPORT_BAUDRATE: u16 = 0x85;
    pub const DOWN_NOT_START: u16 = 0x86;
    pub const DOWN_MULTI_START: u16 = 0x87;
    pub const DOWN_EARLY_END: u16 = 0x88;
    pub const DOWN_DEST_ERROR: u16 = 0x89;
    pub const DOWN_SIZE_ERROR: u16 = 0x8A;
    pub const VERIFY_ERROR: u16 = 0x8B;
    pub const NOT_VERIFY: u16 = 0x8C;
    pub const PHONE_NOT_ENOUGH_MEMORY: u16 = 0x8D;
    pub const PHONE_WAIT_INPUT_TIMEOUT: u16 = 0x8E;
    pub const PHONE_SUCCEED: u16 = 0x8F;
    pub const PHONE_VALID_BAUDRATE: u16 = 0x90;
    pub const PHONE_REPEAT_CONTINUE: u16 = 0x91;
    pub const PHONE_REPEAT_BREAK: u16 = 0x92;
    pub const READ_FLASH: u16 = 0x93;
    pub const READ_CHIP_TYPE: u16 = 0x94;
    pub const READ_NVITEM: u16 = 0x95;
    pub const INCOMPATIBLE_PARTITION: u16 = 0x96;
    pub const UNKNOWN_DEVICE: u16 = 0x97;
    pub const INVALID_DEVICE_SIZE: u16 = 0x98;
    pub const ILLEGAL_SDRAM: u16 = 0x99;
    pub const WRONG_SDRAM_PARAMETER: u16 = 0x9A;
    pub const READ_FLASH_INFO: u16 = 0x9B;
    pub const READ_SECTOR_SIZE: u16 = 0x9C;
    pub const READ_FLASH_TYPE: u16 = 0x9D;
    pub const READ_FLASH_UID: u16 = 0x9E;
    pub const READ_SOFTSIM_EID: u16 = 0x9F;
    pub const ERROR_CHECKSUM: u16 = 0xA0;
    pub const CHECKSUM_DIFF: u16 = 0xA1;
    pub const WRITE_ERROR: u16 = 0xA2;
    pub const CHIPID_NOT_MATCH: u16 = 0xA3;
    pub const FLASH_CFG_ERROR: u16 = 0xA4;
    pub const DOWN_STL_SIZE_ERROR: u16 = 0xA5;
    pub const SECURITY_VERIFICATION_FAIL: u16 = 0xA6;
    pub const PHONE_IS_ROOTED: u16 = 0xA7;
    pub const SEC_VERIFY_ERROR: u16 = 0xAA;
    pub const READ_CHIP_UID: u16 = 0xAB;
    pub const NOT_ENABLE_WRITE_FLASH: u16 = 0xAC;
    pub const ENABLE_SECUREBOOT_ERROR: u16 = 0xAD;
    pub const FLASH_WRITTEN_PROTECTION: u16 = 0xB3;
    pub const FLASH_INITIALIZING_FAIL: u16 = 0xB4;
    pub const RF_TRANSCEIVER_TYPE: u16 = 0xB5;
    pub const UNSUPPORTED_COMMAND: u16 = 0xFE;
    /// Passthrough log message; not an error, surfaced to the user and the session continues.
    pub const LOG: u16 = 0xFF;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response packet is shorter than the 4-byte header")]
    PacketTooShort,
    #[error("response declares body length {declared} but only {available} bytes are present")]
    BodyTruncated { declared: u16, available: usize },
}

/// A decoded response packet: `(code, declared length, body bytes)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub length: u16,
    pub body: Vec<u8>,
}

/// Parses an already-unframed response: big-endian `(code: u16, length: u16)` header followed by
/// `length` bytes of body.
pub fn parse_response(data: &[u8]) -> Result<Response, ResponseError> {
    if data.len() < 4 {
        return Err(ResponseError::PacketTooShort);
    }
    let code = u16::from_be_bytes([data[0], data[1]]);
    let length = u16::from_be_bytes([data[2], data[3]]);
    let body = &data[4..];
    if body.len() < length as usize {
        return Err(ResponseError::BodyTruncated {
            declared: length,
            available: body.len(),
        });
    }
    Ok(Response {
        code,
        length,
        body: body[..length as usize].to_vec(),
    })
}

fn shape_cmd_packet(command: u16) -> Vec<u8> {
    shape_data_packet(command, &[])
}

fn shape_data_packet(command: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&command.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn connect() -> Vec<u8> {
    shape_cmd_packet(cmd::CONNECT)
}

pub fn normal_reset() -> Vec<u8> {
    shape_cmd_packet(cmd::NORMAL_RESET)
}

pub fn read_chip_type() -> Vec<u8> {
    shape_cmd_packet(cmd::READ_CHIP_TYPE)
}

pub fn read_sector_size() -> Vec<u8> {
    shape_cmd_packet(cmd::READ_SECTOR_SIZE)
}

pub fn enable_write_flash() -> Vec<u8> {
    shape_cmd_packet(cmd::ENABLE_WRITE_FLASH)
}

pub fn end_process() -> Vec<u8> {
    shape_cmd_packet(cmd::END_PROCESS)
}

/// The baud-check probe: unlike every other command this is a bare 2-byte big-endian command
/// code with no length header, `0x00 0x7E`. It is still run through [`crate::frame::encode`]
/// like any other command — only its *payload shape* is irregular, not its framing.
pub fn check_baud() -> Vec<u8> {
    cmd::CHECK_BAUD.to_be_bytes().to_vec()
}

pub fn change_baud(baud_rate: u32) -> Vec<u8> {
    shape_data_packet(cmd::CHANGE_BAUD, &baud_rate.to_be_bytes())
}

/// `StartData`: begins a data-transfer session to `target_addr`, `target_len` bytes long.
/// `external_crc`, when `Some`, is the flash-write-mode integrity checksum ([`crate::frame::chksum32`]);
/// it extends the header to 12 bytes when present, 8 otherwise.
pub fn start_data(target_addr: u32, target_len: u32, external_crc: Option<u32>) -> Vec<u8> {
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&target_addr.to_be_bytes());
    body.extend_from_slice(&target_len.to_be_bytes());
    if let Some(crc) = external_crc {
        body.extend_from_slice(&crc.to_be_bytes());
    }
    shape_data_packet(cmd::START_DATA, &body)
}

pub fn midst_data(chunk: &[u8]) -> Vec<u8> {
    shape_data_packet(cmd::MIDST_DATA, chunk)
}

pub fn end_data() -> Vec<u8> {
    shape_cmd_packet(cmd::END_DATA)
}

pub fn exec_data(target_addr: u32) -> Vec<u8> {
    shape_data_packet(cmd::EXEC_DATA, &target_addr.to_be_bytes())
}

/// `ReadFlash`: fixed 12-byte body `(partitionId, length, offset)`, all big-endian.
pub fn read_flash(partition_id: u32, length: u32, offset: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(12);
    body.extend_from_slice(&partition_id.to_be_bytes());
    body.extend_from_slice(&length.to_be_bytes());
    body.extend_from_slice(&offset.to_be_bytes());
    shape_data_packet(cmd::READ_FLASH, &body)
}

pub fn erase_flash(target_addr: u32, length: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&target_addr.to_be_bytes());
    body.extend_from_slice(&length.to_be_bytes());
    shape_data_packet(cmd::ERASE_FLASH, &body)
}
