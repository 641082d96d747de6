//! Minimal Modbus/TCP master for holding-register reads.
//!
//! Only function 0x03 (Read Holding Registers) is implemented; that is the
//! entire surface the scale exposes. One client is opened per read session
//! and dropped afterwards, which closes the socket on every exit path.

use bytes::{Buf, BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;
const PROTOCOL_ID: u16 = 0;
const MBAP_HEADER_LEN: usize = 7;
/// MBAP length field for a read request: unit id + function + address + count
const READ_REQUEST_LEN: u16 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ModbusError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    Connect(std::io::Error),

    #[error("i/o error during register exchange: {0}")]
    Io(std::io::Error),

    #[error("register exchange timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("device returned exception code {0:#04x}")]
    Exception(u8),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A single Modbus/TCP session against one device.
#[derive(Debug)]
pub struct ModbusClient {
    stream: TcpStream,
    unit_id: u8,
    timeout: Duration,
    transaction_id: u16,
}

impl ModbusClient {
    /// Opens a TCP session within `timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        unit_id: u8,
        timeout: Duration,
    ) -> Result<Self, ModbusError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ModbusError::ConnectTimeout(timeout))?
            .map_err(ModbusError::Connect)?;

        Ok(Self {
            stream,
            unit_id,
            timeout,
            transaction_id: 0,
        })
    }

    /// Reads `count` holding registers starting at `address`.
    pub async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ModbusError> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let request = encode_read_request(self.transaction_id, self.unit_id, address, count);

        tokio::time::timeout(self.timeout, self.stream.write_all(&request))
            .await
            .map_err(|_| ModbusError::ReadTimeout(self.timeout))?
            .map_err(ModbusError::Io)?;

        let mut header = [0u8; MBAP_HEADER_LEN];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| ModbusError::ReadTimeout(self.timeout))?
            .map_err(ModbusError::Io)?;

        let mut cursor = &header[..];
        let transaction_id = cursor.get_u16();
        let protocol_id = cursor.get_u16();
        let length = cursor.get_u16();
        let _unit_id = cursor.get_u8();

        if protocol_id != PROTOCOL_ID {
            return Err(ModbusError::Malformed(format!(
                "unexpected protocol id {protocol_id}"
            )));
        }
        if transaction_id != self.transaction_id {
            return Err(ModbusError::Malformed(format!(
                "transaction id mismatch: sent {}, got {}",
                self.transaction_id, transaction_id
            )));
        }
        // length counts the unit id byte plus the PDU
        if length < 2 {
            return Err(ModbusError::Malformed(format!(
                "header length {length} too short"
            )));
        }

        let mut body = vec![0u8; length as usize - 1];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut body))
            .await
            .map_err(|_| ModbusError::ReadTimeout(self.timeout))?
            .map_err(ModbusError::Io)?;

        decode_read_response(&body, count)
    }
}

fn encode_read_request(transaction_id: u16, unit_id: u8, address: u16, count: u16) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 5);
    frame.put_u16(transaction_id);
    frame.put_u16(PROTOCOL_ID);
    frame.put_u16(READ_REQUEST_LEN);
    frame.put_u8(unit_id);
    frame.put_u8(FUNCTION_READ_HOLDING_REGISTERS);
    frame.put_u16(address);
    frame.put_u16(count);
    frame
}

fn decode_read_response(body: &[u8], expected_count: u16) -> Result<Vec<u16>, ModbusError> {
    if body.is_empty() {
        return Err(ModbusError::Malformed("empty response body".into()));
    }

    let function = body[0];
    if function == FUNCTION_READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
        let code = body
            .get(1)
            .copied()
            .ok_or_else(|| ModbusError::Malformed("exception frame without code".into()))?;
        return Err(ModbusError::Exception(code));
    }
    if function != FUNCTION_READ_HOLDING_REGISTERS {
        return Err(ModbusError::Malformed(format!(
            "unexpected function code {function:#04x}"
        )));
    }

    let byte_count = *body
        .get(1)
        .ok_or_else(|| ModbusError::Malformed("response missing byte count".into()))?
        as usize;
    let expected_bytes = expected_count as usize * 2;
    if byte_count != expected_bytes || body.len() != 2 + byte_count {
        return Err(ModbusError::Malformed(format!(
            "expected {expected_bytes} register bytes, got {byte_count} in a {}-byte body",
            body.len()
        )));
    }

    let registers = body[2..]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    Ok(registers)
}
