//! Scale protocol adapter.
//!
//! Turns raw Modbus holding-register reads into typed weight and alarm
//! values. The device speaks two register profiles: the raw profile (integer
//! weight plus a device error code) and the float profile (gross/tare/net as
//! 32-bit big-endian floats plus four alarm flags). A fresh session is opened
//! per read; no connection state survives between reads.

pub mod modbus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use utoipa::ToSchema;

use crate::config::AppConfig;
use modbus::{ModbusClient, ModbusError};

/// Raw profile register map
pub const WEIGHT_REGISTER: u16 = 0;
pub const ERROR_CODE_REGISTER: u16 = 1;

/// Float profile register map
pub const GROSS_REGISTER: u16 = 0;
pub const TARE_REGISTER: u16 = 2;
/// The device publishes net weight in the tare window (it computes
/// gross - tare there); both constants intentionally point at register 2.
pub const NET_REGISTER: u16 = 2;
pub const ALARM_REGISTER: u16 = 3;
pub const ALARM_REGISTER_COUNT: u16 = 4;

#[derive(Debug, thiserror::Error)]
pub enum ScaleError {
    #[error("unable to connect to scale: {0}")]
    ConnectionFailed(String),

    #[error("error reading register from scale: {0}")]
    RegisterRead(String),

    #[error("malformed register payload: {0}")]
    Decode(String),
}

impl From<ModbusError> for ScaleError {
    fn from(err: ModbusError) -> Self {
        match err {
            ModbusError::Connect(_) | ModbusError::ConnectTimeout(_) => {
                ScaleError::ConnectionFailed(err.to_string())
            }
            ModbusError::Io(_) | ModbusError::ReadTimeout(_) | ModbusError::Exception(_) => {
                ScaleError::RegisterRead(err.to_string())
            }
            ModbusError::Malformed(_) => ScaleError::Decode(err.to_string()),
        }
    }
}

/// Device condition reported through the raw profile's error-code register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, ToSchema)]
pub enum DeviceStatus {
    Ok,
    Overload,
    Underload,
    CalibrationError,
    CommunicationFault,
    MechanicalFault,
    UnknownError,
}

impl DeviceStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => DeviceStatus::Ok,
            1 => DeviceStatus::Overload,
            2 => DeviceStatus::Underload,
            3 => DeviceStatus::CalibrationError,
            4 => DeviceStatus::CommunicationFault,
            5 => DeviceStatus::MechanicalFault,
            _ => DeviceStatus::UnknownError,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DeviceStatus::Ok => "OK",
            DeviceStatus::Overload => "Overload",
            DeviceStatus::Underload => "Underload",
            DeviceStatus::CalibrationError => "Calibration Error",
            DeviceStatus::CommunicationFault => "Communication Fault",
            DeviceStatus::MechanicalFault => "Mechanical Fault",
            DeviceStatus::UnknownError => "Unknown Error",
        }
    }
}

/// Protocol policy for the raw profile: one register count equals 100 g.
/// Preserved exactly for device compatibility.
pub fn raw_to_kg(raw: u16) -> f64 {
    (raw as f64 * 100.0) / 1000.0
}

/// Reassembles a 32-bit big-endian IEEE-754 float from two registers
/// (big word order).
pub fn decode_f32_be(registers: &[u16]) -> Result<f32, ScaleError> {
    if registers.len() != 2 {
        return Err(ScaleError::Decode(format!(
            "expected 2 registers for a float, got {}",
            registers.len()
        )));
    }
    let bits = ((registers[0] as u32) << 16) | registers[1] as u32;
    Ok(f32::from_bits(bits))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One reading from the raw profile.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RawReading {
    pub timestamp: DateTime<Utc>,
    pub weight_raw: u16,
    pub weight_kg: f64,
    pub error_code: u16,
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AlarmFlags {
    pub overrange: bool,
    pub underrange: bool,
    pub motion: bool,
    pub negative: bool,
}

/// Full float-profile snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScaleSnapshot {
    pub timestamp: DateTime<Utc>,
    pub gross_weight: f64,
    pub tare_weight: f64,
    pub net_weight: f64,
    pub alarms: AlarmFlags,
}

#[derive(Debug, Clone)]
pub struct ScaleConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

impl From<&AppConfig> for ScaleConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            host: cfg.scale_host.clone(),
            port: cfg.scale_port,
            unit_id: cfg.scale_unit_id,
            timeout: cfg.scale_timeout(),
        }
    }
}

/// Source of the current vessel weight, as the dosing sequencer sees it.
/// Implemented by the live adapter and by test doubles.
#[async_trait]
pub trait WeightSource: Send + Sync {
    async fn current_weight_kg(&self) -> Result<f64, ScaleError>;
}

/// Modbus/TCP adapter for the dosing scale.
#[derive(Debug, Clone)]
pub struct ScaleClient {
    config: ScaleConfig,
}

impl ScaleClient {
    pub fn new(config: ScaleConfig) -> Self {
        Self { config }
    }

    async fn session(&self) -> Result<ModbusClient, ScaleError> {
        ModbusClient::connect(
            &self.config.host,
            self.config.port,
            self.config.unit_id,
            self.config.timeout,
        )
        .await
        .map_err(ScaleError::from)
    }

    /// Reads the raw profile: integer weight register plus device error code.
    /// The session is dropped, and the socket closed, on every path out.
    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    pub async fn read_raw(&self) -> Result<RawReading, ScaleError> {
        let mut session = self.session().await?;

        let weight = session.read_holding_registers(WEIGHT_REGISTER, 1).await?;
        let error = session
            .read_holding_registers(ERROR_CODE_REGISTER, 1)
            .await?;

        let weight_raw = weight[0];
        let error_code = error[0];
        let status = DeviceStatus::from_code(error_code);

        Ok(RawReading {
            timestamp: Utc::now(),
            weight_raw,
            weight_kg: raw_to_kg(weight_raw),
            error_code,
            error_message: status.message().to_string(),
        })
    }

    /// Reads the net weight from the float profile, rounded to 2 decimals.
    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    pub async fn read_net_weight(&self) -> Result<f64, ScaleError> {
        let mut session = self.session().await?;
        let registers = session.read_holding_registers(NET_REGISTER, 2).await?;
        Ok(round2(decode_f32_be(&registers)? as f64))
    }

    /// Reads the full float-profile snapshot: gross, tare, net and alarms.
    ///
    /// Weights are read in separate register exchanges to avoid alignment
    /// issues on the device side.
    #[instrument(skip(self), fields(host = %self.config.host, port = self.config.port))]
    pub async fn read_snapshot(&self) -> Result<ScaleSnapshot, ScaleError> {
        let mut session = self.session().await?;

        let gross = session.read_holding_registers(GROSS_REGISTER, 2).await?;
        let tare = session.read_holding_registers(TARE_REGISTER, 2).await?;
        let net = session.read_holding_registers(NET_REGISTER, 2).await?;
        let alarms = session
            .read_holding_registers(ALARM_REGISTER, ALARM_REGISTER_COUNT)
            .await?;

        Ok(ScaleSnapshot {
            timestamp: Utc::now(),
            gross_weight: round2(decode_f32_be(&gross)? as f64),
            tare_weight: round2(decode_f32_be(&tare)? as f64),
            net_weight: round2(decode_f32_be(&net)? as f64),
            alarms: AlarmFlags {
                overrange: alarms[0] != 0,
                underrange: alarms[1] != 0,
                motion: alarms[2] != 0,
                negative: alarms[3] != 0,
            },
        })
    }
}

#[async_trait]
impl WeightSource for ScaleClient {
    async fn current_weight_kg(&self) -> Result<f64, ScaleError> {
        Ok(self.read_raw().await?.weight_kg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_scale_factor_is_protocol_policy() {
        assert_eq!(raw_to_kg(0), 0.0);
        assert_eq!(raw_to_kg(196), 19.6);
        assert_eq!(raw_to_kg(1000), 100.0);
    }

    #[test]
    fn error_code_table_is_fixed() {
        assert_eq!(DeviceStatus::from_code(0), DeviceStatus::Ok);
        assert_eq!(DeviceStatus::from_code(3), DeviceStatus::CalibrationError);
        assert_eq!(DeviceStatus::from_code(5), DeviceStatus::MechanicalFault);
        assert_eq!(DeviceStatus::from_code(42), DeviceStatus::UnknownError);
        assert_eq!(DeviceStatus::from_code(42).message(), "Unknown Error");
    }

    #[test]
    fn decodes_big_endian_float_pairs() {
        // 10.1 as IEEE-754 is 0x4121999A
        let value = decode_f32_be(&[0x4121, 0x999A]).expect("two registers");
        assert!((value - 10.1).abs() < 1e-5);
    }

    #[test]
    fn rejects_wrong_register_count_for_float() {
        assert!(matches!(decode_f32_be(&[0x4121]), Err(ScaleError::Decode(_))));
    }
}
