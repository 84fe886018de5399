//! OBD-II PID Definitions and Value Formulas
//!
//! Defines the standard Mode 01 Parameter IDs (PIDs), their response sizes,
//! decoding formulas and display units.

use serde::{Deserialize, Serialize};

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Intake air temperature (0x0F)
    IntakeAirTemp = 0x0F,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Oxygen sensor voltage bank 1, sensor 1 (0x14)
    O2Voltage = 0x14,
    /// Run time since engine start (0x1F)
    EngineRuntime = 0x1F,
    /// Fuel tank level input (0x2F)
    FuelLevel = 0x2F,
    /// Ambient air temperature (0x46)
    AmbientAirTemp = 0x46,
}

impl Pid {
    /// Every PID known to the catalog
    pub const ALL: [Pid; 14] = [
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::ShortFuelTrim,
        Pid::LongFuelTrim,
        Pid::IntakeManifoldPressure,
        Pid::Rpm,
        Pid::Speed,
        Pid::IntakeAirTemp,
        Pid::Maf,
        Pid::ThrottlePosition,
        Pid::O2Voltage,
        Pid::EngineRuntime,
        Pid::FuelLevel,
        Pid::AmbientAirTemp,
    ];

    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    /// Look up a PID by its hex value
    pub fn from_hex(value: u8) -> Option<Pid> {
        Pid::ALL.into_iter().find(|pid| pid.as_hex() == value)
    }

    /// Command name used on the result stream
    pub fn name(&self) -> &'static str {
        match self {
            Pid::EngineLoad => "ENGINE_LOAD",
            Pid::CoolantTemp => "COOLANT_TEMP",
            Pid::ShortFuelTrim => "SHORT_FUEL_TRIM",
            Pid::LongFuelTrim => "LONG_FUEL_TRIM",
            Pid::IntakeManifoldPressure => "INTAKE_PRESSURE",
            Pid::Rpm => "RPM",
            Pid::Speed => "SPEED",
            Pid::IntakeAirTemp => "INTAKE_AIR_TEMP",
            Pid::Maf => "MAF",
            Pid::ThrottlePosition => "THROTTLE_POS",
            Pid::O2Voltage => "O2_VOLTAGE",
            Pid::EngineRuntime => "ENGINE_RUNTIME",
            Pid::FuelLevel => "FUEL_LEVEL",
            Pid::AmbientAirTemp => "AMBIENT_AIR_TEMP",
        }
    }

    /// Look up a PID by command name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Pid> {
        Pid::ALL
            .into_iter()
            .find(|pid| pid.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Mode 01 request text, e.g. "010C"
    pub fn request(&self) -> String {
        format!("{:02X}{:02X}", crate::mode::CURRENT_DATA, self.as_hex())
    }

    /// Get the number of response bytes for this PID
    pub fn response_bytes(&self) -> usize {
        match self {
            Pid::Rpm | Pid::Maf | Pid::O2Voltage | Pid::EngineRuntime => 2,
            _ => 1,
        }
    }

    /// Get the sampling priority (higher = more frequent)
    pub fn sampling_priority(&self) -> u8 {
        match self {
            Pid::Rpm | Pid::Speed | Pid::CoolantTemp | Pid::EngineLoad => 10, // 5Hz
            Pid::Maf | Pid::ThrottlePosition => 5, // 1Hz
            _ => 2, // 0.5Hz
        }
    }

    /// Display unit
    pub fn unit(&self) -> &'static str {
        match self {
            Pid::Rpm => "rpm",
            Pid::Speed => "km/h",
            Pid::CoolantTemp | Pid::IntakeAirTemp | Pid::AmbientAirTemp => "°C",
            Pid::EngineLoad
            | Pid::ShortFuelTrim
            | Pid::LongFuelTrim
            | Pid::ThrottlePosition
            | Pid::FuelLevel => "%",
            Pid::Maf => "g/s",
            Pid::O2Voltage => "V",
            Pid::IntakeManifoldPressure => "kPa",
            Pid::EngineRuntime => "s",
        }
    }

    fn precision(&self) -> usize {
        match self {
            Pid::EngineLoad
            | Pid::ShortFuelTrim
            | Pid::LongFuelTrim
            | Pid::ThrottlePosition
            | Pid::FuelLevel => 1,
            Pid::Maf => 2,
            Pid::O2Voltage => 3,
            _ => 0,
        }
    }

    /// Decode the data bytes (after the mode/PID header) to a value.
    ///
    /// Returns `None` when fewer than [`Pid::response_bytes`] bytes are present.
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        if bytes.len() < self.response_bytes() {
            return None;
        }
        let a = bytes[0] as f64;
        let ab = || (a * 256.0) + bytes[1] as f64;

        let value = match self {
            // RPM: ((A*256)+B)/4
            Pid::Rpm => ab() / 4.0,
            // Speed: A (km/h)
            Pid::Speed => a,
            // Temperatures: A - 40 (°C)
            Pid::CoolantTemp | Pid::IntakeAirTemp | Pid::AmbientAirTemp => a - 40.0,
            // Load, throttle, fuel level: A * 100 / 255 (%)
            Pid::EngineLoad | Pid::ThrottlePosition | Pid::FuelLevel => a * 100.0 / 255.0,
            // MAF: ((A*256)+B) / 100 (g/s)
            Pid::Maf => ab() / 100.0,
            // Short/Long fuel trim: (A - 128) * 100 / 128 (%)
            Pid::ShortFuelTrim | Pid::LongFuelTrim => (a - 128.0) * 100.0 / 128.0,
            // O2 Voltage: A / 200 (V), B is the trim and ignored
            Pid::O2Voltage => a / 200.0,
            // Intake manifold pressure: A (kPa)
            Pid::IntakeManifoldPressure => a,
            // Runtime: (A*256)+B (s)
            Pid::EngineRuntime => ab(),
        };
        Some(value)
    }

    /// Format a decoded value with its unit, e.g. "1750 rpm"
    pub fn format(&self, value: f64) -> String {
        format!("{:.*} {}", self.precision(), value, self.unit())
    }
}
