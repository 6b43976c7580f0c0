//! Device settings consumed at node construction.
//!
//! The settings record is owned by an external configuration surface; the engine only
//! reads it. Missing fields fall back to the defaults below, so a partial JSON object is
//! a valid settings file:
//!
//! ```
//! use nodedsp::{AudioSettings, SampleFormat};
//!
//! let settings = AudioSettings::from_json_str(r#"{
//!     "input":  { "device": 1, "channels": 1, "format": 1 },
//!     "output": { "rate": 44100 }
//! }"#).unwrap();
//!
//! assert_eq!(settings.input.channels, 1);
//! assert_eq!(settings.input.chunk_size, 1024);
//! assert_eq!(settings.input.format, SampleFormat::Int16);
//! assert_eq!(settings.output.rate, 44_100);
//! ```

use core::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const CHANNELS_RANGE: (u16, u16) = (1, 8);
pub const RATE_RANGE: (u32, u32) = (8_000, 192_000);
pub const CHUNK_RANGE: (usize, usize) = (64, 8_192);

/// Numeric encoding of samples on the device side of a stream.
///
/// Persisted as its index (`0` = Float32, `1` = Int16); the name is accepted too.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FormatRepr", into = "u8")]
pub enum SampleFormat {
    #[default]
    Float32,
    Int16,
}

impl SampleFormat {
    /// Bytes per sample on the wire.
    pub fn native_width(&self) -> usize {
        match self {
            SampleFormat::Float32 => 4,
            SampleFormat::Int16 => 2,
        }
    }

    /// Round-trip a sample through this encoding.
    ///
    /// This is what a sample sounds like after being written to a device of this format.
    #[inline]
    pub fn quantize(&self, sample: f32) -> f32 {
        use dasp_sample::Sample;
        match self {
            SampleFormat::Float32 => sample,
            SampleFormat::Int16 => sample.to_sample::<i16>().to_sample::<f32>(),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::Float32 => f.write_str("Float32"),
            SampleFormat::Int16 => f.write_str("Int16"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormatRepr {
    Index(u8),
    Name(String),
}

impl TryFrom<FormatRepr> for SampleFormat {
    type Error = String;

    fn try_from(repr: FormatRepr) -> Result<Self, Self::Error> {
        match repr {
            FormatRepr::Index(0) => Ok(SampleFormat::Float32),
            FormatRepr::Index(1) => Ok(SampleFormat::Int16),
            FormatRepr::Index(other) => Err(format!("unknown sample format index {other}")),
            FormatRepr::Name(name) if name.eq_ignore_ascii_case("float32") => Ok(SampleFormat::Float32),
            FormatRepr::Name(name) if name.eq_ignore_ascii_case("int16") => Ok(SampleFormat::Int16),
            FormatRepr::Name(name) => Err(format!("unknown sample format `{name}`")),
        }
    }
}

impl From<SampleFormat> for u8 {
    fn from(format: SampleFormat) -> u8 {
        match format {
            SampleFormat::Float32 => 0,
            SampleFormat::Int16 => 1,
        }
    }
}

/// Capture side of the settings record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Device index, as enumerated by the backend
    pub device: usize,
    pub channels: u16,
    /// Sample rate in Hz
    pub rate: u32,
    /// Frames requested per read
    pub chunk_size: usize,
    pub format: SampleFormat,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            device: 0,
            channels: 2,
            rate: 48_000,
            chunk_size: 1024,
            format: SampleFormat::Float32,
        }
    }
}

impl InputSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        check_channels(self.channels)?;
        check_rate(self.rate)?;
        check_range("chunk_size", self.chunk_size as i64, CHUNK_RANGE.0 as i64, CHUNK_RANGE.1 as i64, "64..=8192")
    }
}

/// Playback side of the settings record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub device: usize,
    pub channels: u16,
    pub rate: u32,
    pub format: SampleFormat,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            device: 0,
            channels: 2,
            rate: 48_000,
            format: SampleFormat::Float32,
        }
    }
}

impl OutputSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        check_channels(self.channels)?;
        check_rate(self.rate)
    }
}

/// Format tag written with every exported settings record.
pub const SETTINGS_VERSION: &str = "1.0";

/// Both halves of the settings record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub input: InputSettings,
    pub output: OutputSettings,
    /// Record format; files without one read as [`SETTINGS_VERSION`]
    pub version: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input: InputSettings::default(),
            output: OutputSettings::default(),
            version: SETTINGS_VERSION.to_owned(),
        }
    }
}

impl AudioSettings {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.input.validate()?;
        self.output.validate()
    }
}

fn check_channels(channels: u16) -> Result<(), EngineError> {
    check_range("channels", channels as i64, CHANNELS_RANGE.0 as i64, CHANNELS_RANGE.1 as i64, "1..=8")
}

fn check_rate(rate: u32) -> Result<(), EngineError> {
    check_range("rate", rate as i64, RATE_RANGE.0 as i64, RATE_RANGE.1 as i64, "8000..=192000")
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64, expected: &'static str) -> Result<(), EngineError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidSetting { field, value, expected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_all_defaults() {
        let settings = AudioSettings::from_json_str("{}").unwrap();
        assert_eq!(settings, AudioSettings::default());
        assert_eq!(settings.input.rate, 48_000);
        assert_eq!(settings.input.chunk_size, 1024);
        assert_eq!(settings.output.channels, 2);
        assert_eq!(settings.version, SETTINGS_VERSION);
    }

    #[test]
    fn export_carries_the_version() {
        let json: serde_json::Value = serde_json::from_str(&AudioSettings::default().to_json_string().unwrap()).unwrap();
        assert_eq!(json["version"], "1.0");
        assert_eq!(json["input"]["chunk_size"], 1024);

        let mut settings = AudioSettings::default();
        settings.output.channels = 1;
        let back = AudioSettings::from_json_str(&settings.to_json_string().unwrap()).unwrap();
        assert_eq!(back, settings);

        let older = AudioSettings::from_json_str(r#"{"input": {"channels": 1}, "version": "0.9"}"#).unwrap();
        assert_eq!(older.version, "0.9");
        assert_eq!(older.input.channels, 1);
    }

    #[test]
    fn format_accepts_index_and_name() {
        let by_index: InputSettings = serde_json::from_str(r#"{"format": 1}"#).unwrap();
        let by_name: InputSettings = serde_json::from_str(r#"{"format": "Int16"}"#).unwrap();
        assert_eq!(by_index.format, SampleFormat::Int16);
        assert_eq!(by_name.format, SampleFormat::Int16);

        assert!(serde_json::from_str::<InputSettings>(r#"{"format": 7}"#).is_err());
    }

    #[test]
    fn format_is_persisted_as_index() {
        let json = serde_json::to_value(OutputSettings {
            format: SampleFormat::Int16,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["format"], 1);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut input = InputSettings::default();
        input.channels = 0;
        assert!(matches!(
            input.validate(),
            Err(EngineError::InvalidSetting { field: "channels", .. })
        ));

        let mut input = InputSettings::default();
        input.chunk_size = 16;
        assert!(matches!(
            input.validate(),
            Err(EngineError::InvalidSetting { field: "chunk_size", .. })
        ));

        let mut output = OutputSettings::default();
        output.rate = 400_000;
        assert!(matches!(
            output.validate(),
            Err(EngineError::InvalidSetting { field: "rate", .. })
        ));
    }

    #[test]
    fn int16_quantization_is_close() {
        let q = SampleFormat::Int16.quantize(0.25);
        assert!((q - 0.25).abs() < 1.0 / 32_768.0);
        assert_eq!(SampleFormat::Float32.quantize(0.123), 0.123);
    }
}
