//! Pixel format and payload type codes reported by the device

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Native pixel format code (PFNC layout: bits 16..24 hold bits per pixel).
///
/// Only identification is provided here; conversion between formats is
/// handled outside the capture engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const MONO8: PixelFormat = PixelFormat(0x0108_0001);
    pub const MONO10: PixelFormat = PixelFormat(0x0110_0003);
    pub const MONO12: PixelFormat = PixelFormat(0x0110_0005);
    pub const MONO16: PixelFormat = PixelFormat(0x0110_0007);
    pub const BAYER_GR8: PixelFormat = PixelFormat(0x0108_0008);
    pub const BAYER_RG8: PixelFormat = PixelFormat(0x0108_0009);
    pub const BAYER_GB8: PixelFormat = PixelFormat(0x0108_000A);
    pub const BAYER_BG8: PixelFormat = PixelFormat(0x0108_000B);
    pub const RGB8: PixelFormat = PixelFormat(0x0218_0014);
    pub const BGR8: PixelFormat = PixelFormat(0x0218_0015);
    pub const RGBA8: PixelFormat = PixelFormat(0x0220_0016);
    pub const BGRA8: PixelFormat = PixelFormat(0x0220_0017);

    const NAMED: [(PixelFormat, &'static str); 12] = [
        (Self::MONO8, "Mono8"),
        (Self::MONO10, "Mono10"),
        (Self::MONO12, "Mono12"),
        (Self::MONO16, "Mono16"),
        (Self::BAYER_GR8, "BayerGR8"),
        (Self::BAYER_RG8, "BayerRG8"),
        (Self::BAYER_GB8, "BayerGB8"),
        (Self::BAYER_BG8, "BayerBG8"),
        (Self::RGB8, "Rgb8"),
        (Self::BGR8, "Bgr8"),
        (Self::RGBA8, "Rgba8"),
        (Self::BGRA8, "Bgra8"),
    ];

    pub fn bits_per_pixel(&self) -> u32 {
        (self.0 >> 16) & 0xFF
    }

    pub fn name(&self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(fmt, _)| fmt == self)
            .map(|(_, name)| *name)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((fmt, _)) = Self::NAMED
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
        {
            return Ok(*fmt);
        }
        let hex = s.trim_start_matches("0x").trim_start_matches("0X");
        u32::from_str_radix(hex, 16)
            .map(PixelFormat)
            .map_err(|_| format!("Unknown pixel format: {}", s))
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PixelFormat> for String {
    fn from(value: PixelFormat) -> Self {
        value.to_string()
    }
}

/// Kind of data carried by a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    Unknown,
    Image,
    Raw,
    File,
    Jpeg,
    Jpeg2000,
    H264,
    ChunkOnly,
    DeviceSpecific,
    Gendc,
}

impl PayloadType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => PayloadType::Image,
            2 => PayloadType::Raw,
            3 => PayloadType::File,
            5 => PayloadType::Jpeg,
            6 => PayloadType::Jpeg2000,
            7 => PayloadType::H264,
            8 => PayloadType::ChunkOnly,
            9 => PayloadType::DeviceSpecific,
            11 => PayloadType::Gendc,
            _ => PayloadType::Unknown,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            PayloadType::Unknown => 0,
            PayloadType::Image => 1,
            PayloadType::Raw => 2,
            PayloadType::File => 3,
            PayloadType::Jpeg => 5,
            PayloadType::Jpeg2000 => 6,
            PayloadType::H264 => 7,
            PayloadType::ChunkOnly => 8,
            PayloadType::DeviceSpecific => 9,
            PayloadType::Gendc => 11,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::MONO8.to_string(), "Mono8");
        assert_eq!("bgr8".parse::<PixelFormat>().unwrap(), PixelFormat::BGR8);
        assert_eq!(
            "0x01080001".parse::<PixelFormat>().unwrap(),
            PixelFormat::MONO8
        );
        assert_eq!(PixelFormat(0x1234).to_string(), "0x00001234");
        assert!("Yuv9000".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn test_bits_per_pixel() {
        assert_eq!(PixelFormat::MONO8.bits_per_pixel(), 8);
        assert_eq!(PixelFormat::MONO16.bits_per_pixel(), 16);
        assert_eq!(PixelFormat::RGB8.bits_per_pixel(), 24);
        assert_eq!(PixelFormat::BGRA8.bits_per_pixel(), 32);
    }

    #[test]
    fn test_payload_type_codes() {
        assert_eq!(PayloadType::from_raw(1), PayloadType::Image);
        assert_eq!(PayloadType::from_raw(4), PayloadType::Unknown);
        assert_eq!(PayloadType::from_raw(PayloadType::Gendc.as_raw()), PayloadType::Gendc);
    }
}
