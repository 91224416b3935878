//! Flat `(name, value)` configuration parameters.
//!
//! Only two names are interpreted by the pipeline itself: the decoder
//! codec id and the acceleration mode.  Everything else is forwarded to the
//! decoder factory as an implementation filter.
//!
//! Parameters parse from `name:value` strings:
//!
//! ```text
//! mfxImplDescription.mfxDecoderDescription.decoder.CodecID:MFX_CODEC_HEVC
//! mfxImplDescription.AccelerationMode:MFX_ACCEL_MODE_VIA_D3D11
//! mfxImplDescription.ApiVersion.Major:2
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::CodecId;

pub const CODEC_ID_PARAM: &str = "mfxImplDescription.mfxDecoderDescription.decoder.CodecID";
pub const ACCEL_MODE_PARAM: &str = "mfxImplDescription.AccelerationMode";

/// Acceleration mode codes as carried in [`ACCEL_MODE_PARAM`].
pub const ACCEL_MODE_NA: u32 = 0;
pub const ACCEL_MODE_VIA_D3D11: u32 = 0x0300;
pub const ACCEL_MODE_VIA_VAAPI: u32 = 0x0400;

const ACCEL_MODE_NAMES: [(&str, u32); 3] = [
    ("MFX_ACCEL_MODE_NA", ACCEL_MODE_NA),
    ("MFX_ACCEL_MODE_VIA_D3D11", ACCEL_MODE_VIA_D3D11),
    ("MFX_ACCEL_MODE_VIA_VAAPI", ACCEL_MODE_VIA_VAAPI),
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CfgValue {
    U32(u32),
    Str(String),
}

impl CfgValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            Self::Str(_) => None,
        }
    }
}

impl fmt::Display for CfgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U32(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgParam {
    pub name: String,
    pub value: CfgValue,
}

impl CfgParam {
    pub fn new(name: impl Into<String>, value: CfgValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn codec(codec: CodecId) -> Self {
        Self::new(CODEC_ID_PARAM, CfgValue::U32(codec.0))
    }

    pub fn accel_mode(mode: u32) -> Self {
        Self::new(ACCEL_MODE_PARAM, CfgValue::U32(mode))
    }
}

impl FromStr for CfgParam {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, raw) = s
            .split_once(':')
            .ok_or_else(|| EngineError::Config(format!("expected name:value, got '{s}'")))?;
        let name = name.trim();
        let raw = raw.trim();
        if name.is_empty() {
            return Err(EngineError::Config(format!("empty parameter name in '{s}'")));
        }
        Ok(Self::new(name, parse_value(raw)))
    }
}

fn parse_value(raw: &str) -> CfgValue {
    if let Some(codec) = CodecId::from_name(raw) {
        return CfgValue::U32(codec.0);
    }
    if let Some((_, mode)) = ACCEL_MODE_NAMES.iter().find(|(n, _)| *n == raw) {
        return CfgValue::U32(*mode);
    }
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse::<u32>().ok(),
    };
    match parsed {
        Some(v) => CfgValue::U32(v),
        None => CfgValue::Str(raw.to_string()),
    }
}

/// Ordered parameter list; later duplicates do not override earlier ones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CfgParams(pub Vec<CfgParam>);

impl CfgParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: CfgParam) {
        self.0.push(param);
    }

    pub fn find(&self, name: &str) -> Option<&CfgParam> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CfgParam> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Codec id from [`CODEC_ID_PARAM`].
    pub fn codec_id(&self) -> Result<CodecId> {
        let param = self.find(CODEC_ID_PARAM).ok_or_else(|| {
            EngineError::Config(format!("Cannot determine decoder: '{CODEC_ID_PARAM}' is missing"))
        })?;
        param.value.as_u32().map(CodecId).ok_or_else(|| {
            EngineError::Config(format!(
                "'{CODEC_ID_PARAM}' must be a codec id, got '{}'",
                param.value
            ))
        })
    }

    /// Parse a list of `name:value` strings.
    pub fn parse_all<'a>(items: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        items
            .into_iter()
            .map(CfgParam::from_str)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromIterator<CfgParam> for CfgParams {
    fn from_iter<I: IntoIterator<Item = CfgParam>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symbolic_values() {
        let codec: CfgParam = format!("{CODEC_ID_PARAM}:MFX_CODEC_HEVC")
            .parse()
            .expect("codec param");
        assert_eq!(codec.value, CfgValue::U32(CodecId::HEVC.0));

        let mode: CfgParam = format!("{ACCEL_MODE_PARAM}:MFX_ACCEL_MODE_VIA_D3D11")
            .parse()
            .expect("accel param");
        assert_eq!(mode.value, CfgValue::U32(ACCEL_MODE_VIA_D3D11));
    }

    #[test]
    fn parses_numbers_and_strings() {
        let n: CfgParam = "mfxImplDescription.ApiVersion.Major:2".parse().expect("u32");
        assert_eq!(n.value, CfgValue::U32(2));
        let h: CfgParam = "x:0x10".parse().expect("hex");
        assert_eq!(h.value, CfgValue::U32(16));
        let s: CfgParam = "mfxImplName:mfx-gen".parse().expect("str");
        assert_eq!(s.value, CfgValue::Str("mfx-gen".into()));
    }

    #[test]
    fn rejects_malformed() {
        assert!("no-separator".parse::<CfgParam>().is_err());
        assert!(":value".parse::<CfgParam>().is_err());
    }

    #[test]
    fn missing_codec_is_config_error() {
        let params = CfgParams::new();
        assert!(matches!(params.codec_id(), Err(EngineError::Config(_))));
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let params = CfgParams::parse_all([
            "mfxImplDescription.mfxDecoderDescription.decoder.CodecID:MFX_CODEC_AVC",
            "mfxImplName:mock",
        ])
        .expect("parse");
        let json = params.to_json_string().expect("serialize");
        let back = CfgParams::from_json_str(&json).expect("deserialize");
        assert_eq!(back, params);
        assert_eq!(back.codec_id().expect("codec"), CodecId::AVC);
    }
}
