//! Device and context selection from configuration parameters.
//!
//! The selector turns the acceleration-mode parameter (and, for texture
//! modes, an explicitly supplied device) into a ranked device list and a
//! context.  [`create_acceleration_policy`] then picks the policy variant
//! matching the best device.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use hwdec_core::config::{
    ACCEL_MODE_NA, ACCEL_MODE_PARAM, ACCEL_MODE_VIA_D3D11, CfgParams,
};
use hwdec_core::device::DeviceHandle;
use hwdec_core::error::{EngineError, Result};

use crate::host::HostAccelerationPolicy;
use crate::policy::{AccelType, AccelerationPolicy, PolicyTunables};
use crate::texture::TextureAccelerationPolicy;

/// Device ranking; higher is better.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Score(pub u32);

impl Score {
    pub const MAX: Self = Self(u32::MAX);
    pub const MIN: Self = Self(0);
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: u32,
    pub accel: AccelType,
    pub handle: DeviceHandle,
}

#[derive(Clone, Debug)]
pub struct Context {
    pub accel: AccelType,
    pub handle: DeviceHandle,
}

pub trait DeviceSelector: Send + Sync {
    /// Candidate devices, best first.
    fn select_devices(&self) -> Vec<(Score, Device)>;

    fn select_spare_devices(&self) -> Vec<(Score, Device)>;

    fn select_context(&self) -> Context;
}

/// Selector driven by `mfxImplDescription.AccelerationMode`.
pub struct CfgParamDeviceSelector {
    device: Device,
    context: Context,
}

impl CfgParamDeviceSelector {
    /// Host selection.  Texture modes need a device; use [`Self::with_device`].
    pub fn new(params: &CfgParams) -> Result<Self> {
        let mode = match params.find(ACCEL_MODE_PARAM) {
            None => ACCEL_MODE_NA,
            Some(p) => p.value.as_u32().ok_or_else(|| {
                EngineError::Config(format!("{ACCEL_MODE_PARAM} must be numeric, got {}", p.value))
            })?,
        };
        match mode {
            ACCEL_MODE_NA => {
                info!("Device selector: host");
                Ok(Self::host())
            }
            ACCEL_MODE_VIA_D3D11 => Err(EngineError::Config(
                "texture acceleration needs an explicit device; use with_device".into(),
            )),
            other => Err(unsupported_mode(other)),
        }
    }

    /// Texture selection around a caller-owned device and context.
    pub fn with_device(
        device: DeviceHandle,
        device_id: u32,
        context: DeviceHandle,
        params: &CfgParams,
    ) -> Result<Self> {
        let param = params.find(ACCEL_MODE_PARAM).ok_or_else(|| {
            EngineError::Config(format!("{ACCEL_MODE_PARAM} is required with an explicit device"))
        })?;
        let mode = param.value.as_u32().ok_or_else(|| {
            EngineError::Config(format!("{ACCEL_MODE_PARAM} must be numeric, got {}", param.value))
        })?;
        match mode {
            ACCEL_MODE_NA => Err(EngineError::Config(format!(
                "{ACCEL_MODE_PARAM} is NA but a device was supplied"
            ))),
            ACCEL_MODE_VIA_D3D11 => {
                if matches!(device, DeviceHandle::Host) {
                    return Err(EngineError::Config("texture mode needs a texture device".into()));
                }
                if matches!(context, DeviceHandle::Host) {
                    return Err(EngineError::Config("texture mode needs a texture context".into()));
                }
                info!(device_id, device = ?device, "Device selector: texture");
                Ok(Self {
                    device: Device {
                        id: device_id,
                        accel: AccelType::Texture,
                        handle: device,
                    },
                    context: Context {
                        accel: AccelType::Texture,
                        handle: context,
                    },
                })
            }
            other => Err(unsupported_mode(other)),
        }
    }

    fn host() -> Self {
        Self {
            device: Device {
                id: 0,
                accel: AccelType::Host,
                handle: DeviceHandle::Host,
            },
            context: Context {
                accel: AccelType::Host,
                handle: DeviceHandle::Host,
            },
        }
    }
}

fn unsupported_mode(mode: u32) -> EngineError {
    EngineError::Config(format!("unsupported acceleration mode {mode:#06x}"))
}

impl DeviceSelector for CfgParamDeviceSelector {
    fn select_devices(&self) -> Vec<(Score, Device)> {
        vec![(Score::MAX, self.device.clone())]
    }

    fn select_spare_devices(&self) -> Vec<(Score, Device)> {
        Vec::new()
    }

    fn select_context(&self) -> Context {
        self.context.clone()
    }
}

impl fmt::Debug for CfgParamDeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CfgParamDeviceSelector")
            .field("device", &self.device)
            .finish()
    }
}

/// Instantiate the policy for the selector's best device.
pub fn create_acceleration_policy(
    selector: &dyn DeviceSelector,
    tunables: PolicyTunables,
) -> Result<Box<dyn AccelerationPolicy>> {
    let (_, best) = selector
        .select_devices()
        .into_iter()
        .max_by_key(|(score, _)| *score)
        .ok_or_else(|| EngineError::Config("device selector returned no devices".into()))?;
    match (best.accel, best.handle) {
        (AccelType::Host, _) => Ok(Box::new(HostAccelerationPolicy::new(tunables))),
        (AccelType::Texture, DeviceHandle::Texture(device)) => {
            Ok(Box::new(TextureAccelerationPolicy::new(Arc::clone(&device), tunables)))
        }
        (AccelType::Texture, DeviceHandle::Host) => Err(EngineError::Config(
            "texture device selected without a texture handle".into(),
        )),
    }
}
