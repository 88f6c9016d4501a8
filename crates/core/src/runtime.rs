use anyhow::{Context, Result};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    Bf16,
}

impl Precision {
    pub fn dtype(self) -> DType {
        match self {
            Precision::F32 => DType::F32,
            Precision::F16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

/// Resolve the requested backend into a candle device.
///
/// Returns the explicit dtype only when a precision was requested; callers
/// fall back to [`default_dtype_for_device`] otherwise.
pub fn prepare_device_and_dtype(
    device: DeviceKind,
    precision: Option<Precision>,
) -> Result<(Device, Option<DType>)> {
    let device = match device {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Cuda => Device::new_cuda(0).context("failed to initialise CUDA device 0")?,
        DeviceKind::Metal => {
            Device::new_metal(0).context("failed to initialise Metal device 0")?
        }
    };
    Ok((device, precision.map(Precision::dtype)))
}

/// Half precision on accelerators, full precision on CPU.
pub fn default_dtype_for_device(device: &Device) -> DType {
    if device.is_cuda() || device.is_metal() {
        DType::F16
    } else {
        DType::F32
    }
}
