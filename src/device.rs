//! Compute device selection and tensor placement.
//!
//! Device placement is a cross-cutting concern; it lives behind this small
//! capability so generation logic stays device-agnostic and testable without
//! an accelerator.

use candle_core::{DType, Device, Tensor};

use crate::error::Result;

/// The compute device a pipeline runs on, with its dtype policy.
///
/// F32 on CPU (no BF16 matmul there), BF16 on accelerators.
#[derive(Debug, Clone)]
pub struct ComputeDevice {
    device: Device,
    dtype: DType,
}

impl ComputeDevice {
    /// Select the best available device: CUDA when present, CPU otherwise.
    pub fn auto() -> Result<Self> {
        if candle_core::utils::cuda_is_available() {
            tracing::info!("using CUDA device 0");
            Ok(Self {
                device: Device::new_cuda(0)?,
                dtype: DType::BF16,
            })
        } else {
            tracing::info!("no accelerator available, using CPU");
            Ok(Self::cpu())
        }
    }

    /// A CPU-only device.
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            dtype: DType::F32,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_accelerator(&self) -> bool {
        !matches!(self.device, Device::Cpu)
    }

    /// Move a tensor onto this device. A no-op if it is already resident.
    pub fn place(&self, tensor: &Tensor) -> Result<Tensor> {
        Ok(tensor.to_device(&self.device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_dtype_policy() {
        let device = ComputeDevice::cpu();
        assert_eq!(device.dtype(), DType::F32);
        assert!(!device.is_accelerator());
    }

    #[test]
    fn test_place_is_noop_on_resident_tensor() -> Result<()> {
        let device = ComputeDevice::cpu();
        let tensor = Tensor::new(&[1u32, 2, 3], device.device())?;
        let placed = device.place(&tensor)?;
        assert_eq!(placed.to_vec1::<u32>()?, vec![1, 2, 3]);
        Ok(())
    }
}
