//! Candle glue: error mapping, device and dtype conversion

use candle_core::{DType as CandleDType, Device as CandleDevice, Result as CandleResult};
use instruct_ner_core::error::{DType, Device, Error, Result};

/// Convert a CandleResult to a crate Result
pub trait ToNerResult<T> {
    /// Map a tensor failure during generation or a forward pass
    fn ner_result(self) -> Result<T>;

    /// Map a failure while loading weights
    fn ner_loading(self) -> Result<T>;

    /// Map a failure in the training loop
    fn ner_training(self) -> Result<T>;
}

impl<T> ToNerResult<T> for CandleResult<T> {
    fn ner_result(self) -> Result<T> {
        self.map_err(|e| Error::Generation(e.to_string()))
    }

    fn ner_loading(self) -> Result<T> {
        self.map_err(|e| Error::ModelLoading(e.to_string()))
    }

    fn ner_training(self) -> Result<T> {
        self.map_err(|e| Error::Training(e.to_string()))
    }
}

/// Convert a device selection to a candle device
///
/// Unlike a silent CPU fallback, an unavailable accelerator is an error.
pub fn to_candle_device(device: &Device) -> Result<CandleDevice> {
    match device {
        Device::Cpu => Ok(CandleDevice::Cpu),
        Device::Gpu(id) => {
            CandleDevice::new_cuda(*id as usize).map_err(|e| Error::Device(format!("{}: {}", device, e)))
        }
        Device::Metal => CandleDevice::new_metal(0).map_err(|e| Error::Device(format!("{}: {}", device, e))),
    }
}

/// Convert a dtype selection to a candle dtype
pub fn to_candle_dtype(dtype: &DType) -> CandleDType {
    match dtype {
        DType::F32 => CandleDType::F32,
        DType::F16 => CandleDType::F16,
        DType::BF16 => CandleDType::BF16,
    }
}

/// Parse an HF `torch_dtype` string
pub fn dtype_from_torch_name(name: &str) -> Option<CandleDType> {
    match name {
        "float32" => Some(CandleDType::F32),
        "float16" => Some(CandleDType::F16),
        "bfloat16" => Some(CandleDType::BF16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_conversion() {
        assert!(matches!(to_candle_device(&Device::Cpu), Ok(CandleDevice::Cpu)));
        // without the metal feature this is an error, with it a metal device
        let metal = to_candle_device(&Device::Metal);
        assert!(matches!(metal, Ok(CandleDevice::Metal(_)) | Err(Error::Device(_))));
    }

    #[test]
    fn test_dtype_conversion() {
        assert!(matches!(to_candle_dtype(&DType::F32), CandleDType::F32));
        assert!(matches!(to_candle_dtype(&DType::F16), CandleDType::F16));
        assert!(matches!(to_candle_dtype(&DType::BF16), CandleDType::BF16));
        assert_eq!(dtype_from_torch_name("bfloat16"), Some(CandleDType::BF16));
        assert_eq!(dtype_from_torch_name("int8"), None);
    }

    #[test]
    fn test_error_mapping() {
        let failed: CandleResult<()> = Err(candle_core::Error::Msg("boom".to_string()));
        assert!(matches!(failed.ner_training(), Err(Error::Training(_))));
    }
}
