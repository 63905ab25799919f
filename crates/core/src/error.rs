//! Core error types for instruction NER
use std::fmt;
use std::str::FromStr;

/// Result type alias for instruction NER
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Device for computation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Device {
    Cpu,
    Gpu(u32),
    Metal,
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl FromStr for Device {
    type Err = Error;

    /// Parses `cpu`, `cuda`, `cuda:N`, `gpu:N` or `metal`.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Gpu(0)),
            "metal" | "mps" => Ok(Self::Metal),
            other => {
                let ordinal = other
                    .strip_prefix("cuda:")
                    .or_else(|| other.strip_prefix("gpu:"))
                    .ok_or_else(|| Error::Device(format!("unknown device '{}'", s)))?;
                ordinal
                    .parse::<u32>()
                    .map(Self::Gpu)
                    .map_err(|_| Error::Device(format!("invalid device ordinal in '{}'", s)))
            }
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu(id) => write!(f, "cuda:{}", id),
            Self::Metal => write!(f, "metal"),
        }
    }
}

/// Data type for tensors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl Default for DType {
    fn default() -> Self {
        Self::F32
    }
}

/// Core error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Model loading error: {0}")]
    ModelLoading(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("LoRA error: {0}")]
    LoRA(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Entity parsing error: {0}")]
    EntityParsing(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device error: {0}")]
    Device(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ModelLoading("Model not found".to_string());
        assert_eq!(err.to_string(), "Model loading error: Model not found");
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CUDA".parse::<Device>().unwrap(), Device::Gpu(0));
        assert_eq!("cuda:2".parse::<Device>().unwrap(), Device::Gpu(2));
        assert_eq!("metal".parse::<Device>().unwrap(), Device::Metal);
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn test_device_display_round_trip() {
        let device = Device::Gpu(1);
        assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
    }
}
