//! Compute device selection and system information.

use serde::{Deserialize, Serialize};

/// Device requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// Best available accelerator, CPU otherwise
    #[default]
    Auto,
    Cpu,
    Cuda,
    #[serde(alias = "mps")]
    Metal,
}

impl std::fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceChoice::Auto => write!(f, "auto"),
            DeviceChoice::Cpu => write!(f, "cpu"),
            DeviceChoice::Cuda => write!(f, "cuda"),
            DeviceChoice::Metal => write!(f, "metal"),
        }
    }
}

impl std::str::FromStr for DeviceChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DeviceChoice::Auto),
            "cpu" => Ok(DeviceChoice::Cpu),
            "cuda" | "gpu" => Ok(DeviceChoice::Cuda),
            "metal" | "mps" => Ok(DeviceChoice::Metal),
            other => Err(format!(
                "unknown device '{}' (expected auto, cpu, cuda, or metal)",
                other
            )),
        }
    }
}

/// Device the model actually runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
    Metal,
}

impl Device {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Device::Cpu)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::Metal => write!(f, "metal"),
        }
    }
}

/// Whether this build can use CUDA and a GPU is visible
pub fn cuda_available() -> bool {
    cfg!(feature = "cuda") && !list_cuda_devices().is_empty()
}

/// Whether this build can use Metal
pub fn metal_available() -> bool {
    cfg!(all(feature = "metal", target_os = "macos"))
}

/// GPU names reported by `nvidia-smi -L`. Empty when the tool is missing.
pub fn list_cuda_devices() -> Vec<String> {
    let output = match std::process::Command::new("nvidia-smi").arg("-L").output() {
        Ok(output) if output.status.success() => output,
        _ => return Vec::new(),
    };
    parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout))
}

fn parse_nvidia_smi(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter(|line| line.starts_with("GPU "))
        .map(|line| {
            let name = line.split_once(": ").map(|(_, rest)| rest).unwrap_or(line);
            let name = name.split(" (UUID").next().unwrap_or(name);
            name.trim().to_string()
        })
        .collect()
}

/// Resolve a user choice to a concrete device.
///
/// `Auto` prefers CUDA, then Metal, then CPU. An explicit accelerator that is
/// unavailable falls back to CPU with a warning.
pub fn detect_device(choice: DeviceChoice) -> Device {
    match choice {
        DeviceChoice::Cpu => Device::Cpu,
        DeviceChoice::Cuda => {
            if cuda_available() {
                Device::Cuda
            } else {
                tracing::warn!("CUDA requested but not available, using CPU");
                Device::Cpu
            }
        }
        DeviceChoice::Metal => {
            if metal_available() {
                Device::Metal
            } else {
                tracing::warn!("Metal requested but not available, using CPU");
                Device::Cpu
            }
        }
        DeviceChoice::Auto => {
            if cuda_available() {
                Device::Cuda
            } else if metal_available() {
                Device::Metal
            } else {
                Device::Cpu
            }
        }
    }
}

/// Host and accelerator summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu_count: usize,
    pub version: String,
    pub cuda_supported: bool,
    pub cuda_devices: Vec<String>,
    pub metal_supported: bool,
    pub default_device: Device,
}

impl SystemInfo {
    pub fn probe() -> Self {
        let cuda_devices = if cfg!(feature = "cuda") {
            list_cuda_devices()
        } else {
            Vec::new()
        };
        let cuda_supported = !cuda_devices.is_empty();
        let metal_supported = metal_available();

        let default_device = if cuda_supported {
            Device::Cuda
        } else if metal_supported {
            Device::Metal
        } else {
            Device::Cpu
        };

        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cuda_supported,
            cuda_devices,
            metal_supported,
            default_device,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_choice_parsing() {
        assert_eq!("AUTO".parse::<DeviceChoice>().unwrap(), DeviceChoice::Auto);
        assert_eq!("mps".parse::<DeviceChoice>().unwrap(), DeviceChoice::Metal);
        assert_eq!(" cpu ".parse::<DeviceChoice>().unwrap(), DeviceChoice::Cpu);
        assert!("tpu".parse::<DeviceChoice>().is_err());
    }

    #[test]
    fn test_device_choice_serde() {
        let choice: DeviceChoice = serde_json::from_str("\"mps\"").unwrap();
        assert_eq!(choice, DeviceChoice::Metal);
        assert_eq!(serde_json::to_string(&DeviceChoice::Cuda).unwrap(), "\"cuda\"");
    }

    #[test]
    fn test_explicit_cpu_always_wins() {
        assert_eq!(detect_device(DeviceChoice::Cpu), Device::Cpu);
    }

    #[test]
    fn test_parse_nvidia_smi() {
        let out = "GPU 0: NVIDIA GeForce RTX 4090 (UUID: GPU-1234)\nGPU 1: Tesla T4 (UUID: GPU-5678)\n";
        assert_eq!(
            parse_nvidia_smi(out),
            vec!["NVIDIA GeForce RTX 4090".to_string(), "Tesla T4".to_string()]
        );
        assert!(parse_nvidia_smi("").is_empty());
    }

    #[test]
    fn test_system_info_probe() {
        let info = SystemInfo::probe();
        assert!(info.cpu_count >= 1);
        assert!(!info.os.is_empty());
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("cudaSupported").is_some());
        assert!(json.get("cudaDevices").is_some());
    }
}
