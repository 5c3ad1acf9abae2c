//! Configuration system for the oxidized-xenon emulator

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub memory: MemoryConfig,
    pub cpu: CpuConfig,
    pub video: VideoConfig,
}

/// Physical memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Size of backing RAM in bytes; must be a power of two
    pub size: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            size: 512 * 1024 * 1024,
        }
    }
}

/// CPU emulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    /// Maximum number of instructions to execute before stopping
    pub max_cycles: u64,
    /// Data cache write policy: true = write-through, false = write-back
    pub write_through: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            max_cycles: u64::MAX,
            write_through: true,
        }
    }
}

/// Framebuffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}
