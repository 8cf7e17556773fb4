//! Render quality and engine selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Render quality requested by the job config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Fast rasterized preview quality
    #[default]
    Low,
    /// Path-traced final quality
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::High => "high",
        }
    }

    /// Engine the executor runs for this quality.
    pub fn engine(&self) -> RenderEngine {
        match self {
            Quality::Low => RenderEngine::Eevee,
            Quality::High => RenderEngine::Cycles,
        }
    }

    /// Parse a persisted flag, falling back to `Low` for anything unreadable.
    pub fn from_flag(raw: &[u8]) -> Self {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "high" => Ok(Quality::High),
            other => Err(format!("expected 'low' or 'high', got '{}'", other)),
        }
    }
}

/// Render engine passed to the render binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderEngine {
    Eevee,
    Cycles,
}

impl RenderEngine {
    /// Value of the `-E` argument.
    pub fn as_arg(&self) -> &'static str {
        match self {
            RenderEngine::Eevee => "BLENDER_EEVEE",
            RenderEngine::Cycles => "CYCLES",
        }
    }
}

impl fmt::Display for RenderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}
