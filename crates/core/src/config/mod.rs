use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Top-level configuration structure for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub render: RenderConfig,
    pub fallback: FallbackConfig,
}

impl EngineConfig {
    /// Parses a (possibly partial) JSON document. Missing keys keep defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let fft = self.audio.fft_size;
        if !fft.is_power_of_two() || !(32..=32_768).contains(&fft) {
            return Err(EngineError::msg(format!(
                "fft_size must be a power of two between 32 and 32768, got {fft}"
            )));
        }
        if !(0.0..=1.0).contains(&self.audio.smoothing_time_constant) {
            return Err(EngineError::msg("smoothing_time_constant must be within [0, 1]"));
        }
        if self.render.preset_blend_seconds < 0.0 || self.render.initial_blend_seconds < 0.0 {
            return Err(EngineError::msg("blend durations cannot be negative"));
        }
        Ok(())
    }
}

/// Configuration specific to the audio graph and capture constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Size of the persistent analysis node's sample window.
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    /// Route captured audio to audible playback on startup.
    pub monitoring: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            monitoring: false,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

/// Preset blend timing used by the render loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Blend applied when a freshly constructed instance loads its first preset.
    pub initial_blend_seconds: f32,
    /// Blend applied to preset changes while already running.
    pub preset_blend_seconds: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            initial_blend_seconds: 0.0,
            preset_blend_seconds: 5.7,
        }
    }
}

/// Appearance of the built-in waveform renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub background: [u8; 4],
    pub stroke: [u8; 4],
    pub line_width: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            background: [0, 0, 0, 255],
            stroke: [0, 255, 135, 255],
            line_width: 2,
        }
    }
}
