//! Core library for the audio-reactive visualization engine.
//!
//! The engine couples a live audio graph (one shared context, a persistent
//! analysis node, and at most one attached input) to a visualizer instance
//! built from an external library of unknown shape. When that library cannot
//! be loaded or instantiated, a built-in waveform renderer takes its place so
//! the canvas keeps showing live audio. Host facilities (audio, permission
//! prompts, canvas, frame scheduling) are reached through the traits in
//! [`audio`] and [`render`]; [`platform::headless`] implements them in
//! process.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod instantiate;
pub mod library;
pub mod platform;
pub mod preset;
pub mod render;
pub mod visualizer;

pub use audio::{AnalyserNode, AudioContextHandle, AudioSourceKind, DeviceInfo};
pub use config::{AudioConfig, EngineConfig, FallbackConfig, RenderConfig};
pub use engine::{Engine, EngineStatus, ErrorCallback, Platform};
pub use error::{EngineError, ErrorKind, HostError, HostErrorKind, HostResult, Result};
pub use fallback::FallbackVisualizer;
pub use library::{adapt_candidate, LibraryCandidate, NormalizedCandidate};
pub use preset::{PresetEntry, PresetLibrary};
pub use render::{LoopPhase, RenderLoopController};
pub use visualizer::{is_valid_visualizer, Capabilities, HostValue, Visualizer};
