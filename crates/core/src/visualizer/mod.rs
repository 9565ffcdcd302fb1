//! The capability set every visualizer instance is judged against, and the
//! validator that decides whether a constructed value is usable.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
};

use serde::{Deserialize, Serialize};

use crate::{audio::AnalyserNode, preset::PresetEntry, HostError, HostResult};

/// Which optional operations an instance exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub render: bool,
    pub connect_audio: bool,
    pub load_preset: bool,
    pub set_renderer_size: bool,
    pub destroy: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        render: false,
        connect_audio: false,
        load_preset: false,
        set_renderer_size: false,
        destroy: false,
    };

    pub const ALL: Capabilities = Capabilities {
        render: true,
        connect_audio: true,
        load_preset: true,
        set_renderer_size: true,
        destroy: true,
    };

    /// True when at least one capability is present.
    pub fn any(&self) -> bool {
        self.render || self.connect_audio || self.load_preset || self.set_renderer_size || self.destroy
    }
}

/// A constructed visualizer.
///
/// Instances implement whichever operations they support and report them
/// through [`Visualizer::capabilities`]; the defaults answer like a missing
/// method would. Panics raised by any method are caught by the caller.
pub trait Visualizer: Send {
    fn capabilities(&self) -> Capabilities;

    fn render(&mut self) -> HostResult<()> {
        Err(HostError::missing("render"))
    }

    fn connect_audio(&mut self, _analyser: &AnalyserNode) -> HostResult<()> {
        Err(HostError::missing("connectAudio"))
    }

    fn load_preset(&mut self, _preset: &PresetEntry, _blend_seconds: f32) -> HostResult<()> {
        Err(HostError::missing("loadPreset"))
    }

    fn set_renderer_size(&mut self, _width: u32, _height: u32) -> HostResult<()> {
        Err(HostError::missing("setRendererSize"))
    }

    fn destroy(&mut self) {}

    /// Name used in diagnostics.
    fn label(&self) -> String {
        "external".to_string()
    }
}

/// Value produced by calling into the external library.
pub enum HostValue {
    Undefined,
    Null,
    /// A non-object such as a number or string, described for diagnostics.
    Primitive(String),
    Object(Box<dyn Visualizer>),
}

impl HostValue {
    pub fn object(instance: impl Visualizer + 'static) -> Self {
        Self::Object(Box::new(instance))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Primitive(_) => "primitive",
            Self::Object(_) => "object",
        }
    }

    pub fn into_instance(self) -> Option<Box<dyn Visualizer>> {
        match self {
            Self::Object(instance) => Some(instance),
            _ => None,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(text) => write!(f, "Primitive({text})"),
            Self::Object(_) => f.write_str("Object(..)"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// Sizing hints handed to the external library on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizerOptions {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f64,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            pixel_ratio: 1.0,
        }
    }
}

/// Does `value` look like a usable visualizer instance?
///
/// True iff it is an object exposing at least one capability. Never panics:
/// a failure while inspecting the value counts as `false`.
pub fn is_valid_visualizer(value: &HostValue) -> bool {
    match value {
        HostValue::Object(instance) => is_valid_instance(instance.as_ref()),
        _ => false,
    }
}

pub(crate) fn is_valid_instance(instance: &dyn Visualizer) -> bool {
    capabilities_of(instance).any()
}

/// Capabilities of `instance`, or none if inspecting it panics.
pub(crate) fn capabilities_of(instance: &dyn Visualizer) -> Capabilities {
    panic::catch_unwind(AssertUnwindSafe(|| instance.capabilities())).unwrap_or(Capabilities::NONE)
}

/// Runs an external call, turning a panic into a [`HostError`].
pub(crate) fn guarded<T>(call: impl FnOnce() -> HostResult<T>) -> HostResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => Err(HostError::new(
            crate::HostErrorKind::Other,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
