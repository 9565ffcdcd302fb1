//! Shapes the external visualizer library may arrive in, and the adapter that
//! narrows them to a single factory capability.

mod adapter;

pub use adapter::{adapt_candidate, CallableFactory, NormalizedCandidate};

use std::{fmt, sync::Arc};

use crate::{
    audio::{AnalyserNode, AudioContextHandle},
    render::{CanvasRef, GlContext},
    visualizer::{HostValue, VisualizerOptions},
    HostResult,
};

/// One positional argument passed to an external callable.
#[derive(Clone)]
pub enum ConstructorArg {
    GlContext(GlContext),
    /// `{ audioContext, analyser }` bundle.
    AudioBundle {
        audio_context: AudioContextHandle,
        analyser: AnalyserNode,
    },
    AudioContext(AudioContextHandle),
    Canvas(CanvasRef),
    Options(VisualizerOptions),
}

impl ConstructorArg {
    /// Short name of the argument's shape, for diagnostics.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::GlContext(_) => "gl",
            Self::AudioBundle { .. } => "audioBundle",
            Self::AudioContext(_) => "audioContext",
            Self::Canvas(_) => "canvas",
            Self::Options(_) => "options",
        }
    }
}

impl fmt::Debug for ConstructorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.shape())
    }
}

/// A callable export: either a plain factory function or a class constructor.
///
/// Calling a class without `new` (`call`) fails on some hosts, and calling a
/// factory with `new` (`construct`) may yield a degenerate object, so the
/// engine classifies callables before picking a convention.
pub trait ExternalCallable: Send + Sync {
    /// Plain invocation, `f(args...)`.
    fn call(&self, args: &[ConstructorArg]) -> HostResult<HostValue>;
    /// Constructor invocation, `new f(args...)`.
    fn construct(&self, args: &[ConstructorArg]) -> HostResult<HostValue>;
    /// Declaration source text, when the host can provide it.
    fn source_text(&self) -> Option<String> {
        None
    }
    /// Own enumerable members on the prototype, excluding `constructor`.
    fn prototype_members(&self) -> Vec<String> {
        Vec::new()
    }
    fn name(&self) -> String {
        "anonymous".to_string()
    }
}

/// The canonical capability the adapter produces.
pub trait VisualizerFactory: Send + Sync {
    fn create_visualizer(
        &self,
        canvas: &CanvasRef,
        audio_context: &AudioContextHandle,
        options: &VisualizerOptions,
    ) -> HostResult<HostValue>;
}

/// Raw, unvalidated value the host supplies as "the visualizer library".
#[derive(Clone)]
pub enum LibraryCandidate {
    /// `undefined`/`null`: the library never loaded.
    Missing,
    Callable(Arc<dyn ExternalCallable>),
    /// An object already exposing `createVisualizer`.
    FactoryObject(Arc<dyn VisualizerFactory>),
    /// A module namespace wrapping its payload in `default`.
    Module { default: Option<Box<LibraryCandidate>> },
    /// Anything else, described for diagnostics.
    Opaque(String),
}

impl LibraryCandidate {
    pub fn callable(callable: impl ExternalCallable + 'static) -> Self {
        Self::Callable(Arc::new(callable))
    }

    pub fn factory(factory: impl VisualizerFactory + 'static) -> Self {
        Self::FactoryObject(Arc::new(factory))
    }

    pub fn wrapped(inner: LibraryCandidate) -> Self {
        Self::Module {
            default: Some(Box::new(inner)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Missing => "missing".to_string(),
            Self::Callable(callable) => format!("callable `{}`", callable.name()),
            Self::FactoryObject(_) => "factory object".to_string(),
            Self::Module { default: Some(_) } => "module with default export".to_string(),
            Self::Module { default: None } => "module without default export".to_string(),
            Self::Opaque(text) => format!("opaque value ({text})"),
        }
    }
}

impl fmt::Debug for LibraryCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
