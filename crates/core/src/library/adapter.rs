use std::{fmt, sync::Arc};

use crate::{
    audio::AudioContextHandle,
    instantiate::{self, CallOrder, StrategyInputs},
    library::{ExternalCallable, LibraryCandidate, VisualizerFactory},
    render::CanvasRef,
    visualizer::{HostValue, VisualizerOptions},
    HostError, HostResult,
};

/// Outcome of [`adapt_candidate`].
#[derive(Clone)]
pub enum NormalizedCandidate {
    /// The candidate already exposed `createVisualizer`; passed through.
    Factory(Arc<dyn VisualizerFactory>),
    /// A callable wrapped as a factory.
    Callable(CallableFactory),
    /// Could not be classified; returned unchanged.
    Unrecognized(LibraryCandidate),
}

impl NormalizedCandidate {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl fmt::Debug for NormalizedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory(_) => f.write_str("Factory"),
            Self::Callable(factory) => write!(f, "Callable({})", factory.callable.name()),
            Self::Unrecognized(raw) => write!(f, "Unrecognized({})", raw.describe()),
        }
    }
}

/// Normalises a raw candidate. Never fails; it only narrows or passes through.
pub fn adapt_candidate(raw: LibraryCandidate) -> NormalizedCandidate {
    let unwrapped = match raw {
        LibraryCandidate::Module {
            default: Some(inner),
        } => *inner,
        other => other,
    };

    match unwrapped {
        LibraryCandidate::Callable(callable) => {
            NormalizedCandidate::Callable(CallableFactory::new(callable))
        }
        LibraryCandidate::FactoryObject(factory) => NormalizedCandidate::Factory(factory),
        other => NormalizedCandidate::Unrecognized(other),
    }
}

/// A callable export presented as a [`VisualizerFactory`].
///
/// `create_visualizer` calls the function directly first and falls back to
/// constructing it under the documented argument orders.
#[derive(Clone)]
pub struct CallableFactory {
    callable: Arc<dyn ExternalCallable>,
}

impl CallableFactory {
    pub fn new(callable: Arc<dyn ExternalCallable>) -> Self {
        Self { callable }
    }

    pub fn callable(&self) -> &Arc<dyn ExternalCallable> {
        &self.callable
    }
}

impl VisualizerFactory for CallableFactory {
    fn create_visualizer(
        &self,
        canvas: &CanvasRef,
        audio_context: &AudioContextHandle,
        options: &VisualizerOptions,
    ) -> HostResult<HostValue> {
        let inputs = StrategyInputs::new(canvas.clone(), audio_context.clone(), options.clone())
            .map_err(|err| HostError::type_error(err.to_string()))?;

        instantiate::run_callable(self.callable.as_ref(), &inputs, CallOrder::FactoryFirst)
            .map(|built| HostValue::Object(built.instance))
            .map_err(|failure| HostError::type_error(failure.summary()))
    }
}
