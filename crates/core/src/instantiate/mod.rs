//! Instantiation strategy engine.
//!
//! A normalised candidate is classified once and then tried against a
//! bounded, ordered list of calling conventions. A thrown error and a value
//! the validator rejects are both just "try the next one".

use std::fmt;

use serde::Serialize;

use crate::{
    audio::{AnalyserNode, AudioContextHandle},
    library::{ConstructorArg, ExternalCallable, NormalizedCandidate},
    render::{CanvasRef, GlContext},
    visualizer::{self, HostValue, Visualizer, VisualizerOptions},
    EngineError, ErrorKind, Result,
};

/// One calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Strategy {
    /// `factory.createVisualizer(canvas, audioContext, options)`.
    CreateVisualizer,
    /// `f(audioContext, canvas, options)`.
    FactoryCall,
    /// `new F(gl, { audioContext, analyser }, options)`.
    GlAudioBundle,
    /// `new F(gl, audioContext, options)`.
    GlAudioContext,
    /// `new F(gl, canvas, options)`.
    GlCanvas,
    /// `new F(audioContext, canvas, options)`.
    AudioContextCanvas,
    /// `new F(canvas, audioContext, options)`.
    CanvasAudioContext,
    /// `new F(canvas, options)`.
    CanvasOptions,
    /// `new F(canvas)`.
    CanvasOnly,
    /// `new F()`.
    NoArgs,
}

/// Constructor argument shapes, in the order they are tried.
pub const CONSTRUCTOR_STRATEGIES: [Strategy; 8] = [
    Strategy::GlAudioBundle,
    Strategy::GlAudioContext,
    Strategy::GlCanvas,
    Strategy::AudioContextCanvas,
    Strategy::CanvasAudioContext,
    Strategy::CanvasOptions,
    Strategy::CanvasOnly,
    Strategy::NoArgs,
];

impl Strategy {
    /// Positional arguments for this strategy; `None` if a GL context is
    /// required but unavailable.
    fn args(self, inputs: &StrategyInputs, gl: Option<&GlContext>) -> Option<Vec<ConstructorArg>> {
        let canvas = || ConstructorArg::Canvas(inputs.canvas.clone());
        let audio = || ConstructorArg::AudioContext(inputs.audio_context.clone());
        let options = || ConstructorArg::Options(inputs.options.clone());
        let gl_arg = || gl.cloned().map(ConstructorArg::GlContext);

        let args = match self {
            Self::CreateVisualizer => vec![canvas(), audio(), options()],
            Self::FactoryCall => vec![audio(), canvas(), options()],
            Self::GlAudioBundle => vec![
                gl_arg()?,
                ConstructorArg::AudioBundle {
                    audio_context: inputs.audio_context.clone(),
                    analyser: inputs.analyser.clone(),
                },
                options(),
            ],
            Self::GlAudioContext => vec![gl_arg()?, audio(), options()],
            Self::GlCanvas => vec![gl_arg()?, canvas(), options()],
            Self::AudioContextCanvas => vec![audio(), canvas(), options()],
            Self::CanvasAudioContext => vec![canvas(), audio(), options()],
            Self::CanvasOptions => vec![canvas(), options()],
            Self::CanvasOnly => vec![canvas()],
            Self::NoArgs => Vec::new(),
        };
        Some(args)
    }
}

/// Handles every strategy may draw its arguments from.
#[derive(Clone)]
pub struct StrategyInputs {
    pub canvas: CanvasRef,
    pub audio_context: AudioContextHandle,
    pub analyser: AnalyserNode,
    pub options: VisualizerOptions,
}

impl StrategyInputs {
    pub fn new(
        canvas: CanvasRef,
        audio_context: AudioContextHandle,
        options: VisualizerOptions,
    ) -> Result<Self> {
        let analyser = audio_context.analyser()?;
        Ok(Self {
            canvas,
            audio_context,
            analyser,
            options,
        })
    }
}

/// How a callable candidate behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallableKind {
    ClassLike,
    FactoryLike,
}

/// Classifies a callable. Either a class-declaration source text or a
/// prototype carrying own members marks it class-like.
pub fn classify(callable: &dyn ExternalCallable) -> CallableKind {
    let declared_class = callable
        .source_text()
        .map(|text| looks_like_class_source(&text))
        .unwrap_or(false);
    let has_members = callable
        .prototype_members()
        .iter()
        .any(|member| member != "constructor");

    if declared_class || has_members {
        CallableKind::ClassLike
    } else {
        CallableKind::FactoryLike
    }
}

fn looks_like_class_source(text: &str) -> bool {
    match text.trim_start().strip_prefix("class") {
        Some(rest) => rest.starts_with(|c: char| c.is_whitespace() || c == '{'),
        None => false,
    }
}

/// Which convention a callable is tried with first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOrder {
    /// Direct call, then every constructor shape.
    FactoryFirst,
    /// Every constructor shape, then one direct call.
    ConstructorsFirst,
}

impl CallOrder {
    fn sequence(self) -> Vec<Strategy> {
        match self {
            Self::FactoryFirst => std::iter::once(Strategy::FactoryCall)
                .chain(CONSTRUCTOR_STRATEGIES)
                .collect(),
            Self::ConstructorsFirst => CONSTRUCTOR_STRATEGIES
                .into_iter()
                .chain(std::iter::once(Strategy::FactoryCall))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AttemptOutcome {
    Accepted,
    Threw(String),
    /// Returned a value the validator rejected.
    Invalid(&'static str),
    Skipped(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub strategy: Strategy,
    pub outcome: AttemptOutcome,
}

/// A working instance and how it was obtained.
pub struct Instantiated {
    pub instance: Box<dyn Visualizer>,
    pub strategy: Strategy,
    pub attempts: Vec<Attempt>,
}

impl fmt::Debug for Instantiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instantiated")
            .field("strategy", &self.strategy)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Structured total failure: which strategies were tried and how each ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantiationFailure {
    pub kind: ErrorKind,
    pub candidate: String,
    pub attempts: Vec<Attempt>,
}

impl InstantiationFailure {
    pub fn summary(&self) -> String {
        if self.attempts.is_empty() {
            return format!("{} is not a usable visualizer library", self.candidate);
        }
        let tried: Vec<String> = self
            .attempts
            .iter()
            .map(|attempt| match &attempt.outcome {
                AttemptOutcome::Threw(message) => format!("{:?} threw ({message})", attempt.strategy),
                AttemptOutcome::Invalid(found) => {
                    format!("{:?} returned invalid {found}", attempt.strategy)
                }
                AttemptOutcome::Skipped(reason) => format!("{:?} skipped ({reason})", attempt.strategy),
                AttemptOutcome::Accepted => format!("{:?} accepted", attempt.strategy),
            })
            .collect();
        format!("{}: {}", self.candidate, tried.join("; "))
    }

    pub fn to_error(&self) -> EngineError {
        EngineError::new(self.kind, self.summary())
    }
}

/// Produces a working instance from a normalised candidate.
pub fn instantiate(
    candidate: &NormalizedCandidate,
    inputs: &StrategyInputs,
) -> std::result::Result<Instantiated, InstantiationFailure> {
    match candidate {
        NormalizedCandidate::Factory(factory) => {
            let result = visualizer::guarded(|| {
                factory.create_visualizer(&inputs.canvas, &inputs.audio_context, &inputs.options)
            });
            let mut attempts = Vec::new();
            if let Some(instance) = judge(Strategy::CreateVisualizer, result, &mut attempts) {
                return Ok(finish(instance, Strategy::CreateVisualizer, attempts, inputs));
            }
            Err(InstantiationFailure {
                kind: ErrorKind::InstantiationFailed,
                candidate: "factory object".to_string(),
                attempts,
            })
        }
        NormalizedCandidate::Callable(factory) => {
            let callable = factory.callable().as_ref();
            let kind = classify(callable);
            tracing::debug!(name = %callable.name(), ?kind, "classified callable candidate");
            let order = match kind {
                CallableKind::ClassLike => CallOrder::ConstructorsFirst,
                CallableKind::FactoryLike => CallOrder::FactoryFirst,
            };
            run_callable(callable, inputs, order)
        }
        NormalizedCandidate::Unrecognized(raw) => Err(InstantiationFailure {
            kind: ErrorKind::LibraryUnavailable,
            candidate: raw.describe(),
            attempts: Vec::new(),
        }),
    }
}

/// Tries `callable` under every strategy in `order`, stopping at the first
/// one that neither throws nor yields an invalid value.
pub(crate) fn run_callable(
    callable: &dyn ExternalCallable,
    inputs: &StrategyInputs,
    order: CallOrder,
) -> std::result::Result<Instantiated, InstantiationFailure> {
    let gl = inputs.canvas.gl_context();
    let mut attempts = Vec::new();

    for strategy in order.sequence() {
        let Some(args) = strategy.args(inputs, gl.as_ref()) else {
            tracing::debug!(?strategy, "skipping strategy without a GL context");
            attempts.push(Attempt {
                strategy,
                outcome: AttemptOutcome::Skipped("no GL context"),
            });
            continue;
        };

        let result = visualizer::guarded(|| match strategy {
            Strategy::FactoryCall => callable.call(&args),
            _ => callable.construct(&args),
        });
        if let Some(instance) = judge(strategy, result, &mut attempts) {
            return Ok(finish(instance, strategy, attempts, inputs));
        }
    }

    Err(InstantiationFailure {
        kind: ErrorKind::InstantiationFailed,
        candidate: format!("callable `{}`", callable.name()),
        attempts,
    })
}

fn judge(
    strategy: Strategy,
    result: crate::HostResult<HostValue>,
    attempts: &mut Vec<Attempt>,
) -> Option<Box<dyn Visualizer>> {
    let outcome = match result {
        Err(err) => AttemptOutcome::Threw(err.message),
        Ok(value) if visualizer::is_valid_visualizer(&value) => {
            attempts.push(Attempt {
                strategy,
                outcome: AttemptOutcome::Accepted,
            });
            tracing::debug!(?strategy, "strategy produced a valid instance");
            return value.into_instance();
        }
        Ok(value) => AttemptOutcome::Invalid(value.type_name()),
    };
    tracing::debug!(?strategy, ?outcome, "strategy failed");
    attempts.push(Attempt { strategy, outcome });
    None
}

fn finish(
    mut instance: Box<dyn Visualizer>,
    strategy: Strategy,
    attempts: Vec<Attempt>,
    inputs: &StrategyInputs,
) -> Instantiated {
    if visualizer::capabilities_of(instance.as_ref()).connect_audio {
        if let Err(err) = visualizer::guarded(|| instance.connect_audio(&inputs.analyser)) {
            tracing::debug!(%err, "connectAudio failed after construction");
        }
    }
    Instantiated {
        instance,
        strategy,
        attempts,
    }
}
