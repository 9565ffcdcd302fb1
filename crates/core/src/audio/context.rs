use std::{
    collections::HashSet,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::{
    audio::AnalyserNode, AudioConfig, EngineError, ErrorKind, HostError, HostResult, Result,
};

/// Node kinds a preset may ask the audio context for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Gain,
    Delay,
    BiquadFilter,
    DynamicsCompressor,
    StereoPanner,
}

/// Optional node kinds that receive a pass-through shim when the host lacks them.
pub const OPTIONAL_NODE_KINDS: [NodeKind; 4] = [
    NodeKind::Delay,
    NodeKind::BiquadFilter,
    NodeKind::DynamicsCompressor,
    NodeKind::StereoPanner,
];

/// Where a graph node sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTarget {
    Analyser,
    Destination,
    Node(NodeKind),
}

/// Minimal call surface shared by native nodes and shims.
pub trait GraphNode: Send {
    fn kind(&self) -> NodeKind;
    fn connect(&mut self, target: NodeTarget) -> HostResult<()>;
    fn disconnect(&mut self);
    fn is_shim(&self) -> bool {
        false
    }
}

/// Host audio context. Implemented by the embedding platform.
pub trait AudioBackend: Send {
    fn sample_rate(&self) -> u32;
    /// Returns `None` when the host has no constructor for `kind`.
    fn create_native_node(&self, kind: NodeKind) -> Option<Box<dyn GraphNode>>;
    /// Routes the analysis output to (or away from) audible playback.
    fn set_destination_connected(&mut self, connected: bool) -> HostResult<()>;
    fn close(&mut self);
}

/// Entry point used to create audio contexts on the host.
pub trait AudioPlatform: Send + Sync {
    /// Returns `None` when no audio context constructor exists at all.
    fn create_context(&self) -> Option<Box<dyn AudioBackend>>;
}

/// Pass-through stand-in for a node the host cannot construct.
#[derive(Debug)]
pub struct PassThroughNode {
    kind: NodeKind,
    target: Option<NodeTarget>,
}

impl PassThroughNode {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, target: None }
    }

    pub fn target(&self) -> Option<NodeTarget> {
        self.target
    }
}

impl GraphNode for PassThroughNode {
    fn kind(&self) -> NodeKind {
        self.kind
    }

    fn connect(&mut self, target: NodeTarget) -> HostResult<()> {
        self.target = Some(target);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.target = None;
    }

    fn is_shim(&self) -> bool {
        true
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to the audio context and its persistent analysis node.
#[derive(Clone)]
pub struct AudioContextHandle {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: u64,
    sample_rate: u32,
    backend: Mutex<Box<dyn AudioBackend>>,
    analyser: Mutex<AnalyserNode>,
    shims: HashSet<NodeKind>,
    monitoring: AtomicBool,
    closed: AtomicBool,
}

impl AudioContextHandle {
    fn new(backend: Box<dyn AudioBackend>, config: &AudioConfig) -> Result<Self> {
        let sample_rate = backend.sample_rate();
        let analyser =
            AnalyserNode::new(sample_rate, config.fft_size, config.smoothing_time_constant)?;

        let shims: HashSet<NodeKind> = OPTIONAL_NODE_KINDS
            .iter()
            .copied()
            .filter(|kind| backend.create_native_node(*kind).is_none())
            .collect();
        if !shims.is_empty() {
            tracing::debug!(?shims, "installed pass-through shims for missing node kinds");
        }

        Ok(Self {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                sample_rate,
                backend: Mutex::new(backend),
                analyser: Mutex::new(analyser),
                shims,
                monitoring: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Returns the current analysis node.
    pub fn analyser(&self) -> Result<AnalyserNode> {
        Ok(self.lock_analyser()?.clone())
    }

    /// Creates a node, substituting a shim when the host lacks the kind.
    pub fn create_node(&self, kind: NodeKind) -> Result<Box<dyn GraphNode>> {
        if self.inner.shims.contains(&kind) {
            return Ok(Box::new(PassThroughNode::new(kind)));
        }

        let backend = self.lock_backend()?;
        backend.create_native_node(kind).ok_or_else(|| {
            EngineError::new(
                ErrorKind::ConnectionFailed,
                format!("host cannot create {kind:?} nodes"),
            )
        })
    }

    pub fn is_shimmed(&self, kind: NodeKind) -> bool {
        self.inner.shims.contains(&kind)
    }

    /// Routes the analysis node to audible playback when `enabled`.
    pub fn set_monitoring(&self, enabled: bool) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut backend = self.lock_backend()?;
        backend
            .set_destination_connected(enabled)
            .map_err(|err| connection_failed("monitoring route", &err))?;
        self.inner.monitoring.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    pub fn monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same context.
    pub fn same_context(&self, other: &AudioContextHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn replace_analyser(&self, config: &AudioConfig) -> Result<AnalyserNode> {
        let fresh = AnalyserNode::new(
            self.inner.sample_rate,
            config.fft_size,
            config.smoothing_time_constant,
        )?;
        let mut slot = self.lock_analyser()?;
        *slot = fresh.clone();
        Ok(fresh)
    }

    fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut backend = self.lock_backend()?;
        if self.inner.monitoring.swap(false, Ordering::SeqCst) {
            let _ = backend.set_destination_connected(false);
        }
        backend.close();
        Ok(())
    }

    fn lock_backend(&self) -> Result<MutexGuard<'_, Box<dyn AudioBackend>>> {
        self.inner
            .backend
            .lock()
            .map_err(|_| EngineError::msg("audio context has been poisoned"))
    }

    fn lock_analyser(&self) -> Result<MutexGuard<'_, AnalyserNode>> {
        self.inner
            .analyser
            .lock()
            .map_err(|_| EngineError::msg("analysis node slot has been poisoned"))
    }
}

impl fmt::Debug for AudioContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContextHandle")
            .field("id", &self.inner.id)
            .field("sample_rate", &self.inner.sample_rate)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) fn connection_failed(what: &str, err: &HostError) -> EngineError {
    EngineError::new(ErrorKind::ConnectionFailed, format!("{what}: {err}"))
}

/// Owns the engine's audio context and creates it lazily.
pub struct AudioContextManager {
    platform: Arc<dyn AudioPlatform>,
    config: AudioConfig,
    current: Option<AudioContextHandle>,
    desired_monitoring: bool,
    route_error: Option<EngineError>,
}

impl AudioContextManager {
    pub fn new(platform: Arc<dyn AudioPlatform>, config: AudioConfig) -> Self {
        let desired_monitoring = config.monitoring;
        Self {
            platform,
            config,
            current: None,
            desired_monitoring,
            route_error: None,
        }
    }

    /// Returns the live context, creating it (and its analyser) on first use.
    pub fn ensure_audio_context(&mut self) -> Result<AudioContextHandle> {
        if let Some(handle) = &self.current {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }

        let backend = self.platform.create_context().ok_or_else(|| {
            EngineError::new(
                ErrorKind::AudioContextUnavailable,
                "host exposes no audio context constructor",
            )
        })?;
        let handle = AudioContextHandle::new(backend, &self.config)?;
        tracing::info!(
            context = handle.id(),
            sample_rate = handle.sample_rate(),
            fft_size = self.config.fft_size,
            "created audio context"
        );

        self.current = Some(handle.clone());
        if self.desired_monitoring {
            if let Err(err) = handle.set_monitoring(true) {
                tracing::warn!(%err, context = handle.id(), "monitoring route unavailable");
                self.route_error = Some(err);
            }
        }
        Ok(handle)
    }

    /// Takes the monitoring failure recorded while creating the context.
    pub fn take_route_error(&mut self) -> Option<EngineError> {
        self.route_error.take()
    }

    pub fn current(&self) -> Option<&AudioContextHandle> {
        self.current.as_ref().filter(|handle| !handle.is_closed())
    }

    /// Records the monitoring preference and applies it to a live context.
    pub fn set_monitoring(&mut self, enabled: bool) -> Result<()> {
        self.desired_monitoring = enabled;
        match self.current() {
            Some(handle) => handle.set_monitoring(enabled),
            None => Ok(()),
        }
    }

    pub fn monitoring(&self) -> bool {
        self.desired_monitoring
    }

    /// Swaps the persistent analysis node for a fresh one.
    pub fn replace_analyser(&mut self) -> Result<AnalyserNode> {
        let handle = self.ensure_audio_context()?;
        let fresh = handle.replace_analyser(&self.config)?;
        tracing::info!(context = handle.id(), "replaced analysis node");
        Ok(fresh)
    }

    /// Closes the context. A later `ensure_audio_context` creates a new one.
    pub fn release(&mut self) -> Result<()> {
        if let Some(handle) = self.current.take() {
            tracing::info!(context = handle.id(), "releasing audio context");
            handle.close()?;
        }
        Ok(())
    }
}

impl fmt::Debug for AudioContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContextManager")
            .field("current", &self.current)
            .field("desired_monitoring", &self.desired_monitoring)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::HeadlessAudioPlatform;

    fn manager(platform: HeadlessAudioPlatform) -> AudioContextManager {
        AudioContextManager::new(Arc::new(platform), AudioConfig::default())
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut audio = manager(HeadlessAudioPlatform::new(48_000));
        let first = audio.ensure_audio_context().unwrap();
        let second = audio.ensure_audio_context().unwrap();

        assert!(first.same_context(&second));
        assert!(first
            .analyser()
            .unwrap()
            .same_node(&second.analyser().unwrap()));
        assert_eq!(first.analyser().unwrap().fft_size().unwrap(), 2048);
    }

    #[test]
    fn fails_without_constructor() {
        let mut audio = manager(HeadlessAudioPlatform::unavailable());
        let err = audio.ensure_audio_context().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::AudioContextUnavailable));
    }

    #[test]
    fn shims_missing_optional_nodes() {
        let platform = HeadlessAudioPlatform::new(44_100).with_native_nodes(&[NodeKind::Gain]);
        let mut audio = manager(platform);
        let ctx = audio.ensure_audio_context().unwrap();

        assert!(ctx.is_shimmed(NodeKind::Delay));
        let mut delay = ctx.create_node(NodeKind::Delay).unwrap();
        assert!(delay.is_shim());
        delay.connect(NodeTarget::Analyser).unwrap();
        delay.disconnect();

        let gain = ctx.create_node(NodeKind::Gain).unwrap();
        assert!(!gain.is_shim());
    }

    #[test]
    fn release_closes_and_recreates() {
        let platform = HeadlessAudioPlatform::new(48_000);
        let probe = platform.probe();
        let mut audio = manager(platform);
        let first = audio.ensure_audio_context().unwrap();

        audio.release().unwrap();
        assert!(first.is_closed());
        assert_eq!(probe.closed_contexts(), 1);

        let second = audio.ensure_audio_context().unwrap();
        assert!(!second.same_context(&first));
    }

    #[test]
    fn monitoring_preference_applies_to_new_context() {
        let platform = HeadlessAudioPlatform::new(48_000);
        let probe = platform.probe();
        let mut audio = manager(platform);

        audio.set_monitoring(true).unwrap();
        assert!(!probe.destination_connected());

        let ctx = audio.ensure_audio_context().unwrap();
        assert!(ctx.monitoring());
        assert!(probe.destination_connected());

        audio.set_monitoring(false).unwrap();
        assert!(!probe.destination_connected());
    }

    #[test]
    fn failed_monitoring_route_keeps_the_context() {
        let platform = HeadlessAudioPlatform::new(48_000).with_failing_monitoring();
        let probe = platform.probe();
        let mut audio = manager(platform);
        audio.set_monitoring(true).unwrap();

        let first = audio.ensure_audio_context().unwrap();
        let err = audio.take_route_error().unwrap();
        assert_eq!(err.kind(), Some(ErrorKind::ConnectionFailed));
        assert!(audio.take_route_error().is_none());

        let second = audio.ensure_audio_context().unwrap();
        assert!(first.same_context(&second));
        assert_eq!(probe.created_contexts(), 1);
        assert_eq!(probe.closed_contexts(), 0);

        audio.release().unwrap();
        assert_eq!(probe.closed_contexts(), 1);
    }

    #[test]
    fn replacing_analyser_yields_new_node() {
        let mut audio = manager(HeadlessAudioPlatform::new(48_000));
        let ctx = audio.ensure_audio_context().unwrap();
        let before = ctx.analyser().unwrap();

        let after = audio.replace_analyser().unwrap();
        assert!(!before.same_node(&after));
        assert!(ctx.analyser().unwrap().same_node(&after));
    }
}
