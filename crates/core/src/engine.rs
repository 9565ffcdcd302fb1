//! Public façade consumed by the host UI.
//!
//! No operation here returns an error or panics: failures are reported
//! through the `on_error` callback supplied at construction, always after the
//! engine's internal lock has been released.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::Serialize;

use crate::{
    audio::{
        request_microphone, request_system_capture, AudioContextManager, AudioPlatform,
        AudioSourceKind, AudioSourceManager, DeviceInfo, MediaDevices, MediaElement, MediaStream,
        UserMediaConstraints,
    },
    fallback::FallbackVisualizer,
    instantiate::{instantiate, Strategy, StrategyInputs},
    library::{adapt_candidate, LibraryCandidate},
    preset::{PresetEntry, PresetLibrary},
    render::{
        backing_size_for, CanvasRef, FrameHook, FrameScheduler, LoopPhase, PixelSize,
        RenderLoopController,
    },
    visualizer::{Visualizer, VisualizerOptions},
    EngineConfig, EngineError, ErrorKind, Result,
};

/// Receives every failure the engine reports.
pub type ErrorCallback = Arc<dyn Fn(&EngineError) + Send + Sync>;

/// Host capabilities the engine drives.
#[derive(Clone)]
pub struct Platform {
    pub audio: Arc<dyn AudioPlatform>,
    pub media_devices: Arc<dyn MediaDevices>,
    pub scheduler: Arc<dyn FrameScheduler>,
}

/// Diagnostic snapshot of one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub phase: LoopPhase,
    pub instance: Option<String>,
    pub using_fallback: bool,
    pub strategy: Option<Strategy>,
    pub frames: u64,
    pub render_errors: u64,
    pub active_source: Option<AudioSourceKind>,
    pub current_preset: Option<String>,
    pub monitoring: bool,
    pub audio_context_live: bool,
    pub backing_size: Option<PixelSize>,
}

/// One audio-reactive visualisation engine. Cloning shares the engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    platform: Platform,
    config: EngineConfig,
    on_error: ErrorCallback,
    state: Mutex<EngineState>,
}

struct EngineState {
    /// Bumped by every teardown; in-flight attaches compare against it.
    generation: u64,
    unmounted: bool,
    audio: AudioContextManager,
    sources: Arc<Mutex<AudioSourceManager>>,
    render: RenderLoopController,
    presets: PresetLibrary,
    selected_preset: Option<String>,
    candidate: Option<LibraryCandidate>,
    canvas: Option<CanvasRef>,
    media_element: Option<Arc<dyn MediaElement>>,
    strategy: Option<Strategy>,
    pending_errors: Vec<EngineError>,
}

impl EngineState {
    fn report(&mut self, err: EngineError) {
        self.pending_errors.push(err);
    }

    fn lock_sources(&self) -> Result<MutexGuard<'_, AudioSourceManager>> {
        self.sources
            .lock()
            .map_err(|_| EngineError::msg("audio source manager has been poisoned"))
    }
}

impl Engine {
    pub fn new(platform: Platform, config: EngineConfig, on_error: ErrorCallback) -> Self {
        let state = EngineState {
            generation: 0,
            unmounted: false,
            audio: AudioContextManager::new(platform.audio.clone(), config.audio.clone()),
            sources: Arc::new(Mutex::new(AudioSourceManager::new())),
            render: RenderLoopController::new(platform.scheduler.clone(), config.render.clone()),
            presets: PresetLibrary::new(),
            selected_preset: None,
            candidate: None,
            canvas: None,
            media_element: None,
            strategy: None,
            pending_errors: Vec::new(),
        };
        Self {
            shared: Arc::new(EngineShared {
                platform,
                config,
                on_error,
                state: Mutex::new(state),
            }),
        }
    }

    /// Replaces the preset list. Rejects lists with duplicate names.
    pub fn set_presets(&self, entries: Vec<PresetEntry>) -> bool {
        self.with_state(false, |state| match PresetLibrary::from_entries(entries) {
            Ok(library) => {
                tracing::info!(count = library.len(), "loaded presets");
                state.presets = library;
                true
            }
            Err(err) => {
                state.report(err);
                false
            }
        })
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.with_state(Vec::new(), |state| state.presets.names())
    }

    /// Sets the media element used by [`Engine::attach_media_element`].
    pub fn set_media_element(&self, element: Option<Arc<dyn MediaElement>>) {
        self.with_state((), |state| state.media_element = element);
    }

    /// Builds an instance for `candidate` on `canvas` and starts the loop.
    ///
    /// A running loop is torn down first. Returns whether the loop is running;
    /// it runs the built-in renderer when the candidate cannot be used.
    pub fn initialize(&self, candidate: LibraryCandidate, canvas: CanvasRef) -> bool {
        tracing::info!(candidate = %candidate.describe(), "initializing engine");
        self.with_state(false, |state| {
            state.unmounted = false;
            if matches!(
                state.render.phase(),
                LoopPhase::Running | LoopPhase::SettingUp
            ) {
                state.render.teardown(LoopPhase::Idle);
            }
            state.candidate = Some(candidate);
            state.canvas = Some(canvas);
            self.shared.setup(state)
        })
    }

    /// Selects a preset by name. Applied with the running blend when an
    /// instance is live, otherwise queued for the next setup.
    pub fn set_preset(&self, name: &str) -> bool {
        self.with_state(false, |state| {
            let Some(entry) = state.presets.get(name).cloned() else {
                tracing::warn!(preset = name, "unknown preset requested");
                return false;
            };
            state.selected_preset = Some(entry.name.clone());
            if state.render.phase() == LoopPhase::Running {
                state.render.apply_preset(&entry);
            } else {
                tracing::debug!(preset = name, "queued preset until an instance exists");
            }
            true
        })
    }

    /// Captures from a microphone, optionally pinned to `device_id`.
    pub async fn attach_microphone(&self, device_id: Option<String>) -> bool {
        let Some(generation) = self.begin_attach() else {
            return false;
        };
        let constraints =
            UserMediaConstraints::from_config(device_id.clone(), &self.shared.config.audio);
        let result =
            request_microphone(self.shared.platform.media_devices.as_ref(), constraints).await;
        self.finish_attach(generation, AudioSourceKind::Microphone { device_id }, result)
    }

    /// Captures system or tab audio.
    pub async fn attach_system_capture(&self) -> bool {
        let Some(generation) = self.begin_attach() else {
            return false;
        };
        let result = request_system_capture(self.shared.platform.media_devices.as_ref()).await;
        self.finish_attach(generation, AudioSourceKind::SystemCapture, result)
    }

    /// Uses the configured media element as the audio source.
    pub fn attach_media_element(&self) -> bool {
        self.with_state(false, |state| {
            let Some(element) = state.media_element.clone() else {
                state.report(EngineError::new(
                    ErrorKind::ConnectionFailed,
                    "no media element has been provided",
                ));
                return false;
            };
            let attached = state
                .audio
                .ensure_audio_context()
                .and_then(|ctx| ctx.analyser())
                .and_then(|analyser| state.lock_sources()?.attach_element(element, &analyser));
            match attached {
                Ok(()) => true,
                Err(err) => {
                    state.report(err);
                    false
                }
            }
        })
    }

    /// Detaches the current source if it is a system capture.
    pub fn stop_system_capture(&self) -> bool {
        self.with_state(false, |state| {
            let stopped = state.lock_sources().map(|mut sources| {
                let capturing = sources.is_system_capture();
                if capturing {
                    sources.detach_current();
                }
                capturing
            });
            match stopped {
                Ok(stopped) => stopped,
                Err(err) => {
                    state.report(err);
                    false
                }
            }
        })
    }

    /// Detaches whichever source is attached.
    pub fn detach_source(&self) {
        self.with_state((), |state| {
            let detached = state.lock_sources().map(|mut sources| sources.detach_current());
            if let Err(err) = detached {
                state.report(err);
            }
        });
    }

    /// Routes captured audio to audible playback.
    pub fn set_monitoring(&self, enabled: bool) -> bool {
        self.with_state(false, |state| match state.audio.set_monitoring(enabled) {
            Ok(()) => true,
            Err(err) => {
                state.report(err);
                false
            }
        })
    }

    /// Audio input devices for the host's device picker.
    pub async fn list_audio_inputs(&self) -> Vec<DeviceInfo> {
        match self.shared.platform.media_devices.enumerate_audio_inputs().await {
            Ok(devices) => devices,
            Err(err) => {
                let err = EngineError::new(err.capture_kind(), err.message);
                self.shared.emit(vec![err]);
                Vec::new()
            }
        }
    }

    /// Replaces the analysis node, moves the current source onto it, and
    /// rebuilds the visualizer instance against it.
    pub fn rebuild_audio_graph(&self) -> bool {
        self.with_state(false, |state| {
            if state.unmounted {
                tracing::debug!("ignoring graph rebuild on a torn-down engine");
                return false;
            }
            if state.candidate.is_none() || state.canvas.is_none() {
                return false;
            }
            let analyser = match state.audio.replace_analyser() {
                Ok(analyser) => analyser,
                Err(err) => {
                    state.report(err);
                    return false;
                }
            };
            if let Err(err) = state.lock_sources().and_then(|mut s| s.reconnect(&analyser)) {
                state.report(err);
            }
            state.render.teardown(LoopPhase::Idle);
            self.shared.setup(state)
        })
    }

    /// Unmounts: stops the loop, destroys the instance, releases the source
    /// and the audio context. Safe to call at any point, including while an
    /// attach is waiting on a permission prompt.
    pub fn teardown(&self) {
        self.with_state((), |state| {
            state.generation += 1;
            state.unmounted = true;
            state.render.teardown(LoopPhase::Destroyed);
            let detached = state.lock_sources().map(|mut sources| sources.detach_current());
            if let Err(err) = detached {
                state.report(err);
            }
            if let Err(err) = state.audio.release() {
                state.report(err);
            }
            state.strategy = None;
            tracing::info!("engine torn down");
        });
    }

    pub fn status(&self) -> EngineStatus {
        let fallback_status = EngineStatus {
            phase: LoopPhase::Destroyed,
            instance: None,
            using_fallback: false,
            strategy: None,
            frames: 0,
            render_errors: 0,
            active_source: None,
            current_preset: None,
            monitoring: false,
            audio_context_live: false,
            backing_size: None,
        };
        self.with_state(fallback_status, |state| {
            let stats = state.render.stats();
            let active_source = state
                .lock_sources()
                .ok()
                .and_then(|sources| sources.current_kind().cloned());
            EngineStatus {
                phase: stats.phase,
                instance: stats.instance,
                using_fallback: stats.using_fallback,
                strategy: state.strategy,
                frames: stats.frames,
                render_errors: stats.render_errors,
                active_source,
                current_preset: state.selected_preset.clone(),
                monitoring: state.audio.monitoring(),
                audio_context_live: state.audio.current().is_some(),
                backing_size: state.canvas.as_ref().map(|canvas| canvas.backing_size()),
            }
        })
    }

    fn begin_attach(&self) -> Option<u64> {
        self.with_state(None, |state| {
            if state.unmounted {
                tracing::debug!("ignoring attach on a torn-down engine");
                return None;
            }
            match state.audio.ensure_audio_context() {
                Ok(_) => Some(state.generation),
                Err(err) => {
                    state.report(err);
                    None
                }
            }
        })
    }

    fn finish_attach(
        &self,
        generation: u64,
        kind: AudioSourceKind,
        result: Result<MediaStream>,
    ) -> bool {
        self.with_state(false, |state| {
            let stale = state.unmounted || state.generation != generation;
            let stream = match result {
                Ok(stream) if stale => {
                    tracing::info!(source = ?kind, "capture resolved after teardown, releasing it");
                    stream.stop_all();
                    return false;
                }
                Ok(stream) => stream,
                Err(_) if stale => return false,
                Err(err) => {
                    state.report(err);
                    return false;
                }
            };

            let attached = state
                .audio
                .ensure_audio_context()
                .and_then(|ctx| ctx.analyser())
                .and_then(|analyser| {
                    state
                        .lock_sources()?
                        .attach_stream(kind, stream.clone(), &analyser)
                });
            match attached {
                Ok(()) => true,
                Err(err) => {
                    stream.stop_all();
                    state.report(err);
                    false
                }
            }
        })
    }

    /// Runs `f` under the state lock, then reports whatever errors it queued.
    fn with_state<R>(&self, poisoned: R, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, errors) = match self.shared.state.lock() {
            Ok(mut state) => {
                let result = f(&mut state);
                if let Some(err) = state.audio.take_route_error() {
                    state.report(err);
                }
                (result, std::mem::take(&mut state.pending_errors))
            }
            Err(_) => (
                poisoned,
                vec![EngineError::msg("engine state has been poisoned")],
            ),
        };
        self.shared.emit(errors);
        result
    }
}

impl EngineShared {
    /// `SettingUp` → `Running` for the stored candidate and canvas. Falls back
    /// to the built-in renderer when instantiation fails.
    fn setup(&self, state: &mut EngineState) -> bool {
        let (Some(candidate), Some(canvas)) = (state.candidate.clone(), state.canvas.clone())
        else {
            return false;
        };
        if let Err(err) = state.render.begin_setup() {
            state.report(err);
            return false;
        }

        let pixel_ratio = canvas.device_pixel_ratio();
        let size = backing_size_for(canvas.css_size(), pixel_ratio);
        let options = VisualizerOptions {
            width: size.width,
            height: size.height,
            pixel_ratio,
        };

        let inputs = match state.audio.ensure_audio_context() {
            Ok(ctx) => StrategyInputs::new(canvas.clone(), ctx, options),
            Err(err) => Err(err),
        };

        let (instance, using_fallback): (Box<dyn Visualizer>, bool) = match inputs {
            Ok(inputs) => match instantiate(&adapt_candidate(candidate), &inputs) {
                Ok(built) => {
                    tracing::info!(strategy = ?built.strategy, "instantiated external visualizer");
                    state.strategy = Some(built.strategy);
                    (built.instance, false)
                }
                Err(failure) => {
                    state.report(failure.to_error());
                    state.strategy = None;
                    (self.fallback(&canvas, Some(&inputs)), true)
                }
            },
            Err(err) => {
                state.report(err);
                state.strategy = None;
                (self.fallback(&canvas, None), true)
            }
        };

        let preset = state
            .selected_preset
            .as_deref()
            .and_then(|name| state.presets.get(name))
            .cloned();
        let hook = pump_hook(&state.sources);

        match state
            .render
            .start(instance, using_fallback, canvas, preset.as_ref(), Some(hook))
        {
            Ok(()) => true,
            Err(err) => {
                state.render.abort_setup();
                state.report(err);
                false
            }
        }
    }

    fn fallback(&self, canvas: &CanvasRef, inputs: Option<&StrategyInputs>) -> Box<dyn Visualizer> {
        let mut renderer = FallbackVisualizer::new(canvas.clone(), self.config.fallback.clone());
        if let Some(inputs) = inputs {
            if let Err(err) = renderer.connect_audio(&inputs.analyser) {
                tracing::warn!(%err, "fallback renderer could not connect audio");
            }
        }
        tracing::info!("using built-in fallback renderer");
        Box::new(renderer)
    }

    fn emit(&self, errors: Vec<EngineError>) {
        for err in errors {
            tracing::warn!(kind = ?err.kind(), "{err}");
            (self.on_error)(&err);
        }
    }
}

fn pump_hook(sources: &Arc<Mutex<AudioSourceManager>>) -> FrameHook {
    let sources = Arc::downgrade(sources);
    Arc::new(move || {
        let Some(sources) = sources.upgrade() else {
            return;
        };
        let Ok(mut sources) = sources.lock() else {
            return;
        };
        if let Err(err) = sources.pump() {
            tracing::debug!(%err, "audio pump failed");
        }
    })
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("status", &self.status()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::TrackKind,
        platform::headless::{
            self,
            scripted::{probed, ScriptedClass, ScriptedFactory},
            AudioProbe, HeadlessAudioPlatform, HeadlessCanvas, ManualFrameScheduler,
            PermissionPolicy, SyntheticMediaDevices, ToneTrack,
        },
        render::PixelSize,
        HostErrorKind,
    };

    struct Harness {
        engine: Engine,
        scheduler: Arc<ManualFrameScheduler>,
        devices: Arc<SyntheticMediaDevices>,
        audio: AudioProbe,
        canvas: Arc<HeadlessCanvas>,
        errors: Arc<Mutex<Vec<Option<ErrorKind>>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_audio(HeadlessAudioPlatform::new(48_000))
        }

        fn with_audio(audio: HeadlessAudioPlatform) -> Self {
            let scheduler = Arc::new(ManualFrameScheduler::new());
            let devices = Arc::new(SyntheticMediaDevices::new());
            let probe = audio.probe();
            let errors = Arc::new(Mutex::new(Vec::new()));
            let sink = errors.clone();
            let engine = Engine::new(
                headless::platform(audio, devices.clone(), scheduler.clone()),
                EngineConfig::default(),
                Arc::new(move |err: &EngineError| sink.lock().unwrap().push(err.kind())),
            );
            Self {
                engine,
                scheduler,
                devices,
                audio: probe,
                canvas: Arc::new(HeadlessCanvas::new(320.0, 180.0, 2.0)),
                errors,
            }
        }

        fn initialize(&self, candidate: LibraryCandidate) -> bool {
            self.engine.initialize(candidate, self.canvas.clone())
        }

        fn frames(&self, count: usize) {
            for _ in 0..count {
                self.scheduler.pump();
            }
        }

        fn errors(&self) -> Vec<Option<ErrorKind>> {
            self.errors.lock().unwrap().clone()
        }
    }

    #[test]
    fn factory_instance_runs_until_teardown() {
        let harness = Harness::new();
        let (factory, probe) = probed(ScriptedFactory::returning_renderer());

        assert!(harness.initialize(LibraryCandidate::Callable(factory.clone())));
        let status = harness.engine.status();
        assert_eq!(status.phase, LoopPhase::Running);
        assert_eq!(status.strategy, Some(Strategy::FactoryCall));
        assert!(!status.using_fallback);
        assert_eq!(status.backing_size, Some(PixelSize::new(640, 360)));

        harness.frames(3);
        assert_eq!(probe.renders(), 3);

        harness.engine.teardown();
        assert_eq!(probe.destroys(), 1);
        assert_eq!(harness.engine.status().phase, LoopPhase::Destroyed);
        assert_eq!(harness.scheduler.pending(), 0);
        assert_eq!(harness.audio.closed_contexts(), 1);
        assert!(harness.errors().is_empty());

        harness.frames(2);
        assert_eq!(probe.renders(), 3);
    }

    #[test]
    fn class_accepting_only_a_canvas_is_constructed() {
        let harness = Harness::new();
        let class = Arc::new(ScriptedClass::working_with_shape(&["canvas"]).as_class());

        assert!(harness.initialize(LibraryCandidate::wrapped(LibraryCandidate::Callable(
            class.clone()
        ))));
        assert_eq!(harness.engine.status().strategy, Some(Strategy::CanvasOnly));
        assert_eq!(class.call_count(), 0);
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn missing_library_falls_back_and_reports_once() {
        let harness = Harness::new();

        assert!(harness.initialize(LibraryCandidate::Missing));
        harness.frames(4);

        let status = harness.engine.status();
        assert!(status.using_fallback);
        assert_eq!(status.instance.as_deref(), Some("fallback-waveform"));
        assert_eq!(status.frames, 4);
        assert_eq!(harness.canvas.presented_frames(), 4);
        assert_eq!(harness.errors(), vec![Some(ErrorKind::LibraryUnavailable)]);
    }

    #[test]
    fn factory_returning_undefined_falls_back() {
        let harness = Harness::new();
        let (factory, _probe) = probed(ScriptedFactory::returning_undefined());

        assert!(harness.initialize(LibraryCandidate::Callable(factory)));
        assert!(harness.engine.status().using_fallback);
        assert_eq!(harness.errors(), vec![Some(ErrorKind::InstantiationFailed)]);
    }

    #[test]
    fn missing_audio_context_skips_the_external_library() {
        let harness = Harness::with_audio(HeadlessAudioPlatform::unavailable());
        let (factory, probe) = probed(ScriptedFactory::returning_renderer());

        assert!(harness.initialize(LibraryCandidate::Callable(factory.clone())));
        harness.frames(2);

        let status = harness.engine.status();
        assert!(status.using_fallback);
        assert!(!status.audio_context_live);
        assert_eq!(factory.call_count(), 0);
        assert_eq!(probe.renders(), 0);
        assert_eq!(harness.errors(), vec![Some(ErrorKind::AudioContextUnavailable)]);
    }

    #[tokio::test]
    async fn denied_microphone_then_system_capture() {
        let harness = Harness::new();
        harness
            .devices
            .set_microphone_policy(PermissionPolicy::Deny(HostErrorKind::NotAllowed));

        assert!(!harness.engine.attach_microphone(None).await);
        assert_eq!(harness.errors(), vec![Some(ErrorKind::PermissionDenied)]);
        assert_eq!(harness.engine.status().active_source, None);

        assert!(harness.engine.attach_system_capture().await);
        assert_eq!(
            harness.engine.status().active_source,
            Some(AudioSourceKind::SystemCapture)
        );
        assert_eq!(harness.errors().len(), 1);
    }

    #[tokio::test]
    async fn unknown_device_is_reported_as_not_found() {
        let harness = Harness::new();
        assert!(!harness.engine.attach_microphone(Some("missing".into())).await);
        assert_eq!(harness.errors(), vec![Some(ErrorKind::DeviceNotFound)]);
    }

    #[tokio::test]
    async fn switching_sources_stops_the_previous_tracks() {
        let harness = Harness::new();

        assert!(harness.engine.attach_microphone(Some("usb-interface".into())).await);
        assert!(harness.engine.attach_system_capture().await);

        let issued = harness.devices.issued_streams();
        assert_eq!(issued.len(), 2);
        assert!(issued[0].all_stopped());
        assert!(!issued[1].all_stopped());

        assert!(harness.engine.stop_system_capture());
        assert!(issued[1].all_stopped());
        assert_eq!(harness.engine.status().active_source, None);
        assert!(!harness.engine.stop_system_capture());
    }

    #[tokio::test]
    async fn audio_only_capture_retries_with_video_and_drops_it() {
        let harness = Harness::new();
        harness
            .devices
            .set_display_policy(PermissionPolicy::AudioOnlyUnsupported);

        assert!(harness.engine.attach_system_capture().await);
        assert_eq!(harness.devices.display_requests(), 2);

        let stream = &harness.devices.issued_streams()[0];
        let video = stream
            .tracks()
            .iter()
            .find(|track| track.kind() == TrackKind::Video)
            .unwrap();
        assert!(video.is_stopped());
        assert!(!stream.audio_tracks().any(|track| track.is_stopped()));
        assert!(harness.errors().is_empty());
    }

    #[tokio::test]
    async fn teardown_while_permission_is_pending_releases_the_stream() {
        let harness = Harness::new();
        let gate = harness.devices.hold_next_request();

        let engine = harness.engine.clone();
        let attach = tokio::spawn(async move { engine.attach_microphone(None).await });
        while harness.devices.user_requests() == 0 {
            tokio::task::yield_now().await;
        }

        harness.engine.teardown();
        gate.release();

        assert!(!attach.await.unwrap());
        let issued = harness.devices.issued_streams();
        assert_eq!(issued.len(), 1);
        assert!(issued[0].all_stopped());
        assert_eq!(harness.engine.status().active_source, None);
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn preset_selected_before_setup_is_applied_with_a_cut() {
        let harness = Harness::new();
        let (factory, probe) = probed(ScriptedFactory::returning_full());
        assert!(harness.engine.set_presets(vec![
            PresetEntry::new("a", serde_json::json!({})),
            PresetEntry::new("b", serde_json::json!({ "warp": 1 })),
        ]));

        assert!(harness.engine.set_preset("b"));
        assert!(harness.initialize(LibraryCandidate::Callable(factory)));
        assert!(harness.engine.set_preset("a"));
        assert!(!harness.engine.set_preset("nope"));

        assert_eq!(
            probe.presets(),
            vec![("b".to_string(), 0.0), ("a".to_string(), 5.7)]
        );
        assert_eq!(
            harness.engine.status().current_preset.as_deref(),
            Some("a")
        );
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn duplicate_preset_names_are_rejected() {
        let harness = Harness::new();
        assert!(!harness.engine.set_presets(vec![
            PresetEntry::new("a", serde_json::json!({})),
            PresetEntry::new("a", serde_json::json!({})),
        ]));
        assert_eq!(harness.errors(), vec![None]);
        assert!(harness.engine.preset_names().is_empty());
    }

    #[tokio::test]
    async fn rebuilding_the_graph_keeps_the_source_and_rebuilds_the_instance() {
        let harness = Harness::new();
        let (factory, probe) = probed(ScriptedFactory::returning_renderer());
        assert!(harness.initialize(LibraryCandidate::Callable(factory.clone())));
        assert!(harness.engine.attach_microphone(None).await);

        assert!(harness.engine.rebuild_audio_graph());
        assert_eq!(factory.call_count(), 2);
        assert_eq!(probe.destroys(), 1);
        assert!(matches!(
            harness.engine.status().active_source,
            Some(AudioSourceKind::Microphone { .. })
        ));
        assert!(!harness.devices.issued_streams()[0].all_stopped());

        harness.frames(2);
        assert_eq!(probe.renders(), 2);
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn monitoring_preference_survives_context_creation() {
        let harness = Harness::new();

        assert!(harness.engine.set_monitoring(true));
        assert!(!harness.audio.destination_connected());

        assert!(harness.initialize(LibraryCandidate::Missing));
        assert!(harness.audio.destination_connected());
        assert!(harness.engine.status().monitoring);

        assert!(harness.engine.set_monitoring(false));
        assert!(!harness.audio.destination_connected());
    }

    #[test]
    fn rebuild_after_teardown_is_ignored() {
        let harness = Harness::new();
        let (factory, probe) = probed(ScriptedFactory::returning_renderer());
        assert!(harness.initialize(LibraryCandidate::Callable(factory.clone())));
        harness.frames(1);
        harness.engine.teardown();

        assert!(!harness.engine.rebuild_audio_graph());
        assert_eq!(harness.audio.created_contexts(), 1);
        assert_eq!(factory.call_count(), 1);

        harness.frames(3);
        assert_eq!(probe.renders(), 1);
        let status = harness.engine.status();
        assert_eq!(status.phase, LoopPhase::Destroyed);
        assert!(!status.audio_context_live);
        assert!(harness.errors().is_empty());
    }

    #[test]
    fn failed_monitoring_route_is_reported_and_the_context_kept() {
        let harness =
            Harness::with_audio(HeadlessAudioPlatform::new(48_000).with_failing_monitoring());
        let (factory, probe) = probed(ScriptedFactory::returning_renderer());
        assert!(harness.engine.set_monitoring(true));

        assert!(harness.initialize(LibraryCandidate::Callable(factory)));
        assert_eq!(harness.errors(), vec![Some(ErrorKind::ConnectionFailed)]);

        let status = harness.engine.status();
        assert!(!status.using_fallback);
        assert!(status.audio_context_live);
        assert!(!harness.audio.destination_connected());

        harness.frames(2);
        assert_eq!(probe.renders(), 2);
        assert_eq!(harness.audio.created_contexts(), 1);
        assert_eq!(harness.audio.closed_contexts(), 0);
        assert_eq!(harness.errors().len(), 1);
    }

    #[test]
    fn media_element_source_requires_an_element() {
        let harness = Harness::new();
        assert!(!harness.engine.attach_media_element());
        assert_eq!(harness.errors(), vec![Some(ErrorKind::ConnectionFailed)]);

        harness
            .engine
            .set_media_element(Some(Arc::new(ToneTrack::new("track", 440.0, 48_000))));
        assert!(harness.engine.attach_media_element());
        assert_eq!(
            harness.engine.status().active_source,
            Some(AudioSourceKind::MediaElement)
        );
    }

    #[test]
    fn resizes_reach_the_backing_buffer() {
        let harness = Harness::new();
        assert!(harness.initialize(LibraryCandidate::Missing));

        harness.canvas.resize_css(100.0, 50.0);
        assert_eq!(
            harness.engine.status().backing_size,
            Some(PixelSize::new(200, 100))
        );

        harness.engine.teardown();
        assert_eq!(harness.canvas.observer_count(), 0);
    }

    #[tokio::test]
    async fn lists_input_devices() {
        let harness = Harness::new();
        let devices = harness.engine.list_audio_inputs().await;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "default");
    }

    #[tokio::test]
    async fn attaches_after_teardown_are_ignored() {
        let harness = Harness::new();
        harness.engine.teardown();

        assert!(!harness.engine.attach_microphone(None).await);
        assert_eq!(harness.devices.user_requests(), 0);
        assert_eq!(harness.audio.created_contexts(), 0);
    }
}
