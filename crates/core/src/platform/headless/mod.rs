//! In-process platform: synthetic audio, scripted permission prompts, an
//! offscreen canvas, and a frame scheduler pumped by the caller.
//!
//! Used by the command line demo and by the test suite.

#[cfg(test)]
pub mod scripted;

use std::{
    collections::HashSet,
    f32::consts::TAU,
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::oneshot;

use crate::{
    audio::{
        AudioBackend, AudioPlatform, BoxFuture, DeviceInfo, DisplayMediaConstraints, GraphNode,
        MediaDevices, MediaElement, MediaStream, MediaTrack, NodeKind, NodeTarget, TrackKind,
        UserMediaConstraints,
    },
    engine::Platform,
    render::{
        backing_size_for, Canvas, CssSize, FrameCallback, FrameHandle, FrameScheduler, GlContext, PixelSize,
        ResizeCallback, ResizeSubscription,
    },
    HostError, HostErrorKind, HostResult,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const ALL_NODE_KINDS: [NodeKind; 5] = [
    NodeKind::Gain,
    NodeKind::Delay,
    NodeKind::BiquadFilter,
    NodeKind::DynamicsCompressor,
    NodeKind::StereoPanner,
];

/// Assembles a complete headless [`Platform`].
pub fn platform(
    audio: HeadlessAudioPlatform,
    devices: Arc<SyntheticMediaDevices>,
    scheduler: Arc<ManualFrameScheduler>,
) -> Platform {
    Platform {
        audio: Arc::new(audio),
        media_devices: devices,
        scheduler,
    }
}

/// Observations about contexts created by a [`HeadlessAudioPlatform`].
#[derive(Debug, Clone, Default)]
pub struct AudioProbe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    created: AtomicUsize,
    closed: AtomicUsize,
    destination: AtomicBool,
}

impl AudioProbe {
    pub fn created_contexts(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn closed_contexts(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether audio is currently routed to audible playback.
    pub fn destination_connected(&self) -> bool {
        self.inner.destination.load(Ordering::SeqCst)
    }
}

/// Synthetic audio platform with a configurable set of native node kinds.
#[derive(Debug, Clone)]
pub struct HeadlessAudioPlatform {
    sample_rate: u32,
    native: HashSet<NodeKind>,
    available: bool,
    monitoring_route: bool,
    probe: AudioProbe,
}

impl HeadlessAudioPlatform {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            native: ALL_NODE_KINDS.into_iter().collect(),
            available: true,
            monitoring_route: true,
            probe: AudioProbe::default(),
        }
    }

    /// A host without any audio context constructor.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(48_000)
        }
    }

    /// Restricts the natively constructible node kinds to `kinds`.
    pub fn with_native_nodes(mut self, kinds: &[NodeKind]) -> Self {
        self.native = kinds.iter().copied().collect();
        self
    }

    /// Contexts refuse to route the analyser to the speakers.
    pub fn with_failing_monitoring(mut self) -> Self {
        self.monitoring_route = false;
        self
    }

    pub fn probe(&self) -> AudioProbe {
        self.probe.clone()
    }
}

impl AudioPlatform for HeadlessAudioPlatform {
    fn create_context(&self) -> Option<Box<dyn AudioBackend>> {
        if !self.available {
            return None;
        }
        self.probe.inner.created.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(HeadlessBackend {
            sample_rate: self.sample_rate,
            native: self.native.clone(),
            monitoring_route: self.monitoring_route,
            probe: self.probe.clone(),
        }))
    }
}

struct HeadlessBackend {
    sample_rate: u32,
    native: HashSet<NodeKind>,
    monitoring_route: bool,
    probe: AudioProbe,
}

impl AudioBackend for HeadlessBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_native_node(&self, kind: NodeKind) -> Option<Box<dyn GraphNode>> {
        self.native
            .contains(&kind)
            .then(|| Box::new(HeadlessNode { kind, target: None }) as Box<dyn GraphNode>)
    }

    fn set_destination_connected(&mut self, connected: bool) -> HostResult<()> {
        if connected && !self.monitoring_route {
            return Err(HostError::new(
                HostErrorKind::NotSupported,
                "destination rejected the connection",
            ));
        }
        self.probe
            .inner
            .destination
            .store(connected, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.inner.destination.store(false, Ordering::SeqCst);
        self.probe.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct HeadlessNode {
    kind: NodeKind,
    target: Option<NodeTarget>,
}

impl GraphNode for HeadlessNode {
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
}

/// Sine-wave track standing in for a microphone or tab-audio track.
#[derive(Debug)]
pub struct ToneTrack {
    id: String,
    kind: TrackKind,
    frequency: f32,
    sample_rate: u32,
    block: usize,
    phase: Mutex<f32>,
    stopped: AtomicBool,
}

impl ToneTrack {
    pub fn new(id: impl Into<String>, frequency: f32, sample_rate: u32) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
            frequency,
            sample_rate,
            block: (sample_rate / 60).max(1) as usize,
            phase: Mutex::new(0.0),
            stopped: AtomicBool::new(false),
        }
    }

    /// A video track; yields no samples.
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            kind: TrackKind::Video,
            ..Self::new(id, 0.0, 48_000)
        }
    }

    fn generate(&self, out: &mut Vec<f32>) {
        if self.kind != TrackKind::Audio || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let step = TAU * self.frequency / self.sample_rate as f32;
        let mut phase = lock(&self.phase);
        for _ in 0..self.block {
            out.push(0.5 * phase.sin());
            *phase = (*phase + step) % TAU;
        }
    }
}

impl MediaTrack for ToneTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn read_samples(&self, out: &mut Vec<f32>) {
        self.generate(out);
    }
}

impl MediaElement for ToneTrack {
    fn label(&self) -> String {
        self.id.clone()
    }

    fn read_samples(&self, out: &mut Vec<f32>) {
        self.generate(out);
    }
}

/// How the synthetic host answers a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPolicy {
    Grant,
    Deny(HostErrorKind),
    /// Rejects audio-only display capture with `NotSupported`; grants it
    /// when video is requested as well.
    AudioOnlyUnsupported,
}

/// Holds the next permission prompt open until released or dropped.
#[derive(Debug)]
pub struct PermissionGate {
    release: oneshot::Sender<()>,
}

impl PermissionGate {
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

/// Scripted input devices and display capture.
#[derive(Debug)]
pub struct SyntheticMediaDevices {
    inputs: Vec<DeviceInfo>,
    sample_rate: u32,
    microphone_policy: Mutex<PermissionPolicy>,
    display_policy: Mutex<PermissionPolicy>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    issued: Mutex<Vec<MediaStream>>,
    user_requests: AtomicUsize,
    display_requests: AtomicUsize,
}

impl Default for SyntheticMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticMediaDevices {
    pub fn new() -> Self {
        Self {
            inputs: vec![
                DeviceInfo {
                    device_id: "default".to_string(),
                    label: "Default microphone".to_string(),
                },
                DeviceInfo {
                    device_id: "usb-interface".to_string(),
                    label: "USB audio interface".to_string(),
                },
            ],
            sample_rate: 48_000,
            microphone_policy: Mutex::new(PermissionPolicy::Grant),
            display_policy: Mutex::new(PermissionPolicy::Grant),
            gate: Mutex::new(None),
            issued: Mutex::new(Vec::new()),
            user_requests: AtomicUsize::new(0),
            display_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_microphone_policy(&self, policy: PermissionPolicy) {
        *lock(&self.microphone_policy) = policy;
    }

    pub fn set_display_policy(&self, policy: PermissionPolicy) {
        *lock(&self.display_policy) = policy;
    }

    /// Keeps the next request pending until the returned gate is released.
    pub fn hold_next_request(&self) -> PermissionGate {
        let (release, wait) = oneshot::channel();
        *lock(&self.gate) = Some(wait);
        PermissionGate { release }
    }

    /// Every stream handed out so far, including ones later discarded.
    pub fn issued_streams(&self) -> Vec<MediaStream> {
        lock(&self.issued).clone()
    }

    pub fn user_requests(&self) -> usize {
        self.user_requests.load(Ordering::SeqCst)
    }

    pub fn display_requests(&self) -> usize {
        self.display_requests.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        let pending = lock(&self.gate).take();
        if let Some(wait) = pending {
            let _ = wait.await;
        }
    }

    fn issue(&self, tracks: Vec<Arc<dyn MediaTrack>>) -> MediaStream {
        let stream = MediaStream::new(tracks);
        lock(&self.issued).push(stream.clone());
        stream
    }

    fn tone(&self, id: String, frequency: f32) -> Arc<dyn MediaTrack> {
        Arc::new(ToneTrack::new(id, frequency, self.sample_rate))
    }
}

impl MediaDevices for SyntheticMediaDevices {
    fn get_user_media(
        &self,
        constraints: UserMediaConstraints,
    ) -> BoxFuture<'_, HostResult<MediaStream>> {
        Box::pin(async move {
            self.user_requests.fetch_add(1, Ordering::SeqCst);
            self.wait_for_gate().await;

            let policy = *lock(&self.microphone_policy);
            if let PermissionPolicy::Deny(kind) = policy {
                return Err(HostError::new(kind, "microphone permission denied"));
            }

            let device = match &constraints.device_id {
                Some(id) => self
                    .inputs
                    .iter()
                    .find(|device| &device.device_id == id)
                    .ok_or_else(|| {
                        HostError::new(HostErrorKind::NotFound, format!("no input device `{id}`"))
                    })?,
                None => self.inputs.first().ok_or_else(|| {
                    HostError::new(HostErrorKind::NotFound, "no input devices")
                })?,
            };

            let track = self.tone(format!("mic-{}", device.device_id), 220.0);
            Ok(self.issue(vec![track]))
        })
    }

    fn get_display_media(
        &self,
        constraints: DisplayMediaConstraints,
    ) -> BoxFuture<'_, HostResult<MediaStream>> {
        Box::pin(async move {
            self.display_requests.fetch_add(1, Ordering::SeqCst);
            self.wait_for_gate().await;

            let policy = *lock(&self.display_policy);
            match policy {
                PermissionPolicy::Deny(kind) => {
                    return Err(HostError::new(kind, "display capture denied"));
                }
                PermissionPolicy::AudioOnlyUnsupported if !constraints.video => {
                    return Err(HostError::new(
                        HostErrorKind::NotSupported,
                        "audio-only display capture is not supported",
                    ));
                }
                _ => {}
            }

            let mut tracks = Vec::new();
            if constraints.audio {
                tracks.push(self.tone("tab-audio".to_string(), 440.0));
            }
            if constraints.video {
                tracks.push(Arc::new(ToneTrack::video("tab-video")) as Arc<dyn MediaTrack>);
            }
            Ok(self.issue(tracks))
        })
    }

    fn enumerate_audio_inputs(&self) -> BoxFuture<'_, HostResult<Vec<DeviceInfo>>> {
        Box::pin(async move { Ok(self.inputs.clone()) })
    }
}

static NEXT_GL_ID: AtomicU64 = AtomicU64::new(1);

/// Offscreen canvas with controllable displayed size.
pub struct HeadlessCanvas {
    css: Mutex<CssSize>,
    pixel_ratio: f64,
    backing: Mutex<PixelSize>,
    gl: Option<GlContext>,
    observers: Arc<Mutex<Vec<(u64, ResizeCallback)>>>,
    next_observer: AtomicU64,
    presented: AtomicU64,
}

impl HeadlessCanvas {
    pub fn new(css_width: f64, css_height: f64, pixel_ratio: f64) -> Self {
        let css = CssSize {
            width: css_width,
            height: css_height,
        };
        Self {
            css: Mutex::new(css),
            pixel_ratio,
            backing: Mutex::new(backing_size_for(css, pixel_ratio)),
            gl: Some(GlContext {
                id: NEXT_GL_ID.fetch_add(1, Ordering::Relaxed),
                version: 2,
            }),
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer: AtomicU64::new(0),
            presented: AtomicU64::new(0),
        }
    }

    /// A canvas whose GL context cannot be obtained.
    pub fn without_gl(mut self) -> Self {
        self.gl = None;
        self
    }

    /// Changes the displayed size and notifies resize observers.
    pub fn resize_css(&self, width: f64, height: f64) {
        let css = CssSize { width, height };
        *lock(&self.css) = css;
        let callbacks: Vec<ResizeCallback> = lock(&self.observers)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(css);
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented.load(Ordering::SeqCst)
    }
}

impl Canvas for HeadlessCanvas {
    fn css_size(&self) -> CssSize {
        *lock(&self.css)
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.pixel_ratio
    }

    fn backing_size(&self) -> PixelSize {
        *lock(&self.backing)
    }

    fn set_backing_size(&self, size: PixelSize) {
        *lock(&self.backing) = size;
    }

    fn gl_context(&self) -> Option<GlContext> {
        self.gl.clone()
    }

    fn present(&self, _rgba: &[u8], _size: PixelSize) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }

    fn observe_resize(&self, callback: ResizeCallback) -> Option<ResizeSubscription> {
        let id = self.next_observer.fetch_add(1, Ordering::SeqCst);
        lock(&self.observers).push((id, callback));

        let observers = Arc::downgrade(&self.observers);
        Some(ResizeSubscription::new(move || {
            if let Some(observers) = observers.upgrade() {
                lock(&observers).retain(|(observer, _)| *observer != id);
            }
        }))
    }
}

/// Frame scheduler whose queued callbacks run only when [`Self::pump`] is called.
#[derive(Default)]
pub struct ManualFrameScheduler {
    queue: Mutex<Vec<(FrameHandle, FrameCallback)>>,
    next: AtomicU64,
}

impl ManualFrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every callback queued before this call. Returns how many ran.
    pub fn pump(&self) -> usize {
        let due = mem::take(&mut *lock(&self.queue));
        let count = due.len();
        for (_, callback) in due {
            callback();
        }
        count
    }

    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }
}

impl FrameScheduler for ManualFrameScheduler {
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle {
        let handle = FrameHandle(self.next.fetch_add(1, Ordering::SeqCst));
        lock(&self.queue).push((handle, callback));
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        lock(&self.queue).retain(|(queued, _)| *queued != handle);
    }
}
