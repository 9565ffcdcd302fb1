use std::{fmt, future::Future, pin::Pin, sync::Arc};

use serde::Serialize;

use crate::{
    audio::{AnalyserNode, SourceId},
    AudioConfig, EngineError, ErrorKind, HostErrorKind, HostResult, Result,
};

/// Boxed future returned by host permission APIs.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One hardware-backed track of a captured stream.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> TrackKind;
    fn label(&self) -> String {
        self.id()
    }
    /// Releases the underlying hardware. Idempotent.
    fn stop(&self);
    fn is_stopped(&self) -> bool;
    /// Appends whatever samples arrived since the last read.
    fn read_samples(&self, out: &mut Vec<f32>);
}

/// A set of tracks acquired from the host in one permission grant.
#[derive(Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .filter(|track| track.kind() == TrackKind::Audio)
    }

    pub fn has_audio(&self) -> bool {
        self.audio_tracks().next().is_some()
    }

    /// Fresh stream carrying only this stream's audio tracks.
    pub fn audio_only(&self) -> MediaStream {
        MediaStream::new(self.audio_tracks().cloned().collect())
    }

    /// Stops every track that is not audio.
    pub fn stop_video(&self) {
        for track in self.tracks.iter().filter(|t| t.kind() != TrackKind::Audio) {
            track.stop();
        }
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(|track| track.is_stopped())
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.tracks.iter().map(|track| track.id()).collect();
        f.debug_struct("MediaStream").field("tracks", &ids).finish()
    }
}

/// Constraints for an input-device request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserMediaConstraints {
    /// Pins the request to one device; `None` lets the host pick.
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl UserMediaConstraints {
    pub fn from_config(device_id: Option<String>, config: &AudioConfig) -> Self {
        Self {
            device_id,
            echo_cancellation: config.echo_cancellation,
            noise_suppression: config.noise_suppression,
            auto_gain_control: config.auto_gain_control,
        }
    }
}

/// Constraints for a display/tab capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMediaConstraints {
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
}

/// Host capture APIs. Every request may suspend on a permission prompt.
pub trait MediaDevices: Send + Sync {
    fn get_user_media(&self, constraints: UserMediaConstraints)
        -> BoxFuture<'_, HostResult<MediaStream>>;
    fn get_display_media(
        &self,
        constraints: DisplayMediaConstraints,
    ) -> BoxFuture<'_, HostResult<MediaStream>>;
    fn enumerate_audio_inputs(&self) -> BoxFuture<'_, HostResult<Vec<DeviceInfo>>>;
}

/// A host media element (for example an `<audio>` player) used as a source.
pub trait MediaElement: Send + Sync {
    fn label(&self) -> String;
    fn read_samples(&self, out: &mut Vec<f32>);
}

/// Which kind of input feeds the analysis node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AudioSourceKind {
    Microphone { device_id: Option<String> },
    SystemCapture,
    MediaElement,
}

enum SourceInput {
    Stream(MediaStream),
    Element(Arc<dyn MediaElement>),
}

struct AttachedSource {
    id: SourceId,
    kind: AudioSourceKind,
    input: SourceInput,
    analyser: AnalyserNode,
}

impl AttachedSource {
    fn release(self) {
        if let Err(err) = self.analyser.disconnect_source(self.id) {
            tracing::warn!(%err, source = ?self.kind, "failed to disconnect source node");
        }
        if let SourceInput::Stream(stream) = &self.input {
            stream.stop_all();
        }
        tracing::info!(source = ?self.kind, "detached audio source");
    }
}

/// Keeps exactly one audio source attached to the analysis node.
#[derive(Default)]
pub struct AudioSourceManager {
    current: Option<AttachedSource>,
    next_id: u64,
    scratch: Vec<f32>,
}

impl AudioSourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a captured stream, releasing the previous source first.
    ///
    /// On failure the stream's tracks are stopped before returning.
    pub fn attach_stream(
        &mut self,
        kind: AudioSourceKind,
        stream: MediaStream,
        analyser: &AnalyserNode,
    ) -> Result<()> {
        if !stream.has_audio() {
            stream.stop_all();
            return Err(EngineError::new(
                ErrorKind::CaptureUnsupported,
                "captured stream carries no audio track",
            ));
        }
        self.attach(kind, SourceInput::Stream(stream), analyser)
    }

    pub fn attach_element(
        &mut self,
        element: Arc<dyn MediaElement>,
        analyser: &AnalyserNode,
    ) -> Result<()> {
        self.attach(
            AudioSourceKind::MediaElement,
            SourceInput::Element(element),
            analyser,
        )
    }

    fn attach(
        &mut self,
        kind: AudioSourceKind,
        input: SourceInput,
        analyser: &AnalyserNode,
    ) -> Result<()> {
        self.detach_current();

        self.next_id += 1;
        let id = SourceId(self.next_id);
        if let Err(err) = analyser.connect_source(id) {
            if let SourceInput::Stream(stream) = &input {
                stream.stop_all();
            }
            return Err(err);
        }

        tracing::info!(source = ?kind, id = id.0, "attached audio source");
        self.current = Some(AttachedSource {
            id,
            kind,
            input,
            analyser: analyser.clone(),
        });
        Ok(())
    }

    /// Disconnects the current source and stops its hardware tracks.
    pub fn detach_current(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.release();
        }
    }

    /// Moves the current source onto a replacement analysis node.
    pub fn reconnect(&mut self, analyser: &AnalyserNode) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        if let Err(err) = current.analyser.disconnect_source(current.id) {
            tracing::warn!(
                %err,
                source = ?current.kind,
                "failed to disconnect source from the replaced analyser"
            );
        }
        analyser.connect_source(current.id)?;
        current.analyser = analyser.clone();
        Ok(())
    }

    pub fn current_kind(&self) -> Option<&AudioSourceKind> {
        self.current.as_ref().map(|source| &source.kind)
    }

    pub fn is_system_capture(&self) -> bool {
        matches!(self.current_kind(), Some(AudioSourceKind::SystemCapture))
    }

    /// Feeds newly arrived samples from the current source into the analyser.
    pub fn pump(&mut self) -> Result<usize> {
        let Some(current) = &self.current else {
            return Ok(0);
        };

        self.scratch.clear();
        match &current.input {
            SourceInput::Stream(stream) => {
                for track in stream.audio_tracks() {
                    if !track.is_stopped() {
                        track.read_samples(&mut self.scratch);
                    }
                }
            }
            SourceInput::Element(element) => element.read_samples(&mut self.scratch),
        }

        current.analyser.write_samples(current.id, &self.scratch)?;
        Ok(self.scratch.len())
    }
}

impl fmt::Debug for AudioSourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSourceManager")
            .field("current", &self.current_kind())
            .finish()
    }
}

/// Requests a microphone stream, mapping host failures onto the taxonomy.
pub async fn request_microphone(
    devices: &dyn MediaDevices,
    constraints: UserMediaConstraints,
) -> Result<MediaStream> {
    let device = constraints.device_id.clone();
    devices
        .get_user_media(constraints)
        .await
        .map_err(|err| {
            let kind = err.capture_kind();
            tracing::warn!(%err, ?device, ?kind, "microphone request failed");
            EngineError::new(kind, err.message)
        })
}

/// Requests system/tab audio.
///
/// Asks for audio only first. Hosts that only offer "share audio" inside the
/// video consent flow reject that with `NotSupported`; the request is then
/// repeated once with video, the video tracks are stopped, and a fresh
/// audio-only stream is returned.
pub async fn request_system_capture(devices: &dyn MediaDevices) -> Result<MediaStream> {
    let audio_only = DisplayMediaConstraints {
        audio: true,
        video: false,
    };
    let stream = match devices.get_display_media(audio_only).await {
        Ok(stream) => stream,
        Err(err) if err.kind == HostErrorKind::NotSupported => {
            tracing::debug!(%err, "audio-only display capture rejected, retrying with video");
            let with_video = DisplayMediaConstraints {
                audio: true,
                video: true,
            };
            devices
                .get_display_media(with_video)
                .await
                .map_err(|err| capture_error("system capture", &err))?
        }
        Err(err) => return Err(capture_error("system capture", &err)),
    };

    stream.stop_video();
    let audio = stream.audio_only();
    if !audio.has_audio() {
        stream.stop_all();
        return Err(EngineError::new(
            ErrorKind::CaptureUnsupported,
            "display capture was granted without an audio track",
        ));
    }
    Ok(audio)
}

fn capture_error(what: &str, err: &crate::HostError) -> EngineError {
    let kind = err.capture_kind();
    tracing::warn!(%err, ?kind, "{what} request failed");
    EngineError::new(kind, err.message.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::{PermissionPolicy, SyntheticMediaDevices, ToneTrack};

    fn analyser() -> AnalyserNode {
        AnalyserNode::new(48_000, 256, 0.0).unwrap()
    }

    fn tone_stream(id: &str) -> (MediaStream, Arc<ToneTrack>) {
        let track = Arc::new(ToneTrack::new(id, 440.0, 48_000));
        (MediaStream::new(vec![track.clone()]), track)
    }

    #[test]
    fn switching_sources_stops_previous_tracks() {
        let node = analyser();
        let mut sources = AudioSourceManager::new();
        let (first, first_track) = tone_stream("mic-1");
        let (second, second_track) = tone_stream("tab-1");

        sources
            .attach_stream(AudioSourceKind::Microphone { device_id: None }, first, &node)
            .unwrap();
        sources
            .attach_stream(AudioSourceKind::SystemCapture, second, &node)
            .unwrap();

        assert!(first_track.is_stopped());
        assert!(!second_track.is_stopped());
        assert!(sources.is_system_capture());
        assert!(node.connected_source().unwrap().is_some());
    }

    #[test]
    fn pump_feeds_the_analyser() {
        let node = analyser();
        let mut sources = AudioSourceManager::new();
        let (stream, _) = tone_stream("mic");
        sources
            .attach_stream(AudioSourceKind::Microphone { device_id: None }, stream, &node)
            .unwrap();

        assert!(sources.pump().unwrap() > 0);
        assert!(node.rms().unwrap() > 0.1);
    }

    #[test]
    fn reconnect_moves_the_source_to_the_new_analyser() {
        let old = analyser();
        let fresh = analyser();
        let mut sources = AudioSourceManager::new();
        let (stream, track) = tone_stream("mic");
        sources
            .attach_stream(AudioSourceKind::Microphone { device_id: None }, stream, &old)
            .unwrap();
        let id = old.connected_source().unwrap();

        sources.reconnect(&fresh).unwrap();
        assert!(old.connected_source().unwrap().is_none());
        assert_eq!(fresh.connected_source().unwrap(), id);
        assert!(!track.is_stopped());

        assert!(sources.pump().unwrap() > 0);
        assert!(fresh.rms().unwrap() > 0.1);
        assert_eq!(old.rms().unwrap(), 0.0);
    }

    #[test]
    fn streams_without_audio_are_rejected_and_stopped() {
        let node = analyser();
        let mut sources = AudioSourceManager::new();
        let video = Arc::new(ToneTrack::video("screen"));
        let stream = MediaStream::new(vec![video.clone()]);

        let err = sources
            .attach_stream(AudioSourceKind::SystemCapture, stream, &node)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::CaptureUnsupported));
        assert!(video.is_stopped());
        assert!(sources.current_kind().is_none());
    }

    #[tokio::test]
    async fn denied_microphone_maps_to_permission_denied() {
        let devices = SyntheticMediaDevices::new();
        devices.set_microphone_policy(PermissionPolicy::Deny(HostErrorKind::NotAllowed));

        let err = request_microphone(&devices, UserMediaConstraints::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::PermissionDenied));
    }

    #[tokio::test]
    async fn unknown_device_maps_to_device_not_found() {
        let devices = SyntheticMediaDevices::new();
        let constraints = UserMediaConstraints {
            device_id: Some("missing".into()),
            ..Default::default()
        };

        let err = request_microphone(&devices, constraints).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::DeviceNotFound));
    }

    #[tokio::test]
    async fn system_capture_retries_with_video() {
        let devices = SyntheticMediaDevices::new();
        devices.set_display_policy(PermissionPolicy::AudioOnlyUnsupported);

        let stream = request_system_capture(&devices).await.unwrap();
        assert!(stream.tracks().iter().all(|t| t.kind() == TrackKind::Audio));
        assert_eq!(devices.display_requests(), 2);

        let issued = devices.issued_streams();
        let video_stopped = issued
            .iter()
            .flat_map(|s| s.tracks().iter())
            .filter(|t| t.kind() == TrackKind::Video)
            .all(|t| t.is_stopped());
        assert!(video_stopped);
    }
}
