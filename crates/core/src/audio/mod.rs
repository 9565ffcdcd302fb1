//! Audio graph: the shared context, its persistent analysis node, and the
//! single attached input source.

mod analyser;
mod context;
mod source;

pub use analyser::{AnalyserNode, SourceId};
pub use context::{
    AudioBackend, AudioContextHandle, AudioContextManager, AudioPlatform, GraphNode, NodeKind,
    NodeTarget, PassThroughNode, OPTIONAL_NODE_KINDS,
};
pub use source::{
    request_microphone, request_system_capture, AudioSourceKind, AudioSourceManager, BoxFuture,
    DeviceInfo, DisplayMediaConstraints, MediaDevices, MediaElement, MediaStream, MediaTrack,
    TrackKind, UserMediaConstraints,
};
