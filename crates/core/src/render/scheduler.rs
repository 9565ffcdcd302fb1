/// Token identifying one requested frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

pub type FrameCallback = Box<dyn FnOnce() + Send>;

/// The host's per-frame callback facility (`requestAnimationFrame`).
pub trait FrameScheduler: Send + Sync {
    /// Queues `callback` for the next frame. Implementations must never run
    /// it synchronously from inside this call.
    fn request_frame(&self, callback: FrameCallback) -> FrameHandle;
    /// Drops a queued callback. Unknown or already-run handles are ignored.
    fn cancel_frame(&self, handle: FrameHandle);
}
