//! Render loop: canvas sizing, frame scheduling, and ownership of the active
//! visualizer instance.

mod canvas;
mod controller;
mod scheduler;

pub use canvas::{
    backing_size_for, sync_backing_size, Canvas, CanvasRef, CssSize, GlContext, PixelSize,
    ResizeCallback, ResizeSubscription,
};
pub use controller::{FrameHook, LoopPhase, LoopStats, RenderLoopController};
pub use scheduler::{FrameCallback, FrameHandle, FrameScheduler};
