use std::{fmt, sync::Arc};

use serde::Serialize;

/// Displayed (CSS) size of a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CssSize {
    pub width: f64,
    pub height: f64,
}

/// Backing-buffer size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Backing size for a displayed size at a given pixel ratio.
///
/// Pure function of its inputs, so the resize observer and the frame callback
/// can both apply it without ordering concerns.
pub fn backing_size_for(css: CssSize, pixel_ratio: f64) -> PixelSize {
    let ratio = if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
        pixel_ratio
    } else {
        1.0
    };
    let scale = |value: f64| -> u32 {
        if value.is_finite() && value > 0.0 {
            (value * ratio).round().clamp(1.0, u32::MAX as f64) as u32
        } else {
            1
        }
    };
    PixelSize::new(scale(css.width), scale(css.height))
}

/// Opaque handle to the canvas's WebGL-style rendering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlContext {
    pub id: u64,
    pub version: u8,
}

/// Invoked with the new displayed size whenever the canvas is resized.
pub type ResizeCallback = Arc<dyn Fn(CssSize) + Send + Sync>;

/// Drawing surface supplied by the host.
pub trait Canvas: Send + Sync {
    fn css_size(&self) -> CssSize;
    fn device_pixel_ratio(&self) -> f64;
    fn backing_size(&self) -> PixelSize;
    fn set_backing_size(&self, size: PixelSize);
    /// `None` when no GL context can be obtained.
    fn gl_context(&self) -> Option<GlContext>;
    /// Blits an RGBA frame into the canvas.
    fn present(&self, _rgba: &[u8], _size: PixelSize) {}
    /// Registers a size observer. `None` when the host cannot observe resizes.
    fn observe_resize(&self, callback: ResizeCallback) -> Option<ResizeSubscription>;
}

pub type CanvasRef = Arc<dyn Canvas>;

/// Brings the canvas backing buffer in line with its displayed size.
///
/// Returns the new size when it changed.
pub fn sync_backing_size(canvas: &dyn Canvas) -> Option<PixelSize> {
    let target = backing_size_for(canvas.css_size(), canvas.device_pixel_ratio());
    if canvas.backing_size() == target {
        return None;
    }
    canvas.set_backing_size(target);
    Some(target)
}

/// Live resize observation. Disconnects on drop.
pub struct ResizeSubscription {
    disconnect: Option<Box<dyn FnOnce() + Send>>,
}

impl ResizeSubscription {
    pub fn new(disconnect: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disconnect: Some(Box::new(disconnect)),
        }
    }

    pub fn disconnect(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(disconnect) = self.disconnect.take() {
            disconnect();
        }
    }
}

impl Drop for ResizeSubscription {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for ResizeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResizeSubscription")
            .field("connected", &self.disconnect.is_some())
            .finish()
    }
}
