//! Built-in waveform renderer used when the external library cannot be
//! instantiated. It only proves the audio graph is live.

mod surface;

pub use surface::PixelSurface;

use crate::{
    audio::AnalyserNode,
    render::{CanvasRef, PixelSize},
    visualizer::{Capabilities, Visualizer},
    FallbackConfig, HostError, HostErrorKind, HostResult,
};

/// Oscilloscope-style renderer painting the analyser's time-domain samples.
pub struct FallbackVisualizer {
    canvas: CanvasRef,
    config: FallbackConfig,
    analyser: Option<AnalyserNode>,
    surface: PixelSurface,
    samples: Vec<f32>,
    destroyed: bool,
}

impl FallbackVisualizer {
    pub fn new(canvas: CanvasRef, config: FallbackConfig) -> Self {
        let surface = PixelSurface::new(canvas.backing_size());
        Self {
            canvas,
            config,
            analyser: None,
            surface,
            samples: Vec::new(),
            destroyed: false,
        }
    }

    pub fn surface(&self) -> &PixelSurface {
        &self.surface
    }

    pub fn is_connected(&self) -> bool {
        self.analyser.is_some()
    }

    fn read_samples(&mut self) -> HostResult<()> {
        let Some(analyser) = &self.analyser else {
            self.samples.fill(0.0);
            return Ok(());
        };
        let size = analyser.fft_size().map_err(host_error)?;
        self.samples.resize(size, 0.0);
        analyser
            .time_domain_data(&mut self.samples)
            .map_err(host_error)
    }

    fn paint(&mut self) {
        let size = self.surface.size();
        self.surface.fill(self.config.background);
        if size.width == 0 || size.height == 0 {
            return;
        }

        let mid = size.height as f32 / 2.0;
        let amplitude = mid * 0.9;
        let last_x = (size.width - 1) as f32;
        let count = self.samples.len();

        if count < 2 {
            self.surface
                .draw_line((0.0, mid), (last_x, mid), self.config.line_width, self.config.stroke);
            return;
        }

        let step = last_x / (count - 1) as f32;
        let point = |index: usize, sample: f32| {
            (index as f32 * step, mid - sample.clamp(-1.0, 1.0) * amplitude)
        };
        for index in 1..count {
            let from = point(index - 1, self.samples[index - 1]);
            let to = point(index, self.samples[index]);
            self.surface
                .draw_line(from, to, self.config.line_width, self.config.stroke);
        }
    }
}

impl Visualizer for FallbackVisualizer {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            render: true,
            connect_audio: true,
            load_preset: false,
            set_renderer_size: true,
            destroy: true,
        }
    }

    fn render(&mut self) -> HostResult<()> {
        if self.destroyed {
            return Ok(());
        }
        let size = self.canvas.backing_size();
        if size != self.surface.size() {
            self.surface.resize(size);
        }
        self.read_samples()?;
        self.paint();
        self.canvas.present(self.surface.as_rgba(), self.surface.size());
        Ok(())
    }

    fn connect_audio(&mut self, analyser: &AnalyserNode) -> HostResult<()> {
        self.analyser = Some(analyser.clone());
        Ok(())
    }

    fn set_renderer_size(&mut self, width: u32, height: u32) -> HostResult<()> {
        self.surface.resize(PixelSize::new(width, height));
        Ok(())
    }

    /// Drops the pixel buffer and the analyser handle. The shared audio
    /// context is not touched.
    fn destroy(&mut self) {
        self.destroyed = true;
        self.analyser = None;
        self.surface = PixelSurface::default();
        self.samples = Vec::new();
    }

    fn label(&self) -> String {
        "fallback-waveform".to_string()
    }
}

fn host_error(err: crate::EngineError) -> HostError {
    HostError::new(HostErrorKind::Other, err.to_string())
}
