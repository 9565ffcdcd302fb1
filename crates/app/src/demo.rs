//! A small spectrum visualizer packaged the way third-party libraries ship:
//! a class constructor taking `(audioContext, canvas, options)`.

use audio_reactive_core::{
    audio::{AnalyserNode, AudioContextHandle, NodeKind, NodeTarget},
    library::{ConstructorArg, ExternalCallable},
    render::CanvasRef,
    visualizer::VisualizerOptions,
    Capabilities, EngineError, HostError, HostErrorKind, HostResult, HostValue, PresetEntry,
    Visualizer,
};

/// Frames between two level reports.
const REPORT_EVERY: u64 = 60;

pub struct SpectrumLibrary;

impl ExternalCallable for SpectrumLibrary {
    fn call(&self, _args: &[ConstructorArg]) -> HostResult<HostValue> {
        Err(HostError::type_error(
            "class constructor SpectrumBars cannot be invoked without 'new'",
        ))
    }

    fn construct(&self, args: &[ConstructorArg]) -> HostResult<HostValue> {
        use ConstructorArg::{AudioContext, Canvas, Options};

        match args {
            [AudioContext(ctx), Canvas(canvas), Options(options)] => Ok(HostValue::object(
                SpectrumBars::new(ctx, canvas.clone(), options)?,
            )),
            _ => Err(HostError::type_error(
                "SpectrumBars expects (audioContext, canvas, options)",
            )),
        }
    }

    fn source_text(&self) -> Option<String> {
        Some("class SpectrumBars { constructor(audioContext, canvas, options) {} }".to_string())
    }

    fn name(&self) -> String {
        "SpectrumBars".to_string()
    }
}

struct SpectrumBars {
    canvas: CanvasRef,
    analyser: Option<AnalyserNode>,
    sample_rate: u32,
    bins: Vec<f32>,
    size: (u32, u32),
    preset: Option<String>,
    frames: u64,
}

impl SpectrumBars {
    fn new(
        ctx: &AudioContextHandle,
        canvas: CanvasRef,
        options: &VisualizerOptions,
    ) -> HostResult<Self> {
        // Presets route through a low-pass stage; shimmed on hosts without one.
        let mut filter = ctx.create_node(NodeKind::BiquadFilter).map_err(host_error)?;
        filter.connect(NodeTarget::Analyser)?;
        tracing::debug!(shim = filter.is_shim(), "demo filter stage ready");

        Ok(Self {
            canvas,
            analyser: None,
            sample_rate: ctx.sample_rate(),
            bins: Vec::new(),
            size: (options.width, options.height),
            preset: None,
            frames: 0,
        })
    }

    fn report(&self, analyser: &AnalyserNode) -> HostResult<()> {
        let (peak_bin, peak_db) = self
            .bins
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (bin, db)| {
                if db > best.1 {
                    (bin, db)
                } else {
                    best
                }
            });
        let fft_size = analyser.fft_size().map_err(host_error)?;
        let peak_hz = peak_bin as f32 * self.sample_rate as f32 / fft_size as f32;
        let rms = analyser.rms().map_err(host_error)?;

        tracing::info!(
            frame = self.frames,
            peak_hz = peak_hz.round(),
            peak_db = peak_db.round(),
            rms = %format!("{rms:.3}"),
            size = ?self.size,
            backing = ?self.canvas.backing_size(),
            preset = self.preset.as_deref().unwrap_or("-"),
            "spectrum"
        );
        Ok(())
    }
}

impl Visualizer for SpectrumBars {
    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn render(&mut self) -> HostResult<()> {
        self.frames += 1;
        let Some(analyser) = self.analyser.clone() else {
            return Ok(());
        };
        let bins = analyser.frequency_bin_count().map_err(host_error)?;
        self.bins.resize(bins, 0.0);
        analyser.frequency_data(&mut self.bins).map_err(host_error)?;

        if self.frames % REPORT_EVERY == 0 {
            self.report(&analyser)?;
        }
        Ok(())
    }

    fn connect_audio(&mut self, analyser: &AnalyserNode) -> HostResult<()> {
        self.analyser = Some(analyser.clone());
        Ok(())
    }

    fn load_preset(&mut self, preset: &PresetEntry, blend_seconds: f32) -> HostResult<()> {
        tracing::info!(preset = %preset.name, blend_seconds, "demo loading preset");
        self.preset = Some(preset.name.clone());
        Ok(())
    }

    fn set_renderer_size(&mut self, width: u32, height: u32) -> HostResult<()> {
        self.size = (width, height);
        Ok(())
    }

    fn destroy(&mut self) {
        self.analyser = None;
        self.bins = Vec::new();
    }

    fn label(&self) -> String {
        "spectrum-bars".to_string()
    }
}

fn host_error(err: EngineError) -> HostError {
    HostError::new(HostErrorKind::Other, err.to_string())
}

/// Presets bundled with the demo when no preset file is given.
pub const BUILTIN_PRESETS: &str = r#"{
    "Aderrasi - Airhandler": { "warp": 0.4, "decay": 0.96 },
    "Flexi - mindblob": { "warp": 1.2, "decay": 0.9 },
    "Geiss - Cosmic Dust": { "warp": 0.1, "decay": 0.99 }
}"#;
