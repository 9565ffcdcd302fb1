use std::{
    f32::consts::PI,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{EngineError, ErrorKind, Result};

/// Floor reported for silent frequency bins, in decibels.
const MIN_DECIBELS: f32 = -100.0;

/// Identifier of a source node connected to the analyser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// The shared analysis node.
///
/// Holds a rolling window of the most recent `fft_size` samples and exposes
/// time- and frequency-domain reads to renderers. At most one source may be
/// connected at a time. Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct AnalyserNode {
    shared: Arc<Mutex<AnalyserState>>,
}

struct AnalyserState {
    sample_rate: u32,
    fft_size: usize,
    smoothing: f32,
    window: Vec<f32>,
    write_index: usize,
    input: Option<SourceId>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl AnalyserNode {
    pub fn new(sample_rate: u32, fft_size: usize, smoothing: f32) -> Result<Self> {
        if !fft_size.is_power_of_two() || fft_size < 32 {
            return Err(EngineError::msg(format!(
                "analyser fft size must be a power of two >= 32, got {fft_size}"
            )));
        }

        let fft = FftResources::new(fft_size);
        let state = AnalyserState {
            sample_rate,
            fft_size,
            smoothing: smoothing.clamp(0.0, 1.0),
            window: vec![0.0; fft_size],
            write_index: 0,
            input: None,
            smoothed: vec![0.0; fft_size / 2],
            fft,
        };

        Ok(Self {
            shared: Arc::new(Mutex::new(state)),
        })
    }

    pub fn fft_size(&self) -> Result<usize> {
        Ok(self.lock()?.fft_size)
    }

    pub fn frequency_bin_count(&self) -> Result<usize> {
        Ok(self.lock()?.fft_size / 2)
    }

    pub fn sample_rate(&self) -> Result<u32> {
        Ok(self.lock()?.sample_rate)
    }

    /// Connects a source node. Fails if a different source is still attached.
    pub fn connect_source(&self, id: SourceId) -> Result<()> {
        let mut state = self.lock()?;
        match state.input {
            Some(existing) if existing != id => Err(EngineError::new(
                ErrorKind::ConnectionFailed,
                format!("analyser already has source {existing:?} connected"),
            )),
            _ => {
                state.input = Some(id);
                Ok(())
            }
        }
    }

    /// Disconnects `id` if it is the connected source. Clears the window so
    /// renderers never show stale audio from a detached source.
    pub fn disconnect_source(&self, id: SourceId) -> Result<()> {
        let mut state = self.lock()?;
        if state.input == Some(id) {
            state.input = None;
            state.window.fill(0.0);
            state.smoothed.fill(0.0);
            state.write_index = 0;
        }
        Ok(())
    }

    pub fn connected_source(&self) -> Result<Option<SourceId>> {
        Ok(self.lock()?.input)
    }

    /// Appends samples from the connected source.
    pub fn write_samples(&self, id: SourceId, samples: &[f32]) -> Result<()> {
        let mut state = self.lock()?;
        if state.input != Some(id) {
            return Ok(());
        }

        let size = state.fft_size;
        let tail = if samples.len() > size {
            &samples[samples.len() - size..]
        } else {
            samples
        };
        for sample in tail {
            let index = state.write_index;
            state.window[index] = *sample;
            state.write_index = (index + 1) % size;
        }
        Ok(())
    }

    /// Copies the most recent samples, oldest first, into `out`.
    pub fn time_domain_data(&self, out: &mut [f32]) -> Result<()> {
        let state = self.lock()?;
        state.copy_window(out);
        Ok(())
    }

    /// Byte variant of [`Self::time_domain_data`], centred on 128.
    pub fn byte_time_domain_data(&self, out: &mut [u8]) -> Result<()> {
        let state = self.lock()?;
        let mut samples = vec![0.0; out.len().min(state.fft_size)];
        state.copy_window(&mut samples);
        for (byte, sample) in out.iter_mut().zip(samples) {
            *byte = (128.0 * (1.0 + sample.clamp(-1.0, 1.0))).clamp(0.0, 255.0) as u8;
        }
        Ok(())
    }

    /// Writes smoothed bin magnitudes in decibels into `out`.
    pub fn frequency_data(&self, out: &mut [f32]) -> Result<()> {
        let mut state = self.lock()?;
        state.update_spectrum()?;
        for (value, magnitude) in out.iter_mut().zip(state.smoothed.iter()) {
            *value = if *magnitude <= f32::EPSILON {
                MIN_DECIBELS
            } else {
                (20.0 * magnitude.log10()).max(MIN_DECIBELS)
            };
        }
        Ok(())
    }

    /// Root mean square level of the current window.
    pub fn rms(&self) -> Result<f32> {
        let state = self.lock()?;
        Ok(compute_rms(&state.window))
    }

    /// Whether two handles refer to the same node.
    pub fn same_node(&self, other: &AnalyserNode) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> Result<MutexGuard<'_, AnalyserState>> {
        self.shared
            .lock()
            .map_err(|_| EngineError::msg("analysis node has been poisoned"))
    }
}

impl AnalyserState {
    fn copy_window(&self, out: &mut [f32]) {
        let size = self.fft_size;
        let count = out.len().min(size);
        // Newest sample sits just before write_index.
        let start = (self.write_index + size - count) % size;
        for (offset, slot) in out.iter_mut().take(count).enumerate() {
            *slot = self.window[(start + offset) % size];
        }
        for slot in out.iter_mut().skip(count) {
            *slot = 0.0;
        }
    }

    fn update_spectrum(&mut self) -> Result<()> {
        let size = self.fft_size;
        let start = self.write_index;
        for index in 0..size {
            self.fft.input[index] = self.window[(start + index) % size] * hann_value(index, size);
        }

        self.fft
            .plan
            .process_with_scratch(&mut self.fft.input, &mut self.fft.spectrum, &mut self.fft.scratch)
            .map_err(|err| EngineError::msg(format!("spectrum analysis failed: {err}")))?;

        let scale = 1.0 / size as f32;
        let smoothing = self.smoothing;
        for (slot, bin) in self.smoothed.iter_mut().zip(self.fft.spectrum.iter()) {
            let magnitude = bin.norm() * scale;
            *slot = smoothing * *slot + (1.0 - smoothing) * magnitude;
        }
        Ok(())
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

impl fmt::Debug for AnalyserNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.lock() {
            Ok(state) => f
                .debug_struct("AnalyserNode")
                .field("sample_rate", &state.sample_rate)
                .field("fft_size", &state.fft_size)
                .field("input", &state.input)
                .finish(),
            Err(_) => f.debug_struct("AnalyserNode").finish_non_exhaustive(),
        }
    }
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn only_one_source_may_be_connected() {
        let node = AnalyserNode::new(48_000, 256, 0.8).unwrap();
        node.connect_source(SourceId(1)).unwrap();

        let err = node.connect_source(SourceId(2)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ConnectionFailed));

        node.disconnect_source(SourceId(1)).unwrap();
        node.connect_source(SourceId(2)).unwrap();
        assert_eq!(node.connected_source().unwrap(), Some(SourceId(2)));
    }

    #[test]
    fn ignores_samples_from_unconnected_sources() {
        let node = AnalyserNode::new(48_000, 64, 0.0).unwrap();
        node.connect_source(SourceId(1)).unwrap();
        node.write_samples(SourceId(7), &[1.0; 64]).unwrap();

        assert_eq!(node.rms().unwrap(), 0.0);
    }

    #[test]
    fn time_domain_reads_are_oldest_first() {
        let node = AnalyserNode::new(48_000, 32, 0.0).unwrap();
        node.connect_source(SourceId(1)).unwrap();
        let ramp: Vec<f32> = (0..40).map(|i| i as f32).collect();
        node.write_samples(SourceId(1), &ramp).unwrap();

        let mut out = vec![0.0; 4];
        node.time_domain_data(&mut out).unwrap();
        assert_eq!(out, vec![36.0, 37.0, 38.0, 39.0]);
    }

    #[test]
    fn spectrum_peaks_near_tone_frequency() {
        let sample_rate = 8_000;
        let node = AnalyserNode::new(sample_rate, 1024, 0.0).unwrap();
        node.connect_source(SourceId(1)).unwrap();
        node.write_samples(SourceId(1), &sine(1_000.0, sample_rate, 1024))
            .unwrap();

        let mut bins = vec![0.0; node.frequency_bin_count().unwrap()];
        node.frequency_data(&mut bins).unwrap();
        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        let bin_hz = sample_rate as f32 / 1024.0;
        assert!((peak as f32 * bin_hz - 1_000.0).abs() < 2.0 * bin_hz);
    }

    #[test]
    fn disconnect_clears_window() {
        let node = AnalyserNode::new(48_000, 64, 0.0).unwrap();
        node.connect_source(SourceId(3)).unwrap();
        node.write_samples(SourceId(3), &[0.5; 64]).unwrap();
        assert!(node.rms().unwrap() > 0.0);

        node.disconnect_source(SourceId(3)).unwrap();
        assert_eq!(node.rms().unwrap(), 0.0);

        let mut bytes = [0u8; 4];
        node.byte_time_domain_data(&mut bytes).unwrap();
        assert_eq!(bytes, [128; 4]);
    }
}
