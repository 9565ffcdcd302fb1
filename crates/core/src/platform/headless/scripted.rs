//! Stand-ins for an external visualizer library with scripted behaviour.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use super::lock;
use crate::{
    audio::AnalyserNode,
    library::{ConstructorArg, ExternalCallable},
    preset::PresetEntry,
    visualizer::{Capabilities, HostValue, Visualizer},
    HostError, HostResult,
};

#[derive(Debug, Default)]
struct ProbeLog {
    renders: usize,
    destroys: usize,
    connects: usize,
    presets: Vec<(String, f32)>,
    sizes: Vec<(u32, u32)>,
}

/// Records every call made on the instances it is attached to.
#[derive(Debug, Clone, Default)]
pub struct InstanceProbe {
    log: Arc<Mutex<ProbeLog>>,
}

impl InstanceProbe {
    pub fn renders(&self) -> usize {
        lock(&self.log).renders
    }

    pub fn destroys(&self) -> usize {
        lock(&self.log).destroys
    }

    pub fn connect_audio_count(&self) -> usize {
        lock(&self.log).connects
    }

    /// `(preset name, blend seconds)` in load order.
    pub fn presets(&self) -> Vec<(String, f32)> {
        lock(&self.log).presets.clone()
    }

    pub fn sizes(&self) -> Vec<(u32, u32)> {
        lock(&self.log).sizes.clone()
    }
}

/// Instance whose capability set and render failures are scripted.
#[derive(Debug)]
pub struct ScriptedInstance {
    probe: InstanceProbe,
    capabilities: Capabilities,
    failing_renders: Vec<usize>,
}

impl ScriptedInstance {
    /// Exposes every capability.
    pub fn full(probe: InstanceProbe) -> Self {
        Self::with_capabilities(probe, Capabilities::ALL)
    }

    /// Exposes `render` and `destroy` only.
    pub fn renderer(probe: InstanceProbe) -> Self {
        Self::with_capabilities(
            probe,
            Capabilities {
                render: true,
                destroy: true,
                ..Capabilities::NONE
            },
        )
    }

    pub fn with_capabilities(probe: InstanceProbe, capabilities: Capabilities) -> Self {
        Self {
            probe,
            capabilities,
            failing_renders: Vec::new(),
        }
    }

    /// Makes the given render calls (1-based) fail.
    pub fn failing_render_on(mut self, frames: &[usize]) -> Self {
        self.failing_renders = frames.to_vec();
        self
    }
}

impl Visualizer for ScriptedInstance {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn render(&mut self) -> HostResult<()> {
        if !self.capabilities.render {
            return Err(HostError::missing("render"));
        }
        let count = {
            let mut log = lock(&self.probe.log);
            log.renders += 1;
            log.renders
        };
        if self.failing_renders.contains(&count) {
            return Err(HostError::type_error(format!("render {count} failed")));
        }
        Ok(())
    }

    fn connect_audio(&mut self, _analyser: &AnalyserNode) -> HostResult<()> {
        if !self.capabilities.connect_audio {
            return Err(HostError::missing("connectAudio"));
        }
        lock(&self.probe.log).connects += 1;
        Ok(())
    }

    fn load_preset(&mut self, preset: &PresetEntry, blend_seconds: f32) -> HostResult<()> {
        if !self.capabilities.load_preset {
            return Err(HostError::missing("loadPreset"));
        }
        lock(&self.probe.log)
            .presets
            .push((preset.name.clone(), blend_seconds));
        Ok(())
    }

    fn set_renderer_size(&mut self, width: u32, height: u32) -> HostResult<()> {
        if !self.capabilities.set_renderer_size {
            return Err(HostError::missing("setRendererSize"));
        }
        lock(&self.probe.log).sizes.push((width, height));
        Ok(())
    }

    fn destroy(&mut self) {
        if self.capabilities.destroy {
            lock(&self.probe.log).destroys += 1;
        }
    }

    fn label(&self) -> String {
        "scripted".to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum FactoryOutput {
    Full,
    Renderer,
    EmptyObject,
    Undefined,
}

/// Plain factory function: `call` and `construct` both return its product.
#[derive(Debug)]
pub struct ScriptedFactory {
    output: FactoryOutput,
    probe: InstanceProbe,
    calls: AtomicUsize,
}

impl ScriptedFactory {
    fn with_output(output: FactoryOutput) -> Self {
        Self {
            output,
            probe: InstanceProbe::default(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns an object exposing every capability.
    pub fn returning_full() -> Self {
        Self::with_output(FactoryOutput::Full)
    }

    /// Returns an object exposing `render` and `destroy`.
    pub fn returning_renderer() -> Self {
        Self::with_output(FactoryOutput::Renderer)
    }

    /// Returns an object with no recognised methods.
    pub fn returning_empty_object() -> Self {
        Self::with_output(FactoryOutput::EmptyObject)
    }

    pub fn returning_undefined() -> Self {
        Self::with_output(FactoryOutput::Undefined)
    }

    pub fn with_probe(mut self, probe: InstanceProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn probe(&self) -> InstanceProbe {
        self.probe.clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn produce(&self) -> HostValue {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.output {
            FactoryOutput::Full => HostValue::object(ScriptedInstance::full(self.probe.clone())),
            FactoryOutput::Renderer => {
                HostValue::object(ScriptedInstance::renderer(self.probe.clone()))
            }
            FactoryOutput::EmptyObject => HostValue::object(ScriptedInstance::with_capabilities(
                self.probe.clone(),
                Capabilities::NONE,
            )),
            FactoryOutput::Undefined => HostValue::Undefined,
        }
    }
}

impl ExternalCallable for ScriptedFactory {
    fn call(&self, _args: &[ConstructorArg]) -> HostResult<HostValue> {
        Ok(self.produce())
    }

    fn construct(&self, _args: &[ConstructorArg]) -> HostResult<HostValue> {
        Ok(self.produce())
    }

    fn source_text(&self) -> Option<String> {
        Some("function createVisualizer(canvas, audioContext, options) {}".to_string())
    }

    fn name(&self) -> String {
        "createVisualizer".to_string()
    }
}

/// Constructor that only accepts one argument shape.
#[derive(Debug)]
pub struct ScriptedClass {
    accepted: Option<Vec<&'static str>>,
    source: Option<String>,
    prototype: Vec<String>,
    callable_as_factory: bool,
    connect_audio: bool,
    probe: InstanceProbe,
    constructs: Mutex<Vec<Vec<&'static str>>>,
    calls: AtomicUsize,
}

impl ScriptedClass {
    /// Constructs successfully only when called with exactly `shape`.
    pub fn working_with_shape(shape: &[&'static str]) -> Self {
        Self {
            accepted: Some(shape.to_vec()),
            source: None,
            prototype: Vec::new(),
            callable_as_factory: false,
            connect_audio: false,
            probe: InstanceProbe::default(),
            constructs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Throws for every constructor shape.
    pub fn never_constructs() -> Self {
        Self {
            accepted: None,
            ..Self::working_with_shape(&[])
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_prototype(mut self, members: &[&str]) -> Self {
        self.prototype = members.iter().map(|member| member.to_string()).collect();
        self
    }

    /// Declares itself with `class` syntax.
    pub fn as_class(self) -> Self {
        self.with_source("class ScriptedVisualizer { constructor(...args) {} }")
    }

    /// Plain invocation returns a working instance instead of throwing.
    pub fn callable_as_factory(mut self) -> Self {
        self.callable_as_factory = true;
        self
    }

    /// Instances also expose `connectAudio`.
    pub fn with_connect_audio(mut self) -> Self {
        self.connect_audio = true;
        self
    }

    pub fn with_probe(mut self, probe: InstanceProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn probe(&self) -> InstanceProbe {
        self.probe.clone()
    }

    /// Argument shapes of every `construct` call, in order.
    pub fn construct_log(&self) -> Vec<Vec<&'static str>> {
        lock(&self.constructs).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connect_audio_count(&self) -> usize {
        self.probe.connect_audio_count()
    }

    fn instance(&self) -> HostValue {
        HostValue::object(ScriptedInstance::with_capabilities(
            self.probe.clone(),
            Capabilities {
                render: true,
                destroy: true,
                connect_audio: self.connect_audio,
                ..Capabilities::NONE
            },
        ))
    }
}

impl ExternalCallable for ScriptedClass {
    fn call(&self, _args: &[ConstructorArg]) -> HostResult<HostValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.callable_as_factory {
            Ok(self.instance())
        } else {
            Err(HostError::type_error(
                "class constructor cannot be invoked without 'new'",
            ))
        }
    }

    fn construct(&self, args: &[ConstructorArg]) -> HostResult<HostValue> {
        let shape: Vec<&'static str> = args.iter().map(ConstructorArg::shape).collect();
        lock(&self.constructs).push(shape.clone());
        if self.accepted.as_ref() == Some(&shape) {
            Ok(self.instance())
        } else {
            Err(HostError::type_error(format!(
                "unsupported arguments ({})",
                shape.join(", ")
            )))
        }
    }

    fn source_text(&self) -> Option<String> {
        self.source.clone()
    }

    fn prototype_members(&self) -> Vec<String> {
        self.prototype.clone()
    }

    fn name(&self) -> String {
        "ScriptedVisualizer".to_string()
    }
}

/// A factory paired with the probe observing its instances.
pub fn probed(factory: ScriptedFactory) -> (Arc<ScriptedFactory>, InstanceProbe) {
    let probe = InstanceProbe::default();
    (Arc::new(factory.with_probe(probe.clone())), probe)
}
