use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use serde::Serialize;

use crate::{
    preset::PresetEntry,
    render::{
        sync_backing_size, Canvas, CanvasRef, FrameHandle, FrameScheduler, ResizeCallback,
        ResizeSubscription,
    },
    visualizer::{self, Capabilities, Visualizer},
    EngineError, RenderConfig, Result,
};

/// Lifecycle of the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopPhase {
    Idle,
    SettingUp,
    Running,
    TearingDown,
    /// Torn down for good by an unmount.
    Destroyed,
}

/// Work run before each frame's render, such as pumping audio into the
/// analysis node.
pub type FrameHook = Arc<dyn Fn() + Send + Sync>;

/// Snapshot of the loop for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub phase: LoopPhase,
    pub instance: Option<String>,
    pub using_fallback: bool,
    pub capabilities: Capabilities,
    pub frames: u64,
    pub render_errors: u64,
}

struct LoopShared {
    phase: LoopPhase,
    session: u64,
    instance: Option<Box<dyn Visualizer>>,
    capabilities: Capabilities,
    label: Option<String>,
    using_fallback: bool,
    frame: Option<FrameHandle>,
    frames: u64,
    render_errors: u64,
}

impl LoopShared {
    fn is_live(&self, session: u64) -> bool {
        self.phase == LoopPhase::Running && self.session == session
    }
}

/// Owns the active instance and drives its per-frame `render` calls.
///
/// Phase changes happen only through `begin_setup`, `start` and `teardown`;
/// the frame callback merely re-queues itself while its session is running.
pub struct RenderLoopController {
    shared: Arc<Mutex<LoopShared>>,
    scheduler: Arc<dyn FrameScheduler>,
    config: RenderConfig,
    resize: Option<ResizeSubscription>,
}

impl RenderLoopController {
    pub fn new(scheduler: Arc<dyn FrameScheduler>, config: RenderConfig) -> Self {
        let shared = LoopShared {
            phase: LoopPhase::Idle,
            session: 0,
            instance: None,
            capabilities: Capabilities::NONE,
            label: None,
            using_fallback: false,
            frame: None,
            frames: 0,
            render_errors: 0,
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            scheduler,
            config,
            resize: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.lock()
            .map(|state| state.phase)
            .unwrap_or(LoopPhase::Destroyed)
    }

    /// `Idle`/`Destroyed` → `SettingUp`.
    pub fn begin_setup(&mut self) -> Result<()> {
        let mut state = self.lock()?;
        match state.phase {
            LoopPhase::Idle | LoopPhase::Destroyed => {
                state.phase = LoopPhase::SettingUp;
                Ok(())
            }
            other => Err(EngineError::msg(format!(
                "render loop cannot begin setup while {other:?}"
            ))),
        }
    }

    /// `SettingUp` → `Idle`, used when no instance could be produced.
    pub fn abort_setup(&mut self) {
        if let Ok(mut state) = self.lock() {
            if state.phase == LoopPhase::SettingUp {
                state.phase = LoopPhase::Idle;
            }
        }
    }

    /// `SettingUp` → `Running`: takes ownership of `instance`, applies the
    /// initial preset with the initial blend, and schedules the first frame.
    pub fn start(
        &mut self,
        mut instance: Box<dyn Visualizer>,
        using_fallback: bool,
        canvas: CanvasRef,
        preset: Option<&PresetEntry>,
        before_frame: Option<FrameHook>,
    ) -> Result<()> {
        if self.phase() != LoopPhase::SettingUp {
            let _ = visualizer::guarded(|| {
                instance.destroy();
                Ok(())
            });
            return Err(EngineError::msg("render loop started outside of setup"));
        }

        let capabilities = visualizer::capabilities_of(instance.as_ref());
        let label = instance.label();

        sync_backing_size(canvas.as_ref());
        if capabilities.set_renderer_size {
            let size = canvas.backing_size();
            if let Err(err) =
                visualizer::guarded(|| instance.set_renderer_size(size.width, size.height))
            {
                tracing::warn!(%err, "initial setRendererSize failed");
            }
        }

        if let (Some(preset), true) = (preset, capabilities.load_preset) {
            let blend = self.config.initial_blend_seconds;
            match visualizer::guarded(|| instance.load_preset(preset, blend)) {
                Ok(()) => tracing::info!(preset = %preset.name, blend, "loaded initial preset"),
                Err(err) => tracing::warn!(%err, preset = %preset.name, "initial preset failed"),
            }
        }

        let session = {
            let mut state = self.lock()?;
            state.session += 1;
            state.phase = LoopPhase::Running;
            state.instance = Some(instance);
            state.capabilities = capabilities;
            state.label = Some(label.clone());
            state.using_fallback = using_fallback;
            state.frames = 0;
            state.render_errors = 0;
            state.session
        };

        self.resize = canvas.observe_resize(resize_callback(
            Arc::downgrade(&self.shared),
            Arc::downgrade(&canvas),
            session,
        ));

        tracing::info!(instance = %label, using_fallback, "render loop running");
        request_next(Arc::new(FrameContext {
            shared: Arc::downgrade(&self.shared),
            scheduler: self.scheduler.clone(),
            canvas,
            session,
            before_frame,
        }));
        Ok(())
    }

    /// Loads `preset` on the running instance with the running blend time.
    /// Returns whether the instance accepted it.
    pub fn apply_preset(&self, preset: &PresetEntry) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        if state.phase != LoopPhase::Running || !state.capabilities.load_preset {
            return false;
        }
        let blend = self.config.preset_blend_seconds;
        let Some(instance) = state.instance.as_mut() else {
            return false;
        };
        match visualizer::guarded(|| instance.load_preset(preset, blend)) {
            Ok(()) => {
                tracing::info!(preset = %preset.name, blend, "switched preset");
                true
            }
            Err(err) => {
                tracing::warn!(%err, preset = %preset.name, "preset switch failed");
                false
            }
        }
    }

    /// `Running` → `TearingDown` → `final_phase`.
    ///
    /// Cancels the queued frame, disconnects the resize observer, and
    /// destroys the instance. Safe to call in any phase.
    pub fn teardown(&mut self, final_phase: LoopPhase) {
        let (frame, instance) = match self.lock() {
            Ok(mut state) => {
                state.phase = LoopPhase::TearingDown;
                state.session += 1;
                state.capabilities = Capabilities::NONE;
                (state.frame.take(), state.instance.take())
            }
            Err(_) => (None, None),
        };

        if let Some(handle) = frame {
            self.scheduler.cancel_frame(handle);
        }
        if let Some(subscription) = self.resize.take() {
            subscription.disconnect();
        }
        if let Some(mut instance) = instance {
            let label = instance.label();
            if let Err(err) = visualizer::guarded(|| {
                instance.destroy();
                Ok(())
            }) {
                tracing::warn!(%err, instance = %label, "destroy failed");
            }
            tracing::info!(instance = %label, "destroyed visualizer instance");
        }

        if let Ok(mut state) = self.lock() {
            state.phase = final_phase;
            state.label = None;
            state.using_fallback = false;
        }
    }

    pub fn stats(&self) -> LoopStats {
        match self.lock() {
            Ok(state) => LoopStats {
                phase: state.phase,
                instance: state.label.clone(),
                using_fallback: state.using_fallback,
                capabilities: state.capabilities,
                frames: state.frames,
                render_errors: state.render_errors,
            },
            Err(_) => LoopStats {
                phase: LoopPhase::Destroyed,
                instance: None,
                using_fallback: false,
                capabilities: Capabilities::NONE,
                frames: 0,
                render_errors: 0,
            },
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoopShared>> {
        self.shared
            .lock()
            .map_err(|_| EngineError::msg("render loop state has been poisoned"))
    }
}

impl fmt::Debug for RenderLoopController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderLoopController")
            .field("stats", &self.stats())
            .finish()
    }
}

struct FrameContext {
    shared: Weak<Mutex<LoopShared>>,
    scheduler: Arc<dyn FrameScheduler>,
    canvas: CanvasRef,
    session: u64,
    before_frame: Option<FrameHook>,
}

fn request_next(ctx: Arc<FrameContext>) {
    let next = ctx.clone();
    let handle = ctx.scheduler.request_frame(Box::new(move || run_frame(next)));

    let Some(shared) = ctx.shared.upgrade() else {
        ctx.scheduler.cancel_frame(handle);
        return;
    };
    let live = match shared.lock() {
        Ok(mut state) if state.is_live(ctx.session) => {
            state.frame = Some(handle);
            true
        }
        _ => false,
    };
    if !live {
        ctx.scheduler.cancel_frame(handle);
    }
}

fn run_frame(ctx: Arc<FrameContext>) {
    let Some(shared) = ctx.shared.upgrade() else {
        return;
    };
    let live = shared
        .lock()
        .map(|state| state.is_live(ctx.session))
        .unwrap_or(false);
    if !live {
        return;
    }

    if let Some(hook) = &ctx.before_frame {
        hook();
    }

    {
        let Ok(mut guard) = shared.lock() else {
            return;
        };
        if !guard.is_live(ctx.session) {
            return;
        }

        let state = &mut *guard;
        state.frame = None;
        state.frames += 1;
        let resized = sync_backing_size(ctx.canvas.as_ref());

        if let Some(instance) = state.instance.as_mut() {
            if let (Some(size), true) = (resized, state.capabilities.set_renderer_size) {
                if let Err(err) =
                    visualizer::guarded(|| instance.set_renderer_size(size.width, size.height))
                {
                    tracing::warn!(%err, "setRendererSize failed during frame");
                }
            }
            if state.capabilities.render {
                if let Err(err) = visualizer::guarded(|| instance.render()) {
                    state.render_errors += 1;
                    tracing::warn!(%err, frame = state.frames, "render call failed, continuing");
                }
            }
        }
    }

    request_next(ctx);
}

fn resize_callback(
    shared: Weak<Mutex<LoopShared>>,
    canvas: Weak<dyn Canvas>,
    session: u64,
) -> ResizeCallback {
    Arc::new(move |_css| {
        let (Some(shared), Some(canvas)) = (shared.upgrade(), canvas.upgrade()) else {
            return;
        };
        sync_backing_size(canvas.as_ref());
        let size = canvas.backing_size();

        let Ok(mut guard) = shared.lock() else {
            return;
        };
        let state = &mut *guard;
        if !state.is_live(session) || !state.capabilities.set_renderer_size {
            return;
        }
        if let Some(instance) = state.instance.as_mut() {
            if let Err(err) =
                visualizer::guarded(|| instance.set_renderer_size(size.width, size.height))
            {
                tracing::warn!(%err, "setRendererSize failed on resize");
            }
        }
    })
}
