//! Process-wide compositor state.
//!
//! [`CompositorState`] is the data every event source callback and signal
//! listener receives. It owns the backend handle, the output registry and
//! the subscription to the backend's new-output signal. [`Compositor`] pairs
//! it with the calloop [`EventLoop`] that drives it.

use std::rc::Rc;
use std::time::{Duration, Instant};

use calloop::signals::{Signal as UnixSignal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, LoopHandle, LoopSignal};
use tracing::{debug, info, trace, warn};

use crate::backend::{Backend, DestroyEvent, FrameEvent, NewOutput, OutputId};
use crate::config::CompositorConfig;
use crate::error::CompositorError;
use crate::output::{
    FrameStats, ModePolicy, OutputEntity, OutputHandler, OutputListeners, OutputPhase,
};
use crate::pipeline::FramePipeline;
use crate::registry::OutputRegistry;
use crate::signal::Listener;

/// Statistics for one output, as reported at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSummary {
    pub id: OutputId,
    pub name: String,
    pub stats: FrameStats,
}

pub struct CompositorState {
    loop_signal: LoopSignal,
    backend: Rc<dyn Backend<CompositorState>>,
    outputs: OutputRegistry,
    new_output_listener: Option<Listener<NewOutput<CompositorState>, CompositorState>>,
    pipeline: FramePipeline,
    mode_policy: ModePolicy,
}

impl CompositorState {
    fn new(
        loop_signal: LoopSignal,
        backend: Rc<dyn Backend<CompositorState>>,
        config: &CompositorConfig,
    ) -> Self {
        let new_output_listener = backend.events().new_output.subscribe(
            |state: &mut CompositorState, new: &NewOutput<CompositorState>| state.new_output(new),
        );
        Self {
            loop_signal,
            backend,
            outputs: OutputRegistry::new(),
            new_output_listener: Some(new_output_listener),
            pipeline: FramePipeline::new(config.render.clear_color),
            mode_policy: config.render.mode_policy,
        }
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    pub fn mode_policy(&self) -> ModePolicy {
        self.mode_policy
    }

    /// Whether new outputs announced by the backend are still picked up.
    pub fn is_listening(&self) -> bool {
        self.new_output_listener
            .as_ref()
            .is_some_and(Listener::is_subscribed)
    }

    /// Asks the event loop to return after the current dispatch.
    pub fn stop(&self) {
        self.loop_signal.stop();
        self.loop_signal.wakeup();
    }

    /// Tears down every output and stops listening for new ones.
    ///
    /// Returns each output's statistics, in identity order. Calling it again
    /// returns an empty list.
    pub fn shutdown(&mut self) -> Vec<OutputSummary> {
        self.new_output_listener = None;

        let summaries: Vec<OutputSummary> = self
            .outputs
            .iter()
            .map(|entity| OutputSummary {
                id: entity.id(),
                name: entity.name().to_string(),
                stats: entity.stats(),
            })
            .collect();
        for summary in &summaries {
            info!(
                output = %summary.name,
                presented = summary.stats.presented,
                dropped = summary.stats.dropped,
                "Output statistics"
            );
        }

        for mut entity in self.outputs.drain() {
            entity.unsubscribe();
            entity.advance(OutputPhase::Destroyed);
        }
        if !summaries.is_empty() {
            info!(count = summaries.len(), "Released all outputs");
        }
        summaries
    }
}

impl OutputHandler for CompositorState {
    fn new_output(&mut self, new: &NewOutput<Self>) {
        let output = Rc::clone(&new.output);
        info!(output = %output.name(), id = %output.id(), "New output discovered");

        match self.mode_policy.select(&output.modes()) {
            Some(mode) => {
                if let Err(err) = output.set_mode(mode) {
                    warn!(output = %output.name(), "Leaving output unconfigured: {}", err);
                    return;
                }
                info!(
                    output = %output.name(),
                    mode = %mode,
                    policy = %self.mode_policy,
                    "Mode applied"
                );
            }
            None => {
                debug!(
                    output = %output.name(),
                    size = ?output.size(),
                    "Output advertises no modes, keeping its current size"
                );
            }
        }

        let listeners = OutputListeners {
            frame: new
                .events
                .frame
                .subscribe(|state: &mut CompositorState, event: &FrameEvent| {
                    state.output_frame(event)
                }),
            destroy: new
                .events
                .destroy
                .subscribe(|state: &mut CompositorState, event: &DestroyEvent| {
                    state.output_destroyed(event)
                }),
        };
        let entity = OutputEntity::new(output, listeners);
        let id = entity.id();
        if let Err(err) = self.outputs.insert(entity) {
            warn!(id = %id, "Ignoring new output: {}", err);
            return;
        }
        if let Some(entity) = self.outputs.get_mut(id) {
            entity.advance(OutputPhase::Active);
        }
    }

    fn output_frame(&mut self, event: &FrameEvent) {
        let Some(output) = self.outputs.get(event.output).map(|e| Rc::clone(e.output())) else {
            trace!(id = %event.output, "Frame for unknown output ignored");
            return;
        };

        let outcome = self.pipeline.render(self.backend.as_ref(), output.as_ref());
        if let Err(err) = &outcome {
            warn!(output = %output.name(), "Dropped frame: {}", err);
        }
        if let Some(entity) = self.outputs.get_mut(event.output) {
            entity.record_frame(&outcome, Instant::now());
        }
    }

    fn output_destroyed(&mut self, event: &DestroyEvent) {
        let Some(entity) = self.outputs.get_mut(event.output) else {
            debug!(id = %event.output, "Destroy for unknown output ignored");
            return;
        };
        entity.unsubscribe();
        entity.advance(OutputPhase::Destroyed);
        let stats = entity.stats();
        if let Some(entity) = self.outputs.remove(event.output) {
            info!(
                output = %entity.name(),
                presented = stats.presented,
                dropped = stats.dropped,
                "Output destroyed"
            );
        }
    }
}

/// The event loop together with the state it drives.
pub struct Compositor {
    event_loop: EventLoop<'static, CompositorState>,
    state: CompositorState,
}

impl Compositor {
    /// Creates the event loop, then the backend, then starts the backend.
    ///
    /// `make_backend` receives the loop handle so the backend is always built
    /// against a loop that already exists. The backend is returned alongside
    /// the compositor for callers that need its concrete API.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal: the event loop cannot be created, the
    /// backend factory fails, or the backend cannot start.
    pub fn new<B, F>(
        config: &CompositorConfig,
        make_backend: F,
    ) -> Result<(Self, Rc<B>), CompositorError>
    where
        B: Backend<CompositorState> + 'static,
        F: FnOnce(&LoopHandle<'static, CompositorState>) -> Result<B, CompositorError>,
    {
        let event_loop: EventLoop<'static, CompositorState> = EventLoop::try_new()?;
        let handle = event_loop.handle();
        let backend = Rc::new(make_backend(&handle)?);
        info!(backend = backend.name(), "Backend created");

        let shared: Rc<dyn Backend<CompositorState>> = backend.clone();
        let state = CompositorState::new(event_loop.get_signal(), shared, config);
        backend.start(&handle)?;

        Ok((Self { event_loop, state }, backend))
    }

    pub fn handle(&self) -> LoopHandle<'static, CompositorState> {
        self.event_loop.handle()
    }

    pub fn state(&self) -> &CompositorState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut CompositorState {
        &mut self.state
    }

    /// Stops the loop on SIGINT or SIGTERM.
    pub fn stop_on_termination_signals(&self) -> Result<(), CompositorError> {
        let signals = Signals::new(&[UnixSignal::SIGINT, UnixSignal::SIGTERM])?;
        self.event_loop
            .handle()
            .insert_source(signals, |event, _, state: &mut CompositorState| {
                info!(signal = ?event.signal(), "Termination signal received");
                state.stop();
            })
            .map_err(|err| CompositorError::EventLoop(err.error))?;
        Ok(())
    }

    /// Stops the loop once `duration` has elapsed.
    pub fn stop_after(&self, duration: Duration) -> Result<(), CompositorError> {
        let timer = Timer::from_duration(duration);
        self.event_loop
            .handle()
            .insert_source(timer, move |_, _, state: &mut CompositorState| {
                info!(after = ?duration, "Run time elapsed");
                state.stop();
                TimeoutAction::Drop
            })
            .map_err(|err| CompositorError::EventLoop(err.error))?;
        Ok(())
    }

    /// Dispatches pending events once, waiting at most `timeout`.
    pub fn dispatch(&mut self, timeout: Option<Duration>) -> Result<(), CompositorError> {
        self.event_loop.dispatch(timeout, &mut self.state)?;
        Ok(())
    }

    /// Runs until [`CompositorState::stop`] is called, then shuts down.
    pub fn run(&mut self) -> Result<Vec<OutputSummary>, CompositorError> {
        info!("Compositor running");
        self.event_loop.run(None, &mut self.state, |_| {})?;
        info!("Event loop stopped, shutting down");
        Ok(self.state.shutdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Mode, Output, OutputEvents};
    use crate::buffer::{BufferFormat, Color};
    use crate::testing::{MockBackend, MockOutput, Stage};
    use pretty_assertions::assert_eq;

    const HD: Mode = Mode::new(1280, 720, 60_000);
    const FHD: Mode = Mode::new(1920, 1080, 60_000);

    struct Harness {
        compositor: Compositor,
        backend: Rc<MockBackend<CompositorState>>,
    }

    impl Harness {
        fn new(config: CompositorConfig) -> Self {
            let (compositor, backend) =
                Compositor::new(&config, |_| Ok(MockBackend::<CompositorState>::new())).unwrap();
            Self { compositor, backend }
        }

        fn announce(
            &mut self,
            id: u64,
            modes: Vec<Mode>,
        ) -> (Rc<MockOutput>, OutputEvents<CompositorState>) {
            let (output, events) = self.backend.output(id, modes);
            self.backend.events().new_output.emit(
                self.compositor.state_mut(),
                &NewOutput {
                    output: Rc::clone(&output) as Rc<dyn Output>,
                    events: events.clone(),
                },
            );
            (output, events)
        }

        fn frame(&mut self, events: &OutputEvents<CompositorState>, id: u64) -> usize {
            events.frame.emit(
                self.compositor.state_mut(),
                &FrameEvent {
                    output: OutputId::new(id),
                    when: Instant::now(),
                },
            )
        }

        fn destroy(&mut self, events: &OutputEvents<CompositorState>, id: u64) -> usize {
            events.destroy.emit(
                self.compositor.state_mut(),
                &DestroyEvent {
                    output: OutputId::new(id),
                },
            )
        }

        fn state(&self) -> &CompositorState {
            self.compositor.state()
        }
    }

    #[test]
    fn test_backend_is_started_and_listened_to() {
        let harness = Harness::new(CompositorConfig::default());
        assert!(harness.backend.is_started());
        assert!(harness.state().is_listening());
        assert_eq!(harness.backend.events().new_output.listener_count(), 1);
    }

    #[test]
    fn test_new_output_applies_last_mode() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (output, events) = harness.announce(1, vec![HD, FHD]);

        assert_eq!(output.current_mode(), Some(FHD));
        let entity = harness.state().outputs().get(OutputId::new(1)).unwrap();
        assert_eq!(entity.phase(), OutputPhase::Active);
        assert!(entity.is_subscribed());
        assert_eq!(events.frame.listener_count(), 1);
        assert_eq!(events.destroy.listener_count(), 1);
    }

    #[test]
    fn test_best_policy_is_honored() {
        let mut config = CompositorConfig::default();
        config.render.mode_policy = ModePolicy::Best;
        let mut harness = Harness::new(config);
        assert_eq!(harness.state().mode_policy(), ModePolicy::Best);
        let (output, _events) = harness.announce(1, vec![FHD, HD]);
        assert_eq!(output.current_mode(), Some(FHD));
    }

    #[test]
    fn test_rejected_mode_leaves_output_unconfigured() {
        let mut harness = Harness::new(CompositorConfig::default());
        harness.backend.fail(Stage::SetMode);
        let (output, events) = harness.announce(1, vec![HD, FHD]);

        assert_eq!(output.current_mode(), None);
        assert!(harness.state().outputs().is_empty());
        assert!(events.frame.is_empty());
        assert!(events.destroy.is_empty());
        assert_eq!(harness.frame(&events, 1), 0);
    }

    #[test]
    fn test_output_without_modes_is_activated() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_output, events) = harness.announce(1, Vec::new());
        assert!(harness.state().outputs().contains(OutputId::new(1)));

        harness.frame(&events, 1);
        let ledger = harness.backend.ledger();
        assert_eq!(ledger.swapchain_sizes, vec![(800, 600, FramePipeline::FORMAT)]);
        assert_eq!(ledger.commits, 1);
    }

    #[test]
    fn test_frames_render_and_timestamps_never_decrease() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (output, events) = harness.announce(1, vec![HD]);

        let mut previous = harness.state().outputs().get(OutputId::new(1)).unwrap().last_frame();
        for _ in 0..5 {
            assert_eq!(harness.frame(&events, 1), 1);
            let stamp = harness.state().outputs().get(OutputId::new(1)).unwrap().last_frame();
            assert!(stamp >= previous);
            previous = stamp;
        }

        let entity = harness.state().outputs().get(OutputId::new(1)).unwrap();
        assert_eq!(entity.stats(), FrameStats { presented: 5, dropped: 0 });
        assert_eq!(harness.backend.ledger().commits, 5);
        assert_eq!(output.front_buffer().unwrap().pixel(0, 0), Some(0xffff_0000));
    }

    #[test]
    fn test_missing_renderer_drops_frame_but_keeps_output_active() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_output, events) = harness.announce(1, vec![HD, FHD]);
        let before = harness.state().outputs().get(OutputId::new(1)).unwrap().last_frame();

        harness.backend.fail(Stage::Renderer);
        harness.frame(&events, 1);

        let entity = harness.state().outputs().get(OutputId::new(1)).unwrap();
        assert_eq!(entity.phase(), OutputPhase::Active);
        assert!(entity.last_frame() >= before);
        assert_eq!(entity.stats(), FrameStats { presented: 0, dropped: 1 });
        assert_eq!(harness.backend.ledger().allocators_created, 0);

        harness.backend.recover(Stage::Renderer);
        harness.frame(&events, 1);
        let entity = harness.state().outputs().get(OutputId::new(1)).unwrap();
        assert_eq!(entity.stats(), FrameStats { presented: 1, dropped: 1 });
    }

    #[test]
    fn test_destroy_removes_entity_and_unsubscribes() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_output, events) = harness.announce(1, vec![HD]);
        harness.frame(&events, 1);

        assert_eq!(harness.destroy(&events, 1), 1);
        assert!(harness.state().outputs().is_empty());
        assert!(events.frame.is_empty());
        assert!(events.destroy.is_empty());

        let ledger_before = harness.backend.ledger();
        assert_eq!(harness.frame(&events, 1), 0);
        assert_eq!(harness.backend.ledger(), ledger_before);
    }

    #[test]
    fn test_stray_frame_for_destroyed_identity_has_no_effect() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_a, a_events) = harness.announce(1, vec![HD]);
        let (_b, b_events) = harness.announce(2, vec![HD]);
        harness.destroy(&a_events, 1);

        let ledger_before = harness.backend.ledger();
        harness.compositor.state_mut().output_frame(&FrameEvent {
            output: OutputId::new(1),
            when: Instant::now(),
        });
        assert_eq!(harness.backend.ledger(), ledger_before);
        assert_eq!(harness.state().outputs().len(), 1);
        assert_eq!(b_events.frame.listener_count(), 1);
    }

    #[test]
    fn test_destroy_for_unknown_identity_is_a_no_op() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_output, events) = harness.announce(1, vec![HD]);

        harness.compositor.state_mut().output_destroyed(&DestroyEvent {
            output: OutputId::new(42),
        });
        assert_eq!(harness.state().outputs().len(), 1);

        harness.destroy(&events, 1);
        harness.compositor.state_mut().output_destroyed(&DestroyEvent {
            output: OutputId::new(1),
        });
        assert!(harness.state().outputs().is_empty());
    }

    #[test]
    fn test_registry_membership_spans_only_the_active_window() {
        let mut harness = Harness::new(CompositorConfig::default());
        let id = OutputId::new(1);
        assert!(!harness.state().outputs().contains(id));

        let (_output, events) = harness.announce(1, vec![HD]);
        for _ in 0..3 {
            assert!(harness.state().outputs().contains(id));
            harness.frame(&events, 1);
        }
        harness.destroy(&events, 1);
        assert!(!harness.state().outputs().contains(id));
    }

    #[test]
    fn test_duplicate_announcement_keeps_first_entity() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_first, first_events) = harness.announce(1, vec![HD]);
        let (_second, second_events) = harness.announce(1, vec![HD]);

        assert_eq!(harness.state().outputs().len(), 1);
        assert_eq!(first_events.frame.listener_count(), 1);
        assert!(second_events.frame.is_empty());
    }

    #[test]
    fn test_clear_color_comes_from_config() {
        let mut config = CompositorConfig::default();
        config.render.clear_color = Color::new(0.0, 0.0, 1.0, 1.0);
        let mut harness = Harness::new(config);
        let pipeline = harness.state().pipeline();
        assert_eq!(pipeline.clear_color(), Color::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(pipeline.format(), BufferFormat::Argb8888);

        let (_output, events) = harness.announce(1, vec![HD]);
        harness.frame(&events, 1);
        assert_eq!(harness.backend.ledger().clears, vec![Color::new(0.0, 0.0, 1.0, 1.0)]);
    }

    #[test]
    fn test_shutdown_reports_and_releases_everything() {
        let mut harness = Harness::new(CompositorConfig::default());
        let (_a, a_events) = harness.announce(1, vec![HD]);
        let (_b, b_events) = harness.announce(2, vec![FHD]);
        harness.frame(&a_events, 1);
        harness.frame(&a_events, 1);
        harness.frame(&b_events, 2);

        let summaries = harness.compositor.state_mut().shutdown();
        assert_eq!(
            summaries,
            vec![
                OutputSummary {
                    id: OutputId::new(1),
                    name: "MOCK-1".to_string(),
                    stats: FrameStats { presented: 2, dropped: 0 },
                },
                OutputSummary {
                    id: OutputId::new(2),
                    name: "MOCK-2".to_string(),
                    stats: FrameStats { presented: 1, dropped: 0 },
                },
            ]
        );
        assert!(harness.state().outputs().is_empty());
        assert!(!harness.state().is_listening());
        assert!(a_events.frame.is_empty() && b_events.destroy.is_empty());
        assert!(harness.backend.events().new_output.is_empty());
        assert!(harness.compositor.state_mut().shutdown().is_empty());
    }

    #[test]
    fn test_stop_after_ends_run() {
        let mut harness = Harness::new(CompositorConfig::default());
        harness.compositor.stop_after(Duration::from_millis(10)).unwrap();
        let started = Instant::now();
        let summaries = harness.compositor.run().unwrap();
        assert!(summaries.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
