//! Headless backend: virtual outputs driven by calloop timers.
//!
//! Outputs are created and destroyed through a [`HeadlessHandle`], which
//! feeds commands into the event loop over a `calloop::channel`. Every
//! output that ends up with a usable mode gets a [`Timer`] that emits its
//! frame signal once per refresh interval. Removing an output cancels the
//! timer before the destroy signal is emitted, so no frame can follow a
//! destroy.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use calloop::channel::{self, Channel, Sender};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use tracing::{debug, error, info, warn};

use super::software::{SoftwareAllocator, SoftwareRenderer};
use super::{
    Allocator, Backend, BackendEvents, DestroyEvent, FrameEvent, Mode, NewOutput, Output,
    OutputEvents, OutputId, Renderer, Size,
};
use crate::buffer::Buffer;
use crate::config::HeadlessOutputConfig;
use crate::error::{AllocError, BackendError, OutputError};
use crate::signal::Signal;

/// Refresh rate used for outputs without a mode, in mHz.
pub const DEFAULT_REFRESH_MHZ: u32 = 60_000;

/// Commands accepted by the headless backend.
#[derive(Debug, Clone)]
pub enum HeadlessCommand {
    AddOutput(HeadlessOutputConfig),
    RemoveOutput(String),
}

/// Sends commands to a [`HeadlessBackend`] running on an event loop.
#[derive(Clone)]
pub struct HeadlessHandle {
    sender: Sender<HeadlessCommand>,
}

impl HeadlessHandle {
    pub fn add_output(&self, config: HeadlessOutputConfig) -> Result<(), BackendError> {
        self.send(HeadlessCommand::AddOutput(config))
    }

    pub fn remove_output(&self, name: impl Into<String>) -> Result<(), BackendError> {
        self.send(HeadlessCommand::RemoveOutput(name.into()))
    }

    fn send(&self, command: HeadlessCommand) -> Result<(), BackendError> {
        self.sender
            .send(command)
            .map_err(|_| BackendError::ChannelClosed)
    }
}

impl fmt::Debug for HeadlessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessHandle").finish_non_exhaustive()
    }
}

/// A virtual output that keeps its presented buffer in memory.
pub struct HeadlessOutput {
    id: OutputId,
    name: String,
    modes: Vec<Mode>,
    current: Cell<Option<Mode>>,
    fallback_size: Size,
    reject_modes: bool,
    pending: RefCell<Option<Buffer>>,
    front: RefCell<Option<Buffer>>,
    commits: Cell<u64>,
}

impl HeadlessOutput {
    fn new(id: OutputId, config: HeadlessOutputConfig) -> Self {
        Self {
            id,
            name: config.name,
            modes: config.modes,
            current: Cell::new(None),
            fallback_size: Size::new(config.width, config.height),
            reject_modes: config.reject_modes,
            pending: RefCell::new(None),
            front: RefCell::new(None),
            commits: Cell::new(0),
        }
    }

    /// Whether the output can display frames: it either advertises no modes
    /// or one of them has been applied.
    pub fn is_configured(&self) -> bool {
        self.modes.is_empty() || self.current.get().is_some()
    }

    pub fn refresh_interval(&self) -> Duration {
        let mhz = self
            .current
            .get()
            .map(|mode| mode.refresh_mhz)
            .filter(|mhz| *mhz > 0)
            .unwrap_or(DEFAULT_REFRESH_MHZ);
        Duration::from_nanos(1_000_000_000_000 / u64::from(mhz))
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.get()
    }

    /// The most recently committed buffer.
    pub fn front_buffer(&self) -> Option<Buffer> {
        self.front.borrow().clone()
    }
}

impl Output for HeadlessOutput {
    fn id(&self) -> OutputId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn modes(&self) -> Vec<Mode> {
        self.modes.clone()
    }

    fn current_mode(&self) -> Option<Mode> {
        self.current.get()
    }

    fn set_mode(&self, mode: Mode) -> Result<(), OutputError> {
        if !self.modes.contains(&mode) {
            return Err(OutputError::UnsupportedMode {
                output: self.name.clone(),
                mode: mode.to_string(),
            });
        }
        if self.reject_modes {
            return Err(OutputError::ModeRejected {
                output: self.name.clone(),
                mode: mode.to_string(),
            });
        }
        self.current.set(Some(mode));
        Ok(())
    }

    fn size(&self) -> Size {
        self.current
            .get()
            .map(|mode| mode.size())
            .unwrap_or(self.fallback_size)
    }

    fn attach_buffer(&self, buffer: Buffer) {
        *self.pending.borrow_mut() = Some(buffer);
    }

    fn commit(&self) -> Result<(), OutputError> {
        let buffer = self
            .pending
            .borrow_mut()
            .take()
            .ok_or(OutputError::NothingAttached)?;
        let size = self.size();
        if buffer.width() != size.width || buffer.height() != size.height {
            return Err(OutputError::BufferSizeMismatch {
                buffer_width: buffer.width(),
                buffer_height: buffer.height(),
                output_width: size.width,
                output_height: size.height,
            });
        }
        *self.front.borrow_mut() = Some(buffer);
        self.commits.set(self.commits.get() + 1);
        Ok(())
    }
}

impl fmt::Debug for HeadlessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessOutput")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("current", &self.current.get())
            .field("commits", &self.commits.get())
            .finish()
    }
}

struct HeadlessEntry<D> {
    output: Rc<HeadlessOutput>,
    events: OutputEvents<D>,
    timer: Option<RegistrationToken>,
}

struct HeadlessState<D> {
    next_id: u64,
    outputs: Vec<HeadlessEntry<D>>,
    receiver: Option<Channel<HeadlessCommand>>,
    loop_handle: Option<LoopHandle<'static, D>>,
}

/// A backend without hardware, rendering with [`SoftwareRenderer`].
pub struct HeadlessBackend<D> {
    events: BackendEvents<D>,
    renderer: Option<Rc<SoftwareRenderer>>,
    sender: Sender<HeadlessCommand>,
    state: Rc<RefCell<HeadlessState<D>>>,
}

impl<D: 'static> HeadlessBackend<D> {
    pub fn new() -> Self {
        Self::build(Some(Rc::new(SoftwareRenderer::new())))
    }

    /// A backend whose renderer cannot be created. Every frame is dropped.
    pub fn without_renderer() -> Self {
        Self::build(None)
    }

    fn build(renderer: Option<Rc<SoftwareRenderer>>) -> Self {
        let (sender, receiver) = channel::channel();
        Self {
            events: BackendEvents::new(),
            renderer,
            sender,
            state: Rc::new(RefCell::new(HeadlessState {
                next_id: 0,
                outputs: Vec::new(),
                receiver: Some(receiver),
                loop_handle: None,
            })),
        }
    }

    /// A handle for adding and removing outputs. Commands are processed once
    /// the backend is started.
    pub fn handle(&self) -> HeadlessHandle {
        HeadlessHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn output(&self, name: &str) -> Option<Rc<HeadlessOutput>> {
        self.state
            .borrow()
            .outputs
            .iter()
            .find(|entry| entry.output.name == name)
            .map(|entry| Rc::clone(&entry.output))
    }

    pub fn output_count(&self) -> usize {
        self.state.borrow().outputs.len()
    }

    pub fn software_renderer(&self) -> Option<Rc<SoftwareRenderer>> {
        self.renderer.clone()
    }
}

impl<D: 'static> Default for HeadlessBackend<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: 'static> Backend<D> for HeadlessBackend<D> {
    fn name(&self) -> &str {
        "headless"
    }

    fn events(&self) -> &BackendEvents<D> {
        &self.events
    }

    fn start(&self, handle: &LoopHandle<'static, D>) -> Result<(), BackendError> {
        let receiver = {
            let mut state = self.state.borrow_mut();
            let receiver = state.receiver.take().ok_or(BackendError::AlreadyStarted)?;
            state.loop_handle = Some(handle.clone());
            receiver
        };

        let state = Rc::clone(&self.state);
        let new_output = self.events.new_output.clone();
        handle
            .insert_source(receiver, move |event, _, data| match event {
                channel::Event::Msg(HeadlessCommand::AddOutput(config)) => {
                    add_output(&state, &new_output, data, config)
                }
                channel::Event::Msg(HeadlessCommand::RemoveOutput(name)) => {
                    remove_output(&state, data, &name)
                }
                channel::Event::Closed => debug!("Headless command channel closed"),
            })
            .map_err(|err| BackendError::EventSource(err.error))?;

        info!("Headless backend started");
        Ok(())
    }

    fn renderer(&self) -> Option<Rc<dyn Renderer>> {
        self.renderer
            .clone()
            .map(|renderer| renderer as Rc<dyn Renderer>)
    }

    fn create_allocator(&self, _renderer: &dyn Renderer) -> Result<Rc<dyn Allocator>, AllocError> {
        Ok(Rc::new(SoftwareAllocator::new()))
    }
}

impl<D> fmt::Debug for HeadlessBackend<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("outputs", &self.state.borrow().outputs.len())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

fn add_output<D: 'static>(
    state: &Rc<RefCell<HeadlessState<D>>>,
    new_output: &Signal<NewOutput<D>, D>,
    data: &mut D,
    config: HeadlessOutputConfig,
) {
    let (output, events) = {
        let mut state = state.borrow_mut();
        if state.outputs.iter().any(|entry| entry.output.name == config.name) {
            warn!(output = %config.name, "Headless output already exists, ignoring");
            return;
        }
        state.next_id += 1;
        let output = Rc::new(HeadlessOutput::new(OutputId::new(state.next_id), config));
        let events = OutputEvents::new();
        state.outputs.push(HeadlessEntry {
            output: Rc::clone(&output),
            events: events.clone(),
            timer: None,
        });
        (output, events)
    };

    info!(output = %output.name, id = %output.id, "Headless output added");
    new_output.emit(
        data,
        &NewOutput {
            output: Rc::clone(&output) as Rc<dyn Output>,
            events: events.clone(),
        },
    );

    if !output.is_configured() {
        warn!(output = %output.name, "Headless output has no mode applied, not scheduling frames");
        return;
    }
    schedule_frames(state, &output, events.frame);
}

fn schedule_frames<D: 'static>(
    state: &Rc<RefCell<HeadlessState<D>>>,
    output: &Rc<HeadlessOutput>,
    frame: Signal<FrameEvent, D>,
) {
    let Some(handle) = state.borrow().loop_handle.clone() else {
        return;
    };
    let id = output.id;
    let weak = Rc::downgrade(output);
    let timer = Timer::from_duration(output.refresh_interval());
    let result = handle.insert_source(timer, move |deadline, _, data| {
        let Some(output) = weak.upgrade() else {
            return TimeoutAction::Drop;
        };
        frame.emit(
            data,
            &FrameEvent {
                output: id,
                when: deadline,
            },
        );
        TimeoutAction::ToInstant(deadline + output.refresh_interval())
    });

    match result {
        Ok(token) => {
            let mut state = state.borrow_mut();
            if let Some(entry) = state.outputs.iter_mut().find(|entry| entry.output.id == id) {
                entry.timer = Some(token);
            }
            debug!(
                output = %output.name,
                interval = ?output.refresh_interval(),
                "Frame timer scheduled"
            );
        }
        Err(err) => {
            error!(output = %output.name, "Failed to schedule frame timer: {}", err.error);
        }
    }
}

fn remove_output<D: 'static>(state: &Rc<RefCell<HeadlessState<D>>>, data: &mut D, name: &str) {
    let (entry, handle) = {
        let mut state = state.borrow_mut();
        let Some(index) = state.outputs.iter().position(|entry| entry.output.name == name) else {
            warn!(output = %name, "Cannot remove unknown headless output");
            return;
        };
        (state.outputs.remove(index), state.loop_handle.clone())
    };

    if let (Some(token), Some(handle)) = (entry.timer, handle) {
        handle.remove(token);
    }
    info!(output = %name, id = %entry.output.id, "Headless output removed");
    entry.events.destroy.emit(
        data,
        &DestroyEvent {
            output: entry.output.id,
        },
    );
}
