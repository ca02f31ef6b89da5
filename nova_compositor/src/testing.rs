//! Recording fakes for the backend capabilities.
//!
//! Every fake shares one [`Shared`] record so a test can check the exact
//! calls a pipeline pass made and force any stage to fail.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use calloop::LoopHandle;

use crate::backend::{
    Allocator, Backend, BackendEvents, Mode, Output, OutputEvents, OutputId, Renderer, Size,
    Swapchain,
};
use crate::buffer::{Buffer, BufferFormat, Color};
use crate::error::{AllocError, BackendError, OutputError, RenderError};

/// A capability call that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Renderer,
    Allocator,
    Swapchain,
    Acquire,
    RenderPass,
    Commit,
    SetMode,
}

/// Counts of every capability call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    pub renderer_requests: usize,
    pub allocators_created: usize,
    pub swapchains_created: usize,
    pub swapchains_destroyed: usize,
    pub acquires: usize,
    pub releases: usize,
    pub passes_begun: usize,
    pub passes_ended: usize,
    pub clears: Vec<Color>,
    pub attaches: usize,
    pub commits: usize,
    pub mode_sets: Vec<Mode>,
    pub swapchain_sizes: Vec<(u32, u32, BufferFormat)>,
}

#[derive(Debug, Default)]
pub struct Shared {
    ledger: RefCell<Ledger>,
    log: RefCell<Vec<&'static str>>,
    failing: RefCell<HashSet<Stage>>,
}

impl Shared {
    fn fails(&self, stage: Stage) -> bool {
        self.failing.borrow().contains(&stage)
    }

    fn record(&self, event: &'static str, update: impl FnOnce(&mut Ledger)) {
        self.log.borrow_mut().push(event);
        update(&mut self.ledger.borrow_mut());
    }
}

pub struct MockBackend<D> {
    events: BackendEvents<D>,
    shared: Rc<Shared>,
    started: Cell<bool>,
}

impl<D> MockBackend<D> {
    pub fn new() -> Self {
        Self {
            events: BackendEvents::new(),
            shared: Rc::new(Shared::default()),
            started: Cell::new(false),
        }
    }

    pub fn shared(&self) -> Rc<Shared> {
        Rc::clone(&self.shared)
    }

    pub fn fail(&self, stage: Stage) {
        self.shared.failing.borrow_mut().insert(stage);
    }

    pub fn recover(&self, stage: Stage) {
        self.shared.failing.borrow_mut().remove(&stage);
    }

    pub fn ledger(&self) -> Ledger {
        self.shared.ledger.borrow().clone()
    }

    /// Capability calls in the order they happened.
    pub fn events_log(&self) -> Vec<&'static str> {
        self.shared.log.borrow().clone()
    }

    /// Forgets the calls made so far, so a test can watch a single frame.
    pub fn clear_events_log(&self) {
        self.shared.log.borrow_mut().clear();
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    /// Creates an output sharing this backend's record, with fresh signals.
    pub fn output(&self, id: u64, modes: Vec<Mode>) -> (Rc<MockOutput>, OutputEvents<D>) {
        (
            Rc::new(MockOutput::with_shared(id, modes, self.shared())),
            OutputEvents::new(),
        )
    }
}

impl<D> Backend<D> for MockBackend<D> {
    fn name(&self) -> &str {
        "mock"
    }

    fn events(&self) -> &BackendEvents<D> {
        &self.events
    }

    fn start(&self, _handle: &LoopHandle<'static, D>) -> Result<(), BackendError> {
        if self.started.replace(true) {
            return Err(BackendError::AlreadyStarted);
        }
        Ok(())
    }

    fn renderer(&self) -> Option<Rc<dyn Renderer>> {
        self.shared.ledger.borrow_mut().renderer_requests += 1;
        if self.shared.fails(Stage::Renderer) {
            return None;
        }
        Some(Rc::new(MockRenderer {
            shared: self.shared(),
            target: RefCell::new(None),
        }))
    }

    fn create_allocator(&self, _renderer: &dyn Renderer) -> Result<Rc<dyn Allocator>, AllocError> {
        if self.shared.fails(Stage::Allocator) {
            return Err(AllocError::Unavailable("mock allocator".to_string()));
        }
        self.shared.ledger.borrow_mut().allocators_created += 1;
        Ok(Rc::new(MockAllocator {
            shared: self.shared(),
        }))
    }
}

struct MockRenderer {
    shared: Rc<Shared>,
    target: RefCell<Option<Buffer>>,
}

impl Renderer for MockRenderer {
    fn name(&self) -> &str {
        "mock"
    }

    fn begin(&self, target: &Buffer) -> Result<(), RenderError> {
        self.shared.log.borrow_mut().push("begin");
        if self.shared.fails(Stage::RenderPass) {
            return Err(RenderError::Unavailable("mock render pass".to_string()));
        }
        self.shared.ledger.borrow_mut().passes_begun += 1;
        *self.target.borrow_mut() = Some(target.clone());
        Ok(())
    }

    fn clear(&self, color: Color) {
        self.shared.record("clear", |l| l.clears.push(color));
        if let Some(target) = self.target.borrow().as_ref() {
            target.fill(color);
        }
    }

    fn end(&self) {
        self.shared.record("end", |l| l.passes_ended += 1);
        self.target.borrow_mut().take();
    }
}

struct MockAllocator {
    shared: Rc<Shared>,
}

impl Allocator for MockAllocator {
    fn create_swapchain(
        &self,
        width: u32,
        height: u32,
        format: BufferFormat,
    ) -> Result<Box<dyn Swapchain>, AllocError> {
        if self.shared.fails(Stage::Swapchain) {
            return Err(AllocError::UnsupportedFormat(format.to_string()));
        }
        self.shared.record("create_swapchain", |l| {
            l.swapchains_created += 1;
            l.swapchain_sizes.push((width, height, format));
        });
        Ok(Box::new(MockSwapchain {
            shared: Rc::clone(&self.shared),
            size: Size::new(width, height),
            format,
        }))
    }
}

struct MockSwapchain {
    shared: Rc<Shared>,
    size: Size,
    format: BufferFormat,
}

impl Swapchain for MockSwapchain {
    fn size(&self) -> Size {
        self.size
    }

    fn format(&self) -> BufferFormat {
        self.format
    }

    fn acquire(&self) -> Result<Buffer, AllocError> {
        if self.shared.fails(Stage::Acquire) {
            return Err(AllocError::Exhausted { capacity: 0 });
        }
        self.shared.record("acquire", |l| l.acquires += 1);
        Buffer::new(self.size.width, self.size.height, self.format)
    }

    fn release(&self, _buffer: Buffer) {
        self.shared.record("release", |l| l.releases += 1);
    }

    fn destroy(self: Box<Self>) {
        self.shared.record("destroy_swapchain", |l| l.swapchains_destroyed += 1);
    }
}

/// An output that records attach, commit and mode calls.
pub struct MockOutput {
    id: OutputId,
    name: String,
    modes: Vec<Mode>,
    current: Cell<Option<Mode>>,
    size: Cell<Size>,
    pending: RefCell<Option<Buffer>>,
    front: RefCell<Option<Buffer>>,
    shared: Rc<Shared>,
}

impl MockOutput {
    pub fn new(id: u64, modes: Vec<Mode>) -> Self {
        Self::with_shared(id, modes, Rc::new(Shared::default()))
    }

    pub fn with_shared(id: u64, modes: Vec<Mode>, shared: Rc<Shared>) -> Self {
        Self {
            id: OutputId::new(id),
            name: format!("MOCK-{id}"),
            modes,
            current: Cell::new(None),
            size: Cell::new(Size::new(800, 600)),
            pending: RefCell::new(None),
            front: RefCell::new(None),
            shared,
        }
    }

    pub fn resize(&self, size: Size) {
        self.size.set(size);
    }

    pub fn front_buffer(&self) -> Option<Buffer> {
        self.front.borrow().clone()
    }
}

impl Output for MockOutput {
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
        if self.shared.fails(Stage::SetMode) {
            return Err(OutputError::ModeRejected {
                output: self.name.clone(),
                mode: mode.to_string(),
            });
        }
        self.shared.record("set_mode", |l| l.mode_sets.push(mode));
        self.current.set(Some(mode));
        self.size.set(mode.size());
        Ok(())
    }

    fn size(&self) -> Size {
        self.size.get()
    }

    fn attach_buffer(&self, buffer: Buffer) {
        self.shared.record("attach", |l| l.attaches += 1);
        *self.pending.borrow_mut() = Some(buffer);
    }

    fn commit(&self) -> Result<(), OutputError> {
        if self.shared.fails(Stage::Commit) {
            self.pending.borrow_mut().take();
            return Err(OutputError::CommitRejected {
                output: self.name.clone(),
            });
        }
        self.shared.record("commit", |l| l.commits += 1);
        *self.front.borrow_mut() = self.pending.borrow_mut().take();
        Ok(())
    }
}
