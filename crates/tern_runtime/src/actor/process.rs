//! A single actor: its mailbox, lifecycle state and run loop.

use super::mailbox::{Envelope, Mailbox};
use crate::collections::string;
use crate::ownership::{default_value, release_deep};
use crate::symbols::{HandlerFn, InitFn};
use std::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use tern_core::{Heap, Itype, RawCell, TypeKind};

/// The message value that ends a string-typed process's run loop.
pub const STOP_MESSAGE: &[u8] = b"stop";

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Uninitialized = 0,
    RunningInit = 1,
    Idle = 2,
    Handling = 3,
    Stopped = 4,
}

impl ProcessState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ProcessState::Uninitialized,
            1 => ProcessState::RunningInit,
            2 => ProcessState::Idle,
            3 => ProcessState::Handling,
            _ => ProcessState::Stopped,
        }
    }
}

fn is_stop_message(message: RawCell) -> bool {
    string::expect_string(message).is_ok_and(|s| {
        string::len(s) == STOP_MESSAGE.len() && string::to_bytes(s) == STOP_MESSAGE
    })
}

pub(crate) struct Process {
    pub(crate) pid: usize,
    pub(crate) name: String,
    pub(crate) state_type: Itype,
    pub(crate) message_type: Itype,
    pub(crate) init: Option<InitFn>,
    pub(crate) handler: HandlerFn,
    pub(crate) mailbox: Mailbox,
    state: AtomicU8,
    handled: AtomicUsize,
}

impl Process {
    pub(crate) fn new(
        pid: usize,
        name: String,
        state_type: Itype,
        message_type: Itype,
        init: Option<InitFn>,
        handler: HandlerFn,
    ) -> Self {
        Self {
            pid,
            name,
            state_type,
            message_type,
            init,
            handler,
            mailbox: Mailbox::new(),
            state: AtomicU8::new(ProcessState::Uninitialized as u8),
            handled: AtomicUsize::new(0),
        }
    }

    pub(crate) fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProcessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn handled(&self) -> usize {
        self.handled.load(Ordering::Relaxed)
    }

    /// Run init, then dispatch messages until the stop sentinel.
    ///
    /// `ctx` is handed to every compiled call. Returns the owned final
    /// state. A panicking handler unwinds out of here with the process left
    /// in `Handling`.
    pub(crate) fn run(&self, heap: &Arc<Heap>, ctx: *mut c_void, trace: bool) -> RawCell {
        self.set_state(ProcessState::RunningInit);
        let mut state = match self.init {
            Some(init) => unsafe { init(ctx) },
            None => default_value(heap, self.state_type)
                .unwrap_or_else(|e| panic!("process {}: {e}", self.name)),
        };
        if trace {
            eprintln!("actor: #{} {} initialized", self.pid, self.name);
        }
        // Only string messages can carry the stop value.
        let stops_on_value = heap.types().kind(self.message_type) == Some(TypeKind::String);
        loop {
            self.set_state(ProcessState::Idle);
            let message = match self.mailbox.recv() {
                Envelope::Message(message) if stops_on_value && is_stop_message(message) => {
                    release_deep(heap.types(), self.message_type, message);
                    break;
                }
                Envelope::Message(message) => message,
                Envelope::Stop => break,
            };
            self.set_state(ProcessState::Handling);
            if trace {
                eprintln!("actor: #{} {} handling message", self.pid, self.name);
            }
            state = unsafe { (self.handler)(ctx, state, message) };
            self.handled.fetch_add(1, Ordering::Relaxed);
        }
        self.set_state(ProcessState::Stopped);
        if trace {
            eprintln!(
                "actor: #{} {} stopped after {} messages",
                self.pid,
                self.name,
                self.handled()
            );
        }
        state
    }
}
