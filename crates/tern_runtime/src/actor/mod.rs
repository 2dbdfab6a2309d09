//! Actor runtime: one thread per declared process.
//!
//! - `mailbox` - FIFO queue with blocking receive
//! - `process` - lifecycle state and the dispatch loop
//! - `system` - construction from a [`Topology`], scheduling, shutdown

pub mod mailbox;
pub mod process;
pub mod system;

pub use mailbox::{Envelope, Mailbox};
pub use process::{ProcessState, STOP_MESSAGE};
pub use system::{ActorSystem, ProcessOutcome, Sender};

use tern_core::Itype;

/// A statically declared actor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessDecl {
    pub name: String,
    pub state_type: Itype,
    pub message_type: Itype,
    /// Entry point producing the initial state; without one the process
    /// starts from the zero value of `state_type`.
    pub init: Option<String>,
    pub handler: String,
}

impl ProcessDecl {
    pub fn new(name: &str, state_type: Itype, message_type: Itype, handler: &str) -> Self {
        Self {
            name: name.to_string(),
            state_type,
            message_type,
            init: None,
            handler: handler.to_string(),
        }
    }

    pub fn with_init(mut self, init: &str) -> Self {
        self.init = Some(init.to_string());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    pub processes: Vec<ProcessDecl>,
}

impl Topology {
    pub fn new(processes: Vec<ProcessDecl>) -> Self {
        Self { processes }
    }
}
