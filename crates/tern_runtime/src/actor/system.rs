//! Process construction, scheduling and shutdown.
//!
//! Process #0 runs on the thread that calls [`ActorSystem::run`]; every
//! other process gets a worker thread. Workers start only after all
//! processes are built, and are joined once process #0 has left its loop
//! and a stop sentinel has been delivered to each of them.

use super::mailbox::Envelope;
use super::process::{Process, ProcessState};
use super::Topology;
use crate::config::RuntimeConfig;
use crate::errors::{RtResult, RuntimeError};
use crate::host::{HostValue, from_runtime_value, to_runtime_value};
use crate::ownership::release_deep;
use crate::symbols::{HandlerFn, InitFn, Signature, SymbolTable};
use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tern_core::{Heap, RawCell};

pub(crate) struct Shared {
    heap: Arc<Heap>,
    processes: Vec<Process>,
    config: RuntimeConfig,
}

impl Shared {
    fn process(&self, pid: usize) -> RtResult<&Process> {
        self.processes
            .get(pid)
            .ok_or(RuntimeError::UnknownProcess(pid))
    }

    fn deliver(&self, pid: usize, envelope: Envelope) -> RtResult<()> {
        self.process(pid)?.mailbox.push(envelope);
        Ok(())
    }

    fn stop_all(&self) {
        for p in &self.processes {
            p.mailbox.push(Envelope::Stop);
        }
    }

    fn run_process(self: &Arc<Self>, pid: usize) -> RawCell {
        let _guard = Heap::enter(&self.heap);
        let mut ctx = ProcessContext {
            shared: Arc::clone(self),
            pid,
        };
        let ctx_ptr = &mut ctx as *mut ProcessContext as *mut c_void;
        self.processes[pid].run(&self.heap, ctx_ptr, self.config.trace_actors)
    }

    /// Release every message nobody received.
    fn drain_mailboxes(&self) {
        let types = self.heap.types();
        for p in &self.processes {
            for message in p.mailbox.drain() {
                release_deep(types, p.message_type, message);
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.drain_mailboxes();
    }
}

/// What compiled code receives as its context pointer.
pub(crate) struct ProcessContext {
    shared: Arc<Shared>,
    pid: usize,
}

impl ProcessContext {
    pub(crate) fn pid(&self) -> usize {
        self.pid
    }

    /// Deliver an owned message; on error the caller keeps ownership.
    pub(crate) fn send(&self, pid: usize, message: RawCell) -> RtResult<()> {
        self.shared.deliver(pid, Envelope::Message(message))
    }

    pub(crate) fn stop(&self, pid: usize) -> RtResult<()> {
        self.shared.deliver(pid, Envelope::Stop)
    }
}

/// Handle for feeding processes from any thread.
#[derive(Clone)]
pub struct Sender {
    shared: Arc<Shared>,
}

impl Sender {
    /// Deliver an owned message; on error the caller keeps ownership.
    pub fn send(&self, pid: usize, message: RawCell) -> RtResult<()> {
        self.shared.deliver(pid, Envelope::Message(message))
    }

    /// Convert `value` to the process's message type and deliver it.
    pub fn send_value(&self, pid: usize, value: &HostValue) -> RtResult<()> {
        let p = self.shared.process(pid)?;
        let message = to_runtime_value(&self.shared.heap, p.message_type, value)?;
        p.mailbox.push(Envelope::Message(message));
        Ok(())
    }

    pub fn stop(&self, pid: usize) -> RtResult<()> {
        self.shared.deliver(pid, Envelope::Stop)
    }

    pub fn stop_all(&self) {
        self.shared.stop_all();
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessOutcome {
    pub name: String,
    pub handled: usize,
    pub final_state: HostValue,
}

pub struct ActorSystem {
    shared: Arc<Shared>,
}

impl ActorSystem {
    /// Bind every process to its compiled entry points.
    ///
    /// Signatures are checked here, so a mismatch is reported before any
    /// compiled code runs.
    pub fn new(
        heap: &Arc<Heap>,
        symbols: &SymbolTable,
        topology: &Topology,
        config: RuntimeConfig,
    ) -> RtResult<Self> {
        let types = heap.types();
        let mut processes = Vec::with_capacity(topology.processes.len());
        for (pid, decl) in topology.processes.iter().enumerate() {
            for ty in [decl.state_type, decl.message_type] {
                if types.kind(ty).is_none() {
                    return Err(RuntimeError::UnknownType(ty));
                }
            }
            let state = decl.state_type;
            let handler_sig = Signature::new([state, decl.message_type], state);
            let (address, _) = symbols.resolve(types, &decl.handler, &[handler_sig])?;
            let handler: HandlerFn = unsafe { std::mem::transmute(address) };
            let init = match &decl.init {
                Some(name) => {
                    let init_sig = Signature {
                        params: Vec::new(),
                        ret: state,
                    };
                    let (address, _) = symbols.resolve(types, name, &[init_sig])?;
                    Some(unsafe { std::mem::transmute::<*const c_void, InitFn>(address) })
                }
                None => None,
            };
            processes.push(Process::new(
                pid,
                decl.name.clone(),
                state,
                decl.message_type,
                init,
                handler,
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                heap: Arc::clone(heap),
                processes,
                config,
            }),
        })
    }

    pub fn sender(&self) -> Sender {
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn len(&self) -> usize {
        self.shared.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.processes.is_empty()
    }

    pub fn state(&self, pid: usize) -> RtResult<ProcessState> {
        Ok(self.shared.process(pid)?.state())
    }

    pub fn pending(&self, pid: usize) -> RtResult<usize> {
        Ok(self.shared.process(pid)?.mailbox.len())
    }

    /// Run every process to completion.
    ///
    /// A panic in process #0 is resumed here once every worker is joined;
    /// a panic in a worker is reported as [`RuntimeError::ProcessPanicked`].
    pub fn run(self) -> RtResult<Vec<ProcessOutcome>> {
        let shared = self.shared;
        let n = shared.processes.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let trace = shared.config.trace_actors;

        let mut workers = Vec::with_capacity(n - 1);
        for pid in 1..n {
            let worker = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("tern-{}", shared.processes[pid].name))
                .spawn(move || worker.run_process(pid).bits());
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.stop_all();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    panic!("spawning process #{pid}: {e}");
                }
            }
            if trace {
                eprintln!("actor: #{pid} {} spawned", shared.processes[pid].name);
            }
        }

        let main = panic::catch_unwind(AssertUnwindSafe(|| shared.run_process(0).bits()));

        for p in &shared.processes[1..] {
            p.mailbox.push(Envelope::Stop);
        }
        let mut finals: Vec<Result<u64, Box<dyn Any + Send>>> = Vec::with_capacity(n);
        finals.push(main);
        for (i, handle) in workers.into_iter().enumerate() {
            finals.push(handle.join());
            if trace {
                eprintln!("actor: #{} {} joined", i + 1, shared.processes[i + 1].name);
            }
        }
        shared.drain_mailboxes();

        let types = shared.heap.types();
        let mut outcomes = Vec::with_capacity(n);
        let mut first_error = None;
        let mut main_panic = None;
        for (p, result) in shared.processes.iter().zip(finals) {
            match result {
                Ok(bits) => {
                    let state = RawCell::from_bits(bits);
                    let host = from_runtime_value(types, p.state_type, state);
                    release_deep(types, p.state_type, state);
                    match host {
                        Ok(final_state) => outcomes.push(ProcessOutcome {
                            name: p.name.clone(),
                            handled: p.handled(),
                            final_state,
                        }),
                        Err(e) => {
                            first_error.get_or_insert(e);
                        }
                    }
                }
                Err(payload) if p.pid == 0 => main_panic = Some(payload),
                Err(payload) => {
                    first_error.get_or_insert(RuntimeError::ProcessPanicked {
                        process: p.name.clone(),
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
        }

        if shared.config.report_leaks {
            report_leaks(&shared.heap);
        }
        if let Some(payload) = main_panic {
            panic::resume_unwind(payload);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn report_leaks(heap: &Heap) {
    let leaks = heap.leak_check();
    eprintln!("actor: leak check found {} live allocations", leaks.len());
    for leak in &leaks {
        eprintln!("  {leak}");
    }
}

/// Resolve the context pointer compiled code was handed.
///
/// # Safety
/// `ctx` must be the pointer a running process passed to its entry point.
pub(crate) unsafe fn context<'a>(ctx: *mut c_void) -> &'a ProcessContext {
    assert!(!ctx.is_null(), "actor entry point called without a process context");
    unsafe { &*(ctx as *const ProcessContext) }
}

impl std::fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for p in &self.shared.processes {
            list.entry(&format_args!("#{} {} {:?}", p.pid, p.name, p.state()));
        }
        list.finish()
    }
}
