mod common;

use common::*;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use tern_core::{Heap, RawCell};
use tern_runtime::actor::{Envelope, Mailbox};
use tern_runtime::ffi::{tern_actor_self, tern_actor_send, tern_actor_stop, tern_release, tern_vector_push};
use tern_runtime::{
    ActorSystem, HostValue, ProcessDecl, ProcessState, RuntimeConfig, RuntimeError, Signature,
    SymbolTable, Topology,
};

static STRINGS: AtomicU32 = AtomicU32::new(0);
static STRING: AtomicU32 = AtomicU32::new(0);

fn setup() -> (Arc<Heap>, Ids) {
    let (heap, ids) = fixture();
    STRINGS.store(ids.strings_flat, Ordering::SeqCst);
    STRING.store(ids.string, Ordering::SeqCst);
    (heap, ids)
}

/// Append the message to a `[string]` state.
unsafe extern "C-unwind" fn collect(_: *mut c_void, state: RawCell, msg: RawCell) -> RawCell {
    let vty = STRINGS.load(Ordering::SeqCst);
    unsafe {
        let next = tern_vector_push(vty, state, msg);
        tern_release(vty, state);
        tern_release(STRING.load(Ordering::SeqCst), msg);
        next
    }
}

/// `state * 10 + msg`; a zero message stops the process itself.
unsafe extern "C-unwind" fn digits(ctx: *mut c_void, state: RawCell, msg: RawCell) -> RawCell {
    if msg.as_int() == 0 {
        unsafe { tern_actor_stop(ctx, tern_actor_self(ctx)) };
        return state;
    }
    RawCell::from_int(state.as_int() * 10 + msg.as_int())
}

/// Pass every message on to process #1 and count them.
unsafe extern "C-unwind" fn forward(ctx: *mut c_void, state: RawCell, msg: RawCell) -> RawCell {
    unsafe { tern_actor_send(ctx, 1, msg) };
    RawCell::from_int(state.as_int() + 1)
}

unsafe extern "C-unwind" fn start_from_pid(ctx: *mut c_void) -> RawCell {
    RawCell::from_int(unsafe { tern_actor_self(ctx) } * 1000 + 7)
}

unsafe extern "C-unwind" fn explode(_: *mut c_void, _: RawCell, msg: RawCell) -> RawCell {
    panic!("bad message {}", msg.as_int());
}

fn symbols(ids: &Ids) -> SymbolTable {
    let mut table = SymbolTable::with_runtime_entry_points();
    let strings = Signature::new([ids.strings_flat, ids.string], ids.strings_flat);
    let ints = Signature::new([ids.int, ids.int], ids.int);
    let counter = Signature::new([ids.int, ids.string], ids.int);
    unsafe {
        table.register_function("collect", collect as *const c_void, strings);
        table.register_function("digits", digits as *const c_void, ints.clone());
        table.register_function("forward", forward as *const c_void, counter);
        table.register_function("explode", explode as *const c_void, ints);
        table.register_function(
            "start_from_pid",
            start_from_pid as *const c_void,
            Signature { params: Vec::new(), ret: ids.int },
        );
    }
    table
}

fn system(heap: &Arc<Heap>, ids: &Ids, decls: Vec<ProcessDecl>) -> ActorSystem {
    ActorSystem::new(heap, &symbols(ids), &Topology::new(decls), RuntimeConfig::default()).unwrap()
}

fn idle(ids: &Ids) -> ProcessDecl {
    ProcessDecl::new("main", ids.int, ids.int, "digits")
}

#[test]
fn worker_collects_messages_in_order() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![idle(&ids), ProcessDecl::new("collector", ids.strings_flat, ids.string, "collect")],
    );
    let tx = sys.sender();
    tx.send(1, str_cell(&heap, "a")).unwrap();
    tx.send(1, str_cell(&heap, "b")).unwrap();
    tx.stop(0).unwrap();
    assert_eq!(sys.pending(1).unwrap(), 2);

    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[1].name, "collector");
    assert_eq!(outcomes[1].handled, 2);
    assert_eq!(
        outcomes[1].final_state,
        HostValue::vector([HostValue::str("a"), HostValue::str("b")])
    );
    assert_eq!(outcomes[0].handled, 0);
    assert_no_leaks(&heap);
}

#[test]
fn stop_message_value_ends_the_worker_loop() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![idle(&ids), ProcessDecl::new("collector", ids.strings_flat, ids.string, "collect")],
    );
    let tx = sys.sender();
    for m in ["a", "b", "stop"] {
        tx.send_value(1, &HostValue::str(m)).unwrap();
    }
    tx.stop(0).unwrap();

    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[1].handled, 2);
    assert_eq!(
        outcomes[1].final_state,
        HostValue::vector([HostValue::str("a"), HostValue::str("b")])
    );
    assert_no_leaks(&heap);
}

#[test]
fn stop_message_value_ends_process_zero() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![ProcessDecl::new("only", ids.strings_flat, ids.string, "collect")],
    );
    let tx = sys.sender();
    for m in ["x", "stop", "after"] {
        tx.send_value(0, &HostValue::str(m)).unwrap();
    }
    // No out-of-band stop: the message value alone ends the loop.
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].handled, 1);
    assert_eq!(outcomes[0].final_state, HostValue::vector([HostValue::str("x")]));
    drop(tx);
    assert_no_leaks(&heap);
}

#[test]
fn only_the_exact_stop_value_ends_the_loop() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![
            ProcessDecl::new("router", ids.int, ids.string, "forward"),
            ProcessDecl::new("sink", ids.strings_flat, ids.string, "collect"),
        ],
    );
    let tx = sys.sender();
    for m in ["stopped", "sto", "STOP", "stop"] {
        tx.send_value(0, &HostValue::str(m)).unwrap();
    }
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].handled, 3);
    assert_eq!(
        outcomes[1].final_state,
        HostValue::vector([HostValue::str("stopped"), HostValue::str("sto"), HostValue::str("STOP")])
    );
    assert_no_leaks(&heap);
}

#[test]
fn messages_are_handled_first_in_first_out() {
    let (heap, ids) = setup();
    let sys = system(&heap, &ids, vec![idle(&ids)]);
    let tx = sys.sender();
    for m in [1, 2, 3, 0] {
        tx.send(0, RawCell::from_int(m)).unwrap();
    }
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].final_state, HostValue::Int(123));
    assert_eq!(outcomes[0].handled, 4);
}

#[test]
fn handlers_forward_through_the_context() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![
            ProcessDecl::new("router", ids.int, ids.string, "forward"),
            ProcessDecl::new("sink", ids.strings_flat, ids.string, "collect"),
        ],
    );
    let tx = sys.sender();
    tx.send_value(0, &HostValue::str("x")).unwrap();
    tx.send_value(0, &HostValue::str("y")).unwrap();
    tx.stop(0).unwrap();

    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].final_state, HostValue::Int(2));
    assert_eq!(
        outcomes[1].final_state,
        HostValue::vector([HostValue::str("x"), HostValue::str("y")])
    );
    assert_no_leaks(&heap);
}

#[test]
fn init_entry_point_sees_its_own_pid() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![
            idle(&ids),
            ProcessDecl::new("seeded", ids.int, ids.int, "digits").with_init("start_from_pid"),
        ],
    );
    let tx = sys.sender();
    tx.send(1, RawCell::from_int(5)).unwrap();
    tx.stop(0).unwrap();
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[1].final_state, HostValue::Int(10075));
    assert_eq!(outcomes[0].final_state, HostValue::Int(0));
}

#[test]
fn process_without_init_starts_from_the_zero_value() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![ProcessDecl::new("empty", ids.strings_flat, ids.string, "collect")],
    );
    sys.sender().stop(0).unwrap();
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].final_state, HostValue::vector(Vec::new()));
    assert_no_leaks(&heap);
}

#[test]
fn entry_points_are_checked_when_the_system_is_built() {
    let (heap, ids) = setup();
    let table = symbols(&ids);
    let build = |decl: ProcessDecl| {
        ActorSystem::new(&heap, &table, &Topology::new(vec![decl]), RuntimeConfig::default())
            .map(|_| ())
    };

    let err = build(ProcessDecl::new("p", ids.int, ids.string, "digits")).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::SignatureMismatch {
            symbol: "digits".into(),
            expected: "fn(int, string) -> int".into(),
            found: "fn(int, int) -> int".into(),
        }
    );
    assert_eq!(
        build(ProcessDecl::new("p", ids.int, ids.int, "missing")),
        Err(RuntimeError::UnknownSymbol("missing".into()))
    );
    assert!(matches!(
        build(ProcessDecl::new("p", ids.int, ids.int, "tern_vector_len")),
        Err(RuntimeError::SignatureMismatch { .. })
    ));
    assert!(matches!(
        build(ProcessDecl::new("p", ids.int, ids.int, "digits").with_init("collect")),
        Err(RuntimeError::SignatureMismatch { .. })
    ));
    assert_eq!(
        build(ProcessDecl::new("p", 9999, ids.int, "digits")),
        Err(RuntimeError::UnknownType(9999))
    );
}

#[test]
fn worker_panic_is_reported_after_shutdown() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![idle(&ids), ProcessDecl::new("boom", ids.int, ids.int, "explode")],
    );
    let tx = sys.sender();
    tx.send(1, RawCell::from_int(13)).unwrap();
    tx.stop(0).unwrap();
    match sys.run() {
        Err(RuntimeError::ProcessPanicked { process, message }) => {
            assert_eq!(process, "boom");
            assert_eq!(message, "bad message 13");
        }
        other => panic!("expected a panicked process, got {other:?}"),
    }
}

#[test]
fn panic_in_process_zero_is_resumed() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![
            ProcessDecl::new("boom", ids.int, ids.int, "explode"),
            ProcessDecl::new("bystander", ids.strings_flat, ids.string, "collect"),
        ],
    );
    sys.sender().send(0, RawCell::from_int(1)).unwrap();
    let payload = catch_unwind(AssertUnwindSafe(|| sys.run())).unwrap_err();
    assert_eq!(payload.downcast_ref::<String>().map(String::as_str), Some("bad message 1"));
    // The bystander was stopped and joined; its state is released.
    assert_no_leaks(&heap);
}

#[test]
fn undelivered_messages_are_released() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![ProcessDecl::new("early", ids.strings_flat, ids.string, "collect")],
    );
    let tx = sys.sender();
    tx.send(0, str_cell(&heap, "seen")).unwrap();
    tx.stop(0).unwrap();
    tx.send(0, str_cell(&heap, "never")).unwrap();
    tx.send_value(0, &HostValue::str("also never")).unwrap();
    let outcomes = sys.run().unwrap();
    assert_eq!(outcomes[0].handled, 1);
    assert_eq!(outcomes[0].final_state, HostValue::vector([HostValue::str("seen")]));
    drop(tx);
    assert_no_leaks(&heap);
}

#[test]
fn sender_rejects_bad_targets_and_values() {
    let (heap, ids) = setup();
    let sys = system(&heap, &ids, vec![idle(&ids)]);
    let tx = sys.sender();
    assert_eq!(tx.stop(3), Err(RuntimeError::UnknownProcess(3)));
    assert_eq!(
        tx.send_value(7, &HostValue::Int(1)),
        Err(RuntimeError::UnknownProcess(7))
    );
    assert!(matches!(
        tx.send_value(0, &HostValue::str("one")),
        Err(RuntimeError::TypeMismatch { .. })
    ));
    assert_eq!(sys.pending(0).unwrap(), 0);
    assert_no_leaks(&heap);
}

#[test]
fn lifecycle_before_run() {
    let (heap, ids) = setup();
    let sys = system(
        &heap,
        &ids,
        vec![idle(&ids), ProcessDecl::new("w", ids.int, ids.int, "digits")],
    );
    assert_eq!(sys.len(), 2);
    assert_eq!(sys.state(1).unwrap(), ProcessState::Uninitialized);
    assert_eq!(sys.state(2), Err(RuntimeError::UnknownProcess(2)));
    assert!(format!("{sys:?}").contains("#1 w Uninitialized"));
    sys.sender().stop(0).unwrap();
    sys.run().unwrap();
}

#[test]
fn empty_topology_runs_to_nothing() {
    let (heap, ids) = setup();
    let sys = system(&heap, &ids, Vec::new());
    assert!(sys.is_empty());
    assert!(sys.run().unwrap().is_empty());
}

#[test]
fn mailbox_hands_over_across_threads_in_order() {
    let mailbox = Arc::new(Mailbox::new());
    let producer = {
        let mailbox = Arc::clone(&mailbox);
        thread::spawn(move || {
            for i in 0..100 {
                mailbox.push(Envelope::Message(RawCell::from_int(i)));
            }
            mailbox.push(Envelope::Stop);
        })
    };
    let mut seen = Vec::new();
    while let Envelope::Message(m) = mailbox.recv() {
        seen.push(m.as_int());
    }
    producer.join().unwrap();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    assert!(mailbox.is_empty());
    assert_eq!(mailbox.try_recv(), None);
}

#[test]
fn mailbox_drain_skips_stop_sentinels() {
    let mailbox = Mailbox::new();
    mailbox.push(Envelope::Message(RawCell::from_int(1)));
    mailbox.push(Envelope::Stop);
    mailbox.push(Envelope::Message(RawCell::from_int(2)));
    assert_eq!(mailbox.len(), 3);
    let drained: Vec<i64> = mailbox.drain().into_iter().map(|c| c.as_int()).collect();
    assert_eq!(drained, [1, 2]);
    assert!(mailbox.is_empty());
}
