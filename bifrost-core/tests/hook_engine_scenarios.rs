//! End-to-end hook-chain scenarios against a fake in-process `TargetHandle`
//! standing in for a real target process (this environment cannot spawn one
//! and inject into it). `TargetHandle` is a single-slot vtable backing a
//! real local function, hooked through the public `HookEngine` API exactly
//! as a plugin would: `set_vtable_hook` needs no module/symbol resolution,
//! so the whole chain — real patch, jump-table stubs, priority ordering —
//! runs for real in the test process.
use bifrost_core::config::HookConfig;
use bifrost_core::{HookEngine, HookIdentifier, HookKind};

type Op = extern "system" fn(i32) -> i32;

extern "system" fn original_double(x: i32) -> i32 {
    x * 2
}

/// A fake target: one vtable slot, initially pointing at `original_double`.
struct TargetHandle {
    slot: Box<u64>,
}

impl TargetHandle {
    fn new() -> Self {
        Self {
            slot: Box::new(original_double as u64),
        }
    }

    fn base(&self) -> *const () {
        self.slot.as_ref() as *const u64 as *const ()
    }

    /// Call through whatever the slot currently holds.
    fn call(&self, arg: i32) -> i32 {
        let current: Op = unsafe { std::mem::transmute::<u64, Op>(*self.slot) };
        current(arg)
    }
}

fn identifier(id: u32) -> HookIdentifier {
    HookIdentifier {
        id,
        name: format!("target_{id}"),
        module: String::new(),
        kind: HookKind::VTableSlot,
        symbol: String::new(),
    }
}

fn engine_with(ids: Vec<u32>) -> HookEngine {
    HookEngine::new(ids.into_iter().map(identifier).collect(), &HookConfig::default())
}

static CALL_THROUGH: std::sync::OnceLock<std::sync::Mutex<Vec<Op>>> = std::sync::OnceLock::new();

fn call_through_slot(index: usize, arg: i32) -> i32 {
    let table = CALL_THROUGH.get().expect("call-through table not installed");
    let f = table.lock().unwrap()[index];
    f(arg)
}

/// `CALL_THROUGH` is a fixed-size table shared by every test in this file
/// (an `extern "system" fn` replacement has no room to carry its own
/// per-test state), so tests that touch it must not run concurrently with
/// each other. `cargo test` runs tests in a thread pool by default; holding
/// this lock for each test body's duration serializes them.
fn serialize_tests() -> &'static std::sync::Mutex<()> {
    static LOCK: std::sync::OnceLock<std::sync::Mutex<()>> = std::sync::OnceLock::new();
    LOCK.get_or_init(|| std::sync::Mutex::new(()))
}

extern "system" fn add_one_then_passthrough(x: i32) -> i32 {
    call_through_slot(0, x + 1)
}

extern "system" fn passthrough_unchanged(x: i32) -> i32 {
    call_through_slot(1, x)
}

extern "system" fn double_then_passthrough(x: i32) -> i32 {
    call_through_slot(2, x * 2)
}

#[test]
fn add_hook_smoke() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![1]);

    let before = target.call(10);
    assert_eq!(before, 20);

    let (_token, _call_through) = engine
        .set_vtable_hook(1, target.base(), 0, passthrough_unchanged as *const (), 0)
        .expect("install should succeed");

    CALL_THROUGH.get_or_init(|| std::sync::Mutex::new(vec![original_double, original_double, original_double]));
    CALL_THROUGH.get().unwrap().lock().unwrap()[1] = original_double;

    assert_eq!(target.call(10), 20);
}

#[test]
fn pass_through_reaches_the_original_unmodified() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![2]);
    CALL_THROUGH.get_or_init(|| std::sync::Mutex::new(vec![original_double, original_double, original_double]));

    let (_token, call_through) = engine
        .set_vtable_hook(2, target.base(), 0, passthrough_unchanged as *const (), 0)
        .unwrap();
    let op: Op = unsafe { std::mem::transmute::<*const (), Op>(call_through) };
    CALL_THROUGH.get().unwrap().lock().unwrap()[1] = op;

    assert_eq!(target.call(5), 10);
}

#[test]
fn both_args_rewritten_runs_in_priority_order() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![3]);
    CALL_THROUGH.get_or_init(|| std::sync::Mutex::new(vec![original_double, original_double, original_double]));

    // Lower priority: doubles its input, then calls through to the original.
    let (_low_token, low_call_through) = engine
        .set_vtable_hook(3, target.base(), 0, double_then_passthrough as *const (), 0)
        .unwrap();
    let low_op: Op = unsafe { std::mem::transmute::<*const (), Op>(low_call_through) };
    CALL_THROUGH.get().unwrap().lock().unwrap()[2] = low_op;

    // Higher priority: adds one, then calls through to the lower entry.
    let (_high_token, high_call_through) = engine
        .set_vtable_hook(3, target.base(), 0, add_one_then_passthrough as *const (), 10)
        .unwrap();
    let high_op: Op = unsafe { std::mem::transmute::<*const (), Op>(high_call_through) };
    CALL_THROUGH.get().unwrap().lock().unwrap()[0] = high_op;

    // head_stub now points at the priority-10 entry: (x+1) -> (*2) -> original(*2).
    // 4 -> +1 = 5 -> *2 = 10 -> original(10) = 20
    assert_eq!(target.call(4), 20);
}

#[test]
fn force_reload_rewires_the_chain_instead_of_erroring() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![4]);

    let (first_token, _) = engine.set_vtable_hook(4, target.base(), 0, passthrough_unchanged as *const (), 0).unwrap();
    let (second_token, _) = engine
        .set_vtable_hook(4, target.base(), 0, passthrough_unchanged as *const (), 5)
        .expect("re-registering at an existing site must succeed, not error");

    assert_ne!(first_token, second_token);
    engine.remove_hook(first_token).unwrap();
    engine.remove_hook(second_token).unwrap();
}

#[test]
fn removing_every_entry_restores_original_behavior() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![7]);

    let (token_a, _) = engine.set_vtable_hook(7, target.base(), 0, passthrough_unchanged as *const (), 0).unwrap();
    let (token_b, _) = engine.set_vtable_hook(7, target.base(), 0, passthrough_unchanged as *const (), 5).unwrap();

    engine.remove_hook(token_b).unwrap();
    engine.remove_hook(token_a).unwrap();

    // No chain entries remain: the head stub must jump straight at the
    // original, not at whichever replacement it last pointed at.
    assert_eq!(target.call(10), 20);
}

#[test]
fn benign_double_load_of_the_same_replacement_keeps_both_tokens_independent() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![5]);

    let (token_a, _) = engine.set_vtable_hook(5, target.base(), 0, passthrough_unchanged as *const (), 0).unwrap();
    let (token_b, _) = engine.set_vtable_hook(5, target.base(), 0, passthrough_unchanged as *const (), 0).unwrap();

    assert_ne!(token_a, token_b);
    engine.remove_hook(token_a).unwrap();
    // The site must still be active for token_b even after token_a is gone.
    engine.remove_hook(token_b).unwrap();
    // And removing an already-removed token is reported, not silently accepted.
    assert!(engine.remove_hook(token_a).is_err());
}

#[test]
fn help_reports_unregistered_ids_clearly_instead_of_panicking() {
    let _guard = serialize_tests().lock().unwrap();
    let target = TargetHandle::new();
    let engine = engine_with(vec![6]);

    let err = engine
        .set_vtable_hook(999, target.base(), 0, passthrough_unchanged as *const (), 0)
        .unwrap_err();
    assert!(err.to_string().contains("999"));

    // A CFunction-only call against a VTableSlot identifier is rejected the
    // same way, rather than silently hooking the wrong kind of site.
    let err = engine.set_hook(6, passthrough_unchanged as *const (), 0).unwrap_err();
    assert!(err.to_string().to_lowercase().contains("cfunction"));
}
