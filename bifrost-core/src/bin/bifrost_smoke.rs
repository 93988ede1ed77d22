//! Standalone smoke test: runs the six end-to-end hook-chain scenarios
//! against a fake in-process `TargetHandle` and prints a pass/fail summary.
//! Unlike `bifrost-core/tests/hook_engine_scenarios.rs`, this runs as an
//! ordinary binary (no test-harness thread pool), so the scenarios run
//! sequentially in one thread and need no serialization guard.
use bifrost_core::config::HookConfig;
use bifrost_core::{HookEngine, HookIdentifier, HookKind};

type Op = extern "system" fn(i32) -> i32;

extern "system" fn original_double(x: i32) -> i32 {
    x * 2
}

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

fn call_through_table() -> &'static std::sync::Mutex<Vec<Op>> {
    CALL_THROUGH.get_or_init(|| std::sync::Mutex::new(vec![original_double, original_double, original_double]))
}

fn call_through_slot(index: usize, arg: i32) -> i32 {
    let f = call_through_table().lock().unwrap()[index];
    f(arg)
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

/// One named scenario, run in its own closure so a panic or an assertion
/// failure is caught and reported as a line in the summary instead of
/// aborting the whole run.
struct Scenario {
    name: &'static str,
    run: fn() -> Result<(), String>,
}

fn add_hook_smoke() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![1]);

    if target.call(10) != 20 {
        return Err("unhooked target did not behave like the original".into());
    }

    engine
        .set_vtable_hook(1, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;
    call_through_table().lock().unwrap()[1] = original_double;

    if target.call(10) != 20 {
        return Err("passthrough hook changed the result".into());
    }
    Ok(())
}

fn pass_through_reaches_the_original_unmodified() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![2]);

    let (_token, call_through) = engine
        .set_vtable_hook(2, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;
    let op: Op = unsafe { std::mem::transmute::<*const (), Op>(call_through) };
    call_through_table().lock().unwrap()[1] = op;

    if target.call(5) != 10 {
        return Err("call-through did not reach the original function".into());
    }
    Ok(())
}

fn both_args_rewritten_runs_in_priority_order() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![3]);

    let (_low_token, low_call_through) = engine
        .set_vtable_hook(3, target.base(), 0, double_then_passthrough as *const (), 0)
        .map_err(|e| e.to_string())?;
    let low_op: Op = unsafe { std::mem::transmute::<*const (), Op>(low_call_through) };
    call_through_table().lock().unwrap()[2] = low_op;

    let (_high_token, high_call_through) = engine
        .set_vtable_hook(3, target.base(), 0, add_one_then_passthrough as *const (), 10)
        .map_err(|e| e.to_string())?;
    let high_op: Op = unsafe { std::mem::transmute::<*const (), Op>(high_call_through) };
    call_through_table().lock().unwrap()[0] = high_op;

    // 4 -> +1 = 5 -> *2 = 10 -> original(10) = 20
    if target.call(4) != 20 {
        return Err("chain did not run in priority order".into());
    }
    Ok(())
}

fn force_reload_rewires_the_chain_instead_of_erroring() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![4]);

    let (first_token, _) = engine
        .set_vtable_hook(4, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;
    let (second_token, _) = engine
        .set_vtable_hook(4, target.base(), 0, passthrough_unchanged as *const (), 5)
        .map_err(|e| format!("re-registering at an existing site must succeed, not error: {e}"))?;

    if first_token == second_token {
        return Err("re-registering returned the same token".into());
    }
    engine.remove_hook(first_token).map_err(|e| e.to_string())?;
    engine.remove_hook(second_token).map_err(|e| e.to_string())?;
    Ok(())
}

fn removing_every_entry_restores_original_behavior() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![7]);

    let (token_a, _) = engine
        .set_vtable_hook(7, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;
    let (token_b, _) = engine
        .set_vtable_hook(7, target.base(), 0, passthrough_unchanged as *const (), 5)
        .map_err(|e| e.to_string())?;

    engine.remove_hook(token_b).map_err(|e| e.to_string())?;
    engine.remove_hook(token_a).map_err(|e| e.to_string())?;

    if target.call(10) != 20 {
        return Err("head stub still points at a removed replacement instead of the original".into());
    }
    Ok(())
}

fn benign_double_load_of_the_same_replacement_keeps_both_tokens_independent() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![5]);

    let (token_a, _) = engine
        .set_vtable_hook(5, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;
    let (token_b, _) = engine
        .set_vtable_hook(5, target.base(), 0, passthrough_unchanged as *const (), 0)
        .map_err(|e| e.to_string())?;

    if token_a == token_b {
        return Err("double-load returned the same token twice".into());
    }
    engine.remove_hook(token_a).map_err(|e| e.to_string())?;
    engine.remove_hook(token_b).map_err(|e| e.to_string())?;
    if engine.remove_hook(token_a).is_ok() {
        return Err("removing an already-removed token was accepted".into());
    }
    Ok(())
}

fn help_reports_unregistered_ids_clearly_instead_of_panicking() -> Result<(), String> {
    let target = TargetHandle::new();
    let engine = engine_with(vec![6]);

    let err = engine
        .set_vtable_hook(999, target.base(), 0, passthrough_unchanged as *const (), 0)
        .err()
        .ok_or("hooking an unregistered id did not error")?;
    if !err.to_string().contains("999") {
        return Err(format!("error did not mention the offending id: {err}"));
    }

    let err = engine
        .set_hook(6, passthrough_unchanged as *const (), 0)
        .err()
        .ok_or("hooking a vtable-slot id through the cfunction entry point did not error")?;
    if !err.to_string().to_lowercase().contains("cfunction") {
        return Err(format!("error did not explain the kind mismatch: {err}"));
    }
    Ok(())
}

fn main() {
    let scenarios = [
        Scenario { name: "add_hook_smoke", run: add_hook_smoke },
        Scenario {
            name: "pass_through_reaches_the_original_unmodified",
            run: pass_through_reaches_the_original_unmodified,
        },
        Scenario {
            name: "both_args_rewritten_runs_in_priority_order",
            run: both_args_rewritten_runs_in_priority_order,
        },
        Scenario {
            name: "force_reload_rewires_the_chain_instead_of_erroring",
            run: force_reload_rewires_the_chain_instead_of_erroring,
        },
        Scenario {
            name: "removing_every_entry_restores_original_behavior",
            run: removing_every_entry_restores_original_behavior,
        },
        Scenario {
            name: "benign_double_load_of_the_same_replacement_keeps_both_tokens_independent",
            run: benign_double_load_of_the_same_replacement_keeps_both_tokens_independent,
        },
        Scenario {
            name: "help_reports_unregistered_ids_clearly_instead_of_panicking",
            run: help_reports_unregistered_ids_clearly_instead_of_panicking,
        },
    ];

    println!("bifrost-smoke: {} scenarios", scenarios.len());
    let mut failures = 0;
    for scenario in &scenarios {
        match (scenario.run)() {
            Ok(()) => println!("  ok   {}", scenario.name),
            Err(reason) => {
                failures += 1;
                println!("  FAIL {}: {reason}", scenario.name);
            }
        }
    }

    if failures > 0 {
        eprintln!("{failures}/{} scenarios failed", scenarios.len());
        std::process::exit(1);
    }
    println!("all scenarios passed");
}
