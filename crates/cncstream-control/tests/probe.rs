mod common;

use cncstream_control::{probe_new_tool, probe_tool, Supervisor};
use cncstream_core::{CancelToken, MachineState, ProbeError, ProbePhase};
use common::{context, eventually, ScriptedController};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Slow touches report each value of `slow` in turn
fn tool_change_controller(fast: f64, slow: Vec<f64>) -> ScriptedController {
    let calls = Arc::new(AtomicUsize::new(0));
    ScriptedController::new(move |line| {
        if line.starts_with("G38.2") && line.ends_with("F200") {
            vec![format!("PRB:0,0,{}", fast), "ok".to_string()]
        } else if line.starts_with("G38.2") {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let z = slow[n.min(slow.len() - 1)];
            vec![format!("[PRB:0.000,0.000,{:.3}:1]", z), "ok".to_string()]
        } else if line.len() == 1 || line.starts_with("0x") {
            Vec::new()
        } else {
            vec!["ok".to_string()]
        }
    })
}

#[test]
fn test_second_touch_wins() {
    let controller = ScriptedController::probing(-45.23, -45.01);
    let (ctx, _) = context(&controller);
    ctx.machine
        .transition(MachineState::ProbingReferenceTool)
        .unwrap();

    let z = probe_tool(&ctx, &CancelToken::new(), MachineState::ProbingReferenceTool).unwrap();

    assert_eq!(z, -45.01);
    assert_eq!(
        controller.written(),
        vec!["G38.2 Z-50 F200", "G0 Z10", "G38.2 Z-50 F100"]
    );
}

#[test]
fn test_full_tool_change_applies_offset() {
    let controller = tool_change_controller(-45.23, vec![-45.01, -47.30]);
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    let reference = supervisor.begin_tool_change().unwrap().wait().unwrap();
    assert_eq!(reference, Ok(-45.01));
    assert_eq!(supervisor.state(), MachineState::ProbingNewTool);
    assert_eq!(supervisor.machine().reference_z(), Some(-45.01));
    assert_eq!(
        controller.written(),
        vec![
            "!",
            "M5",
            "G90",
            "G0 X-21.55 Y-350.5",
            "G91",
            "G38.2 Z-50 F200",
            "G0 Z10",
            "G38.2 Z-50 F100",
            "G0 Z10",
            "G90",
            "G0 Z10",
            "G0 X0 Y0",
            "!",
        ]
    );

    let offset = supervisor
        .confirm_new_tool()
        .unwrap()
        .wait()
        .unwrap()
        .unwrap();
    assert!((offset - 2.29).abs() < 1e-9);
    assert_eq!(controller.count("G43 Z2.2900"), 1);
    assert_eq!(supervisor.state(), MachineState::Ready);

    let written = controller.written();
    assert_eq!(&written[written.len() - 2..], ["G90", "$H"]);
    assert_eq!(
        audit.transitions(),
        vec![
            (MachineState::Ready, MachineState::ProbingReferenceTool),
            (MachineState::ProbingReferenceTool, MachineState::ProbingNewTool),
            (MachineState::ProbingNewTool, MachineState::Ready),
        ]
    );
}

#[test]
fn test_malformed_report_parks_reference_phase() {
    let controller = ScriptedController::new(|line| {
        if line.starts_with("G38.2") {
            vec!["[PRB:garbage]".to_string(), "ok".to_string()]
        } else if line.len() == 1 {
            Vec::new()
        } else {
            vec!["ok".to_string()]
        }
    });
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    let result = supervisor.begin_tool_change().unwrap().wait().unwrap();
    assert_eq!(
        result,
        Err(ProbeError::NoReading {
            phase: ProbePhase::ReferenceTool
        })
    );
    assert_eq!(supervisor.state(), MachineState::ProbingReferenceTool);
    assert_eq!(supervisor.machine().reference_z(), None);
    assert!(supervisor.machine().status().contains("No probe reading"));

    // Retry from the parked state is allowed
    let retry = supervisor.begin_tool_change().unwrap().wait().unwrap();
    assert!(retry.is_err());
    assert_eq!(supervisor.state(), MachineState::ProbingReferenceTool);
}

#[test]
fn test_missing_report_parks_new_tool_phase_without_offset() {
    let controller = ScriptedController::new(|line| {
        if line.len() == 1 {
            Vec::new()
        } else {
            // Probe moves are acknowledged but never report
            vec!["ok".to_string()]
        }
    });
    let (ctx, _) = context(&controller);
    ctx.machine
        .transition(MachineState::ProbingReferenceTool)
        .unwrap();
    ctx.machine.enter_new_tool_probe(-45.01).unwrap();

    let err = probe_new_tool(&ctx, &CancelToken::new()).unwrap_err();

    assert_eq!(
        err,
        ProbeError::NoReading {
            phase: ProbePhase::NewTool
        }
    );
    assert_eq!(ctx.machine.state(), MachineState::ProbingNewTool);
    assert!(controller.written().iter().all(|l| !l.starts_with("G43")));
}

#[test]
fn test_stop_interrupts_probe() {
    let controller = ScriptedController::probing(-45.23, -45.01);
    controller.hold_on("G38.2 Z-50 F200");
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    let handle = supervisor.begin_tool_change().unwrap();
    assert!(eventually(|| controller.count("G38.2 Z-50 F200") == 1));
    assert!(supervisor.stop().unwrap());

    assert_eq!(
        handle.wait().unwrap(),
        Err(ProbeError::Interrupted {
            phase: ProbePhase::ReferenceTool,
            state: MachineState::Stopped
        })
    );
    assert_eq!(supervisor.state(), MachineState::Stopped);
    assert_eq!(controller.count("G38.2 Z-50 F100"), 0);

    assert!(supervisor.home().unwrap());
    assert_eq!(supervisor.state(), MachineState::Ready);
}

#[test]
fn test_confirm_requires_new_tool_state() {
    let controller = ScriptedController::acking();
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    assert!(supervisor.confirm_new_tool().is_err());
    assert!(controller.written().is_empty());
    assert_eq!(supervisor.state(), MachineState::Ready);
}
