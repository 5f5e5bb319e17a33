mod common;

use cncstream_communication::{ChannelConfig, CommandChannel, DummyTransport};
use cncstream_control::{JobOutcome, MachineContext, Supervisor, WorkerKind};
use cncstream_core::{AuditKind, ControlError, Machine, MachineState, MemoryAudit};
use common::{context, context_with, eventually, program, test_config, ScriptedController};
use std::sync::Arc;

#[test]
fn test_illegal_requests_are_ignored() {
    let controller = ScriptedController::acking();
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    assert!(!supervisor.pause().unwrap());
    assert!(!supervisor.resume().unwrap());
    assert!(!supervisor.pause_or_resume().unwrap());
    assert!(matches!(
        supervisor.confirm_new_tool().err(),
        Some(ControlError::NotAllowed {
            state: MachineState::Ready,
            ..
        })
    ));

    assert_eq!(supervisor.state(), MachineState::Ready);
    assert!(controller.written().is_empty());
    assert!(audit.transitions().is_empty());
    let ignored = audit
        .kinds()
        .iter()
        .filter(|k| matches!(k, AuditKind::Ignored { .. }))
        .count();
    assert_eq!(ignored, 4);
}

#[test]
fn test_stop_from_ready_then_home() {
    let controller = ScriptedController::acking();
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    assert!(supervisor.stop().unwrap());
    assert_eq!(supervisor.state(), MachineState::Stopped);
    assert!(!supervisor.stop().unwrap());
    assert_eq!(controller.written(), vec!["!", "M5", "0x18"]);

    // Nothing can start while stopped
    let file = program("G0 X0\n");
    assert!(supervisor.run(Some(file.path().to_path_buf())).is_err());
    assert!(supervisor.begin_tool_change().is_err());

    assert!(supervisor.home().unwrap());
    assert_eq!(supervisor.state(), MachineState::Ready);
    assert_eq!(controller.written().last().map(String::as_str), Some("$H"));
    assert_eq!(
        audit.transitions(),
        vec![
            (MachineState::Ready, MachineState::Stopped),
            (MachineState::Stopped, MachineState::Ready)
        ]
    );
}

#[test]
fn test_home_from_ready_rehomes_without_transition() {
    let controller = ScriptedController::acking();
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    assert!(supervisor.home().unwrap());
    assert!(eventually(|| !supervisor.is_busy()));
    assert_eq!(controller.written(), vec!["$H"]);
    assert_eq!(supervisor.machine().status(), "Homed");
    assert_eq!(supervisor.state(), MachineState::Ready);
    assert!(audit.transitions().is_empty());
}

#[test]
fn test_rehome_waits_for_its_own_ok() {
    let controller = ScriptedController::acking();
    controller.hold_on("$H");
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\n");

    let handle = supervisor.rehome().unwrap();
    assert_eq!(handle.kind(), WorkerKind::Home);
    assert!(eventually(|| controller.count("$H") == 1));
    assert_eq!(supervisor.machine().status(), "Homing");

    // The unanswered $H keeps the worker slot, so no job can take its ok
    assert!(matches!(
        supervisor.run(Some(file.path().to_path_buf())).err(),
        Some(ControlError::Busy { .. })
    ));
    assert!(!supervisor.home().unwrap());

    controller.release();
    assert_eq!(handle.wait(), Some(Ok(())));
    assert_eq!(supervisor.machine().status(), "Homed");

    let outcome = supervisor
        .run(Some(file.path().to_path_buf()))
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(
        outcome,
        JobOutcome::Completed {
            lines_sent: 2,
            firmware_errors: 0
        }
    );
    assert_eq!(
        controller.written(),
        vec!["$H", "$H", "G0 X0", "G1 X10", "M5", "$H", "0x18"]
    );
    assert_eq!(
        audit.transitions(),
        vec![
            (MachineState::Ready, MachineState::Running),
            (MachineState::Running, MachineState::Ready)
        ]
    );
}

#[test]
fn test_move_to_load_position() {
    let controller = ScriptedController::acking();
    let mut config = test_config();
    config.load_position.z = 25.0;
    let (ctx, _) = context_with(&controller, config);
    let supervisor = Supervisor::new(ctx);

    let result = supervisor.move_to_load_position().unwrap().wait().unwrap();

    assert_eq!(result, Ok(()));
    assert_eq!(controller.written(), vec!["G0 X0 Y0 Z25"]);
    assert_eq!(supervisor.state(), MachineState::Ready);
}

#[test]
fn test_run_uses_configured_program() {
    let controller = ScriptedController::acking();
    let file = program("G21\n");
    let mut config = test_config();
    config.job.program_path = Some(file.path().to_path_buf());
    let (ctx, _) = context_with(&controller, config);
    let supervisor = Supervisor::new(ctx);

    supervisor.run(None).unwrap().wait().unwrap();
    assert_eq!(controller.program_lines(), vec!["G21"]);
}

#[test]
fn test_run_without_program_is_rejected() {
    let controller = ScriptedController::acking();
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    assert!(supervisor.run(None).is_err());
    assert_eq!(supervisor.state(), MachineState::Ready);
    assert!(controller.written().is_empty());
}

#[test]
fn test_query_status_updates_status_text() {
    let controller = ScriptedController::new(|line| match line {
        "?" => vec!["<Idle|MPos:-21.550,-350.500,-5.000|FS:0,0>".to_string()],
        _ => Vec::new(),
    });
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    let report = supervisor.query_status().unwrap().unwrap();
    assert_eq!(report.state, "Idle");
    assert_eq!(
        supervisor.machine().status(),
        "Idle at X-21.550 Y-350.500 Z-5.000"
    );
}

#[test]
fn test_dummy_transport_runs_a_job() {
    let audit = Arc::new(MemoryAudit::default());
    let channel = CommandChannel::new(
        Box::new(DummyTransport::new()),
        ChannelConfig::default(),
        audit.clone(),
    );
    let ctx = MachineContext::new(
        Arc::new(Machine::new(audit.clone())),
        Arc::new(channel),
        test_config(),
    );
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\n;skip\nG1 X10 F100\n");

    supervisor
        .run(Some(file.path().to_path_buf()))
        .unwrap()
        .wait()
        .unwrap();

    let sent = audit.sent();
    assert!(sent.contains(&"G0 X0".to_string()));
    assert!(sent.contains(&"G1 X10 F100".to_string()));
    assert!(!sent.contains(&";skip".to_string()));
    assert_eq!(supervisor.state(), MachineState::Ready);
}

#[test]
fn test_shutdown_cancels_active_worker() {
    let controller = ScriptedController::acking();
    controller.hold_on("G0 X0");
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(common::eventually(|| controller.count("G0 X0") == 1));

    supervisor.shutdown();
    assert!(!supervisor.is_busy());
    assert_eq!(handle.wait(), Some(cncstream_control::JobOutcome::Stopped));
    assert_eq!(controller.count("G1 X10"), 0);
}
