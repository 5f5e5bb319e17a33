mod common;

use cncstream_control::{JobOutcome, Supervisor};
use cncstream_core::{AuditKind, ControlError, MachineState};
use common::{context, eventually, program, wait_for_state, ScriptedController};
use std::path::PathBuf;

#[test]
fn test_three_line_program_end_to_end() {
    let controller = ScriptedController::acking();
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\n;comment\nG1 X10 F100");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    let outcome = handle.wait().unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Completed {
            lines_sent: 2,
            firmware_errors: 0
        }
    );
    assert_eq!(controller.program_lines(), vec!["G0 X0", "G1 X10 F100"]);
    assert_eq!(
        controller.written(),
        vec!["$H", "G0 X0", "G1 X10 F100", "M5", "$H", "0x18"]
    );
    assert_eq!(supervisor.state(), MachineState::Ready);
    assert_eq!(
        audit.transitions(),
        vec![
            (MachineState::Ready, MachineState::Running),
            (MachineState::Running, MachineState::Ready)
        ]
    );
    assert!(audit
        .kinds()
        .iter()
        .any(|k| matches!(k, AuditKind::Note(n) if n.starts_with("toolpath complete"))));
}

#[test]
fn test_firmware_error_does_not_abort() {
    let controller = ScriptedController::new(|line| match line {
        "G99" => vec!["error:20".to_string()],
        l if l.len() == 1 || l.starts_with("0x") => Vec::new(),
        _ => vec!["ok".to_string()],
    });
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG99\nG1 X10\n");

    let outcome = supervisor
        .run(Some(file.path().to_path_buf()))
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(
        outcome,
        JobOutcome::Completed {
            lines_sent: 3,
            firmware_errors: 1
        }
    );
    assert_eq!(controller.program_lines(), vec!["G0 X0", "G99", "G1 X10"]);
}

#[test]
fn test_firmware_error_status_explains_the_code() {
    let controller = ScriptedController::new(|line| match line {
        "G99" => vec!["error:20".to_string()],
        l if l.len() == 1 || l.starts_with("0x") => Vec::new(),
        _ => vec!["ok".to_string()],
    });
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let mut events = supervisor.machine().subscribe();
    let file = program("G0 X0\nG99\n");

    supervisor
        .run(Some(file.path().to_path_buf()))
        .unwrap()
        .wait()
        .unwrap();

    let mut texts = Vec::new();
    while let Ok(event) = events.try_recv() {
        texts.push(event.text);
    }
    assert!(texts.iter().any(|t| {
        t.starts_with("line 2: ") && t.ends_with("(Unsupported or invalid g-code command)")
    }));
}

#[test]
fn test_alarm_aborts_the_job() {
    let controller = ScriptedController::new(|line| match line {
        "G1 X999" => vec!["ALARM:2".to_string()],
        l if l.len() == 1 || l.starts_with("0x") => Vec::new(),
        _ => vec!["ok".to_string()],
    });
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X999\nG1 X10\n");

    let outcome = supervisor
        .run(Some(file.path().to_path_buf()))
        .unwrap()
        .wait()
        .unwrap();

    match outcome {
        JobOutcome::Failed(reason) => {
            assert!(reason.contains("ALARM:2"));
            assert!(reason.ends_with("(Soft limit exceeded)"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(controller.program_lines(), vec!["G0 X0", "G1 X999"]);
    assert_eq!(controller.count("M5"), 0);
    assert_eq!(supervisor.state(), MachineState::Ready);
    assert!(supervisor.machine().status().contains("ALARM:2"));
    assert!(supervisor
        .machine()
        .status()
        .contains("Soft limit exceeded"));
    assert!(audit
        .kinds()
        .iter()
        .any(|k| matches!(k, AuditKind::Error(_))));
}

#[test]
fn test_missing_file_fails_and_cleans_up() {
    let controller = ScriptedController::acking();
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);

    let outcome = supervisor
        .run(Some(PathBuf::from("/nonexistent/cncstream/part.nc")))
        .unwrap()
        .wait()
        .unwrap();

    match outcome {
        JobOutcome::Failed(reason) => assert!(reason.contains("not found")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(controller.program_lines().is_empty());
    assert_eq!(supervisor.state(), MachineState::Ready);
}

#[test]
fn test_no_program_line_after_stop() {
    let controller = ScriptedController::acking();
    controller.hold_on("G1 X10");
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\nG1 X20\nG1 X30\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(eventually(|| controller.count("G1 X10") == 1));

    assert!(supervisor.stop().unwrap());
    assert_eq!(handle.wait(), Some(JobOutcome::Stopped));

    let written = controller.written();
    let stop_at = written.iter().position(|l| l == "G1 X10").unwrap() + 1;
    assert_eq!(&written[stop_at..], ["!", "M5", "0x18"]);
    assert_eq!(controller.count("G1 X20"), 0);
    assert_eq!(controller.count("G1 X30"), 0);

    assert!(wait_for_state(supervisor.machine(), MachineState::Ready));
    assert!(audit
        .kinds()
        .iter()
        .any(|k| matches!(k, AuditKind::Note(n) if n == "ended due to stop")));
}

#[test]
fn test_pause_is_idempotent_and_holds_streaming() {
    let controller = ScriptedController::acking();
    controller.hold_on("G1 X10");
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\nG1 X20\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(eventually(|| controller.count("G1 X10") == 1));

    assert!(supervisor.pause().unwrap());
    assert!(!supervisor.pause().unwrap());
    assert_eq!(controller.count("!"), 1);
    assert_eq!(supervisor.state(), MachineState::Paused);

    controller.release();
    assert!(eventually(|| supervisor
        .machine()
        .status()
        .starts_with("paused on line 3: G1 X20")));
    assert_eq!(controller.count("G1 X20"), 0);

    assert!(supervisor.resume().unwrap());
    assert!(!supervisor.resume().unwrap());
    assert_eq!(controller.count("~"), 1);

    assert_eq!(
        handle.wait(),
        Some(JobOutcome::Completed {
            lines_sent: 3,
            firmware_errors: 0
        })
    );
    assert_eq!(controller.program_lines(), vec!["G0 X0", "G1 X10", "G1 X20"]);

    let ignored: Vec<_> = audit
        .kinds()
        .into_iter()
        .filter_map(|k| match k {
            AuditKind::Ignored { request, .. } => Some(request),
            _ => None,
        })
        .collect();
    assert_eq!(ignored, vec!["pause", "resume"]);
}

#[test]
fn test_pause_and_resume_are_reported_with_line_context() {
    let controller = ScriptedController::acking();
    controller.hold_on("G1 X10");
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let mut events = supervisor.machine().subscribe();
    let file = program("G0 X0\nG1 X10\nG1 X20\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(eventually(|| controller.count("G1 X10") == 1));
    supervisor.pause().unwrap();
    controller.release();
    assert!(eventually(|| supervisor
        .machine()
        .status()
        .starts_with("paused on line")));
    supervisor.resume().unwrap();
    handle.wait().unwrap();

    let mut texts = Vec::new();
    while let Ok(event) = events.try_recv() {
        texts.push(event.text);
    }
    assert!(texts.iter().any(|t| t == "paused on line 3: G1 X20"));
    assert!(texts.iter().any(|t| t == "resumed on line 3: G1 X20"));
}

#[test]
fn test_pause_before_homing_holds_the_job() {
    let controller = ScriptedController::acking();
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\n");

    // Keep the worker off the channel until the machine is paused
    let guard = supervisor.context().channel.exclusive();
    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    supervisor.machine().transition(MachineState::Paused).unwrap();
    drop(guard);

    assert!(eventually(
        || supervisor.machine().status() == "paused before the first line"
    ));
    assert_eq!(controller.count("$H"), 0);
    assert_eq!(supervisor.state(), MachineState::Paused);

    assert!(supervisor.resume().unwrap());
    assert_eq!(
        handle.wait(),
        Some(JobOutcome::Completed {
            lines_sent: 2,
            firmware_errors: 0
        })
    );
    assert_eq!(
        controller.written(),
        vec!["~", "$H", "G0 X0", "G1 X10", "M5", "$H", "0x18"]
    );
    assert!(!audit
        .kinds()
        .iter()
        .any(|k| matches!(k, AuditKind::Note(n) if n == "ended due to stop")));
    assert_eq!(supervisor.state(), MachineState::Ready);
}

#[test]
fn test_pause_during_completion_trailer_resumes_it() {
    let controller = ScriptedController::acking();
    controller.hold_on("M5");
    let (ctx, audit) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(eventually(|| controller.count("M5") == 1));

    assert!(supervisor.pause().unwrap());
    controller.release();
    assert!(eventually(
        || supervisor.machine().status() == "paused after line 2: G1 X10"
    ));
    assert_eq!(controller.count("$H"), 1);

    assert!(supervisor.resume().unwrap());
    assert_eq!(
        handle.wait(),
        Some(JobOutcome::Completed {
            lines_sent: 2,
            firmware_errors: 0
        })
    );

    let written = controller.written();
    let trailer = written.iter().position(|l| l == "M5").unwrap();
    assert_eq!(&written[trailer..], ["M5", "!", "~", "$H", "0x18"]);
    assert_eq!(
        audit.transitions(),
        vec![
            (MachineState::Ready, MachineState::Running),
            (MachineState::Running, MachineState::Paused),
            (MachineState::Paused, MachineState::Running),
            (MachineState::Running, MachineState::Ready)
        ]
    );
}

#[test]
fn test_second_run_is_rejected_while_busy() {
    let controller = ScriptedController::acking();
    controller.hold_on("G0 X0");
    let (ctx, _) = context(&controller);
    let supervisor = Supervisor::new(ctx);
    let file = program("G0 X0\nG1 X10\n");

    let handle = supervisor.run(Some(file.path().to_path_buf())).unwrap();
    assert!(supervisor.is_busy());

    let err = supervisor
        .run(Some(file.path().to_path_buf()))
        .err()
        .unwrap();
    assert_eq!(
        err,
        ControlError::Busy {
            active: "job".to_string()
        }
    );

    supervisor.stop().unwrap();
    assert_eq!(handle.wait(), Some(JobOutcome::Stopped));
    assert_eq!(controller.count("G0 X0"), 1);
}
