//! Tool-length probe routine
//!
//! Two operator-driven phases around a manual tool swap:
//!
//! 1. [`probe_reference`] measures the tool currently in the spindle and
//!    parks the machine at the tool-change position in `ProbingNewTool`.
//! 2. [`probe_new_tool`] measures the replacement tool, applies
//!    `reference - new` as a `G43` tool-length offset, homes, and returns to
//!    `Ready`.
//!
//! Each measurement is two touches: a fast approach, a back-off, and a slow
//! confirm. The slow reading is the one used.
//!
//! Every command is gated on the machine still being in the expected probing
//! state, so a stop between commands ends the routine before the next write.
//! On any failure the machine stays where it is and the phase can be retried.

use crate::context::MachineContext;
use cncstream_communication::{Command, ResponseLines};
use cncstream_core::{CancelToken, ChannelError, MachineState, ProbeError, ProbePhase};
use std::thread;

fn phase_of(state: MachineState) -> ProbePhase {
    match state {
        MachineState::ProbingNewTool => ProbePhase::NewTool,
        _ => ProbePhase::ReferenceTool,
    }
}

fn interrupted(ctx: &MachineContext, expected: MachineState) -> ProbeError {
    ProbeError::Interrupted {
        phase: phase_of(expected),
        state: ctx.machine.state(),
    }
}

/// Send one command while the machine is still in `expected`
fn send(
    ctx: &MachineContext,
    cancel: &CancelToken,
    expected: MachineState,
    command: &Command,
) -> Result<ResponseLines, ProbeError> {
    let sent = ctx
        .channel
        .send_gated(command, cancel, || ctx.machine.state() == expected);

    match sent {
        Ok(Some(lines)) => Ok(lines),
        Ok(None) | Err(ChannelError::Cancelled { .. }) => Err(interrupted(ctx, expected)),
        Err(e) => Err(e.into()),
    }
}

/// One probing move; returns the reported Z
fn touch(
    ctx: &MachineContext,
    cancel: &CancelToken,
    expected: MachineState,
    feed: f64,
) -> Result<f64, ProbeError> {
    let phase = phase_of(expected);
    let probe = &ctx.settings.probe;

    let lines = match send(ctx, cancel, expected, &Command::probe_z(probe.depth, feed)) {
        Ok(lines) => lines,
        Err(ProbeError::Channel(
            e @ (ChannelError::NoProbeReport { .. } | ChannelError::Firmware { .. }),
        )) => {
            tracing::warn!("Probe move at F{} failed: {}", feed, e);
            return Err(ProbeError::NoReading { phase });
        }
        Err(e) => return Err(e),
    };

    let z = lines.probe_z().ok_or_else(|| {
        tracing::warn!("Unparseable probe report: {:?}", lines.terminal());
        ProbeError::NoReading { phase }
    })?;

    // G38.2 is acknowledged after its report
    if !ctx.channel.expect_ack(cancel, probe.ack_window())? {
        tracing::warn!("No acknowledgement after probe report at F{}", feed);
    }

    tracing::debug!("Probe touch at F{}: Z {:.4}", feed, z);
    Ok(z)
}

/// Two-touch probe; the slow, second reading is returned
///
/// Expects relative positioning (`G91`) to be active so the back-off is a
/// relative lift.
pub fn probe_tool(
    ctx: &MachineContext,
    cancel: &CancelToken,
    expected: MachineState,
) -> Result<f64, ProbeError> {
    let probe = &ctx.settings.probe;

    let first = touch(ctx, cancel, expected, probe.fast_feed)?;
    send(ctx, cancel, expected, &Command::rapid_z(probe.backoff))?;
    let second = touch(ctx, cancel, expected, probe.slow_feed)?;

    ctx.machine.note(format!(
        "{} probe: fast Z {:.4}, slow Z {:.4}",
        phase_of(expected),
        first,
        second
    ));
    Ok(second)
}

/// Quiet the spindle and move over the probe plate in relative mode
fn approach(
    ctx: &MachineContext,
    cancel: &CancelToken,
    expected: MachineState,
) -> Result<(), ProbeError> {
    let probe = &ctx.settings.probe;
    let commands = [
        Command::feed_hold(),
        Command::spindle_stop(),
        Command::absolute(),
        Command::rapid_xy(probe.approach_x, probe.approach_y),
        Command::relative(),
    ];
    for command in &commands {
        send(ctx, cancel, expected, command)?;
    }
    Ok(())
}

/// Phase 1: measure the reference tool and park for the swap
///
/// The machine must already be `ProbingReferenceTool`. On success it is
/// `ProbingNewTool` with the reference Z recorded.
pub fn probe_reference(ctx: &MachineContext, cancel: &CancelToken) -> Result<f64, ProbeError> {
    const PHASE: MachineState = MachineState::ProbingReferenceTool;
    let probe = &ctx.settings.probe;

    ctx.machine.set_status("Probing reference tool");
    ctx.channel.reset_buffers()?;

    approach(ctx, cancel, PHASE)?;
    let reference_z = probe_tool(ctx, cancel, PHASE)?;

    let park = [
        Command::rapid_z(probe.backoff),
        Command::absolute(),
        Command::rapid_z(probe.tool_change_z),
        Command::rapid_xy(probe.tool_change_x, probe.tool_change_y),
        Command::feed_hold(),
    ];
    for command in &park {
        send(ctx, cancel, PHASE, command)?;
    }

    ctx.machine
        .enter_new_tool_probe(reference_z)
        .map_err(|_| interrupted(ctx, PHASE))?;
    ctx.machine
        .note(format!("reference tool Z {:.4}", reference_z));

    Ok(reference_z)
}

/// Phase 2: measure the new tool, apply the offset, home
///
/// The machine must be `ProbingNewTool` with a stored reference. Returns the
/// applied offset.
pub fn probe_new_tool(ctx: &MachineContext, cancel: &CancelToken) -> Result<f64, ProbeError> {
    const PHASE: MachineState = MachineState::ProbingNewTool;
    let probe = &ctx.settings.probe;

    let reference_z = ctx
        .machine
        .reference_z()
        .ok_or(ProbeError::MissingReference)?;

    ctx.machine.set_status("Probing new tool");
    ctx.channel.reset_buffers()?;

    approach(ctx, cancel, PHASE)?;
    let new_z = probe_tool(ctx, cancel, PHASE)?;
    let offset = reference_z - new_z;

    send(ctx, cancel, PHASE, &Command::rapid_z(probe.backoff))?;
    send(ctx, cancel, PHASE, &Command::tool_length_offset(offset))?;
    ctx.machine.note(format!(
        "tool length offset {:.4} (reference {:.4}, new {:.4})",
        offset, reference_z, new_z
    ));
    thread::sleep(probe.settle());

    send(ctx, cancel, PHASE, &Command::absolute())?;
    send(ctx, cancel, PHASE, &Command::home())?;

    ctx.machine
        .transition_with_status(
            MachineState::Ready,
            format!("Tool length offset {:.4} applied", offset),
        )
        .map_err(|_| interrupted(ctx, PHASE))?;

    Ok(offset)
}
