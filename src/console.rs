//! Line-oriented operator console
//!
//! Each input line is one verb. Verbs map one-to-one onto [`Supervisor`]
//! requests; the console never touches the machine or the channel directly.

use cncstream_control::Supervisor;
use cncstream_core::{Affordances, MemoryAudit, PauseLabel};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

/// Default number of audit entries shown by `log`
const DEFAULT_LOG_TAIL: usize = 20;

/// A parsed operator request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Run(Option<PathBuf>),
    Pause,
    Resume,
    /// Pause when running, resume when paused
    Toggle,
    Stop,
    Home,
    Load,
    ToolChange,
    Confirm,
    Status,
    State,
    Log(usize),
    Help,
    Quit,
}

/// Input that is not a verb
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVerb(pub String);

impl fmt::Display for UnknownVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command '{}' (try 'help')", self.0)
    }
}

impl std::error::Error for UnknownVerb {}

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (word, rest) = match input.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (input, ""),
        };

        let verb = match word.to_ascii_lowercase().as_str() {
            "run" | "r" => Verb::Run((!rest.is_empty()).then(|| PathBuf::from(rest))),
            "pause" => Verb::Pause,
            "resume" => Verb::Resume,
            "p" | "toggle" => Verb::Toggle,
            "stop" | "s" => Verb::Stop,
            "home" | "h" => Verb::Home,
            "load" | "set" => Verb::Load,
            "tool" | "t" => Verb::ToolChange,
            "confirm" | "c" => Verb::Confirm,
            "status" | "?" => Verb::Status,
            "state" => Verb::State,
            "log" => match rest {
                "" => Verb::Log(DEFAULT_LOG_TAIL),
                n => Verb::Log(n.parse().map_err(|_| UnknownVerb(input.to_string()))?),
            },
            "help" => Verb::Help,
            "quit" | "exit" | "q" => Verb::Quit,
            _ => return Err(UnknownVerb(input.to_string())),
        };
        Ok(verb)
    }
}

/// Render the controls available in a state, e.g. `home run stop tool`
pub fn describe_affordances(affordances: Affordances) -> String {
    let mut verbs = Vec::new();
    if affordances.set {
        verbs.push("load");
    }
    if affordances.home {
        verbs.push("home");
    }
    if affordances.run {
        verbs.push("run");
    }
    match affordances.pause {
        Some(PauseLabel::Pause) => verbs.push("pause"),
        Some(PauseLabel::Resume) => verbs.push("resume"),
        None => {}
    }
    if affordances.stop {
        verbs.push("stop");
    }
    if affordances.tool_change {
        verbs.push("tool");
    }
    if affordances.confirm_tool {
        verbs.push("confirm");
    }
    verbs.join(" ")
}

const HELP: &str = "\
run [path]  stream a program (configured program when no path)
pause       feed hold
resume      cycle start
p           pause or resume
stop        stop the machine
home        home ($H); leaves Stopped
load        move to the load position
tool        probe the reference tool (retry when parked)
confirm     probe the new tool and apply the offset
status      query the controller
state       show state and available controls
log [n]     last n audit entries
quit        stop any worker and exit";

/// Outcome of one verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Operator console bound to one supervisor
pub struct Console<'a> {
    supervisor: &'a Supervisor,
    recent: &'a MemoryAudit,
}

impl<'a> Console<'a> {
    pub fn new(supervisor: &'a Supervisor, recent: &'a MemoryAudit) -> Self {
        Self { supervisor, recent }
    }

    /// Read verbs from `input` until `quit` or end of input
    pub fn run(&self, input: impl BufRead, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "{}", self.prompt())?;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let flow = match line.parse::<Verb>() {
                Ok(verb) => self.execute(verb, &mut out)?,
                Err(e) => {
                    writeln!(out, "{}", e)?;
                    Flow::Continue
                }
            };
            if flow == Flow::Quit {
                break;
            }
            out.flush()?;
        }
        Ok(())
    }

    fn prompt(&self) -> String {
        let state = self.supervisor.state();
        format!(
            "[{}] {}",
            state,
            describe_affordances(state.affordances())
        )
    }

    /// Carry out one verb, writing the reply to `out`
    pub fn execute(&self, verb: Verb, out: &mut impl Write) -> io::Result<Flow> {
        let supervisor = self.supervisor;
        match verb {
            Verb::Run(path) => match supervisor.run(path) {
                Ok(handle) => writeln!(out, "started {} {}", handle.kind(), handle.id())?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Verb::Pause => report_control(out, "pause", supervisor.pause())?,
            Verb::Resume => report_control(out, "resume", supervisor.resume())?,
            Verb::Toggle => report_control(out, "pause/resume", supervisor.pause_or_resume())?,
            Verb::Stop => report_control(out, "stop", supervisor.stop())?,
            Verb::Home => report_control(out, "home", supervisor.home())?,
            Verb::Load => match supervisor.move_to_load_position() {
                Ok(handle) => writeln!(out, "started {} {}", handle.kind(), handle.id())?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Verb::ToolChange => match supervisor.begin_tool_change() {
                Ok(handle) => writeln!(out, "started {} {}", handle.kind(), handle.id())?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Verb::Confirm => match supervisor.confirm_new_tool() {
                Ok(handle) => writeln!(out, "started {} {}", handle.kind(), handle.id())?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Verb::Status => match supervisor.query_status() {
                Ok(Some(_)) => writeln!(out, "{}", supervisor.machine().status())?,
                Ok(None) => writeln!(out, "no status report")?,
                Err(e) => writeln!(out, "{}", e)?,
            },
            Verb::State => {
                let snapshot = supervisor.machine().snapshot();
                writeln!(out, "{}: {}", snapshot.state, snapshot.status)?;
                if let Some(line) = &snapshot.last_dispatched {
                    writeln!(out, "last sent {}", line)?;
                }
                if let Some(z) = snapshot.reference_z {
                    writeln!(out, "reference Z {:.4}", z)?;
                }
                writeln!(out, "{}", self.prompt())?;
            }
            Verb::Log(count) => {
                let entries = self.recent.entries();
                let skip = entries.len().saturating_sub(count);
                for entry in &entries[skip..] {
                    writeln!(out, "{}", entry)?;
                }
            }
            Verb::Help => writeln!(out, "{}", HELP)?,
            Verb::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

fn report_control<E: fmt::Display>(
    out: &mut impl Write,
    verb: &str,
    result: Result<bool, E>,
) -> io::Result<()> {
    match result {
        Ok(true) => writeln!(out, "{} sent", verb),
        Ok(false) => writeln!(out, "{} ignored", verb),
        Err(e) => writeln!(out, "{} failed: {}", verb, e),
    }
}
