use anyhow::Context;
use cncstream::console::Console;
use cncstream::{init_logging, start, Config, MachineState, BUILD_DATE, VERSION};
use std::io;
use std::path::PathBuf;
use std::thread;
use tokio::sync::broadcast::error::RecvError;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load_or_default(config_path.as_deref()).context("loading settings")?;
    config.validate().context("validating settings")?;

    init_logging(&config.logging.level)?;
    tracing::info!("cncstream {} (built {})", VERSION, BUILD_DATE);

    let session = start(config)?;

    let mut events = session.supervisor.machine().subscribe();
    thread::Builder::new()
        .name("status".to_string())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(event) => println!("{}", event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Status display skipped {} events", missed)
                }
                Err(RecvError::Closed) => break,
            }
        })
        .context("starting status thread")?;

    Console::new(&session.supervisor, &session.recent).run(io::stdin().lock(), io::stdout())?;

    // Leave the router halted if the operator quits mid-job
    if session.supervisor.state() != MachineState::Ready {
        session.supervisor.stop()?;
    }
    session.supervisor.shutdown();
    Ok(())
}
