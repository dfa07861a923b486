//! Connect to the relay and sync until interrupted.

use anyhow::Result;
use boxsync_client::{
    ClientConfig, ClientSession, Connector, DisconnectReason, PreferenceStore, TcpConnector,
};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{load_client_config, FilePreferenceStore};
use crate::console::{ConsoleCommand, ConsoleSink, HELP};

/// Run the run command.
pub async fn run(data_dir: &Path, relay: Option<String>) -> Result<()> {
    let store = Arc::new(FilePreferenceStore::new(data_dir));
    if !store.exists() {
        anyhow::bail!("Not initialized. Run 'boxsync init' first.");
    }
    let prefs = store.load()?;
    let config = resolve_config(data_dir, relay)?;

    println!("Connecting to {} as {}...", config.relay_address, prefs.username);
    let connector = TcpConnector::new(config.relay_address.clone());
    let session = ClientSession::new(
        connector,
        config,
        prefs,
        store,
        Arc::new(ConsoleSink::new()),
    );
    if !session.connect().await {
        anyhow::bail!("Couldn't establish a connection with server!");
    }
    println!("Type 'help' for commands, Ctrl-C to quit.");

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(command) => execute(&session, command).await,
                    Err(usage) => println!("{}", usage),
                }
            }
        }
    }

    session.shutdown().await;
    println!("Bye.");
    Ok(())
}

/// Read stdin on its own thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Load client.toml and apply the command-line relay override.
fn resolve_config(data_dir: &Path, relay: Option<String>) -> Result<ClientConfig> {
    let mut config = load_client_config(data_dir)?;
    if let Some(relay) = relay {
        config.relay_address = relay;
    }
    Ok(config)
}

async fn execute<C: Connector>(session: &Arc<ClientSession<C>>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Share { file, user } => session.request_share(file, user),
        ConsoleCommand::Push(path) => match session.push_change(&path).await {
            Ok(0) => println!("Nothing to upload under {}", path.display()),
            Ok(n) => println!("Uploaded {} file(s)", n),
            Err(e) => println!("{}", e.fault_message()),
        },
        ConsoleCommand::Delete(path) => {
            if let Err(e) = session.delete_remote(&path).await {
                println!("{}", e.fault_message());
            }
        }
        ConsoleCommand::Users => match session.fetch_user_list().await {
            Ok(users) => println!("Users online: {}", users.join(", ")),
            Err(e) => println!("{}", e.fault_message()),
        },
        ConsoleCommand::Connect => {
            if session.state().is_connected() {
                println!("Already connected.");
            } else {
                session.connect().await;
            }
        }
        ConsoleCommand::Disconnect => session.disconnect(DisconnectReason::Requested).await,
        ConsoleCommand::Status => println!("Session: {:?}", session.state()),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit | ConsoleCommand::Empty => {}
    }
}
