//! The dedicated server main() implementation.

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{error, info};

use crate::config::{GameConfig, ServerConfig};
use crate::prelude::*;
use crate::GameServer;

#[derive(Parser)]
#[command(name = "vox_dedi_server", about = "voxedge dedicated server")]
struct CliOptions {}

/// Starts the dedicated server CLI.
pub fn run_dedicated_server() -> Result<()> {
    let _cli = CliOptions::parse();

    let game_config = GameConfig { server: ServerConfig { server_title: String::from("Dedicated server"), ..Default::default() }, ..Default::default() };
    let server = GameServer::new(game_config).context("could not start dedicated server")?;

    if let Ok(mut rl) = DefaultEditor::new() {
        loop {
            match rl.readline("voxedge> ") {
                Ok(line) => {
                    let cmd = line.split_whitespace().next().unwrap_or("");
                    match cmd {
                        "" => continue,
                        "quit" | "stop" | "exit" => {
                            info!("shutting down the server...");
                            server.shutdown();
                            break;
                        }
                        _ => error!("unknown command {cmd}"),
                    }
                }
                Err(ReadlineError::Eof) => {
                    info!("stdin EOF reached");
                    break;
                }
                Err(ReadlineError::Interrupted) => {
                    info!("interrupt signal received");
                    server.shutdown();
                    break;
                }
                Err(ReadlineError::WindowResized) => continue,
                Err(e) => {
                    error!("error reading commandline prompt: {e}");
                    break;
                }
            }
        }
    }

    Ok(())
}
