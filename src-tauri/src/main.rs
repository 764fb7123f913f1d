// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(
    all(not(debug_assertions), not(feature = "headless")),
    windows_subsystem = "windows"
)]

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pagelens")]
#[command(about = "Local OCR for images and PDFs", version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// OCR files from the command line
    Process(pagelens_lib::cli::ProcessArgs),
    /// Run the web server (no GUI)
    Serve {
        /// Port to listen on (default from settings, 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Process(process)) => std::process::exit(pagelens_lib::cli::process(process)),
        Some(Command::Serve { port }) => std::process::exit(pagelens_lib::headless::run(port)),
        None => pagelens_lib::run(),
    }
}
