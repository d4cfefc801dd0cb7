//! Bundle launcher CLI

use bundle_launcher::logging::init_logger;
use bundle_launcher::{
    ArchiveSource, ExtractorHandle, LauncherBuilder, LogEvent, OutputStream, RunRequest,
};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bundle-launcher")]
#[command(about = "Unpack an application bundle, write its config and run it", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a local archive and follow its output until it exits
    Run {
        /// Archive to launch
        #[arg(short, long)]
        archive: PathBuf,

        /// Bundle option, repeatable (e.g. --set SESSION_ID=abc)
        #[arg(short, long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        set: Vec<(String, String)>,

        /// Archive password
        #[arg(short, long, env = "LAUNCHER_ARCHIVE_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Directory holding the workspace and the settings file
        #[arg(short, long, env = "LAUNCHER_ROOT", default_value = "/tmp/bundle-launcher")]
        root: PathBuf,

        /// Program that runs the entry file
        #[arg(long, env = "LAUNCHER_PROGRAM", default_value = "node")]
        program: String,
    },

    /// Show which extractor would be used
    Probe,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Run {
            archive,
            set,
            password,
            root,
            program,
        } => match run_bundle(archive, set, password, root, program).await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        Commands::Probe => probe_extractor(),
    }
}

async fn run_bundle(
    archive: PathBuf,
    set: Vec<(String, String)>,
    password: Option<String>,
    root: PathBuf,
    program: String,
) -> Result<i32, Box<dyn std::error::Error>> {
    let launcher = LauncherBuilder::new()
        .data_dir(&root)
        .program(&program, Vec::<String>::new())
        .archive_password(password)
        .build()?;

    let bytes = tokio::fs::read(&archive).await?;
    let mut logs = launcher.subscribe();

    let report = launcher
        .launch(RunRequest::from_pairs(set), ArchiveSource::upload(bytes))
        .await?;
    println!("{}", report.message());

    loop {
        tokio::select! {
            event = logs.recv() => match event {
                Some(LogEvent::Chunk { stream: OutputStream::Stderr, text }) => {
                    eprint!("{}", text);
                }
                Some(LogEvent::Chunk { text, .. }) => {
                    print!("{}", text);
                    std::io::stdout().flush()?;
                }
                Some(exit @ LogEvent::Exit { code }) => {
                    print!("{}", exit.render());
                    return Ok(code.unwrap_or(1));
                }
                None => return Err("log stream closed before the bundle exited".into()),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Interrupted, stopping bundle");
                launcher.stop().await;
                return Ok(130);
            }
        }
    }
}

fn probe_extractor() {
    let handle = ExtractorHandle::discover();
    println!("Extractor: {}", handle.program().display());
    println!("Found via: {}", handle.origin());
}
