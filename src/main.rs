mod api;
mod cli;
mod engine;
mod guidance;
mod limiter;
mod metrics;
mod model;
mod storage;
mod text_summary;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    let is_scripted = args.silent || args.json || args.text;

    match cli::run(args).await {
        Ok(()) => {
            // --json/--text/--silent are meant for scripts and cron: exit 0
            // explicitly rather than waiting on any lingering background task.
            if is_scripted {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            if is_silent {
                // Silent mode promises a single error line on stdout.
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
