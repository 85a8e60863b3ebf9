mod cli;
mod commands;
mod config;
mod devices;
mod error;
mod logging;

use clap::Parser;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "fimpkit", &mut std::io::stdout());
            Ok(())
        }

        Command::Run(args) => {
            let cfg = config::resolve(&cli.global)?;
            // Dropping the guard flushes the file appender.
            let _guard = logging::init(&cfg.log)?;
            tracing::debug!(dry_run = args.dry_run, "dispatching run");
            commands::run::handle(&cfg, &args, &config::config_path(&cli.global)).await
        }
    }
}
