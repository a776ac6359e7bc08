// recobol binary entry point

use clap::Parser;
use recobol::{cli, output};

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    if !cli.source.exists() {
        output::exit_file_not_found(&cli.source.display().to_string());
    }

    if let Err(err) = cli::run(&cli) {
        output::error(&format!("{:#}", err));
        std::process::exit(output::EXIT_ERROR);
    }
}
