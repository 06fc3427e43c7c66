use clap::Parser;

use compliancectl_lib::cli::{run_cli, Cli};
use compliancectl_lib::logging::init_logging;

fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("CLI Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("⚠️  Logging disabled: {}", e);
    }

    if let Err(e) = run_cli(cli, config) {
        eprintln!("CLI Error: {:#}", e);
        std::process::exit(1);
    }
}
