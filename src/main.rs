use clap::Parser;
use imap_migrator::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match CliHandler::new(cli) {
        Ok(handler) => match handler.handle().await {
            Ok(code) => code,
            Err(error) => {
                eprintln!("Error: {:#}", error);
                2
            }
        },
        Err(error) => {
            eprintln!("Error: {:#}", error);
            2
        }
    };

    std::process::exit(code);
}
