mod cli;

use clap::Parser;
use cli::Cli;

fn main() {
    let cli = Cli::parse();

    match cli::run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error [{:?}]: {}", e.code(), e);
            std::process::exit(1);
        }
    }
}
