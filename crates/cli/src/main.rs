use std::env;
use std::process;

use clap::{Parser, Subcommand};

mod list;
mod pack;

/// Interface with Nintendo DS ROM images.
#[derive(Parser)]
#[command(name = "nitrorom", version, about)]
struct Cli {
    /// Emit additional program logs during execution to standard error.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Pack(pack::Args),
    List(list::Args),
}

fn main() {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    let result = match cli.command {
        Command::Pack(args) => pack::run(args),
        Command::List(args) => list::run(args),
    };

    if let Err(err) = result {
        eprintln!("nitrorom: {}", err);
        process::exit(1);
    }
}

fn init_logger(verbose: bool) {
    let mut builder = pretty_env_logger::formatted_builder();
    if let Ok(filters) = env::var("NITROROM_LOG") {
        builder.parse_filters(&filters);
    } else if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }
    builder.init();
}
