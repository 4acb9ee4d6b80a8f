pub mod app;
pub mod replayer;

use clap::Parser;
use color_eyre::Result;
use env_logger::Env;
use app::cli::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    let summary = app::run(&config)?;
    println!("{}", summary);

    Ok(())
}
