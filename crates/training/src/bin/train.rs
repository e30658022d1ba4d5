use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    let args = TrainArgs::parse();
    run_train(args)?;
    Ok(())
}
