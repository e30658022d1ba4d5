use clap::Parser;
use training::util::{run_view, ViewArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    run_view(ViewArgs::parse())?;
    Ok(())
}
