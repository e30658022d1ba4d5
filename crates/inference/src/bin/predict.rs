use clap::Parser;
use inference::{run_predict, PredictArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing("info");
    let report = run_predict(PredictArgs::parse())?;
    println!("image num: {}", report.images);
    if let Some(avg) = report.average_ms() {
        println!("average infer time (ms): {avg:.3}");
    }
    Ok(())
}
