use clap::Parser;

use memhier::{config::Config, logger, simulator::Simulator, trace::Trace, Result};

#[derive(clap::Parser, Debug)]
#[command(about = "Cycle-driven simulator for a multi-level CPU memory hierarchy")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: String,

    /// Path to the trace file
    #[arg(short, long)]
    trace: String,

    /// Debug verbosity
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    debug: u8,

    /// Stop at the first operation marked with a breakpoint
    #[arg(long)]
    stop_on_breakpoint: bool,

    /// Print the final statistics as JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.debug);

    let config = Config::load(&args.config)?;
    let trace = Trace::load(&args.trace)?;
    let mut sim = Simulator::new(config, trace)?;

    sim.step_all(args.stop_on_breakpoint);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sim.statistics())?);
    } else {
        sim.print_statistics();
    }

    Ok(())
}
