use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use double_sort::assets::MockProvider;
use double_sort::calendar::Period;
use double_sort::error::{SimError, SimResult};
use double_sort::report;
use double_sort::simulation::{Simulation, SimulationConfig};

/// Simulates a long-only size × style-factor bucket portfolio month by month
#[derive(Parser, Debug)]
#[command(name = "double_sort")]
#[command(version)]
struct Args {
    /// First period (YYYYMM)
    from_dateym: Period,

    /// Last period, inclusive (YYYYMM)
    to_dateym: Period,

    /// Style factor sorted within each size half
    factor_name: String,

    /// Months between rebalances
    month_of_rebalance_frequency: u32,

    /// Period the rebalance schedule counts from (defaults to FROM_DATEYM)
    #[arg(long)]
    anchor: Option<Period>,

    /// Instruments generated by the mock provider
    #[arg(long, env = "DOUBLE_SORT_UNIVERSE_SIZE", default_value_t = 4000)]
    universe_size: usize,

    /// Seed for the mock provider
    #[arg(long, env = "DOUBLE_SORT_SEED", default_value_t = 0)]
    seed: u64,

    /// Print the final carry-in holdings
    #[arg(long)]
    holdings: bool,
}

async fn run(args: Args) -> SimResult<()> {
    let config = SimulationConfig::builder()
        .start(args.from_dateym)
        .end(args.to_dateym)
        .anchor(args.anchor)
        .factor_name(&args.factor_name)
        .frequency_months(args.month_of_rebalance_frequency)
        .build()?;

    let provider = MockProvider::new(args.universe_size, args.seed);
    let simulation = Simulation::new(config, provider);

    let start_time = std::time::Instant::now();
    let summary = simulation
        .run_with(|r| report::print_period(r).map_err(|e| SimError::Report(e.to_string())))
        .await?;
    tracing::info!(elapsed = ?start_time.elapsed(), periods = summary.reports.len(), "simulation finished");

    let cumulative = report::summary_to_dataframe(&summary).map_err(|e| SimError::Report(e.to_string()))?;
    println!("cumulative");
    println!("{}", cumulative);

    if args.holdings {
        if let Some(state) = &summary.final_state {
            let holdings =
                report::holdings_to_dataframe(state).map_err(|e| SimError::Report(e.to_string()))?;
            println!("{}", holdings);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
