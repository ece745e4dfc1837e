use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use crossfill::{
    load_grid_config, load_word_list, render_grid, solve_with_options, ConstraintGraph,
    CrosswordResult, FillFailure, SolveOptions,
};
use log::{error, info, LevelFilter};

#[derive(Debug, Parser)]
#[command(author, version, about = "Fill a crossword grid with words from a word list", arg_required_else_help = true)]
struct Args {
    /// The grid structure. Each line is a row; `_` or `.` marks an open cell and any other
    /// character marks a block.
    structure: PathBuf,

    /// The word list, one word per line.
    words: PathBuf,

    /// Where to write the filled grid, in addition to printing it.
    output: Option<PathBuf>,

    /// Give up after the search has visited this many states.
    #[arg(long)]
    node_limit: Option<u64>,

    /// Log more about the fill (-v for progress, -vv for search outcomes, -vvv for every state).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn configure_logging(verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .format(move |buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .filter_level(level_filter)
        .target(env_logger::Target::Stderr)
        .init();
}

fn run(args: &Args) -> CrosswordResult<()> {
    let grid_config = load_grid_config(&args.structure)?;
    let word_list = load_word_list(&args.words)?;
    info!(
        "Loaded a {}x{} grid with {} slots and {} words",
        grid_config.width,
        grid_config.height,
        grid_config.slot_count(),
        word_list.len(),
    );

    let options = SolveOptions { node_limit: args.node_limit };

    match solve_with_options(&grid_config, &word_list, &options) {
        Ok(result) => {
            info!("{:?}", result.statistics);

            let display_grid = render_grid(&grid_config, &word_list, &result.assignment);
            println!("{}", display_grid);

            if let Some(output) = &args.output {
                fs::write(output, &display_grid)?;
                info!("Wrote grid to {}", output.display());
            }
        }
        Err(FillFailure::ExhaustedNodeLimit) => println!("No solution within the node limit."),
        Err(FillFailure::HardFailure) => println!("No solution."),
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    configure_logging(args.verbose);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
