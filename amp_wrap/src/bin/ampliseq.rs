//! ampliseq
#![deny(missing_docs)]

use amp_wrap::args::CommonArgs;
use amp_wrap::commands::{run_filter, run_learn_errors, run_pipeline};
use amp_wrap::utils::print_error_chain;
use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

const CMD: &str = "ampliseq";

/// Infer exact amplicon sequence variants from paired-end reads
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct Ampliseq {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Run the whole pipeline and write the sequence table, catalog, read
    /// tracking table and error models.
    #[clap(name = "run")]
    Run(CommonArgs),

    /// Trim primers and filter reads, writing the passing pairs as FASTQ.
    #[clap(name = "filter")]
    Filter(CommonArgs),

    /// Learn the forward and reverse error models and write them as JSON.
    #[clap(name = "learn-errors")]
    LearnErrors(CommonArgs),
}

impl SubCommand {
    fn common(&self) -> &CommonArgs {
        match self {
            SubCommand::Run(args) | SubCommand::Filter(args) | SubCommand::LearnErrors(args) => args,
        }
    }
}

fn inner_main() -> Result<ExitCode> {
    let opts = Ampliseq::parse();
    opts.subcmd.common().init_logging();
    match &opts.subcmd {
        SubCommand::Run(args) => run_pipeline(args),
        SubCommand::Filter(args) => run_filter(args),
        SubCommand::LearnErrors(args) => run_learn_errors(args),
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
