//! CLI for resmon: machine utilization on your training loop's iteration axis.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "resmon")]
#[command(about = "resmon: sample this machine and report against a training iteration axis")]
#[command(version = resmon_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor in the foreground until Ctrl+C
    Run {
        /// JSON config file; flags below override its fields
        #[arg(long)]
        config: Option<String>,

        /// Samples per second
        #[arg(long)]
        sample_hz: Option<f64>,

        /// Seconds between reports
        #[arg(long)]
        report_sec: Option<f64>,

        /// Seconds before the first report (default: --report-sec)
        #[arg(long)]
        first_report_sec: Option<f64>,

        /// Seconds to wait for an iteration counter before using seconds-from-start
        #[arg(long)]
        wait_first_iteration_sec: Option<f64>,

        /// File the work process writes its current iteration into
        #[arg(long)]
        iteration_file: Option<String>,

        /// Trust --iteration-file as the iteration axis from the first report
        #[arg(long, requires = "iteration_file")]
        trust_iterations: bool,

        /// Write JSON-lines scalars here instead of stdout
        #[arg(long)]
        output: Option<String>,

        /// Log scalars at info level instead of writing JSON lines
        #[arg(long, conflicts_with = "output")]
        log_scalars: bool,

        /// Do not query GPUs
        #[arg(long)]
        no_gpu: bool,
    },

    /// Print one raw snapshot of this machine as JSON
    Snapshot {
        /// Include GPU readings from nvidia-smi
        #[arg(long)]
        gpu: bool,

        /// Filesystem to report free space for (default: $HOME)
        #[arg(long)]
        disk_path: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            sample_hz,
            report_sec,
            first_report_sec,
            wait_first_iteration_sec,
            iteration_file,
            trust_iterations,
            output,
            log_scalars,
            no_gpu,
        } => commands::run::run(commands::run::RunArgs {
            config,
            sample_hz,
            report_sec,
            first_report_sec,
            wait_first_iteration_sec,
            iteration_file,
            trust_iterations,
            output,
            log_scalars,
            no_gpu,
        }),
        Commands::Snapshot { gpu, disk_path } => {
            commands::snapshot::run(gpu, disk_path.as_deref())
        }
    }
}
