use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use lithunt_director::config::{parse_fuzz_params, Config, QuantitySet};
use lithunt_director::{boot, instance};
use litmus_wrapper::run::RunError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(version, about = "Hunts concurrency bugs in C11 litmus tests")]
struct Settings {
    /// Litmus test files seeding the corpus.
    inputs: Vec<PathBuf>,
    /// ID of the machine this instance drives.
    #[arg(long, short = 'M', default_value = "localhost")]
    machine: String,
    /// Directory for scratch and saved output.
    #[arg(long, short = 'o', default_value = "out")]
    out_dir: PathBuf,
    /// Machine description file (backend and compiler set).
    #[arg(long, short = 'c', default_value = "machine.toml")]
    machine_config: PathBuf,
    /// The single-file fuzzer binary.
    #[arg(long, default_value = "c4f")]
    fuzzer: String,
    /// Fuzzer config parameter, as dotted-key=value; repeatable.
    #[arg(long = "fuzz-param")]
    fuzz_params: Vec<String>,
    /// Glob over compiler IDs; others are skipped at plan time.
    #[arg(long)]
    compiler_filter: Option<String>,
    /// Glob over subject names to mark Filtered instead of testing.
    #[arg(long)]
    subject_filter: Option<String>,
    /// Also archive Flagged subjects, not only hard failures.
    #[arg(long)]
    save_flagged: bool,
    /// Fixed RNG seed, for reproducing a pass.
    #[arg(long)]
    seed: Option<u64>,
    /// Parallel workers per corpus stage.
    #[arg(long, short = 'j')]
    workers: Option<usize>,
    /// Fuzz cycles per subject per pass.
    #[arg(long, default_value_t = 10)]
    subject_cycles: usize,
    /// Post-fuzz corpus cap; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    corpus_size: usize,
    /// Per-job fuzz timeout, in seconds.
    #[arg(long, default_value_t = 60)]
    fuzz_timeout: u64,
    /// Per-job lift timeout, in seconds.
    #[arg(long, default_value_t = 60)]
    lift_timeout: u64,
    /// Per-job compile timeout, in seconds.
    #[arg(long, default_value_t = 60)]
    compile_timeout: u64,
    /// Per-job run timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    run_timeout: u64,
    /// Grace period between SIGTERM and SIGKILL, in seconds.
    #[arg(long, default_value_t = 2)]
    grace: u64,
}

fn main() {
    let settings = Settings::parse();

    let log_env = Env::new()
        .filter_or("LITHUNT_LOG", "info")
        .default_write_style_or("auto");
    env_logger::Builder::from_env(log_env)
        .format_timestamp(Some(TimestampPrecision::Seconds))
        .init();

    match run(settings) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("lithunt: {:#}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let defaults = QuantitySet::default();
    let config = Config {
        machine_id: settings.machine,
        inputs: settings.inputs,
        out_dir: settings.out_dir,
        machine_file: settings.machine_config,
        fuzzer_bin: settings.fuzzer,
        fuzz_params: parse_fuzz_params(&settings.fuzz_params)?,
        compiler_filter: settings.compiler_filter,
        subject_filter: settings.subject_filter,
        save_flagged: settings.save_flagged,
        seed: settings.seed,
        quantities: QuantitySet {
            nworkers: settings.workers.unwrap_or(defaults.nworkers),
            subject_cycles: settings.subject_cycles,
            corpus_size: settings.corpus_size,
            fuzz_timeout: Duration::from_secs(settings.fuzz_timeout),
            lift_timeout: Duration::from_secs(settings.lift_timeout),
            compile_timeout: Duration::from_secs(settings.compile_timeout),
            run_timeout: Duration::from_secs(settings.run_timeout),
            grace: Duration::from_secs(settings.grace),
        },
    };
    boot(config)
}

/// Clean shutdown exits 0; an error that wraps a child process exit code
/// propagates it; anything else exits 1.
fn exit_code(e: &anyhow::Error) -> i32 {
    if instance::is_cancelled(e) {
        return 0;
    }
    e.chain()
        .find_map(|cause| cause.downcast_ref::<RunError>().and_then(RunError::exit_code))
        .unwrap_or(1)
}
