//! Driver for the external single-file litmus fuzzer.

use crate::run::{RunError, RunInfo, Runner};
use lithunt_core::cancel::CancelToken;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Dotted-key parameter map forwarded into the fuzzer's config dialect.
pub type FuzzParams = BTreeMap<String, String>;

/// One mutation request: fuzz `input` with `seed`, leaving the mutant at
/// `output` and, optionally, the mutation trace at `trace`.
#[derive(Debug)]
pub struct FuzzJob<'a> {
    pub seed: u64,
    pub input: &'a Path,
    pub output: &'a Path,
    pub trace: Option<&'a Path>,
    pub config: &'a Path,
}

/// Wraps the fuzzer binary.
pub struct Fuzzer {
    run_info: RunInfo,
    runner: Box<dyn Runner>,
}

impl Fuzzer {
    pub fn new(run_info: RunInfo, runner: Box<dyn Runner>) -> Self {
        Fuzzer { run_info, runner }
    }

    /// Runs one fuzz cycle. Any non-zero exit is an error: a fuzzer that
    /// cannot mutate a test fails the job, not the subject.
    pub fn fuzz_one(&self, cancel: &CancelToken, job: &FuzzJob) -> Result<(), RunError> {
        let mut ri = self
            .run_info
            .clone()
            .arg("run")
            .arg("-config")
            .arg(job.config.display().to_string())
            .arg("-seed")
            .arg(job.seed.to_string())
            .arg("-o")
            .arg(job.output.display().to_string());
        if let Some(trace) = job.trace {
            ri = ri.arg("-trace-output").arg(trace.display().to_string());
        }
        ri = ri.arg(job.input.display().to_string());
        self.runner.run_ok(cancel, &ri).map(|_| ())
    }
}

/// Writes the fuzzer's plain-text config dialect.
///
/// Dotted parameter keys are tagged by prefix: `int.x.y` becomes a param
/// set, `bool.x.y` a flag set (plain or `ratio A:B`), `action.var.x` an
/// action weight. Unknown prefixes are preserved as comments rather than
/// dropped, so nothing silently vanishes from the config.
pub fn write_fuzz_conf<W: Write>(
    w: &mut W,
    params: &FuzzParams,
    machine_cores: Option<u32>,
) -> io::Result<()> {
    writeln!(w, "# generated by lithunt")?;
    writeln!(w, "fuzz {{")?;
    if let Some(cores) = machine_cores {
        writeln!(w, "## MACHINE SPECIFIC OVERRIDES ##")?;
        writeln!(w, "  # Set to number of cores in machine to prevent thrashing.")?;
        writeln!(w, "  set param cap.threads to {}", cores)?;
    }
    for (key, value) in params {
        write_param(w, key, value)?;
    }
    writeln!(w, "}}")
}

fn write_param<W: Write>(w: &mut W, key: &str, value: &str) -> io::Result<()> {
    if let Some(rest) = key.strip_prefix("int.") {
        writeln!(w, "  set param {} to {}", rest, value)
    } else if let Some(rest) = key.strip_prefix("bool.") {
        if value.contains(':') {
            writeln!(w, "  set flag {} to ratio {}", rest, value)
        } else {
            writeln!(w, "  set flag {} to {}", rest, value)
        }
    } else if let Some(rest) = key.strip_prefix("action.") {
        writeln!(w, "  action {} weight {}", rest, value)
    } else {
        writeln!(w, "  # unsupported param: {} {}", key, value)
    }
}

/// Materialises the config under `dir` for the coming fuzz batch.
pub fn make_fuzz_conf_file(
    dir: &Path,
    params: &FuzzParams,
    machine_cores: Option<u32>,
) -> io::Result<PathBuf> {
    let path = dir.join("fuzz.conf");
    let f = File::create(&path)?;
    let mut w = BufWriter::new(f);
    write_fuzz_conf(&mut w, params, machine_cores)?;
    w.flush()?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ExecOutput;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CaptureRunner {
        calls: std::sync::Arc<Mutex<Vec<RunInfo>>>,
    }

    impl Runner for CaptureRunner {
        fn run(&self, _cancel: &CancelToken, ri: &RunInfo) -> Result<ExecOutput, RunError> {
            self.calls.lock().unwrap().push(ri.clone());
            Ok(ExecOutput {
                code: Some(0),
                timed_out: false,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration: Duration::ZERO,
            })
        }
    }

    #[test]
    fn fuzz_one_argv_shape() {
        let calls = std::sync::Arc::new(Mutex::new(Vec::new()));
        let fz = Fuzzer::new(
            RunInfo::new("c4f"),
            Box::new(CaptureRunner {
                calls: calls.clone(),
            }),
        );
        fz.fuzz_one(
            &CancelToken::new(),
            &FuzzJob {
                seed: 42,
                input: Path::new("in/SB.litmus"),
                output: Path::new("out/SB_0.litmus"),
                trace: Some(Path::new("out/SB_0.trace")),
                config: Path::new("out/fuzz.conf"),
            },
        )
        .unwrap();

        let got = calls.lock().unwrap();
        assert_eq!(got[0].cmd, "c4f");
        assert_eq!(
            got[0].args,
            vec![
                "run",
                "-config",
                "out/fuzz.conf",
                "-seed",
                "42",
                "-o",
                "out/SB_0.litmus",
                "-trace-output",
                "out/SB_0.trace",
                "in/SB.litmus",
            ]
        );
    }

    #[test]
    fn conf_empty() {
        let mut buf = Vec::new();
        write_fuzz_conf(&mut buf, &FuzzParams::new(), None).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "# generated by lithunt\nfuzz {\n}\n"
        );
    }

    #[test]
    fn conf_machine_override() {
        let mut buf = Vec::new();
        write_fuzz_conf(&mut buf, &FuzzParams::new(), Some(4)).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("## MACHINE SPECIFIC OVERRIDES ##"));
        assert!(s.contains("  set param cap.threads to 4\n"));
    }

    #[test]
    fn conf_param_dialect() {
        let mut params = FuzzParams::new();
        params.insert("int.cap.actions".to_string(), "10".to_string());
        params.insert("bool.mem.unsafe-weaken-orders".to_string(), "true".to_string());
        params.insert("bool.action.pick-extra".to_string(), "1:3".to_string());
        params.insert("action.var.make".to_string(), "2".to_string());
        params.insert("wat.unknown".to_string(), "5".to_string());

        let mut buf = Vec::new();
        write_fuzz_conf(&mut buf, &params, None).unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.contains("  set param cap.actions to 10\n"));
        assert!(s.contains("  set flag mem.unsafe-weaken-orders to true\n"));
        assert!(s.contains("  set flag action.pick-extra to ratio 1:3\n"));
        assert!(s.contains("  action var.make weight 2\n"));
        assert!(s.contains("  # unsupported param: wat.unknown 5\n"));
    }

    #[test]
    fn conf_file_matches_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut params = FuzzParams::new();
        params.insert("int.cap.threads".to_string(), "2".to_string());

        let mut want = Vec::new();
        write_fuzz_conf(&mut want, &params, Some(8)).unwrap();

        let path = make_fuzz_conf_file(dir.path(), &params, Some(8)).unwrap();
        let got = std::fs::read(&path).unwrap();
        assert_eq!(got, want);
    }
}
