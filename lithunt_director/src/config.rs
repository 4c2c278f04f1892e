//! Instance configuration: CLI-assembled settings plus the machine file.

use anyhow::Context;
use lithunt_core::plan::{BackendSpec, Compiler};
use litmus_wrapper::fuzzer::FuzzParams;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{canonicalize, read_to_string};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds and timeouts for one machine instance.
#[derive(Debug, Clone)]
pub struct QuantitySet {
    /// Worker count for corpus stages.
    pub nworkers: usize,
    /// Fuzz cycles per subject per pass.
    pub subject_cycles: usize,
    /// Post-fuzz corpus cap; zero means unlimited.
    pub corpus_size: usize,
    pub fuzz_timeout: Duration,
    pub lift_timeout: Duration,
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    /// Gap between SIGTERM and SIGKILL on subprocess expiry.
    pub grace: Duration,
}

pub const DEFAULT_SUBJECT_CYCLES: usize = 10;

impl Default for QuantitySet {
    fn default() -> Self {
        QuantitySet {
            nworkers: default_workers(),
            subject_cycles: DEFAULT_SUBJECT_CYCLES,
            corpus_size: 0,
            fuzz_timeout: Duration::from_secs(60),
            lift_timeout: Duration::from_secs(60),
            compile_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(30),
            grace: Duration::from_secs(2),
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(8)
}

/// The machine description file (TOML): probed overrides, the backend, and
/// the compiler set.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineFile {
    /// Core count override; probed from the host when absent.
    #[serde(default)]
    pub cores: Option<u32>,
    pub backend: BackendTable,
    #[serde(default)]
    pub compilers: BTreeMap<String, CompilerTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendTable {
    pub style: String,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerTable {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub arch: String,
}

impl MachineFile {
    pub fn load(path: &Path) -> anyhow::Result<MachineFile> {
        let raw = read_to_string(path)
            .with_context(|| format!("failed to read machine file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("bad machine file {}", path.display()))
    }

    pub fn backend_spec(&self) -> BackendSpec {
        BackendSpec {
            style: self.backend.style.clone(),
            cmd: self.backend.cmd.clone(),
            args: self.backend.args.clone(),
        }
    }

    pub fn compiler_set(&self) -> Vec<(String, Compiler)> {
        self.compilers
            .iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    Compiler {
                        cmd: c.cmd.clone(),
                        args: c.args.clone(),
                        arch: c.arch.clone(),
                    },
                )
            })
            .collect()
    }
}

/// Full instance configuration, assembled by the CLI front-end.
#[derive(Debug, Clone)]
pub struct Config {
    pub machine_id: String,
    /// Input litmus files seeding the corpus each pass.
    pub inputs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub machine_file: PathBuf,
    /// The external fuzzer binary.
    pub fuzzer_bin: String,
    pub fuzz_params: FuzzParams,
    /// Glob over compiler IDs; non-matching compilers are dropped at plan
    /// time.
    pub compiler_filter: Option<String>,
    /// Glob over subject names; matches are recorded as Filtered instead of
    /// being compiled or run.
    pub subject_filter: Option<String>,
    /// Archive Flagged subjects too, not only strictly-bad statuses.
    pub save_flagged: bool,
    /// Fixed seed; absent means seed from the clock.
    pub seed: Option<u64>,
    pub quantities: QuantitySet,
}

impl Config {
    pub fn check(&self) -> anyhow::Result<()> {
        if self.machine_id.is_empty() {
            anyhow::bail!("empty machine id");
        }
        if !self.machine_file.is_file() {
            anyhow::bail!("bad machine file: {}", self.machine_file.display());
        }
        if self.out_dir.exists() && !self.out_dir.is_dir() {
            anyhow::bail!("'{}' not a directory", self.out_dir.display());
        }
        if self.fuzzer_bin.is_empty() {
            anyhow::bail!("empty fuzzer binary name");
        }
        if self.quantities.subject_cycles == 0 {
            anyhow::bail!("non-positive subject cycle amount");
        }
        if let Some(pat) = &self.compiler_filter {
            glob::Pattern::new(pat).with_context(|| format!("bad compiler filter {:?}", pat))?;
        }
        if let Some(pat) = &self.subject_filter {
            glob::Pattern::new(pat).with_context(|| format!("bad subject filter {:?}", pat))?;
        }
        Ok(())
    }

    /// Canonicalises paths that exist; missing inputs surface per pass from
    /// the plan stage rather than killing the whole instance.
    pub fn fixup(&mut self) {
        for p in self.inputs.iter_mut() {
            if let Ok(canon) = canonicalize(&p) {
                *p = canon;
            }
        }
        if let Ok(canon) = canonicalize(&self.machine_file) {
            self.machine_file = canon;
        }
    }
}

/// Parses repeated `key=value` fuzzer parameter flags.
pub fn parse_fuzz_params(raw: &[String]) -> anyhow::Result<FuzzParams> {
    let mut params = FuzzParams::new();
    for kv in raw {
        let (k, v) = kv
            .split_once('=')
            .with_context(|| format!("bad fuzzer param {:?}, want key=value", kv))?;
        params.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(params)
}
