#![forbid(unsafe_code)]

//! Offline replay driver for the hazard calibration core.
//!
//! Reads one JSON command per line and writes one JSON result per line:
//!
//! ```text
//! {"op":"lambda","value":2.4}               -> {"bias":20.0}
//! {"op":"ppv","value":0.1}                  -> {"bias":20.0}
//! {"op":"update","hazard":0.9,"outcome":1}  -> {"ok":true}
//! {"op":"band","hazard":0.5}                -> {"lower":0.45,"upper":0.725}
//! {"op":"summary"}                          -> {"regime":{...},"band":{...}}
//! ```
//!
//! # Running
//!
//! ```sh
//! cargo run -p gbe-replay -- [--config FILE] [--evidence] [INPUT]
//! ```
//!
//! Without `--config`, configuration comes from `GBE_*` environment
//! variables. `INPUT` defaults to stdin (`-` also means stdin). With
//! `--evidence`, band results carry their full evidence record. Logs go to
//! stderr, filtered by `GBE_LOG` (default `info`).

use std::fmt;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use gbe_hazard::{
    BandStats, BiasRegimeController, ConfigError, HazardConfig, OutcomeError, QuantileBand,
    RegimeSummary,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// One input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Lambda { value: f64 },
    Ppv { value: f64 },
    Update { hazard: f64, outcome: i64 },
    Band { hazard: f64 },
    Summary,
}

#[derive(Debug, Serialize)]
struct Summary {
    regime: RegimeSummary,
    band: BandStats,
}

#[derive(Debug)]
enum ReplayError {
    Usage(String),
    Io(io::Error),
    Config(ConfigError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage(msg) => write!(f, "usage error: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Usage(_) => None,
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

impl From<io::Error> for ReplayError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ConfigError> for ReplayError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Rejected input line.
#[derive(Debug, PartialEq)]
enum LineError {
    Parse(String),
    Outcome(OutcomeError),
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "bad command: {msg}"),
            Self::Outcome(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    evidence: bool,
    help: bool,
}

fn print_usage() {
    eprintln!(
        "Usage: gbe-replay [--config <file.json>] [--evidence] [INPUT]\n\
         \n\
         Reads JSONL commands from INPUT (default stdin) and writes one JSON result per line.\n\
         Without --config, settings come from GBE_* environment variables."
    );
}

fn parse_args<I>(args: I) -> Result<Args, ReplayError>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter
                    .next()
                    .ok_or_else(|| ReplayError::Usage("--config needs a path".into()))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--evidence" => parsed.evidence = true,
            "-h" | "--help" => parsed.help = true,
            "-" => parsed.input = None,
            flag if flag.starts_with("--") => {
                return Err(ReplayError::Usage(format!("unknown flag {flag}")));
            }
            path => {
                if parsed.input.is_some() {
                    return Err(ReplayError::Usage("more than one input file".into()));
                }
                parsed.input = Some(PathBuf::from(path));
            }
        }
    }
    Ok(parsed)
}

fn load_config(args: &Args) -> Result<HazardConfig, ReplayError> {
    let config = match &args.config {
        Some(path) => HazardConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => HazardConfig::from_env()?,
    };
    Ok(config)
}

/// Controller and calibrator driven by one input stream.
struct Replay {
    controller: BiasRegimeController,
    band: QuantileBand,
    evidence: bool,
}

impl Replay {
    fn new(config: &HazardConfig, evidence: bool) -> Result<Self, ConfigError> {
        let (controller, band) = config.build()?;
        Ok(Self {
            controller,
            band,
            evidence,
        })
    }

    fn apply(&mut self, command: Command) -> Result<serde_json::Value, LineError> {
        let value = match command {
            Command::Lambda { value } => json!({ "bias": self.controller.step_lambda(value) }),
            Command::Ppv { value } => json!({ "bias": self.controller.step_ppv(value) }),
            Command::Update { hazard, outcome } => {
                self.band
                    .update_label(hazard, outcome)
                    .map_err(LineError::Outcome)?;
                json!({ "ok": true })
            }
            Command::Band { hazard } => {
                let ev = self.band.band_evidence(hazard);
                if self.evidence {
                    serde_json::to_value(&ev).map_err(|e| LineError::Parse(e.to_string()))?
                } else {
                    json!({ "lower": ev.lower, "upper": ev.upper })
                }
            }
            Command::Summary => serde_json::to_value(Summary {
                regime: self.controller.summary(),
                band: self.band.stats(),
            })
            .map_err(|e| LineError::Parse(e.to_string()))?,
        };
        Ok(value)
    }

    fn apply_line(&mut self, line: &str) -> Result<serde_json::Value, LineError> {
        let command: Command =
            serde_json::from_str(line).map_err(|e| LineError::Parse(e.to_string()))?;
        self.apply(command)
    }

    /// Process every non-blank line; returns the number of rejected lines.
    fn run<R: BufRead, W: Write>(&mut self, reader: R, mut writer: W) -> io::Result<u64> {
        let mut rejected = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let out = match self.apply_line(trimmed) {
                Ok(value) => value,
                Err(e) => {
                    rejected += 1;
                    warn!(line = idx + 1, error = %e, "rejected input line");
                    json!({ "error": e.to_string(), "line": idx + 1 })
                }
            };
            writeln!(writer, "{out}")?;
        }
        writer.flush()?;
        Ok(rejected)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("GBE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn real_main() -> Result<u64, ReplayError> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.help {
        print_usage();
        return Ok(0);
    }
    let config = load_config(&args)?;
    let mut replay = Replay::new(&config, args.evidence)?;

    let stdout = io::stdout();
    let rejected = match &args.input {
        Some(path) => {
            info!(path = %path.display(), "replaying file");
            let file = fs::File::open(path)?;
            replay.run(BufReader::new(file), stdout.lock())?
        }
        None => replay.run(io::stdin().lock(), stdout.lock())?,
    };
    info!(
        bias = replay.controller.bias(),
        rejected,
        "replay finished"
    );
    Ok(rejected)
}

fn main() -> ExitCode {
    init_tracing();
    match real_main() {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("gbe-replay: {e}");
            if matches!(e, ReplayError::Usage(_)) {
                print_usage();
            }
            ExitCode::from(2)
        }
    }
}
