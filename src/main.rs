use clap::Parser;
use sales_etl::{
    config::{CONFIG_ENV, DEFAULT_CONFIG_PATH},
    runner, PipelineError,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Validate raw sales CSV data against a country schema and write it out as
/// Parquet or Arrow IPC.
#[derive(Parser, Debug)]
#[command(name = "sales-etl", version, about)]
struct Args {
    /// Configuration document (YAML).
    #[arg(short, long, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() -> ExitCode {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();

    // ─── 2) run ──────────────────────────────────────────────────────
    let args = Args::parse();
    info!(config = %args.config.display(), "startup");

    match runner::execute(&args.config) {
        Ok(report) => {
            let s = report.summary;
            info!(
                schema = %report.schema.name(),
                output = %report.output.path.display(),
                rows = report.output.rows,
                bytes = report.output.bytes,
                rejected = s.rejected,
                filtered = s.filtered,
                "run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            debug!(stage = %e.stage, processed = e.processed, "run failed");
            eprintln!("{}", diagnostic(&e));
            ExitCode::FAILURE
        }
    }
}

/// The single stderr line reported for a failed run.
fn diagnostic(err: &PipelineError) -> String {
    let message = err.to_string();
    let flat: Vec<&str> = message
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    format!("sales-etl: {}", flat.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sales_etl::{EtlError, Stage};

    #[test]
    fn test_diagnostic_is_one_line() {
        let err = PipelineError {
            stage: Stage::Config,
            processed: 0,
            source: EtlError::ConfigParse {
                path: "config.yml".into(),
                message: "did not find expected node content\n  at line 2 column 1".into(),
            },
        };
        let line = diagnostic(&err);
        assert!(!line.contains('\n'), "{line}");
        assert_eq!(
            line,
            "sales-etl: config stage failed after 0 records: cannot parse configuration \
             config.yml: did not find expected node content at line 2 column 1"
        );
    }
}
