use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "strata workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the allocator benchmark suite and write a markdown report
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,

        /// Criterion baseline to save results under
        #[arg(long, default_value = "current")]
        baseline: String,

        /// Build the library with diagnostic events enabled
        #[arg(long, default_value_t = false)]
        tracing: bool,

        /// Where to write the report
        #[arg(long, default_value = "benchmark_results/report.md")]
        output: PathBuf,
    },
}

#[derive(Deserialize)]
struct Estimates {
    mean: Estimate,
}

#[derive(Deserialize)]
struct Estimate {
    point_estimate: f64,
}

#[derive(Deserialize)]
struct BenchmarkInfo {
    group_id: String,
    function_id: Option<String>,
    value_str: Option<String>,
    throughput: Option<Throughput>,
}

#[derive(Deserialize)]
enum Throughput {
    Elements(u64),
    Bytes(u64),
    BytesDecimal(u64),
}

impl Throughput {
    fn per_iteration(&self) -> f64 {
        match *self {
            Throughput::Elements(n) | Throughput::Bytes(n) | Throughput::BytesDecimal(n) => n as f64,
        }
    }
}

/// One measured benchmark under one baseline.
struct Sample {
    group: String,
    name: String,
    baseline: String,
    ops_per_sec: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench {
            quick,
            report_only,
            baseline,
            tracing,
            output,
        } => {
            if !report_only {
                run_benchmarks(quick, &baseline, tracing)?;
            }
            generate_report(Path::new("target/criterion"), &output)?;
        }
    }

    Ok(())
}

fn run_benchmarks(quick: bool, baseline: &str, tracing: bool) -> Result<()> {
    println!("Compiling benchmarks...");
    let mut build = Command::new("cargo");
    build.args(["build", "--bench", "suite", "--release"]);
    if tracing {
        build.args(["--features", "tracing"]);
    }
    if !build.status()?.success() {
        bail!("failed to compile benchmarks");
    }

    println!("\n>>> Benchmarking (baseline: {baseline})");
    let start = Instant::now();

    let mut cmd = Command::new("cargo");
    cmd.env("CARGO_INCREMENTAL", "0");
    cmd.args(["bench", "--bench", "suite"]);
    if tracing {
        cmd.args(["--features", "tracing"]);
    }

    // Args for the test runner (Criterion) go after --
    cmd.arg("--").arg("--save-baseline").arg(baseline);
    if quick {
        cmd.args(["--measurement-time", "0.1", "--noplot", "--sample-size", "10"]);
    }

    let status = cmd.status().context("failed to run the benchmark suite")?;
    if !status.success() {
        bail!("benchmark suite failed");
    }
    println!("Finished in {:.2?}", start.elapsed());
    Ok(())
}

fn generate_report(criterion_dir: &Path, output: &Path) -> Result<()> {
    println!("\n>>> Generating Report...");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    let mut samples = Vec::new();
    collect_samples(criterion_dir, &mut samples)?;
    if samples.is_empty() {
        eprintln!("No estimates found under {}", criterion_dir.display());
        return Ok(());
    }

    let report = render_report(&samples)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, report).with_context(|| format!("failed to write {}", output.display()))?;
    println!("Report written to {}", output.display());
    Ok(())
}

fn render_report(samples: &[Sample]) -> Result<String> {
    let baselines: BTreeSet<&str> = samples.iter().map(|s| s.baseline.as_str()).collect();
    let mut groups: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, f64>>> = BTreeMap::new();
    for s in samples {
        groups
            .entry(s.group.as_str())
            .or_default()
            .entry(s.name.as_str())
            .or_default()
            .insert(s.baseline.as_str(), s.ops_per_sec);
    }

    let mut out = String::new();
    writeln!(out, "# strata Benchmark Report")?;
    for (group, rows) in &groups {
        writeln!(out, "\n## {group}\n")?;

        write!(out, "| Benchmark |")?;
        for baseline in &baselines {
            write!(out, " {baseline} (ops/s) |")?;
        }
        writeln!(out)?;
        write!(out, "|---|")?;
        for _ in &baselines {
            write!(out, "---|")?;
        }
        writeln!(out)?;

        for (name, by_baseline) in rows {
            write!(out, "| {name} |")?;
            for baseline in &baselines {
                match by_baseline.get(baseline) {
                    Some(ops) => write!(out, " {} |", format_ops(*ops))?,
                    None => write!(out, " N/A |")?,
                }
            }
            writeln!(out)?;
        }
    }
    Ok(out)
}

fn format_ops(ops: f64) -> String {
    if ops > 1_000_000.0 {
        format!("{:.2}M", ops / 1_000_000.0)
    } else if ops > 1_000.0 {
        format!("{:.2}K", ops / 1_000.0)
    } else {
        format!("{ops:.0}")
    }
}

/// Walks criterion's output: `<bench path>/<baseline>/{benchmark,estimates}.json`.
fn collect_samples(dir: &Path, samples: &mut Vec<Sample>) -> Result<()> {
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let estimates = path.join("estimates.json");
        let info = path.join("benchmark.json");
        if estimates.is_file() && info.is_file() {
            let baseline = entry.file_name().to_string_lossy().into_owned();
            // `new` and `change` are criterion's scratch directories.
            if baseline != "new" && baseline != "change" {
                if let Some(sample) = read_sample(&info, &estimates, baseline)? {
                    samples.push(sample);
                }
            }
        } else if entry.file_name() != "report" {
            collect_samples(&path, samples)?;
        }
    }
    Ok(())
}

fn read_sample(info: &Path, estimates: &Path, baseline: String) -> Result<Option<Sample>> {
    let info: BenchmarkInfo = serde_json::from_str(&fs::read_to_string(info)?)
        .with_context(|| format!("malformed {}", info.display()))?;
    let estimates: Estimates = serde_json::from_str(&fs::read_to_string(estimates)?)
        .with_context(|| format!("malformed {}", estimates.display()))?;

    let time_ns = estimates.mean.point_estimate;
    if time_ns <= 0.0 {
        return Ok(None);
    }
    let per_iter = info.throughput.as_ref().map_or(1.0, Throughput::per_iteration);

    let name = match (info.function_id, info.value_str) {
        (Some(f), Some(v)) => format!("{f}/{v}"),
        (Some(f), None) => f,
        (None, Some(v)) => v,
        (None, None) => info.group_id.clone(),
    };
    Ok(Some(Sample {
        group: info.group_id,
        name,
        baseline,
        ops_per_sec: per_iter * 1e9 / time_ns,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_report_fills_missing_baselines() {
        let samples = vec![
            Sample {
                group: "larson".into(),
                name: "larson_pool".into(),
                baseline: "main".into(),
                ops_per_sec: 2_500_000.0,
            },
            Sample {
                group: "larson".into(),
                name: "larson_pool".into(),
                baseline: "current".into(),
                ops_per_sec: 3_000.0,
            },
            Sample {
                group: "larson".into(),
                name: "larson_scope".into(),
                baseline: "current".into(),
                ops_per_sec: 12.0,
            },
        ];
        let report = render_report(&samples).unwrap();
        assert!(report.contains("| Benchmark | current (ops/s) | main (ops/s) |"));
        assert!(report.contains("| larson_pool | 3.00K | 2.50M |"));
        assert!(report.contains("| larson_scope | 12 | N/A |"));
    }

    #[test]
    fn test_throughput_parses_criterion_shape() {
        let info: BenchmarkInfo = serde_json::from_str(
            r#"{"group_id":"threads","function_id":"arena_per_thread_2_threads","value_str":null,
                "throughput":{"Elements":40000},"full_id":"x","directory_name":"y","title":"z"}"#,
        )
        .unwrap();
        assert_eq!(info.throughput.map(|t| t.per_iteration()), Some(40000.0));
    }
}
