//! # polygraph-cli
//!
//! Developer CLI for digraph policies: compile-check a policy file, walk it
//! locally with a JSON input, or fire sustained load at a running server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use polygraph_core::eval::CelEvaluator;
use polygraph_core::{Compiler, Engine, VarMap};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "polygraph")]
#[command(about = "polygraph CLI - check, run and load-test digraph policies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a policy file and report problems
    Check {
        /// Path to the policy file
        file: PathBuf,
    },

    /// Compile a policy file and walk it locally
    Run {
        /// Path to the policy file
        file: PathBuf,

        /// Input variables as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Also print the execution trace
        #[arg(long)]
        trace: bool,
    },

    /// Fire concurrent inferences at a running server
    Loadtest {
        /// Infer endpoint URL
        #[arg(long, default_value = "http://localhost:8080/infer")]
        url: String,

        /// Target requests per second
        #[arg(long, default_value_t = 50)]
        rps: u32,

        /// Test duration in seconds
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,

        /// Number of concurrent workers
        #[arg(long, default_value_t = 50)]
        workers: usize,

        /// Per-request HTTP timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Run { file, input, trace } => run(&file, input.as_deref(), trace),
        Commands::Loadtest {
            url,
            rps,
            duration_secs,
            workers,
            timeout_secs,
        } => loadtest(url, rps, duration_secs, workers, timeout_secs).await,
    }
}

fn check(file: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)?;
    match Compiler::new().compile(&text) {
        Ok(policy) => {
            let edges: usize = policy.nodes.values().map(|n| n.outgoing.len()).sum();
            println!("ok: {} nodes, {} edges", policy.nodes.len(), edges);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}: {err}", file.display());
            std::process::exit(1);
        }
    }
}

fn run(file: &PathBuf, input: Option<&str>, with_trace: bool) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)?;
    let policy = Compiler::new().compile(&text)?;

    let mut vars: VarMap = match input {
        Some(raw) => serde_json::from_str(raw)?,
        None => VarMap::new(),
    };

    let engine = Engine::new(Arc::new(CelEvaluator));
    if with_trace {
        let (trace, result) = engine.run_with_trace(&policy, &mut vars);
        println!("{}", serde_json::to_string_pretty(&Value::Object(vars))?);
        println!("{}", serde_json::to_string_pretty(&trace)?);
        if let Err(err) = result {
            eprintln!("walk failed: {err}");
            std::process::exit(1);
        }
    } else {
        engine.run(&policy, &mut vars)?;
        println!("{}", serde_json::to_string_pretty(&Value::Object(vars))?);
    }
    Ok(())
}

struct RequestOutcome {
    latency: Duration,
    status: Option<u16>,
    error: Option<String>,
}

async fn loadtest(
    url: String,
    rps: u32,
    duration_secs: u64,
    workers: usize,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    if rps == 0 || duration_secs == 0 || workers == 0 {
        eprintln!("rps, duration-secs and workers must be > 0");
        std::process::exit(2);
    }

    let body = loadtest_payload().to_string();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let (job_tx, job_rx) = tokio::sync::mpsc::channel::<()>(workers);
    let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
    let (result_tx, mut result_rx) = tokio::sync::mpsc::unbounded_channel::<RequestOutcome>();

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let job_rx = job_rx.clone();
        let client = client.clone();
        let url = url.clone();
        let body = body.clone();
        let result_tx = result_tx.clone();

        handles.push(tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                if job.is_none() {
                    break;
                }

                let start = Instant::now();
                let outcome = match client
                    .post(&url)
                    .header("content-type", "application/json")
                    .body(body.clone())
                    .send()
                    .await
                {
                    Ok(response) => {
                        let status = response.status().as_u16();
                        let _ = response.bytes().await;
                        RequestOutcome {
                            latency: start.elapsed(),
                            status: Some(status),
                            error: None,
                        }
                    }
                    Err(err) => RequestOutcome {
                        latency: start.elapsed(),
                        status: None,
                        error: Some(err.to_string()),
                    },
                };
                let _ = result_tx.send(outcome);
            }
        }));
    }
    drop(result_tx);

    let mut ticker = tokio::time::interval(Duration::from_secs(1) / rps);
    let deadline = Instant::now() + Duration::from_secs(duration_secs);
    let mut launched = 0u64;
    while Instant::now() < deadline {
        ticker.tick().await;
        if job_tx.send(()).await.is_err() {
            break;
        }
        launched += 1;
    }
    drop(job_tx);

    for handle in handles {
        handle.await?;
    }

    let mut results = Vec::new();
    while let Some(outcome) = result_rx.recv().await {
        results.push(outcome);
    }

    print_summary(launched, duration_secs, &results);
    Ok(())
}

fn loadtest_payload() -> Value {
    serde_json::json!({
        "policy_dot": r#"digraph Policy {
            start [result=""]
            approved [result="approved=true,segment=prime"]
            review [result="approved=false,segment=manual"]
            rejected [result="approved=false"]
            start -> approved [cond="age>=18 && score>700"]
            start -> review [cond="age>=18 && score<=700"]
            start -> rejected [cond="age<18"]
        }"#,
        "input": {"age": 25, "score": 720},
    })
}

fn print_summary(launched: u64, duration_secs: u64, results: &[RequestOutcome]) {
    let mut success = 0usize;
    let mut non_2xx = 0usize;
    let mut errors = 0usize;
    let mut latencies: Vec<Duration> = Vec::with_capacity(results.len());

    for outcome in results {
        latencies.push(outcome.latency);
        match (outcome.status, &outcome.error) {
            (Some(status), _) if (200..300).contains(&status) => success += 1,
            (Some(_), _) => non_2xx += 1,
            (None, _) => errors += 1,
        }
    }
    latencies.sort_unstable();

    println!("requests: {launched} launched, {} completed", results.len());
    println!("status:   {success} 2xx, {non_2xx} non-2xx, {errors} errors");
    println!(
        "rate:     {:.1} req/s over {duration_secs}s",
        results.len() as f64 / duration_secs as f64
    );
    println!(
        "latency:  p50 {:.2?}  p90 {:.2?}  p99 {:.2?}",
        percentile(&latencies, 0.50),
        percentile(&latencies, 0.90),
        percentile(&latencies, 0.99),
    );
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let index = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
