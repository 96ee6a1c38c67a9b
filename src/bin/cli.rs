use anyhow::{anyhow, bail, Context};
use crabscan::platform::native::NokhwaBackend;
use crabscan::probe;
use crabscan::{ScanError, ScanResult, Scanner, ScannerConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

enum Outcome {
    Detected(ScanResult),
    Failed(ScanError),
    Interrupted,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crabscan::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabscan-cli <list-cameras|scan> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "list-cameras" => cmd_list_cameras(&args),
        "scan" => cmd_scan(&args).await,
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

fn cmd_list_cameras(args: &[String]) -> anyhow::Result<()> {
    let backend = NokhwaBackend::new();
    let report = probe::probe(&backend);

    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&report.cameras)?);
    } else {
        println!("Camera permission: {}", report.permission);
        if report.is_empty() {
            println!("No cameras found");
        }
        for camera in &report.cameras {
            println!("{}: {} ({})", camera.id, camera.label, camera.facing);
        }
    }
    Ok(())
}

async fn cmd_scan(args: &[String]) -> anyhow::Result<()> {
    // Parse args: scan [--config <path>] [--timeout <ms>] [--json]
    let mut config_path = None;
    let mut timeout_ms: Option<u64> = None;
    let mut json = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(args.get(i).ok_or_else(|| anyhow!("--config needs a path"))?.clone());
            }
            "--timeout" => {
                i += 1;
                let raw = args.get(i).ok_or_else(|| anyhow!("--timeout needs milliseconds"))?;
                timeout_ms = Some(raw.parse().context("invalid --timeout")?);
            }
            "--json" => json = true,
            other => bail!("Unknown argument: {}", other),
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => ScannerConfig::load_from_file(&path)
            .with_context(|| format!("loading {}", path))?,
        None => ScannerConfig::load_or_default(),
    };

    let scanner = Scanner::new(Arc::new(NokhwaBackend::new()), config);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Outcome::Interrupted);
    })
    .context("installing Ctrl-C handler")?;

    let on_error = tx.clone();
    let handle = scanner.start(
        move |result| {
            let _ = tx.send(Outcome::Detected(result));
        },
        move |error| {
            let _ = on_error.send(Outcome::Failed(error));
        },
    );
    if !json {
        eprintln!("Scanning... press Ctrl-C to stop");
    }

    let outcome = match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), rx.recv())
            .await
            .ok()
            .flatten(),
        None => rx.recv().await,
    };
    handle.stop();

    match outcome {
        Some(Outcome::Detected(result)) => {
            if json {
                println!("{}", serde_json::to_string(&result)?);
            } else {
                println!("{}", result.payload);
                eprintln!(
                    "Detected by {} engine at {}",
                    result.source_engine, result.detected_at
                );
            }
            Ok(())
        }
        Some(Outcome::Failed(error)) => Err(error.into()),
        Some(Outcome::Interrupted) => {
            eprintln!("Interrupted");
            Ok(())
        }
        None => {
            if json {
                println!("null");
            } else {
                println!("Timeout");
            }
            Ok(())
        }
    }
}
