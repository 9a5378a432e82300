//! # vosd
//!
//! Main entry point for the virtual OS host.

use kernel_api::KernelConfig;
use std::env;
use std::process;
use tracing_subscriber::EnvFilter;
use vosd::{VosdConfig, VosdRuntime};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,console=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("vosd");

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(program);
        process::exit(1);
    });

    let runtime = VosdRuntime::new(config).unwrap_or_else(|e| {
        eprintln!("Failed to create runtime: {}", e);
        process::exit(1);
    });

    let report = match runtime.run().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    };

    for line in &report.transcript {
        println!("{}", line);
    }
    if !report.status.success() {
        eprintln!("{} demo client {}", report.demo, report.status);
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<VosdConfig, String> {
    let mut config = VosdConfig::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --config".to_string());
                }
                config.kernel = KernelConfig::load(&args[i])
                    .map_err(|e| format!("Failed to load {}: {}", args[i], e))?;
            }
            "--demo" | "-d" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --demo".to_string());
                }
                config.demo = args[i].parse().map_err(|e| format!("{}", e))?;
            }
            "--help" | "-h" => {
                print_usage(args.first().map(String::as_str).unwrap_or("vosd"));
                process::exit(0);
            }
            "--" => {
                config.args.extend(args[i + 1..].iter().cloned());
                break;
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS] [-- CLIENT_ARGS...]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      Kernel config (JSON)");
    eprintln!("  -d, --demo <DEMO>        Demo to run: echo (default) or ping");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --demo echo -- Hello there", program);
    eprintln!("  {} --demo ping -- 10", program);
    eprintln!("  RUST_LOG=debug {} --config vosd.json", program);
}
