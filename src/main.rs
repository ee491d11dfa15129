use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use connect_rs::client;
use connect_rs::config::DialConfig;
use connect_rs::ports::{parse_port, parse_port_range};
use connect_rs::scanner::PortScanner;
use connect_rs::types::{ScanReport, ScanTarget};

/// netcat-style TCP client with HTTP/HTTPS/SOCKS5 proxy support, TLS, and port scanning.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "connect-rs",
    version,
    about = "netcat-style TCP client with HTTP/HTTPS/SOCKS5 proxy support, TLS, and port scanning.",
    long_about = None
)]
struct Cli {
    /// Target host name or IP address.
    host: String,

    /// Target port, or `start[-end]` in scan mode.
    port: String,

    /// Proxy URL: http://, https://, socks5:// or socks5h://, with optional user:pass@.
    #[arg(short = 'x', long)]
    proxy: Option<String>,

    /// Wrap the connection to the target in TLS.
    #[arg(short = 'T', long)]
    tls: bool,

    /// Skip TLS certificate verification (target and HTTPS proxy).
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Connect timeout in milliseconds [default: 30000, 2000 in scan mode].
    #[arg(short = 't', long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Log handshake steps to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Scan mode: probe the port range without sending data.
    #[arg(short = 'z', long)]
    scan: bool,

    /// Concurrent probes in scan mode [default: 100, 1 for a single port].
    #[arg(long)]
    workers: Option<usize>,

    /// Write scan results as pretty JSON to this path.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.scan {
        run_scan(&cli).await
    } else {
        run_client(&cli).await
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "connect_rs=debug" } else { "connect_rs=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_client(cli: &Cli) -> Result<()> {
    let port = parse_port(&cli.port)?;
    let mut config = DialConfig {
        tls_verify: !cli.insecure,
        verbose: cli.verbose,
        ..DialConfig::default()
    };
    if let Some(ms) = cli.timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }

    let established = client::connect(
        &cli.host,
        port,
        cli.proxy.as_deref().unwrap_or_default(),
        &config,
        cli.tls,
    )
    .await
    .with_context(|| format!("failed to connect to {}:{}", cli.host, port))?;

    tracing::info!(host = %cli.host, port, "connected");
    relay(established.conn).await
}

/// Copy stdin to the connection and the connection to stdout until the remote side
/// closes or Ctrl+C is pressed.
async fn relay(conn: connect_rs::Connection) -> Result<()> {
    let (mut rd, mut wr) = tokio::io::split(conn);

    let upstream = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        if let Err(e) = tokio::io::copy(&mut stdin, &mut wr).await {
            tracing::debug!(error = %e, "stdin copy ended");
        }
        let _ = wr.shutdown().await;
    });

    let mut stdout = tokio::io::stdout();
    tokio::select! {
        res = tokio::io::copy(&mut rd, &mut stdout) => {
            if let Err(e) = res {
                tracing::debug!(error = %e, "connection copy ended");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }
    stdout.flush().await?;
    upstream.abort();
    Ok(())
}

async fn run_scan(cli: &Cli) -> Result<()> {
    let (start, end) = parse_port_range(&cli.port)?;
    let target = ScanTarget::new(cli.host.clone(), start, end)?;

    let mut scanner = PortScanner::new(target);
    if let Some(ms) = cli.timeout_ms {
        scanner = scanner.with_timeout(Duration::from_millis(ms));
    }
    if let Some(workers) = cli.workers {
        scanner = scanner.with_workers(workers);
    }

    // Ctrl-C cancels the scan; ports already being probed are still reported.
    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let report = scanner.scan_with_cancel(cancel).await.sorted();
    print_results(&report, cli.verbose);

    if let Some(path) = cli.output.as_deref() {
        write_results_json(path, &report)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn print_results(report: &ScanReport, verbose: bool) {
    for r in &report.results {
        let latency_ms = r.latency.as_secs_f64() * 1000.0;
        if r.open {
            println!("Port {} open ({:.2} ms)", r.port, latency_ms);
        } else if verbose {
            println!(
                "Port {} closed/filtered ({})",
                r.port,
                r.error.as_deref().unwrap_or("no response")
            );
        }
    }
    println!(
        "\nScan complete: {} of {} ports scanned on {}, {} open",
        report.scanned_done, report.scanned_total, report.host, report.open_count
    );
}

fn write_results_json(path: &Path, report: &ScanReport) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}
