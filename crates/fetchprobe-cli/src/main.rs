//! FetchProbe CLI - probe and download HTTP resources headers-first

use clap::{Args, Parser, Subcommand};
use fetchprobe::{
    DownloadInfo, FetchOptions, FetchSession, InfoSummary, ProxyAddress, ProxyConfig,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

/// FetchProbe - look at a response before downloading it
#[derive(Parser, Debug)]
#[command(name = "fetchprobe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG wins if set
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow redirects and print the final response head
    Info {
        /// URL to probe
        url: String,

        #[command(flatten)]
        net: NetArgs,

        /// Print JSON instead of key/value lines
        #[arg(long)]
        json: bool,
    },
    /// Download URL unless the local copy already has the announced size
    Download {
        /// URL to download
        url: String,

        #[command(flatten)]
        net: NetArgs,

        /// Target file (default: filename from the response)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct NetArgs {
    /// Additional request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Static proxy, "host:port"
    #[arg(long, conflicts_with = "pac")]
    proxy: Option<String>,

    /// The static proxy speaks SOCKS5
    #[arg(long, requires = "proxy")]
    socks: bool,

    /// Proxy auto-config script URL
    #[arg(long)]
    pac: Option<String>,

    /// Host pattern (regex) that bypasses the static proxy (repeatable)
    #[arg(long, requires = "proxy")]
    no_proxy_for: Vec<String>,

    /// Retry once without certificate checks if verification fails
    #[arg(long)]
    insecure: bool,

    /// Do not follow redirects
    #[arg(long)]
    no_redirects: bool,

    /// Do not treat 308 as a redirect
    #[arg(long)]
    no_redirect_308: bool,

    /// Attempts before giving up
    #[arg(long)]
    attempts: Option<usize>,

    /// Connect timeout in seconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Custom User-Agent
    #[arg(long)]
    user_agent: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Info { url, net, json } => run_info(&url, &net, json).await,
        Commands::Download { url, net, output } => run_download(&url, &net, output).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info,fetchprobe=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn probe(url: &str, net: &NetArgs) -> Result<(FetchSession, DownloadInfo), String> {
    let options = fetch_options(net)?;
    let headers = parse_headers(&net.headers)?;
    tracing::debug!(?options, "Fetch options");
    let session = FetchSession::builder()
        .options(options)
        .build()
        .map_err(|e| e.to_string())?;
    let request = session
        .recreate_request(url, &headers)
        .map_err(|e| e.to_string())?;
    let info = session
        .try_get_info(request)
        .await
        .map_err(|e| match std::error::Error::source(&e) {
            Some(last) => format!("{e}: {last}"),
            None => e.to_string(),
        })?;
    Ok((session, info))
}

async fn run_info(url: &str, net: &NetArgs, json: bool) -> Result<(), String> {
    let (_, info) = probe(url, net).await?;
    let summary = info.summary();
    if json {
        let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
        writeln_safe(&json);
    } else {
        writeln_safe(&format_summary(&summary));
    }
    Ok(())
}

async fn run_download(url: &str, net: &NetArgs, output: Option<PathBuf>) -> Result<(), String> {
    let (session, info) = probe(url, net).await?;
    let summary = info.summary();
    if !(200..300).contains(&summary.status_code) {
        return Err(format!("{} answered {}", summary.url, summary.status_code));
    }

    let target = output
        .or_else(|| summary.filename.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("download"));

    if is_up_to_date(&target, summary.content_length) {
        writeln_safe(&format!(
            "{} is up to date ({} bytes), skipping",
            target.display(),
            summary.content_length.unwrap_or_default()
        ));
        return Ok(());
    }

    let document = session.download(info).await.map_err(|e| e.to_string())?;
    if !document.is_complete() {
        let reason = match document.declared_length() {
            Some(expected) if !document.is_truncated() => format!("server announced {expected}"),
            _ => "body cut off".to_string(),
        };
        return Err(format!(
            "{}: incomplete download, read {} bytes, {}",
            summary.url,
            document.actual_length(),
            reason
        ));
    }
    std::fs::write(&target, document.body())
        .map_err(|e| format!("cannot write {}: {}", target.display(), e))?;

    let written = std::fs::metadata(&target)
        .map(|m| m.len())
        .map_err(|e| e.to_string())?;
    match document.declared_length() {
        Some(expected) if expected != written => Err(format!(
            "{}: wrote {} bytes, server announced {}",
            target.display(),
            written,
            expected
        )),
        _ => {
            writeln_safe(&format!("{}: {} bytes", target.display(), written));
            Ok(())
        }
    }
}

/// True if `path` exists with exactly the announced length
fn is_up_to_date(path: &Path, content_length: Option<u64>) -> bool {
    match (content_length, std::fs::metadata(path)) {
        (Some(expected), Ok(meta)) => meta.is_file() && meta.len() == expected,
        _ => false,
    }
}

fn fetch_options(net: &NetArgs) -> Result<FetchOptions, String> {
    let mut options = FetchOptions {
        redirects_enabled: !net.no_redirects,
        redirect_308: !net.no_redirect_308,
        insecure_tls: net.insecure,
        user_agent: net.user_agent.clone(),
        ..Default::default()
    };
    if let Some(attempts) = net.attempts {
        options.attempts = attempts;
    }
    if let Some(secs) = net.connect_timeout {
        options.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = net.read_timeout {
        options.read_timeout = Duration::from_secs(secs);
    }

    options.proxy = match (&net.proxy, &net.pac) {
        (Some(proxy), _) => ProxyConfig::Static {
            proxy: parse_proxy(proxy, net.socks)?,
            bypass: net.no_proxy_for.clone(),
        },
        (None, Some(pac)) => ProxyConfig::Pac {
            url: Url::parse(pac).map_err(|e| format!("invalid PAC URL {pac}: {e}"))?,
        },
        (None, None) => ProxyConfig::Direct,
    };
    Ok(options)
}

fn parse_proxy(value: &str, socks: bool) -> Result<ProxyAddress, String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("proxy must be host:port, got {value}"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid proxy port in {value}"))?;
    if host.is_empty() {
        return Err(format!("missing proxy host in {value}"));
    }
    Ok(if socks {
        ProxyAddress::socks(host, port)
    } else {
        ProxyAddress::http(host, port)
    })
}

fn parse_headers(values: &[String]) -> Result<HashMap<String, String>, String> {
    values
        .iter()
        .map(|raw| {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| format!("header must be 'Name: value', got {raw}"))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Format a summary as "key: value" lines
fn format_summary(summary: &InfoSummary) -> String {
    let mut output = String::new();
    output.push_str(&format!("url: {}\n", summary.url));
    match &summary.reason {
        Some(reason) => output.push_str(&format!("status: {} {}\n", summary.status_code, reason)),
        None => output.push_str(&format!("status: {}\n", summary.status_code)),
    }
    if let Some(length) = summary.content_length {
        output.push_str(&format!("content_length: {}\n", length));
    }
    if let Some(ref ct) = summary.content_type {
        output.push_str(&format!("content_type: {}\n", ct));
    }
    if let Some(ref lm) = summary.last_modified {
        output.push_str(&format!("last_modified: {}\n", lm));
    }
    if let Some(ref filename) = summary.filename {
        output.push_str(&format!("filename: {}\n", filename));
    }
    output.trim_end().to_string()
}

/// Write to stdout, exit silently on broken pipe
fn writeln_safe(s: &str) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", s) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
