//! Example: download a file only if the local copy is stale
//!
//! Run with: cargo run -p fetchprobe --example probe_then_download -- <URL> [PATH]
//!
//! The response head is fetched first; the body is only read when the
//! announced Content-Length differs from the size of the local file.

use fetchprobe::FetchSession;
use std::collections::HashMap;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("Usage: probe_then_download <URL> [PATH]");
        std::process::exit(1);
    };

    let session = match FetchSession::builder().insecure_tls(true).build() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let Some(info) = session.get_info(&url, &HashMap::new()).await else {
        eprintln!("Could not reach {}", url);
        std::process::exit(1);
    };

    let summary = info.summary();
    let path = args
        .next()
        .map(PathBuf::from)
        .or_else(|| summary.filename.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("download"));

    println!("{} -> {} ({})", url, summary.url, summary.status_code);

    let local = std::fs::metadata(&path).map(|m| m.len()).ok();
    if local.is_some() && local == summary.content_length {
        println!("{} already has {} bytes", path.display(), local.unwrap_or_default());
        return;
    }

    match session.download(info).await {
        Ok(document) => {
            if let Err(e) = std::fs::write(&path, document.body()) {
                eprintln!("Error writing {}: {}", path.display(), e);
                std::process::exit(1);
            }
            let status = if document.is_complete() { "OK" } else { "INCOMPLETE" };
            println!(
                "{}: {} of {:?} bytes [{}]",
                path.display(),
                document.actual_length(),
                document.declared_length(),
                status
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
