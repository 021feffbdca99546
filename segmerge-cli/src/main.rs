use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::MultiProgress;
use segmerge_engine::{
    BatchProgressCallback, DownloaderConfig, HlsConfig, HlsDownloader, ProxyConfig, ProxyType,
    TaskOutcome,
};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod jobs;
mod utils;

use cli::CliArgs;
use error::AppError;
use utils::progress::ProgressManager;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("segmerge.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stdout, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    info!("segmerge {} - encrypted HLS downloader", env!("CARGO_PKG_VERSION"));
    info!("==================================================================");

    let requests = jobs::collect_requests(&args)?;

    info!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );

    let (proxy_config, use_system_proxy) = select_proxy(&args)?;

    let download_config = {
        let mut builder = DownloaderConfig::builder()
            .with_timeout(Duration::from_secs(args.timeout))
            .with_connect_timeout(Duration::from_secs(args.connect_timeout))
            .with_read_timeout(Duration::from_secs(args.read_timeout))
            .with_headers(utils::parse_headers(&args.headers))
            .danger_accept_invalid_certs(!args.strict_tls);

        if let Some(proxy) = proxy_config {
            builder = builder.with_proxy(proxy);
        } else {
            builder = builder.with_system_proxy(use_system_proxy);
        }
        builder.build()
    };

    let hls_config = {
        let mut builder = HlsConfig::builder()
            .with_base_config(download_config)
            .segment_retry_count(args.segment_retries)
            .output_format(args.format)
            .remux_program(args.ffmpeg.clone())
            .cleanup_intermediates(!args.keep_segments);
        if let Some(workers) = args.download_workers {
            builder = builder.download_workers(workers);
        }
        if let Some(workers) = args.decrypt_workers {
            builder = builder.decrypt_workers(workers);
        }
        builder.build()
    };

    info!(
        requests = requests.len(),
        format = %hls_config.merge_config.output_format,
        download_workers = hls_config.pool_config.download_workers,
        decrypt_workers = hls_config.pool_config.decrypt_workers,
        "Starting downloads"
    );

    let downloader = HlsDownloader::new(hls_config)?;

    let cancel = downloader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling downloads");
            cancel.cancel();
        }
    });

    let multi = MultiProgress::new();
    let progress_manager = if args.show_progress {
        let labels: Vec<String> = requests
            .iter()
            .map(|request| {
                request
                    .title
                    .clone()
                    .or_else(|| request.urls.first().cloned())
                    .unwrap_or_default()
            })
            .collect();
        ProgressManager::new(&multi, &labels)
    } else {
        ProgressManager::new_disabled()
    };

    let callback: Option<BatchProgressCallback> = if progress_manager.is_disabled() {
        None
    } else {
        let manager = progress_manager.clone();
        Some(Arc::new(move |index, percent| manager.update(index, percent)))
    };

    let total = requests.len();
    let results = downloader.download_batch(requests, callback).await;

    let mut failed = 0;
    for (index, result) in results.iter().enumerate() {
        match result {
            Ok(TaskOutcome::Produced(path)) => {
                progress_manager.finish(index, format!("Saved {}", path.display()));
                info!("#{} saved to {}", index + 1, path.display());
            }
            Ok(TaskOutcome::Promoted(path)) => {
                progress_manager.finish(index, format!("Saved {}", path.display()));
                info!(
                    "#{} duplicates another download, kept as {}",
                    index + 1,
                    path.display()
                );
            }
            Ok(TaskOutcome::Removed { owner }) => {
                progress_manager.finish(index, "Duplicate removed".to_string());
                info!(
                    "#{} duplicates {}, its folder was removed",
                    index + 1,
                    owner.display()
                );
            }
            Err(e) => {
                failed += 1;
                progress_manager.finish(index, format!("Failed: {e}"));
                error!("#{} failed: {}", index + 1, e);
            }
        }
    }

    if failed > 0 {
        return Err(AppError::Failed { failed, total });
    }
    info!("All {} download(s) finished", total);
    Ok(())
}

/// Explicit proxy, system proxy, or none. `--no-proxy` wins over everything.
fn select_proxy(args: &CliArgs) -> Result<(Option<ProxyConfig>, bool), AppError> {
    if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        return Ok((None, false));
    }

    let Some(proxy_url) = args.proxy.as_ref() else {
        if args.use_system_proxy {
            info!("Using system proxy settings for downloads");
        } else {
            info!("No proxy settings configured for downloads");
        }
        return Ok((None, args.use_system_proxy));
    };

    let proxy_type: ProxyType = args.proxy_type.parse().map_err(AppError::InvalidInput)?;
    let mut proxy = ProxyConfig::new(proxy_url.clone(), proxy_type);
    if let (Some(username), Some(password)) = (&args.proxy_user, &args.proxy_pass) {
        proxy = proxy.with_auth(username.clone(), password.clone());
    }

    info!(
        proxy_url = %proxy_url,
        proxy_type = ?proxy_type,
        has_auth = proxy.auth.is_some(),
        "Using explicit proxy configuration for downloads"
    );
    Ok((Some(proxy), false))
}
