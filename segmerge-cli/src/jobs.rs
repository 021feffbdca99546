use std::path::Path;

use segmerge_engine::DownloadRequest;
use tracing::info;

use crate::cli::CliArgs;
use crate::error::AppError;

/// Reads a JSON array of download requests.
pub fn load_jobs(path: &Path) -> Result<Vec<DownloadRequest>, AppError> {
    let content = std::fs::read_to_string(path)?;
    let jobs: Vec<DownloadRequest> = serde_json::from_str(&content)?;
    if let Some(index) = jobs.iter().position(|job| job.urls.is_empty()) {
        return Err(AppError::InvalidInput(format!(
            "Job #{} in {} has no playlist URL",
            index + 1,
            path.display()
        )));
    }
    info!("Loaded {} job(s) from {}", jobs.len(), path.display());
    Ok(jobs)
}

/// The jobs file (if any) followed by the positional download (if any).
pub fn collect_requests(args: &CliArgs) -> Result<Vec<DownloadRequest>, AppError> {
    let mut requests = match &args.jobs {
        Some(path) => load_jobs(path)?,
        None => Vec::new(),
    };

    if !args.urls.is_empty() {
        let mut request = DownloadRequest::new(args.urls.clone(), args.output_dir.clone());
        request.title = args.title.clone();
        requests.push(request);
    }

    if requests.is_empty() {
        return Err(AppError::InvalidInput("Nothing to download".to_string()));
    }
    Ok(requests)
}
