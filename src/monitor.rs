//! Polling helpers layered on the API client: watch a job until it
//! settles, then pull down its outputs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use backon::{BlockingRetryable, ConstantBuilder};

use crate::api::{ApiClient, ApiClientError, Job, JobStatus};

enum Poll {
    Pending(Job),
    Failed(ApiClientError),
}

const fn is_pending(poll: &Poll) -> bool {
    matches!(poll, Poll::Pending(_))
}

/// Check a job's status every `poll_interval` until it reaches a terminal
/// state or the `time_limit` budget runs out.
///
/// Returns the last status fetched, terminal or not. `None` only when the
/// API itself failed; the error is logged rather than returned.
pub fn monitor_job(
    api: &ApiClient,
    job_id: &str,
    time_limit: Duration,
    poll_interval: Duration,
) -> Option<Job> {
    let fetch = || -> Result<Job, Poll> {
        let job = api.get_job(job_id).map_err(Poll::Failed)?;
        if job.status.is_terminal() {
            Ok(job)
        } else {
            Err(Poll::Pending(job))
        }
    };

    let interval = if poll_interval.is_zero() {
        Duration::from_millis(1)
    } else {
        poll_interval
    };
    let max_polls = (time_limit.as_secs_f64() / interval.as_secs_f64()).ceil() as usize;

    let result = fetch
        .retry(
            ConstantBuilder::default()
                .with_delay(interval)
                .with_max_times(max_polls),
        )
        .when(is_pending)
        .notify(|_, dur: Duration| {
            log::debug!("Job {job_id} not finished, next check in {dur:?}");
        })
        .call();

    match result {
        Ok(job) => {
            println!("Job completed.\nStatus: {}", job.status);
            Some(job)
        }
        Err(Poll::Pending(job)) => {
            log::error!(
                "Job {job_id} exceeded the time limit of {} seconds",
                time_limit.as_secs()
            );
            Some(job)
        }
        Err(Poll::Failed(err)) => {
            log::error!("An error occurred during job monitoring for job {job_id}: {err}");
            None
        }
    }
}

/// Download every non-empty file from a successful job's manifest into
/// `{output_dir}/{job_id}/`. Failed jobs get their error info printed;
/// anything else gets a notice.
///
/// # Errors
///
/// Propagates download and file system errors; zero-size manifest entries
/// are skipped without a request.
pub fn download_successful_job(
    api: &ApiClient,
    job_id: &str,
    job: &Job,
    output_dir: &Path,
) -> Result<(), ApiClientError> {
    match job.status {
        JobStatus::Success => {
            fs::create_dir_all(output_dir)?;
            println!(
                "Downloading files into {}",
                output_dir.join(job_id).display()
            );
            for file in &job.files {
                println!("  \"{}\"...", file.path);
                if file.size > 0 {
                    api.download_job_file(job_id, &file.path, output_dir)?;
                }
            }
        }
        JobStatus::Failure => {
            println!(
                "Job failed. Error: \"{}\"",
                job.error_info.as_deref().unwrap_or("No error info available")
            );
        }
        _ => {
            println!("Job ended with unexpected status: {}", job.status);
            println!(
                "Error info: {}",
                job.error_info.as_deref().unwrap_or("No error info available")
            );
        }
    }
    Ok(())
}
