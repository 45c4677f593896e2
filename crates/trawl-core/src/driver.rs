use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::task::ScrapeTask;

/// Events emitted by the driver loop for monitoring/logging.
#[derive(Debug, Clone)]
pub enum DriveEvent<'a> {
    Started,
    PageQueued {
        cycle: u64,
    },
    PageScraped {
        cycle: u64,
        has_next: bool,
    },
    Finished {
        cycles: u64,
    },
    Failed {
        cycle: u64,
        error: &'a str,
    },
    Cancelled {
        cycles: u64,
    },
}

/// Trait for receiving driver events (decoupled logging).
pub trait DriveReporter: Send + Sync {
    fn report(&self, event: DriveEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDriveReporter;

impl DriveReporter for TracingDriveReporter {
    fn report(&self, event: DriveEvent<'_>) {
        match event {
            DriveEvent::Started => {
                tracing::info!("Scrape started");
            }
            DriveEvent::PageQueued { cycle } => {
                tracing::debug!(%cycle, "Page request queued");
            }
            DriveEvent::PageScraped { cycle, has_next } => {
                tracing::debug!(%cycle, %has_next, "Page scraped");
            }
            DriveEvent::Finished { cycles } => {
                tracing::info!(%cycles, "Scrape finished");
            }
            DriveEvent::Failed { cycle, error } => {
                tracing::error!(%cycle, %error, "Scrape aborted");
            }
            DriveEvent::Cancelled { cycles } => {
                tracing::warn!(%cycles, "Scrape cancelled");
            }
        }
    }
}

/// Result of a completed drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSummary {
    /// Number of enqueue/scrape cycles performed.
    pub cycles: u64,
}

/// Drive a task until it reports no more pages.
///
/// Always performs at least one `add_to_queue`/`scrape_from_queue` pair, then
/// checks `has_next`. The first error aborts the loop and is returned as is:
/// retrying a page is the channel's job, not the driver's.
pub async fn drive<T, DR>(
    task: &mut T,
    cancel: &CancellationToken,
    reporter: &DR,
) -> Result<DriveSummary, AppError>
where
    T: ScrapeTask,
    DR: DriveReporter,
{
    reporter.report(DriveEvent::Started);

    let mut cycles = 0u64;
    loop {
        if cancel.is_cancelled() {
            reporter.report(DriveEvent::Cancelled { cycles });
            return Err(AppError::Cancelled);
        }
        cycles += 1;

        let result = match task.add_to_queue().await {
            Ok(()) => {
                reporter.report(DriveEvent::PageQueued { cycle: cycles });
                task.scrape_from_queue().await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            if matches!(e, AppError::Cancelled) {
                reporter.report(DriveEvent::Cancelled { cycles });
            } else {
                let error = e.to_string();
                reporter.report(DriveEvent::Failed {
                    cycle: cycles,
                    error: &error,
                });
            }
            return Err(e);
        }

        let has_next = task.has_next();
        reporter.report(DriveEvent::PageScraped {
            cycle: cycles,
            has_next,
        });
        if !has_next {
            break;
        }
    }

    reporter.report(DriveEvent::Finished { cycles });
    Ok(DriveSummary { cycles })
}
