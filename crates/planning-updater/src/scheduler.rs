use chrono::Utc;
use planning_types::BranchReport;
use std::future::Future;
use std::time::Duration;

use crate::config::UpdaterParams;
use crate::error::UpdaterResult;
use crate::pipeline::Updater;
use crate::store::EventStore;

/// Consecutive failed passes, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStreak {
    count: u32,
    tolerance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

impl ErrorStreak {
    /// `tolerance` 0 never stops.
    pub fn new(tolerance: u32) -> Self {
        Self {
            count: 0,
            tolerance,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record<T>(&mut self, result: &UpdaterResult<T>) -> Decision {
        let err = match result {
            Ok(_) => {
                self.count = 0;
                return Decision::Continue;
            }
            Err(e) => e,
        };

        if !err.counts_toward_streak() {
            tracing::warn!("Couldn't download a file, maybe better luck next time: {}", err);
            return Decision::Continue;
        }

        self.count += 1;
        tracing::warn!(
            "An error happened in this pass ({}/{} in a row): {}",
            self.count,
            self.tolerance,
            err
        );

        if self.tolerance > 0 && self.count >= self.tolerance {
            Decision::Stop
        } else {
            Decision::Continue
        }
    }
}

/// Repeats passes `frequency` after the end of the previous one.
#[derive(Debug, Clone)]
pub struct Scheduler {
    frequency: Option<Duration>,
    error_tolerance: u32,
}

impl Scheduler {
    pub fn new(frequency: Option<Duration>, error_tolerance: u32) -> Self {
        Self {
            frequency,
            error_tolerance,
        }
    }

    pub fn from_params(params: &UpdaterParams) -> Self {
        Self::new(params.frequency.map(Duration::from_secs), params.error_tolerance)
    }

    /// A scheduler running exactly one pass
    pub fn once() -> Self {
        Self::new(None, 0)
    }

    /// Run until the error tolerance is reached or Ctrl-C is pressed.
    pub async fn run<S: EventStore>(&self, updater: &Updater<S>) -> UpdaterResult<()> {
        self.run_until(updater, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until the error tolerance is reached or `shutdown` completes.
    /// `shutdown` is only observed between passes.
    pub async fn run_until<S, F>(&self, updater: &Updater<S>, shutdown: F) -> UpdaterResult<()>
    where
        S: EventStore,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut streak = ErrorStreak::new(self.error_tolerance);

        loop {
            let result = updater.run_pass(Utc::now()).await;
            if let Ok(reports) = &result {
                log_reports(reports);
            }

            let Some(delay) = self.frequency else {
                return result.map(|_| ());
            };

            if streak.record(&result) == Decision::Stop {
                tracing::error!(
                    "Reached the maximum number of errors tolerated in a row ({}), stopping",
                    self.error_tolerance
                );
                return result.map(|_| ());
            }

            tracing::info!("Scheduling the next update (in {} seconds)", delay.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, no further update scheduled");
                    return Ok(());
                }
            }
        }
    }
}

fn log_reports(reports: &[BranchReport]) {
    for report in reports {
        tracing::info!(
            "[{}] The updater ended successfully ({} events, {} archived)",
            report.branch,
            report.stats.total(),
            report.archived
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpdaterError;
    use crate::store::StoreError;

    fn ok() -> UpdaterResult<()> {
        Ok(())
    }

    fn download_error() -> UpdaterResult<()> {
        Err(UpdaterError::download("https://example.com/a.ics", "timeout"))
    }

    fn database_error() -> UpdaterResult<()> {
        Err(UpdaterError::Database(StoreError::Backend("down".to_string())))
    }

    #[test]
    fn test_streak_stops_at_tolerance() {
        let mut streak = ErrorStreak::new(2);
        assert_eq!(streak.record(&database_error()), Decision::Continue);
        assert_eq!(streak.record(&database_error()), Decision::Stop);
    }

    #[test]
    fn test_clean_pass_resets_streak() {
        let mut streak = ErrorStreak::new(2);
        streak.record(&database_error());
        streak.record(&ok());
        assert_eq!(streak.count(), 0);
        assert_eq!(streak.record(&database_error()), Decision::Continue);
    }

    #[test]
    fn test_download_errors_neither_count_nor_reset() {
        let mut streak = ErrorStreak::new(2);
        streak.record(&database_error());
        for _ in 0..10 {
            assert_eq!(streak.record(&download_error()), Decision::Continue);
        }
        assert_eq!(streak.count(), 1);
        assert_eq!(streak.record(&database_error()), Decision::Stop);
    }

    #[test]
    fn test_zero_tolerance_never_stops() {
        let mut streak = ErrorStreak::new(0);
        for _ in 0..50 {
            assert_eq!(streak.record(&database_error()), Decision::Continue);
        }
        assert_eq!(streak.count(), 50);
    }
}
