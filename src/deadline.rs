use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};

use crate::error::{Error, Result};

/// An absolute point in time shared by a sequence of handshake steps.
///
/// Every step awaited through [`Deadline::run`] fails with [`Error::Timeout`] once the
/// instant passes. The stream itself carries no timer, so when the `Deadline` goes out of
/// scope the connection is unbounded again regardless of how the steps ended.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Await `fut`, failing with a timeout error naming `step` if the deadline passes first.
    pub async fn run<F, T>(&self, step: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match time::timeout_at(self.at, fut).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout {
                step,
                timeout: self.budget,
            }),
        }
    }
}
