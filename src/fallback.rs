//! First-success combinator over an ordered list of fallible async attempts.

use futures_util::future::BoxFuture;

/// One named attempt. The future is lazy and only polled when its turn comes.
pub struct Attempt<'a, T> {
    pub name: &'static str,
    pub run: BoxFuture<'a, anyhow::Result<T>>,
}

impl<'a, T> Attempt<'a, T> {
    pub fn new(name: &'static str, run: BoxFuture<'a, anyhow::Result<T>>) -> Self {
        Self { name, run }
    }
}

/// Every attempt failed, in order.
#[derive(Debug, thiserror::Error)]
#[error("{}", summarize(.failures))]
pub struct Exhausted {
    pub failures: Vec<(&'static str, anyhow::Error)>,
}

fn summarize(failures: &[(&'static str, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("{name}: {e:#}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run `attempts` in order and return the first success with its name.
pub async fn first_success<T>(attempts: Vec<Attempt<'_, T>>) -> Result<(&'static str, T), Exhausted> {
    let mut failures = Vec::new();
    for attempt in attempts {
        match attempt.run.await {
            Ok(value) => return Ok((attempt.name, value)),
            Err(e) => {
                tracing::debug!(attempt = attempt.name, error = %e, "Fallback attempt failed");
                failures.push((attempt.name, e));
            }
        }
    }
    Err(Exhausted { failures })
}
