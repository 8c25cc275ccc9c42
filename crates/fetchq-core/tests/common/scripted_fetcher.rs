//! Fetcher that plays back a per-locator script of outcomes.
//!
//! Once a locator's script is used up, every further fetch succeeds with
//! `<output_dir>/<job id>`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fetchq_core::fetch::{FetchOutcome, FetchRequest, Fetcher};
use fetchq_core::retry::ErrorKind;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum Step {
    Succeed(String),
    Fail(ErrorKind, String),
    Panic,
    /// Never finishes (until dropped).
    Hang,
    /// Wait for the notify, then succeed.
    WaitFor(Arc<Notify>),
    /// Sleep, then succeed.
    Sleep(Duration),
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<FetchRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    inner: Arc<Inner>,
}

struct InFlight<'a>(&'a Inner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, locator: &str, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default()
            .extend(steps);
        self
    }

    pub fn calls(&self) -> Vec<FetchRequest> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, locator: &str) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter(|c| c.locator == locator)
            .map(|c| c.attempts)
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: FetchRequest) -> impl Future<Output = FetchOutcome> + Send {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.calls.lock().unwrap().push(request.clone());
            let step = inner
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.locator)
                .and_then(VecDeque::pop_front);
            let _guard = InFlight::enter(&inner);
            let default_path = request
                .output_dir
                .join(request.job_id.to_string())
                .display()
                .to_string();

            match step {
                None => FetchOutcome::success(default_path),
                Some(Step::Succeed(path)) => FetchOutcome::success(path),
                Some(Step::Fail(kind, message)) => FetchOutcome::failure(kind, message),
                Some(Step::Panic) => panic!("scripted panic for {}", request.locator),
                Some(Step::Hang) => std::future::pending().await,
                Some(Step::WaitFor(notify)) => {
                    notify.notified().await;
                    FetchOutcome::success(default_path)
                }
                Some(Step::Sleep(d)) => {
                    tokio::time::sleep(d).await;
                    FetchOutcome::success(default_path)
                }
            }
        }
    }
}
