//! Isolation boundary: finalize-once execution contexts and stray-signal
//! attribution
//!
//! Every test body and hook runs under its own [`Boundary`], which accepts
//! exactly one completion signal. Any later signal from the same body, be it
//! a second callback or asynchronous work from a shared fixture firing after
//! its owning test finished, is a *stray* and is attributed to whichever
//! boundaries are active at the moment it arrives, not to the boundary that
//! created the signaling handle. Shared fixtures built in a `before_each`
//! and reused across asynchronous callbacks make this the only attribution
//! that matches what actually happened at dispatch time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

/// Outcome of one boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Passed,
    Failed(String),
}

#[derive(Default)]
struct BoundaryState {
    verdict: Option<Verdict>,
    stray: Option<String>,
}

/// Finalize-once execution context for a single test body or hook.
pub(crate) struct Boundary {
    title: String,
    state: Mutex<BoundaryState>,
    notify: Notify,
}

impl Boundary {
    pub fn new(title: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            title: title.into(),
            state: Mutex::new(BoundaryState::default()),
            notify: Notify::new(),
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Record the boundary's outcome. Returns false if it was already
    /// finalized, in which case the signal is a stray.
    pub fn finalize(&self, verdict: Verdict) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.verdict.is_some() {
                return false;
            }
            state.verdict = Some(verdict);
        }
        self.notify.notify_waiters();
        true
    }

    /// Attribute a stray failure to this boundary: fail it if still open,
    /// otherwise keep the message as an override applied at collection.
    pub fn record_stray(&self, message: &str) {
        let notify = {
            let mut state = self.state.lock().unwrap();
            match state.verdict {
                None => {
                    state.verdict = Some(Verdict::Failed(message.to_string()));
                    true
                }
                Some(_) => {
                    if state.stray.is_none() {
                        state.stray = Some(message.to_string());
                    }
                    false
                }
            }
        };
        if notify {
            self.notify.notify_waiters();
        }
    }

    /// Wait until the boundary is finalized.
    pub async fn wait(&self) -> Verdict {
        loop {
            let notified = self.notify.notified();
            if let Some(verdict) = self.state.lock().unwrap().verdict.clone() {
                return verdict;
            }
            notified.await;
        }
    }

    /// Stray failure attributed after finalization, if any.
    pub fn stray_override(&self) -> Option<String> {
        self.state.lock().unwrap().stray.clone()
    }
}

/// Shared state of one execution pass: the registry of currently active
/// boundaries, out-of-band errors, and the duplicate-completion flag.
pub(crate) struct RunContext {
    debug: bool,
    active: Mutex<Vec<Arc<Boundary>>>,
    errors: Mutex<Vec<String>>,
    fatal: AtomicBool,
}

impl RunContext {
    pub fn new(debug: bool) -> Arc<Self> {
        Arc::new(Self {
            debug,
            active: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            fatal: AtomicBool::new(false),
        })
    }

    pub fn activate(&self, boundary: &Arc<Boundary>) {
        self.active.lock().unwrap().push(boundary.clone());
    }

    pub fn deactivate(&self, boundary: &Arc<Boundary>) {
        self.active
            .lock()
            .unwrap()
            .retain(|b| !Arc::ptr_eq(b, boundary));
    }

    /// Route a post-finalization signal. The message names the boundary the
    /// signal originated from, but it is recorded once against every
    /// boundary active right now; with none active it goes to the
    /// notebook's out-of-band errors in debug mode and is dropped
    /// otherwise.
    pub fn dispatch_stray(&self, origin_title: &str, cause: Option<&str>) {
        let message = match cause {
            Some(cause) => format!(
                "Multiple callbacks or thrown errors received in test \"{origin_title}\" ({cause})"
            ),
            None => {
                format!("Multiple callbacks or thrown errors received in test \"{origin_title}\"")
            }
        };

        let active = self.active.lock().unwrap().clone();
        if active.is_empty() {
            if self.debug {
                debug!("stray signal with no active boundary: {message}");
                self.errors.lock().unwrap().push(message);
            } else {
                warn!("dropping stray signal with no active boundary: {message}");
            }
            return;
        }

        self.fatal.store(true, Ordering::SeqCst);
        for boundary in &active {
            boundary.record_stray(&message);
        }
    }

    pub fn push_error(&self, message: String) {
        self.errors.lock().unwrap().push(message);
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.errors.lock().unwrap())
    }
}

/// Completion handle given to test bodies and hooks. Clone-able; clones may
/// be moved into spawned tasks and signaled later. The first signal
/// finalizes the owning boundary; every later one is dispatched as a stray.
#[derive(Clone)]
pub struct Completion {
    boundary: Arc<Boundary>,
    ctx: Arc<RunContext>,
}

impl Completion {
    pub(crate) fn new(boundary: Arc<Boundary>, ctx: Arc<RunContext>) -> Self {
        Self { boundary, ctx }
    }

    /// Signal successful completion.
    pub fn pass(&self) {
        if !self.boundary.finalize(Verdict::Passed) {
            self.ctx.dispatch_stray(self.boundary.title(), None);
        }
    }

    /// Signal failure with the given message.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        if !self.boundary.finalize(Verdict::Failed(message.clone())) {
            self.ctx.dispatch_stray(self.boundary.title(), Some(&message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_once() {
        let boundary = Boundary::new("t");
        assert!(boundary.finalize(Verdict::Passed));
        assert!(!boundary.finalize(Verdict::Failed("late".into())));
        assert_eq!(
            tokio_test::block_on(boundary.wait()),
            Verdict::Passed
        );
    }

    #[test]
    fn test_wait_resolves_on_finalize() {
        tokio_test::block_on(async {
            let boundary = Boundary::new("t");
            let waiter = {
                let boundary = boundary.clone();
                tokio::spawn(async move { boundary.wait().await })
            };
            tokio::task::yield_now().await;
            boundary.finalize(Verdict::Failed("boom".into()));
            assert_eq!(waiter.await.unwrap(), Verdict::Failed("boom".into()));
        });
    }

    #[test]
    fn test_double_signal_attributed_to_own_active_boundary() {
        let ctx = RunContext::new(false);
        let boundary = Boundary::new("math.adds");
        ctx.activate(&boundary);

        let completion = Completion::new(boundary.clone(), ctx.clone());
        completion.pass();
        completion.pass();

        assert!(ctx.is_fatal());
        let stray = boundary.stray_override().unwrap();
        assert!(stray.contains("Multiple callbacks or thrown errors received"));
        assert!(stray.contains("math.adds"));
    }

    #[test]
    fn test_stray_fails_open_sibling_boundary() {
        let ctx = RunContext::new(false);

        // A finalized fixture boundary and a sibling still running.
        let fixture = Boundary::new("Before each shared");
        fixture.finalize(Verdict::Passed);
        let sibling = Boundary::new("shared.2");
        ctx.activate(&sibling);

        let stale = Completion::new(fixture, ctx.clone());
        stale.fail("assertion failed !");

        let verdict = tokio_test::block_on(sibling.wait());
        match verdict {
            Verdict::Failed(message) => {
                assert!(message.contains("Before each shared"));
                assert!(message.contains("assertion failed !"));
            }
            Verdict::Passed => panic!("sibling should have been failed by the stray"),
        }
    }

    #[test]
    fn test_stray_without_boundary_debug_collects() {
        let ctx = RunContext::new(true);
        ctx.dispatch_stray("late.test", Some("thrown later"));
        let errors = ctx.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("thrown later"));
        assert!(!ctx.is_fatal());
    }

    #[test]
    fn test_stray_without_boundary_no_debug_drops() {
        let ctx = RunContext::new(false);
        ctx.dispatch_stray("late.test", None);
        assert!(ctx.take_errors().is_empty());
        assert!(!ctx.is_fatal());
    }

    #[test]
    fn test_stray_reported_once_per_active_boundary() {
        let ctx = RunContext::new(false);
        let a = Boundary::new("p.1");
        let b = Boundary::new("p.2");
        ctx.activate(&a);
        ctx.activate(&b);

        ctx.dispatch_stray("Before each p", Some("beep failed !"));

        for boundary in [&a, &b] {
            match tokio_test::block_on(boundary.wait()) {
                Verdict::Failed(message) => assert!(message.contains("beep failed !")),
                Verdict::Passed => panic!("expected stray failure"),
            }
        }
    }

    #[test]
    fn test_deactivated_boundary_not_attributed() {
        let ctx = RunContext::new(true);
        let boundary = Boundary::new("t");
        ctx.activate(&boundary);
        ctx.deactivate(&boundary);

        ctx.dispatch_stray("t", None);
        assert!(boundary.stray_override().is_none());
        assert_eq!(ctx.take_errors().len(), 1);
    }
}
