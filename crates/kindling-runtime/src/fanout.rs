//! Bounded fan-out over fallible closures.
//!
//! `until_error` returns the first failure, `coalesce` waits for everything
//! and aggregates. Both give up after a deadline. Each task runs on its own
//! thread with a `CancelToken` installed; the token fires when the fan-out
//! stops waiting (first error, or deadline), and `LocalRunner` kills any
//! subprocess the abandoned task is still blocked on.

use std::cell::RefCell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(60);

pub type Task<E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'static>;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

thread_local! {
    static CURRENT_TOKEN: RefCell<Option<CancelToken>> = const { RefCell::new(None) };
}

/// The cancellation token of the fan-out task running on this thread.
pub fn current_token() -> Option<CancelToken> {
    CURRENT_TOKEN.with(|t| t.borrow().clone())
}

fn with_token<R>(token: CancelToken, f: impl FnOnce() -> R) -> R {
    CURRENT_TOKEN.with(|t| *t.borrow_mut() = Some(token));
    let result = f();
    CURRENT_TOKEN.with(|t| *t.borrow_mut() = None);
    result
}

#[derive(Debug)]
pub enum FanOutError<E> {
    Timeout(Duration),
    Failed(E),
    Aggregate(Vec<E>),
    Panicked,
}

impl<E: fmt::Display> fmt::Display for FanOutError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanOutError::Timeout(waited) => write!(
                f,
                "timed out after {}s waiting for concurrent tasks",
                waited.as_secs()
            ),
            FanOutError::Failed(e) => write!(f, "{e}"),
            FanOutError::Aggregate(errors) => {
                write!(f, "{} concurrent tasks failed", errors.len())?;
                for e in errors {
                    write!(f, "; {e}")?;
                }
                Ok(())
            }
            FanOutError::Panicked => write!(f, "a concurrent task panicked"),
        }
    }
}

enum Outcome<E> {
    Done(Result<(), E>),
    Panicked,
}

fn launch<E: Send + 'static>(tasks: Vec<Task<E>>, token: &CancelToken) -> mpsc::Receiver<Outcome<E>> {
    let (tx, rx) = mpsc::channel();
    for task in tasks {
        let tx = tx.clone();
        let token = token.clone();
        thread::spawn(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(|| with_token(token, task))) {
                Ok(result) => Outcome::Done(result),
                Err(_) => Outcome::Panicked,
            };
            // The receiver is gone once the fan-out has given up on us.
            let _ = tx.send(outcome);
        });
    }
    rx
}

fn fanout_token() -> CancelToken {
    current_token().map_or_else(CancelToken::new, |t| t.child())
}

/// Run all tasks concurrently and return the first error observed.
pub fn until_error<E: Send + 'static>(tasks: Vec<Task<E>>) -> Result<(), FanOutError<E>> {
    until_error_within(tasks, DEFAULT_FANOUT_TIMEOUT)
}

pub fn until_error_within<E: Send + 'static>(
    tasks: Vec<Task<E>>,
    timeout: Duration,
) -> Result<(), FanOutError<E>> {
    let count = tasks.len();
    if count == 0 {
        return Ok(());
    }
    let token = fanout_token();
    let rx = launch(tasks, &token);
    let deadline = Instant::now() + timeout;

    for _ in 0..count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Outcome::Done(Ok(()))) => {}
            Ok(Outcome::Done(Err(e))) => {
                token.cancel();
                return Err(FanOutError::Failed(e));
            }
            Ok(Outcome::Panicked) | Err(RecvTimeoutError::Disconnected) => {
                token.cancel();
                return Err(FanOutError::Panicked);
            }
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                return Err(FanOutError::Timeout(timeout));
            }
        }
    }
    Ok(())
}

/// Run all tasks concurrently, wait for all of them, and report every failure.
pub fn coalesce<E: Send + 'static>(tasks: Vec<Task<E>>) -> Result<(), FanOutError<E>> {
    coalesce_within(tasks, DEFAULT_FANOUT_TIMEOUT)
}

pub fn coalesce_within<E: Send + 'static>(
    tasks: Vec<Task<E>>,
    timeout: Duration,
) -> Result<(), FanOutError<E>> {
    let count = tasks.len();
    if count == 0 {
        return Ok(());
    }
    let token = fanout_token();
    let rx = launch(tasks, &token);
    let deadline = Instant::now() + timeout;

    let mut errors = Vec::new();
    let mut panicked = false;
    for _ in 0..count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Outcome::Done(Ok(()))) => {}
            Ok(Outcome::Done(Err(e))) => errors.push(e),
            Ok(Outcome::Panicked) | Err(RecvTimeoutError::Disconnected) => panicked = true,
            Err(RecvTimeoutError::Timeout) => {
                token.cancel();
                return Err(FanOutError::Timeout(timeout));
            }
        }
    }

    if panicked {
        return Err(FanOutError::Panicked);
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(FanOutError::Failed(errors.remove(0))),
        _ => Err(FanOutError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn ok_task(counter: &Arc<AtomicUsize>) -> Task<String> {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn until_error_empty_is_ok() {
        until_error::<String>(Vec::new()).unwrap();
    }

    #[test]
    fn until_error_runs_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = (0..8).map(|_| ok_task(&counter)).collect();
        until_error(tasks).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn until_error_returns_a_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = vec![ok_task(&counter), ok_task(&counter)];
        tasks.push(Box::new(|| Err("boom".to_owned())));
        match until_error(tasks) {
            Err(FanOutError::Failed(e)) => assert_eq!(e, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tasks_run_concurrently() {
        let start = Instant::now();
        let tasks: Vec<Task<String>> = (0..4)
            .map(|_| -> Task<String> {
                Box::new(|| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(())
                })
            })
            .collect();
        until_error(tasks).unwrap();
        assert!(start.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn until_error_times_out_and_cancels() {
        let seen_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen_cancel);
        let tasks: Vec<Task<String>> = vec![Box::new(move || {
            let token = current_token().unwrap();
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })];
        let err = until_error_within(tasks, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, FanOutError::Timeout(_)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !seen_cancel.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(seen_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn coalesce_single_error_is_failed() {
        let tasks: Vec<Task<String>> = vec![Box::new(|| Ok(())), Box::new(|| Err("one".to_owned()))];
        assert!(matches!(coalesce(tasks), Err(FanOutError::Failed(e)) if e == "one"));
    }

    #[test]
    fn coalesce_aggregates_all_errors() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let tasks: Vec<Task<String>> = (0..3)
            .map(|i| -> Task<String> {
                let finished = Arc::clone(&finished);
                Box::new(move || {
                    finished.lock().unwrap().push(i);
                    if i == 1 {
                        Ok(())
                    } else {
                        Err(format!("task {i}"))
                    }
                })
            })
            .collect();
        match coalesce(tasks) {
            Err(FanOutError::Aggregate(mut errors)) => {
                errors.sort();
                assert_eq!(errors, vec!["task 0", "task 2"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(finished.lock().unwrap().len(), 3);
    }

    #[test]
    fn panicking_task_is_reported() {
        let tasks: Vec<Task<String>> = vec![Box::new(|| -> Result<(), String> { panic!("task blew up") })];
        assert!(matches!(until_error(tasks), Err(FanOutError::Panicked)));
    }

    #[test]
    fn nested_fanout_inherits_parent_cancellation() {
        let parent = CancelToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(!CancelToken::new().child().is_cancelled());
    }

    #[test]
    fn token_is_cleared_after_task() {
        let tasks: Vec<Task<String>> = vec![Box::new(|| {
            assert!(current_token().is_some());
            Ok(())
        })];
        until_error(tasks).unwrap();
        assert!(current_token().is_none());
    }
}
