use tracing::{info, warn};

/// Sink for user-facing progress lines.
///
/// Every `start` is followed by exactly one `end`. The CLI renders these as
/// spinners; library callers get log lines from `LogStatus`.
pub trait Status: Send + Sync {
    fn start(&self, message: &str);
    fn end(&self, success: bool);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatus;

impl Status for LogStatus {
    fn start(&self, message: &str) {
        info!("{message} ...");
    }

    fn end(&self, success: bool) {
        if !success {
            warn!("step failed");
        }
    }
}

/// Ends its step as failed unless `succeed` was called first.
pub(crate) struct StatusStep<'a> {
    status: &'a dyn Status,
    done: bool,
}

impl<'a> StatusStep<'a> {
    pub(crate) fn start(status: &'a dyn Status, message: &str) -> Self {
        status.start(message);
        Self {
            status,
            done: false,
        }
    }

    pub(crate) fn succeed(mut self) {
        self.done = true;
        self.status.end(true);
    }
}

impl Drop for StatusStep<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.status.end(false);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every status line for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingStatus {
        pub(crate) events: Mutex<Vec<String>>,
    }

    impl RecordingStatus {
        pub(crate) fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Status for RecordingStatus {
        fn start(&self, message: &str) {
            self.events.lock().unwrap().push(format!("start {message}"));
        }

        fn end(&self, success: bool) {
            let outcome = if success { "ok" } else { "failed" };
            self.events.lock().unwrap().push(format!("end {outcome}"));
        }
    }

    #[test]
    fn dropped_step_ends_as_failure() {
        let status = RecordingStatus::default();
        {
            let _step = StatusStep::start(&status, "Doing a thing");
        }
        StatusStep::start(&status, "Doing another").succeed();
        assert_eq!(
            status.events(),
            vec![
                "start Doing a thing",
                "end failed",
                "start Doing another",
                "end ok"
            ]
        );
    }
}
