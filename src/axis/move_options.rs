use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub wait: bool,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl MoveOptions {
    pub fn new() -> Self {
        Self {
            wait: true,
            timeout: None,
            cancel: None,
        }
    }

    pub fn no_wait() -> Self {
        Self::new().with_wait(false)
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self::new()
    }
}
