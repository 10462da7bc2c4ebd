//! Greeting bubble timers.
//!
//! Exactly two show events per mount, each followed by a hide event. A show
//! that fires while the panel is open does nothing; the timers themselves are
//! only cancelled on unmount.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::session::ChatShared;
use crate::config::GreetingConfig;

/// Handles of the scheduled greeting timers.
#[derive(Debug)]
pub struct GreetingSchedule {
    handles: Vec<JoinHandle<()>>,
}

impl GreetingSchedule {
    /// Spawn the show/hide timers, measured from now.
    pub(crate) fn spawn(runtime: &Handle, shared: &Arc<ChatShared>, config: &GreetingConfig) -> Self {
        let start = Instant::now();
        let mut handles = Vec::with_capacity(4);

        for offset in config.show_offsets() {
            let show_at = start + offset;
            let hide_at = show_at + config.visible_for;

            let target = Arc::clone(shared);
            handles.push(runtime.spawn(async move {
                sleep_until(show_at).await;
                let shown = target.show_greeting_if_closed();
                debug!(?offset, shown, "Greeting timer fired");
            }));

            let target = Arc::clone(shared);
            handles.push(runtime.spawn(async move {
                sleep_until(hide_at).await;
                target.hide_greeting();
            }));
        }

        Self { handles }
    }

    /// Abort every timer that has not fired yet.
    pub fn cancel(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Number of timers still waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for GreetingSchedule {
    fn drop(&mut self) {
        self.cancel();
    }
}
