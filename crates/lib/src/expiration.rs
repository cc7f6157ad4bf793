//! Document expiration.
//!
//! Deadlines are stored by the backend next to the documents they belong to.
//! A reaping pass purges every document whose deadline has passed on the
//! instance's [`Clock`](crate::Clock), tombstones included, and notifies the
//! affected collections' listeners.
//!
//! Passes run on a background thread, one per [`Instance`], which drives a
//! current-thread tokio runtime: an interval timer for periodic passes plus
//! a command channel for on-demand passes and shutdown.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::{Error, Instance, Result, instance::WeakInstance};

/// Commands that can be sent to the reaper thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaperCommand {
    /// Run a pass now
    Reap,
    /// Exit the loop
    Shutdown,
}

/// Handle to a running reaper thread.
#[derive(Debug)]
pub(crate) struct Reaper {
    commands: mpsc::UnboundedSender<ReaperCommand>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start the reaper thread for `instance`.
    ///
    /// The thread holds only a weak reference and exits on its own once the
    /// instance is gone.
    pub(crate) fn start(instance: WeakInstance, period: Duration) -> Result<Self> {
        let (commands, rx) = mpsc::unbounded_channel();
        let thread = thread::Builder::new()
            .name("vellum-reaper".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        warn!(error = %e, "Failed to start reaper runtime");
                        return;
                    }
                };
                runtime.block_on(run(instance, period, rx));
            })
            .map_err(Error::Io)?;
        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }

    pub(crate) fn trigger(&self) {
        let _ = self.commands.send(ReaperCommand::Reap);
    }

    /// Stop the loop and wait for the thread, unless called from it.
    pub(crate) fn shutdown(mut self) {
        let _ = self.commands.send(ReaperCommand::Shutdown);
        if let Some(thread) = self.thread.take()
            && thread.thread().id() != thread::current().id()
            && thread.join().is_err()
        {
            warn!("Reaper thread panicked");
        }
    }
}

async fn run(
    instance: WeakInstance,
    period: Duration,
    mut commands: mpsc::UnboundedReceiver<ReaperCommand>,
) {
    async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = period.as_millis() as u64, "Reaper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !reap_pass(&instance) {
                        break;
                    }
                }
                command = commands.recv() => match command {
                    Some(ReaperCommand::Reap) => {
                        if !reap_pass(&instance) {
                            break;
                        }
                    }
                    Some(ReaperCommand::Shutdown) | None => break,
                },
            }
        }
        debug!("Reaper stopped");
    }
    .instrument(info_span!("expiration_reaper"))
    .await
}

/// One pass from the reaper thread; false once the instance is gone.
fn reap_pass(instance: &WeakInstance) -> bool {
    let Some(instance) = instance.upgrade() else {
        return false;
    };
    if instance.is_deleted() {
        return true;
    }
    if let Err(e) = reap_expired(&instance) {
        warn!(error = %e, "Expiration pass failed");
    }
    true
}

/// Purge every document whose deadline has passed; returns how many.
pub(crate) fn reap_expired(instance: &Instance) -> Result<usize> {
    let now = instance.clock().now_millis();
    let mut purged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    {
        let _write = instance.write_lock();
        for (collection, doc_id) in instance.backend().expired(now)? {
            match instance.backend().purge(&collection, &doc_id) {
                Ok(()) => purged.entry(collection).or_default().push(doc_id),
                // Raced with an explicit purge
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }

    let count = purged.values().map(Vec::len).sum();
    if count == 0 {
        trace!(now, "Nothing expired");
        return Ok(0);
    }
    info!(now, count, "Purged expired documents");
    for (collection, doc_ids) in purged {
        instance.record_changes(&collection, doc_ids);
    }
    Ok(count)
}
