//! Background I/O thread
//!
//! Drives a [`Session`] until its stop flag is raised or a connection-level
//! error ends it. The thread signals its exit over a channel so the owner
//! can wait for it with a bound before joining.

use crate::networking::session::Session;
use crate::networking::state::SharedConnectionState;
use crate::networking::SyncResult;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct SyncLoopHandle {
    thread: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    exited: Receiver<()>,
    generation: u64,
}

impl SyncLoopHandle {
    pub fn spawn(
        session: Session,
        shared: Arc<SharedConnectionState>,
        generation: u64,
        loop_sleep: Duration,
    ) -> SyncResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (exit_tx, exited) = bounded(1);

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(format!("avatar-sync-io-{}", generation))
            .spawn(move || {
                run(session, &thread_stop, &shared, generation, loop_sleep);
                let _ = exit_tx.send(());
            })?;

        Ok(Self {
            thread,
            stop,
            exited,
            generation,
        })
    }

    /// Raise the stop flag and wait up to `timeout` for the loop to exit
    ///
    /// Returns false if the thread had to be detached.
    pub fn stop(self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.thread.join().is_err() {
                    error!("Sync loop {} panicked", self.generation);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Sync loop {} did not exit within {:?}, detaching",
                    self.generation, timeout
                );
                false
            }
        }
    }
}

fn run(
    mut session: Session,
    stop: &AtomicBool,
    shared: &SharedConnectionState,
    generation: u64,
    loop_sleep: Duration,
) {
    info!("Sync loop {} started", generation);

    while !stop.load(Ordering::Acquire) {
        match session.step() {
            Ok(Some(snapshot)) => {
                debug!(
                    "Telemetry: latency {:.1} ms, in flight {:.1}, receive cycles {:.1}, {} responses, {} partial frames, {} send timeouts, {} expired requests",
                    snapshot.avg_latency_ms,
                    snapshot.avg_in_flight,
                    snapshot.avg_receive_cycles,
                    snapshot.responses,
                    snapshot.partial_frames,
                    snapshot.send_timeouts,
                    snapshot.expired_requests
                );
                shared.publish_telemetry(snapshot);
            }
            Ok(None) => {}
            Err(e) if e.is_fatal() => {
                error!("Sync loop {} stopping: {}", generation, e);
                shared.fault_session(generation, e);
                break;
            }
            Err(e) => debug!("Sync loop iteration skipped: {}", e),
        }
        thread::sleep(loop_sleep);
    }

    // dropping the session closes the socket
    drop(session);
    info!("Sync loop {} exited", generation);
}
