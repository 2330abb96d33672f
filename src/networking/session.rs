//! Per-connection state owned by the I/O loop
//!
//! A [`Session`] is built fresh for every successful handshake and dropped
//! with its socket when the loop exits. Nothing in here is reused across
//! reconnects.

use crate::config::NetworkTuning;
use crate::networking::mailbox::SessionMailboxes;
use crate::networking::pending::PendingRequests;
use crate::networking::protocol::codec::{self, FrameAssembler, RelayFrame};
use crate::networking::telemetry::{TelemetrySnapshot, TelemetryTracker};
use crate::networking::transport::TcpTransport;
use crate::networking::{SyncError, SyncResult};
use crate::world::wardrobe::OutboundClothesFilter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const READ_CHUNK: usize = 8192;

/// A framed request partly or not yet written to the socket
#[derive(Debug)]
struct PendingWrite {
    bytes: Vec<u8>,
    offset: usize,
    /// Wardrobe group carried by this request, remembered once fully sent
    wardrobe: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    transport: TcpTransport,
    mailboxes: Arc<SessionMailboxes>,
    pending: PendingRequests,
    telemetry: TelemetryTracker,
    assembler: FrameAssembler,
    clothes_filter: OutboundClothesFilter,
    write: Option<PendingWrite>,
    last_send: Option<Instant>,
    send_interval: Duration,
    tuning: NetworkTuning,
    /// Wardrobe captures not yet handed to the consumer
    wardrobe_backlog: HashMap<String, Vec<String>>,
    read_buf: Box<[u8]>,
}

impl Session {
    pub fn new(
        transport: TcpTransport,
        mailboxes: Arc<SessionMailboxes>,
        tuning: NetworkTuning,
        send_interval: Duration,
        handshake_leftover: &[u8],
    ) -> Self {
        let mut assembler = FrameAssembler::new(tuning.max_partial_frame);
        if !handshake_leftover.is_empty() {
            match assembler.push(handshake_leftover) {
                Ok(assembled) if !assembled.frames.is_empty() => {
                    debug!("Discarding {} unsolicited frames after handshake", assembled.frames.len())
                }
                Ok(_) => {}
                Err(e) => debug!("Discarding handshake leftover: {}", e),
            }
        }

        Self {
            transport,
            mailboxes,
            pending: PendingRequests::new(tuning.max_in_flight),
            telemetry: TelemetryTracker::new(tuning.telemetry_window()),
            assembler,
            clothes_filter: OutboundClothesFilter::new(),
            write: None,
            last_send: None,
            send_interval,
            tuning,
            wardrobe_backlog: HashMap::new(),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Run one loop iteration: send if due, then receive
    ///
    /// Only connection-level errors are returned; everything else is
    /// handled here and retried on the next iteration.
    pub fn step(&mut self) -> SyncResult<Option<TelemetrySnapshot>> {
        self.expire_pending(Instant::now());
        self.send_phase()?;
        self.receive_phase()?;
        Ok(self.telemetry.maybe_publish(Instant::now()))
    }

    /// Free in-flight slots held by requests the relay never answered
    fn expire_pending(&mut self, now: Instant) {
        let expired = self.pending.expire(now, self.tuning.response_timeout());
        if expired > 0 {
            debug!("{} requests went unanswered, releasing their slots", expired);
            self.telemetry.record_expired(expired);
        }
    }

    fn send_due(&self, now: Instant) -> bool {
        self.last_send
            .map_or(true, |last| now.saturating_duration_since(last) >= self.send_interval)
    }

    fn send_phase(&mut self) -> SyncResult<()> {
        if self.write.is_none() {
            let now = Instant::now();
            if !self.send_due(now) {
                return Ok(());
            }
            if self.pending.is_full() {
                trace!("{} requests in flight, holding send", self.pending.len());
                return Ok(());
            }

            let body = match self.mailboxes.outgoing.take(self.tuning.io_lock_timeout()) {
                Ok(Some(body)) if !body.is_empty() => body,
                Ok(_) | Err(SyncError::LockContention) => return Ok(()),
                Err(e) => return Err(e),
            };

            let (body, wardrobe) = self.clothes_filter.filter(&body);
            self.write = Some(PendingWrite {
                bytes: codec::frame(body),
                offset: 0,
                wardrobe,
            });
            self.last_send = Some(now);
        }

        self.flush()
    }

    fn flush(&mut self) -> SyncResult<()> {
        let deadline = Instant::now() + self.tuning.send_timeout();
        loop {
            let Some(write) = self.write.as_mut() else {
                return Ok(());
            };

            if write.offset >= write.bytes.len() {
                let wardrobe = write.wardrobe.take();
                self.write = None;
                self.pending.push(Instant::now());
                self.clothes_filter.commit(wardrobe);
                return Ok(());
            }

            if Instant::now() >= deadline {
                self.telemetry.record_send_timeout();
                debug!(
                    "Send timed out with {} of {} bytes written",
                    write.offset,
                    write.bytes.len()
                );
                return Ok(());
            }

            if !self.transport.wait_writable(self.tuning.send_wait())? {
                continue;
            }
            let written = self.transport.try_write(&write.bytes[write.offset..])?;
            write.offset += written;
        }
    }

    fn receive_phase(&mut self) -> SyncResult<()> {
        if !self.transport.wait_readable(self.tuning.receive_wait())? {
            self.telemetry.record_receive_timeout();
            return self.deliver(None);
        }

        let mut frames = Vec::new();
        let mut received = false;
        let mut carried_partial = false;
        while let Some(n) = self.transport.try_read(&mut self.read_buf)? {
            received = true;
            let assembled = self.assembler.push(&self.read_buf[..n])?;
            frames.extend(assembled.frames);
            carried_partial = assembled.carried_partial;
        }

        if !received {
            self.telemetry.record_receive_timeout();
            return self.deliver(None);
        }
        self.telemetry.record_receive();
        if carried_partial {
            self.telemetry.record_partial_frame();
        }
        if frames.is_empty() {
            return self.deliver(None);
        }

        let latest = self.process_frames(frames);
        self.deliver(Some(latest))
    }

    /// Match frames to pending requests and keep only the newest one
    fn process_frames(&mut self, frames: Vec<String>) -> RelayFrame {
        let now = Instant::now();
        let newest = frames.len() - 1;
        if newest > 0 {
            debug!("Skipping {} stale frames in favour of the newest", newest);
        }

        let mut latest = RelayFrame::default();
        for (index, text) in frames.into_iter().enumerate() {
            let frame = codec::decode_response(&text);
            for (avatar_id, items) in frame.wardrobes() {
                self.wardrobe_backlog
                    .insert(avatar_id.to_string(), items.to_vec());
            }

            let sent_at = self.pending.pop();
            if index == newest {
                match sent_at {
                    Some(sent_at) => self.telemetry.record_response(
                        now.saturating_duration_since(sent_at),
                        self.pending.len() + 1,
                    ),
                    None => debug!("Frame arrived with no request in flight"),
                }
                latest = frame;
            }
        }
        latest
    }

    fn deliver(&mut self, frame: Option<RelayFrame>) -> SyncResult<()> {
        if frame.is_none() && self.wardrobe_backlog.is_empty() {
            return Ok(());
        }
        match self.mailboxes.deliver_incoming(
            frame,
            &mut self.wardrobe_backlog,
            self.tuning.io_lock_timeout(),
        ) {
            Ok(()) => Ok(()),
            Err(SyncError::LockContention) => {
                trace!("Incoming slot busy, frame dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.transport.shutdown() {
            trace!("Socket shutdown: {}", e);
        }
        debug!("Session with {} closed", self.transport.peer_addr());
    }
}
