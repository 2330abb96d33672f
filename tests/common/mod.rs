#![allow(dead_code)]

use avatar_sync::config::SyncSettings;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How the relay answers the handshake
#[derive(Debug, Clone)]
pub enum Handshake {
    Accept,
    AcceptWithNotice(String),
    Reject(String),
    /// Read the handshake and never answer
    Silent,
}

/// What the relay does with one request
pub enum Reply {
    Respond(String),
    Ignore,
    Close,
}

type Responder = Box<dyn FnMut(&str) -> Reply + Send>;

/// Minimal relay on a loopback port, serving connections one after another
pub struct LoopbackRelay {
    pub addr: SocketAddr,
    requests: Receiver<String>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LoopbackRelay {
    pub fn start(handshake: Handshake, responder: impl FnMut(&str) -> Reply + Send + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, requests) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let mut responder: Responder = Box::new(responder);
        let thread = thread::spawn(move || {
            while !thread_stop.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((socket, _)) => {
                        serve(socket, &handshake, &mut responder, &request_tx, &thread_stop)
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5))
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            requests,
            stop,
            thread: Some(thread),
        }
    }

    /// Relay that answers every request with `none`
    pub fn answering_none() -> Self {
        Self::start(Handshake::Accept, |_| Reply::Respond("none".to_string()))
    }

    /// Settings pointing at this relay with short timeouts
    pub fn settings(&self, local_avatar: Option<&str>) -> SyncSettings {
        let mut settings = SyncSettings {
            server_host: self.addr.ip().to_string(),
            server_port: self.addr.port(),
            local_avatar: local_avatar.map(str::to_string),
            scene_id: "test-scene".to_string(),
            update_frequency_hz: 200,
            ..SyncSettings::default()
        };
        settings.network.connect_timeout_ms = 1000;
        settings.network.handshake_timeout_ms = 300;
        settings.network.join_timeout_ms = 2000;
        settings.network.telemetry_window_ms = 100;
        settings
    }

    pub fn next_request(&self, timeout: Duration) -> Option<String> {
        self.requests.recv_timeout(timeout).ok()
    }

    pub fn drain_requests(&self) -> Vec<String> {
        self.requests.try_iter().collect()
    }
}

impl Drop for LoopbackRelay {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn read_frames(
    socket: &mut TcpStream,
    buffer: &mut Vec<u8>,
    stop: &AtomicBool,
) -> Option<Vec<String>> {
    let mut chunk = [0u8; 4096];
    loop {
        if stop.load(Ordering::Acquire) {
            return None;
        }
        match socket.read(&mut chunk) {
            Ok(0) => return None,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                let mut frames = Vec::new();
                while let Some(end) = buffer.iter().position(|&b| b == b'|') {
                    let frame: Vec<u8> = buffer.drain(..=end).collect();
                    frames.push(String::from_utf8_lossy(&frame[..end]).into_owned());
                }
                if !frames.is_empty() {
                    return Some(frames);
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return None,
        }
    }
}

fn serve(
    mut socket: TcpStream,
    handshake: &Handshake,
    responder: &mut Responder,
    requests: &Sender<String>,
    stop: &AtomicBool,
) {
    socket.set_nonblocking(false).unwrap();
    socket
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    let mut buffer = Vec::new();

    // the handshake body is binary up to its terminator
    if read_frames(&mut socket, &mut buffer, stop).is_none() {
        return;
    }
    let reply = match handshake {
        Handshake::Accept => "client_version: OK|".to_string(),
        Handshake::AcceptWithNotice(notice) => format!("{}\nclient_version: OK|", notice),
        Handshake::Reject(reason) => format!("{}|", reason),
        Handshake::Silent => {
            while !stop.load(Ordering::Acquire) {
                let mut sink = [0u8; 256];
                match socket.read(&mut sink) {
                    Ok(0) => return,
                    _ => thread::sleep(Duration::from_millis(5)),
                }
            }
            return;
        }
    };
    if socket.write_all(reply.as_bytes()).is_err() {
        return;
    }
    if let Handshake::Reject(_) = handshake {
        return;
    }

    while let Some(frames) = read_frames(&mut socket, &mut buffer, stop) {
        for frame in frames {
            let _ = requests.send(frame.clone());
            match responder(&frame) {
                Reply::Respond(body) => {
                    if socket.write_all(format!("{}|", body).as_bytes()).is_err() {
                        return;
                    }
                }
                Reply::Ignore => {}
                Reply::Close => return,
            }
        }
    }
}

/// Keep calling `step` until `done` holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut step: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if step() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
