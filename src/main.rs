//! Headless sync client
//!
//! Usage: `avatar-sync [HOST] [PORT] [AVATAR] [SECONDS]`
//!
//! Settings are loaded from the platform config directory and overridden by
//! the arguments. The client drives an in-memory scene with every target of
//! the local avatar, sways its head so there is something to send, and logs
//! what the relay reports until the time runs out or the connection faults.

use anyhow::{bail, Context, Result};
use avatar_sync::config::{load_settings, SyncSettings};
use avatar_sync::utils::logging::{init_logging, log_system_info};
use avatar_sync::world::{ChannelNotifier, SyncEventKind};
use avatar_sync::{ConnectionState, InMemoryScene, SyncClient, APP_NAME, VERSION};
use glam::{Quat, Vec3};
use std::env;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_AVATAR: &str = "Person";

fn settings_from_args() -> Result<SyncSettings> {
    let mut settings = load_settings().unwrap_or_default();
    let mut args = env::args().skip(1);

    if let Some(host) = args.next() {
        settings.server_host = host;
    }
    if let Some(port) = args.next() {
        settings.server_port = port
            .parse()
            .with_context(|| format!("invalid port '{}'", port))?;
    }
    if let Some(avatar) = args.next() {
        settings.local_avatar = Some(avatar);
    }
    if settings.local_avatar.is_none() && !settings.spectator_mode {
        settings.local_avatar = Some(DEFAULT_AVATAR.to_string());
    }
    Ok(settings)
}

fn run_duration() -> Result<Option<Duration>> {
    match env::args().nth(4) {
        Some(seconds) => {
            let seconds: u64 = seconds
                .parse()
                .with_context(|| format!("invalid duration '{}'", seconds))?;
            Ok(Some(Duration::from_secs(seconds)))
        }
        None => Ok(None),
    }
}

fn main() -> Result<()> {
    init_logging();
    log_system_info();
    info!("Starting {} {}", APP_NAME, VERSION);

    let settings = settings_from_args()?;
    let duration = run_duration()?;

    let mut scene = InMemoryScene::new();
    let local = settings.local_avatar.clone();
    if let Some(local) = &local {
        scene.add_full_rig(local);
    }

    let (notifier, events) = ChannelNotifier::new();
    let tick_interval = settings.network.tick_interval();
    let mut client = SyncClient::new(settings, scene, notifier).context("invalid settings")?;

    client.connect().with_context(|| {
        format!(
            "could not connect to {}:{}",
            client.settings().server_host,
            client.settings().server_port
        )
    })?;

    let started = Instant::now();
    let mut next_tick = started;
    loop {
        if duration.map_or(false, |d| started.elapsed() >= d) {
            break;
        }

        if let Some(local) = &local {
            let phase = started.elapsed().as_secs_f32();
            client.host_mut().move_target(
                local,
                "headControl",
                Vec3::new(0.0, 1.6, 0.0),
                Quat::from_rotation_y(phase.sin() * 0.5),
            );
        }
        client.tick();

        for event in events.try_iter() {
            match event.kind {
                SyncEventKind::PlayerJoined { avatar_id } => info!("{} joined", avatar_id),
                SyncEventKind::PlayerLeft { avatar_id } => info!("{} left", avatar_id),
                SyncEventKind::ServerNotice { message } => warn!("Relay: {}", message),
                SyncEventKind::Telemetry(snapshot) => info!(
                    "Latency {:.1} ms, {:.1} in flight, {} responses",
                    snapshot.avg_latency_ms, snapshot.avg_in_flight, snapshot.responses
                ),
                SyncEventKind::FatalConnectionError { message } => {
                    bail!("connection lost: {}", message)
                }
            }
        }
        if client.state() != ConnectionState::Connected {
            bail!("connection ended in state {}", client.state());
        }

        next_tick += tick_interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    client.disconnect().context("disconnect failed")?;
    info!("Disconnected after {:?}", started.elapsed());
    Ok(())
}
