//! Wire codec for the relay protocol
//!
//! Messages are UTF-8 text. A message is a sequence of field-groups separated
//! by `;`, fields inside a group are separated by `,`, and every message ends
//! with `|`. Requests lead with the avatar id as their own group:
//!
//! ```text
//! Alice;hc,1,2,3,1,0,0,0;CLOTHES,shoe1,shoe2|
//! ```
//!
//! Relay responses repeat the avatar id inside every group instead:
//!
//! ```text
//! Bob,hc,1,2,3,1,0,0,0;Bob,CLOTHES,hat|
//! ```
//!
//! Decoding works group by group. A group that cannot be decoded is logged
//! and skipped; it never poisons the rest of the message.

use crate::networking::protocol::targets::TargetName;
use crate::networking::{SyncError, SyncResult};
use bytes::BytesMut;
use glam::{Quat, Vec3};
use std::fmt::Write;
use tracing::{debug, warn};

pub const TERMINATOR: u8 = b'|';
pub const GROUP_SEPARATOR: char = ';';
pub const FIELD_SEPARATOR: char = ',';

/// Token that marks a wardrobe field-group
pub const CLOTHES_TOKEN: &str = "CLOTHES";

/// Body of a spectator request
pub const SPECTATOR_BODY: &str = "S";

/// Relay reply meaning "no peer data this tick"
pub const NO_DATA: &str = "none";

/// Fewest `;`-separated parts the relay answers in a pose request
pub const MIN_REQUEST_PARTS: usize = 3;

pub const HANDSHAKE_MAGIC: &[u8; 9] = b"INITFRAME";
pub const PROTOCOL_VERSION: (u8, u8, u8) = (1, 0, 0);
pub const HANDSHAKE_OK: &str = "client_version: OK";

/// Numeric fields of a pose group: position xyz then orientation wxyz
const POSE_NUMBERS: usize = 7;

/// One target's transform as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSample {
    pub target: TargetName,
    pub position: Vec3,
    pub orientation: Quat,
}

/// A locally published pose update
#[derive(Debug, Clone, PartialEq)]
pub struct PoseUpdate {
    pub avatar_id: String,
    pub targets: Vec<TargetSample>,
    pub wardrobe: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Ask for a snapshot without publishing anything
    Spectator,
    Pose(PoseUpdate),
}

/// One decoded field-group of a relay response
#[derive(Debug, Clone, PartialEq)]
pub enum RelayGroup {
    Pose { avatar_id: String, sample: TargetSample },
    Wardrobe { avatar_id: String, items: Vec<String> },
}

impl RelayGroup {
    pub fn avatar_id(&self) -> &str {
        match self {
            RelayGroup::Pose { avatar_id, .. } | RelayGroup::Wardrobe { avatar_id, .. } => avatar_id,
        }
    }
}

/// A fully parsed relay response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayFrame {
    pub groups: Vec<RelayGroup>,
    /// Field-groups dropped because they were malformed
    pub skipped: usize,
}

impl RelayFrame {
    pub fn wardrobes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().filter_map(|group| match group {
            RelayGroup::Wardrobe { avatar_id, items } => Some((avatar_id.as_str(), items.as_slice())),
            RelayGroup::Pose { .. } => None,
        })
    }
}

/// Whether a string can travel as a single field without breaking framing
pub fn is_wire_safe(field: &str) -> bool {
    !field.is_empty()
        && !field
            .chars()
            .any(|c| c == GROUP_SEPARATOR || c == FIELD_SEPARATOR || c == TERMINATOR as char)
}

/// Whether the relay will answer this request body
///
/// The relay silently drops a pose request with fewer than
/// [`MIN_REQUEST_PARTS`] parts, e.g. `Alice;hc,0,0,0,1,0,0,0`.
pub fn relay_answers(body: &str) -> bool {
    body == SPECTATOR_BODY || body.split(GROUP_SEPARATOR).count() >= MIN_REQUEST_PARTS
}

/// Append `tok,px,py,pz,qw,qx,qy,qz` to `out`
pub fn write_pose_group(out: &mut String, sample: &TargetSample) {
    let p = sample.position;
    let q = sample.orientation;
    // f32 Display is the shortest text that parses back to the same value
    let _ = write!(
        out,
        "{},{},{},{},{},{},{},{}",
        sample.target.short_token(),
        p.x,
        p.y,
        p.z,
        q.w,
        q.x,
        q.y,
        q.z
    );
}

/// Append `CLOTHES,item1,item2,...` to `out`
pub fn write_wardrobe_group<'a>(out: &mut String, items: impl IntoIterator<Item = &'a str>) {
    out.push_str(CLOTHES_TOKEN);
    for item in items {
        out.push(FIELD_SEPARATOR);
        out.push_str(item);
    }
}

/// Encode a request body (without the terminator)
pub fn encode_request(request: &Request) -> String {
    match request {
        Request::Spectator => SPECTATOR_BODY.to_string(),
        Request::Pose(update) => {
            let mut out = String::with_capacity(32 + update.targets.len() * 64);
            out.push_str(&update.avatar_id);
            for sample in &update.targets {
                out.push(GROUP_SEPARATOR);
                write_pose_group(&mut out, sample);
            }
            if let Some(items) = &update.wardrobe {
                out.push(GROUP_SEPARATOR);
                write_wardrobe_group(&mut out, items.iter().map(String::as_str));
            }
            out
        }
    }
}

/// Terminate a body for transmission
pub fn frame(body: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.extend_from_slice(body.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}

fn strip_terminator(text: &str) -> &str {
    text.strip_suffix(TERMINATOR as char).unwrap_or(text)
}

fn malformed(group: &str, reason: impl Into<String>) -> SyncError {
    SyncError::MalformedGroup {
        group: group.to_string(),
        reason: reason.into(),
    }
}

fn parse_number(group: &str, field: &str) -> SyncResult<f32> {
    let value: f32 = field
        .trim()
        .parse()
        .map_err(|_| malformed(group, format!("'{}' is not a number", field)))?;
    if !value.is_finite() {
        return Err(malformed(group, format!("'{}' is not finite", field)));
    }
    Ok(value)
}

/// Decode `token` plus its seven numeric fields
fn parse_pose(group: &str, token: &str, numbers: &[&str]) -> SyncResult<TargetSample> {
    if numbers.len() != POSE_NUMBERS {
        return Err(malformed(
            group,
            format!("expected {} numeric fields, got {}", POSE_NUMBERS, numbers.len()),
        ));
    }
    let target = TargetName::from_short(token)?;
    let mut values = [0.0f32; POSE_NUMBERS];
    for (slot, field) in values.iter_mut().zip(numbers) {
        *slot = parse_number(group, field)?;
    }
    Ok(TargetSample {
        target,
        position: Vec3::new(values[0], values[1], values[2]),
        orientation: Quat::from_xyzw(values[4], values[5], values[6], values[3]),
    })
}

fn is_empty_group(group: &str) -> bool {
    let trimmed = group.trim();
    trimmed.is_empty() || trimmed == NO_DATA
}

/// Decode a request body as produced by [`encode_request`]
///
/// Malformed target groups are skipped. Only a missing avatar id fails the
/// whole request.
pub fn decode_request(text: &str) -> SyncResult<Request> {
    let body = strip_terminator(text);
    if body == SPECTATOR_BODY {
        return Ok(Request::Spectator);
    }

    let mut groups = body.split(GROUP_SEPARATOR);
    let avatar_id = groups.next().unwrap_or_default();
    if !is_wire_safe(avatar_id) {
        return Err(malformed(avatar_id, "missing avatar id"));
    }

    let mut update = PoseUpdate {
        avatar_id: avatar_id.to_string(),
        targets: Vec::new(),
        wardrobe: None,
    };
    for group in groups {
        if is_empty_group(group) {
            continue;
        }
        let fields: Vec<&str> = group.split(FIELD_SEPARATOR).collect();
        if fields[0] == CLOTHES_TOKEN {
            update.wardrobe = Some(fields[1..].iter().map(|s| s.to_string()).collect());
            continue;
        }
        match parse_pose(group, fields[0], &fields[1..]) {
            Ok(sample) => update.targets.push(sample),
            Err(e) => warn!("Skipping request group: {}", e),
        }
    }
    Ok(Request::Pose(update))
}

/// Decode a relay response, skipping malformed field-groups
pub fn decode_response(text: &str) -> RelayFrame {
    let mut frame = RelayFrame::default();
    for group in strip_terminator(text).split(GROUP_SEPARATOR) {
        if is_empty_group(group) {
            continue;
        }
        match decode_relay_group(group) {
            Ok(decoded) => frame.groups.push(decoded),
            Err(e) => {
                warn!("Skipping relay group: {}", e);
                frame.skipped += 1;
            }
        }
    }
    frame
}

fn decode_relay_group(group: &str) -> SyncResult<RelayGroup> {
    let fields: Vec<&str> = group.split(FIELD_SEPARATOR).collect();
    if fields.len() < 2 {
        return Err(malformed(group, "missing target token"));
    }
    let avatar_id = fields[0];
    if avatar_id.is_empty() {
        return Err(malformed(group, "missing avatar id"));
    }
    if fields[1] == CLOTHES_TOKEN {
        return Ok(RelayGroup::Wardrobe {
            avatar_id: avatar_id.to_string(),
            items: fields[2..]
                .iter()
                .filter(|item| !item.is_empty())
                .map(|item| item.to_string())
                .collect(),
        });
    }
    let sample = parse_pose(group, fields[1], &fields[2..])?;
    Ok(RelayGroup::Pose {
        avatar_id: avatar_id.to_string(),
        sample,
    })
}

/// Split a request body into everything before its last group and that
/// group, when the last group is a wardrobe group
pub fn split_trailing_wardrobe(body: &str) -> Option<(&str, &str)> {
    let (head, last) = body.rsplit_once(GROUP_SEPARATOR)?;
    let is_wardrobe = last == CLOTHES_TOKEN
        || last
            .strip_prefix(CLOTHES_TOKEN)
            .map_or(false, |rest| rest.starts_with(FIELD_SEPARATOR));
    is_wardrobe.then_some((head, last))
}

/// Build the initial handshake frame
pub fn handshake_frame(scene_id: &str) -> Vec<u8> {
    let (major, minor, patch) = PROTOCOL_VERSION;
    let mut bytes = Vec::with_capacity(HANDSHAKE_MAGIC.len() + 4 + scene_id.len());
    bytes.extend_from_slice(HANDSHAKE_MAGIC);
    bytes.extend_from_slice(&[major, minor, patch]);
    bytes.extend_from_slice(scene_id.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}

/// What the relay said in reply to the handshake
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandshakeReply {
    /// Informational lines the relay attached, e.g. a scene mismatch warning
    pub notices: Vec<String>,
}

/// Validate the relay's handshake reply
pub fn parse_handshake_reply(text: &str) -> SyncResult<HandshakeReply> {
    let body = strip_terminator(text);
    if !body.contains(HANDSHAKE_OK) {
        return Err(SyncError::HandshakeRejected {
            reason: body.trim().to_string(),
        });
    }
    let notices = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains(HANDSHAKE_OK))
        .map(str::to_string)
        .collect();
    Ok(HandshakeReply { notices })
}

/// Complete frames extracted from one chunk of received bytes
#[derive(Debug, Default)]
pub struct Assembled {
    pub frames: Vec<String>,
    /// Bytes of an unfinished frame were left over after the last terminator
    pub carried_partial: bool,
}

/// Reassembles `|`-terminated frames from a byte stream
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    max_partial: usize,
}

impl FrameAssembler {
    pub fn new(max_partial: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_partial,
        }
    }

    /// Feed received bytes, returning every frame they completed
    pub fn push(&mut self, data: &[u8]) -> SyncResult<Assembled> {
        self.buffer.extend_from_slice(data);

        let mut assembled = Assembled::default();
        while let Some(end) = self.buffer.iter().position(|&b| b == TERMINATOR) {
            let chunk = self.buffer.split_to(end + 1);
            assembled
                .frames
                .push(String::from_utf8_lossy(&chunk[..end]).into_owned());
        }

        if self.buffer.len() > self.max_partial {
            let limit = self.max_partial;
            self.buffer.clear();
            return Err(SyncError::FrameOverflow { limit });
        }

        assembled.carried_partial = !assembled.frames.is_empty() && !self.buffer.is_empty();
        if assembled.carried_partial {
            debug!("Carrying {} bytes of a partial frame", self.buffer.len());
        }
        Ok(assembled)
    }

    /// Bytes of an unterminated frame carried to the next read
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}
