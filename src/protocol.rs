//! Matrio Control frame encoder/decoder.
//!
//! Pure byte-level encoding and decoding of protocol frames plus the mapping
//! between device-native and application values. No I/O happens here.
//!
//! # Frame format
//!
//! ```text
//! 18 96 18 20  <len u32 LE>  <checksum u16 LE>  00 x 10      envelope (20 bytes)
//! "MCU+PAS+"  82  <opcode>  <body...>  26                    payload (len bytes)
//! ```
//!
//! - `len`: payload length in bytes
//! - `checksum`: wrapping 16-bit sum of the payload bytes
//! - zone control bodies are `<value> <zone pattern> FF CC`
//!
//! The device also emits bare frames without envelope, marker or trailer, and
//! accepts renames only in that form:
//!
//! ```text
//! 82  <opcode>  <body...>  CC
//! 82  13  <kind>  <id>  <len>  <name...>  CC                  rename
//! ```

use crate::types::{InputId, Setting, ZoneId};
use crate::zones::ZoneSelector;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Sync marker opening every envelope.
pub const SYNC: [u8; 4] = [0x18, 0x96, 0x18, 0x20];

/// Envelope size: sync (4) + length (4) + checksum (2) + reserved (10).
pub const HEADER_LEN: usize = 20;

/// ASCII marker at the start of every payload.
pub const MARKER: &[u8; 8] = b"MCU+PAS+";

/// Byte following the marker in every payload.
pub const FRAME_START: u8 = 0x82;

/// Last payload byte.
pub const TRAILER: u8 = 0x26;

/// End-of-body byte used by control, name and rename frames.
pub const BODY_END: u8 = 0xCC;

/// Largest payload the decoder accepts; longer declared lengths are noise.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Marker + start + opcode + trailer.
const MIN_PAYLOAD_LEN: usize = MARKER.len() + 3;

/// Number of per-zone tables in a status burst.
const STATUS_TABLES: usize = 7;

/// Body of the status query, as sent by the vendor app.
const STATUS_QUERY_BODY: [u8; 4] = [0xFF, 0xFF, 0xFF, 0x89];

/// Frame opcodes.
pub mod opcode {
    pub const VOLUME: u8 = 0x01;
    pub const TREBLE: u8 = 0x02;
    pub const BASS: u8 = 0x03;
    pub const BALANCE: u8 = 0x05;
    pub const POWER: u8 = 0x08;
    pub const STATUS_QUERY: u8 = 0x0A;
    pub const STATUS: u8 = 0x0C;
    pub const INPUT: u8 = 0x0D;
    pub const MUTE: u8 = 0x0E;
    pub const RENAME: u8 = 0x13;
    pub const NAMES: u8 = 0x15;
}

/// Device dimensions the decoder needs to size zone patterns and tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub zone_count: u8,
    pub input_count: u8,
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self {
            zone_count: crate::types::DEFAULT_ZONE_COUNT,
            input_count: crate::types::DEFAULT_INPUT_COUNT,
        }
    }
}

/// What a rename frame renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Zone,
    Input,
}

impl NameKind {
    fn to_byte(self) -> u8 {
        match self {
            NameKind::Zone => 0x01,
            NameKind::Input => 0x02,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(NameKind::Zone),
            0x02 => Some(NameKind::Input),
            _ => None,
        }
    }
}

/// Full state of one zone as carried in a status burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStatus {
    pub zone: ZoneId,
    pub power: bool,
    pub volume: u8,
    pub mute: bool,
    pub balance: i8,
    pub bass: i8,
    pub treble: i8,
    pub input: InputId,
}

impl ZoneStatus {
    /// Every field of the zone as settings.
    pub fn settings(&self) -> [Setting; 7] {
        [
            Setting::Power(self.power),
            Setting::Volume(self.volume),
            Setting::Mute(self.mute),
            Setting::Balance(self.balance),
            Setting::Bass(self.bass),
            Setting::Treble(self.treble),
            Setting::Input(self.input),
        ]
    }
}

/// Device, zone and input names as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameTable {
    pub device_name: String,
    /// Zone names in zone order; may be shorter than the zone count.
    pub zones: Vec<String>,
    /// Input names in input order; may be shorter than the input count.
    pub inputs: Vec<String>,
}

/// A parsed protocol frame.
///
/// This is the representation of a single message whether it is a command to
/// the device or a report from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Set one field on the selected zones (sent as a command, echoed as a broadcast).
    Control {
        selector: ZoneSelector,
        setting: Setting,
    },
    /// Ask the device for a status burst and name table.
    StatusQuery,
    /// Every zone's full state.
    Status(Vec<ZoneStatus>),
    /// Device, zone and input names.
    Names(NameTable),
    /// Rename a zone or input.
    Rename { kind: NameKind, id: u8, name: String },
    /// Well-framed payload with an opcode this library does not interpret.
    Unknown { opcode: u8, body: Bytes },
}

impl Frame {
    pub fn control(selector: ZoneSelector, setting: Setting) -> Self {
        Frame::Control { selector, setting }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Frame::Control { setting, .. } => setting_opcode(setting),
            Frame::StatusQuery => opcode::STATUS_QUERY,
            Frame::Status(_) => opcode::STATUS,
            Frame::Names(_) => opcode::NAMES,
            Frame::Rename { .. } => opcode::RENAME,
            Frame::Unknown { opcode, .. } => *opcode,
        }
    }
}

/// Result of attempting to decode a frame from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete frame was decoded. The `usize` is the number of bytes
    /// consumed from the input buffer (envelope included).
    Frame(Frame, usize),

    /// The buffer does not yet contain a complete frame.
    Incomplete,

    /// The bytes at the start of the buffer cannot begin a valid frame. The
    /// `usize` is the number of bytes to discard before trying again.
    Invalid(usize),
}

// ---------------------------------------------------------------------------
// Value mapping
// ---------------------------------------------------------------------------

const TONE_CENTER: i32 = 0x0D;
const BALANCE_CENTER: i32 = 0x1F;
const BALANCE_STEPS: i32 = 30;

/// Device volume is offset by one from the 0-38 scale shown to users.
pub fn volume_to_raw(volume: u8) -> u8 {
    volume.saturating_add(1)
}

pub fn volume_from_raw(raw: u8) -> u8 {
    raw.saturating_sub(1)
}

/// Bass and treble: -12..=12 maps onto 0x01..=0x19, centered on 0x0D.
pub fn tone_to_raw(value: i8) -> u8 {
    saturate_u8(value as i32 + TONE_CENTER)
}

pub fn tone_from_raw(raw: u8) -> i8 {
    saturate_i8(raw as i32 - TONE_CENTER)
}

/// Balance: -100..=100 maps onto 0x01..=0x3D, centered on 0x1F.
///
/// The device has 30 steps per side, so application values are quantized to
/// the nearest step. Multiples of 10 survive a round trip exactly.
pub fn balance_to_raw(value: i8) -> u8 {
    saturate_u8(BALANCE_CENTER + div_round(value as i32 * BALANCE_STEPS, 100))
}

pub fn balance_from_raw(raw: u8) -> i8 {
    saturate_i8(div_round((raw as i32 - BALANCE_CENTER) * 100, BALANCE_STEPS))
}

/// The balance the device will report after being sent `value`.
pub fn quantize_balance(value: i8) -> i8 {
    balance_from_raw(balance_to_raw(value))
}

/// Integer division rounding half away from zero.
fn div_round(n: i32, d: i32) -> i32 {
    (n + n.signum() * (d / 2)) / d
}

fn saturate_u8(v: i32) -> u8 {
    v.clamp(u8::MIN as i32, u8::MAX as i32) as u8
}

fn saturate_i8(v: i32) -> i8 {
    v.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

fn setting_opcode(setting: &Setting) -> u8 {
    match setting {
        Setting::Power(_) => opcode::POWER,
        Setting::Volume(_) => opcode::VOLUME,
        Setting::Mute(_) => opcode::MUTE,
        Setting::Balance(_) => opcode::BALANCE,
        Setting::Bass(_) => opcode::BASS,
        Setting::Treble(_) => opcode::TREBLE,
        Setting::Input(_) => opcode::INPUT,
    }
}

fn setting_to_raw(setting: &Setting) -> u8 {
    match *setting {
        Setting::Power(on) => if on { 0x02 } else { 0x01 },
        Setting::Volume(v) => volume_to_raw(v),
        Setting::Mute(muted) => if muted { 0x02 } else { 0x01 },
        Setting::Balance(v) => balance_to_raw(v),
        Setting::Bass(v) | Setting::Treble(v) => tone_to_raw(v),
        Setting::Input(id) => id,
    }
}

fn setting_from_raw(op: u8, raw: u8) -> Option<Setting> {
    let setting = match op {
        opcode::POWER => Setting::Power(raw == 0x02),
        opcode::VOLUME => Setting::Volume(volume_from_raw(raw)),
        opcode::MUTE => Setting::Mute(raw == 0x02),
        opcode::BALANCE => Setting::Balance(balance_from_raw(raw)),
        opcode::BASS => Setting::Bass(tone_from_raw(raw)),
        opcode::TREBLE => Setting::Treble(tone_from_raw(raw)),
        opcode::INPUT => Setting::Input(raw),
        _ => return None,
    };
    Some(setting)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Wrapping 16-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u16 {
    payload
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Encode a frame into raw bytes ready for transmission.
///
/// # Example
///
/// ```
/// use matrio_control::protocol::{decode, encode, DecodeResult, Frame, FrameLayout};
/// use matrio_control::{Setting, ZoneSelector};
///
/// let frame = Frame::control(ZoneSelector::single(3, 8).unwrap(), Setting::Volume(20));
/// let bytes = encode(&frame);
/// assert_eq!(bytes.len(), 42);
/// assert_eq!(
///     decode(&bytes, &FrameLayout::default()),
///     DecodeResult::Frame(frame, 42)
/// );
/// ```
pub fn encode(frame: &Frame) -> Bytes {
    let mut body = BytesMut::new();

    match frame {
        Frame::Control { selector, setting } => {
            body.put_u8(setting_to_raw(setting));
            selector.put_pattern(&mut body);
            // Power-on frames from the vendor app carry two extra pad bytes.
            if *setting == Setting::Power(true) {
                body.put_slice(&[0x02, 0x02]);
            }
            body.put_slice(&[0xFF, BODY_END]);
        }
        Frame::StatusQuery => {
            body.put_slice(&STATUS_QUERY_BODY);
        }
        Frame::Status(zones) => {
            let tables: [fn(&ZoneStatus) -> u8; STATUS_TABLES] = [
                |z| z.input,
                |z| volume_to_raw(z.volume),
                |z| tone_to_raw(z.treble),
                |z| tone_to_raw(z.bass),
                |z| balance_to_raw(z.balance),
                |z| if z.mute { 0x02 } else { 0x01 },
                |z| if z.power { 0x01 } else { 0x02 },
            ];
            for table in tables {
                for zone in zones {
                    body.put_u8(table(zone));
                }
            }
            body.put_slice(&[0xFF, 0xFF, BODY_END]);
        }
        Frame::Names(table) => {
            put_name(&mut body, &table.device_name);
            for name in table.zones.iter().chain(table.inputs.iter()) {
                put_name(&mut body, name);
            }
            body.put_u8(BODY_END);
        }
        Frame::Rename { kind, id, name } => {
            body.put_u8(kind.to_byte());
            body.put_u8(*id);
            put_name(&mut body, name);
            body.put_u8(BODY_END);
            return encode_bare(opcode::RENAME, &body);
        }
        Frame::Unknown { body: raw, .. } => {
            body.put_slice(raw);
        }
    }

    encode_payload(frame.opcode(), &body)
}

/// Wrap an opcode and body in the payload framing and envelope.
fn encode_payload(op: u8, body: &[u8]) -> Bytes {
    let payload_len = MIN_PAYLOAD_LEN + body.len();
    let mut payload = BytesMut::with_capacity(payload_len);
    payload.put_slice(MARKER);
    payload.put_u8(FRAME_START);
    payload.put_u8(op);
    payload.put_slice(body);
    payload.put_u8(TRAILER);

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);
    buf.put_slice(&SYNC);
    buf.put_u32_le(payload_len as u32);
    buf.put_u16_le(checksum(&payload));
    buf.put_bytes(0, HEADER_LEN - 10);
    buf.put_slice(&payload);
    buf.freeze()
}

/// Bare frame: start byte and opcode followed by a body that ends in `0xCC`.
fn encode_bare(op: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + body.len());
    buf.put_u8(FRAME_START);
    buf.put_u8(op);
    buf.put_slice(body);
    buf.freeze()
}

/// Length-prefixed name; names longer than 255 bytes are cut at a char boundary.
fn put_name(buf: &mut BytesMut, name: &str) {
    let mut end = name.len().min(u8::MAX as usize);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    buf.put_u8(end as u8);
    buf.put_slice(&name.as_bytes()[..end]);
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Attempt to decode one frame from the start of a byte buffer.
///
/// Returns [`DecodeResult::Frame`] with the number of bytes consumed,
/// [`DecodeResult::Incomplete`] if the buffer holds only a prefix of a
/// frame, or [`DecodeResult::Invalid`] if the first byte cannot start a valid
/// frame. Callers drain the consumed or invalid bytes and call again.
///
/// A buffer starting with `0x82` is read as a bare frame; anything else must
/// start with the envelope sync marker.
///
/// # Example
///
/// ```
/// use matrio_control::protocol::{decode, DecodeResult, FrameLayout};
///
/// assert_eq!(decode(&[0x18, 0x96], &FrameLayout::default()), DecodeResult::Incomplete);
/// assert_eq!(decode(&[0x00, 0x18], &FrameLayout::default()), DecodeResult::Invalid(1));
/// ```
pub fn decode(buf: &[u8], layout: &FrameLayout) -> DecodeResult {
    if buf.is_empty() {
        return DecodeResult::Incomplete;
    }
    if buf[0] == FRAME_START {
        return decode_bare(buf, layout);
    }

    let prefix = buf.len().min(SYNC.len());
    if buf[..prefix] != SYNC[..prefix] {
        return DecodeResult::Invalid(1);
    }
    if buf.len() < HEADER_LEN {
        return DecodeResult::Incomplete;
    }

    let mut header = &buf[SYNC.len()..HEADER_LEN];
    let payload_len = header.get_u32_le() as usize;
    let expected_checksum = header.get_u16_le();

    if !(MIN_PAYLOAD_LEN..=MAX_PAYLOAD_LEN).contains(&payload_len) {
        tracing::trace!(payload_len, "Frame length out of bounds");
        return DecodeResult::Invalid(1);
    }

    let total = HEADER_LEN + payload_len;
    if buf.len() < total {
        return DecodeResult::Incomplete;
    }

    let payload = &buf[HEADER_LEN..total];
    if checksum(payload) != expected_checksum {
        tracing::trace!(
            expected = expected_checksum,
            actual = checksum(payload),
            "Frame checksum mismatch"
        );
        return DecodeResult::Invalid(1);
    }

    if !payload.starts_with(MARKER)
        || payload[MARKER.len()] != FRAME_START
        || payload[payload_len - 1] != TRAILER
    {
        return DecodeResult::Invalid(1);
    }

    let op = payload[MARKER.len() + 1];
    let body = &payload[MARKER.len() + 2..payload_len - 1];

    match decode_body(op, body, layout) {
        Some(frame) => DecodeResult::Frame(frame, total),
        None => {
            tracing::trace!(opcode = op, body_len = body.len(), "Malformed frame body");
            DecodeResult::Invalid(1)
        }
    }
}

/// Decode a frame sent without envelope: `82 <opcode> <body> CC`.
///
/// Only opcodes the device sends bare are accepted, and a sync marker inside
/// the candidate body means the `0x82` was noise in front of an envelope.
fn decode_bare(buf: &[u8], layout: &FrameLayout) -> DecodeResult {
    let Some(&op) = buf.get(1) else {
        return DecodeResult::Incomplete;
    };
    if !is_bare_opcode(op) {
        return DecodeResult::Invalid(1);
    }

    let end = if op == opcode::RENAME {
        // 82 13 <kind> <id> <len> <name> CC; the name may contain 0xCC
        let Some(&len) = buf.get(4) else {
            return DecodeResult::Incomplete;
        };
        let end = 5 + len as usize;
        match buf.get(end) {
            Some(&BODY_END) => end,
            Some(_) => return DecodeResult::Invalid(1),
            None => return DecodeResult::Incomplete,
        }
    } else {
        let window = &buf[2..buf.len().min(2 + MAX_PAYLOAD_LEN)];
        let body_len = window.iter().position(|&b| b == BODY_END);
        let scanned = &window[..body_len.unwrap_or(window.len())];
        if scanned.windows(SYNC.len()).any(|w| w == SYNC) {
            return DecodeResult::Invalid(1);
        }
        match body_len {
            Some(pos) => 2 + pos,
            None if buf.len() < 2 + MAX_PAYLOAD_LEN => return DecodeResult::Incomplete,
            None => return DecodeResult::Invalid(1),
        }
    };

    let body = &buf[2..=end];
    if is_control_opcode(op) && !body.ends_with(&[0xFF, BODY_END]) {
        return DecodeResult::Invalid(1);
    }

    match decode_body(op, body, layout) {
        Some(frame) => DecodeResult::Frame(frame, end + 1),
        None => {
            tracing::trace!(opcode = op, "Malformed bare frame");
            DecodeResult::Invalid(1)
        }
    }
}

fn is_control_opcode(op: u8) -> bool {
    matches!(
        op,
        opcode::POWER
            | opcode::VOLUME
            | opcode::MUTE
            | opcode::BALANCE
            | opcode::BASS
            | opcode::TREBLE
            | opcode::INPUT
    )
}

fn is_bare_opcode(op: u8) -> bool {
    is_control_opcode(op) || matches!(op, opcode::STATUS | opcode::NAMES | opcode::RENAME)
}

fn decode_body(op: u8, body: &[u8], layout: &FrameLayout) -> Option<Frame> {
    let zones = layout.zone_count as usize;

    match op {
        opcode::POWER
        | opcode::VOLUME
        | opcode::MUTE
        | opcode::BALANCE
        | opcode::BASS
        | opcode::TREBLE
        | opcode::INPUT => {
            if body.len() < 1 + zones {
                return None;
            }
            let selector = ZoneSelector::from_pattern(&body[1..1 + zones]);
            let setting = setting_from_raw(op, body[0])?;
            Some(Frame::Control { selector, setting })
        }
        opcode::STATUS_QUERY => Some(Frame::StatusQuery),
        opcode::STATUS => decode_status(body, zones).map(Frame::Status),
        opcode::NAMES => decode_names(body, layout).map(Frame::Names),
        opcode::RENAME => {
            let (&kind, rest) = body.split_first()?;
            let (&id, rest) = rest.split_first()?;
            let kind = NameKind::from_byte(kind)?;
            let (name, _) = read_name(rest)?;
            Some(Frame::Rename { kind, id, name })
        }
        _ => Some(Frame::Unknown {
            opcode: op,
            body: Bytes::copy_from_slice(body),
        }),
    }
}

fn decode_status(body: &[u8], zones: usize) -> Option<Vec<ZoneStatus>> {
    if body.len() < STATUS_TABLES * zones {
        return None;
    }
    let table = |index: usize, zone: usize| body[index * zones + zone];

    let statuses = (0..zones)
        .map(|z| ZoneStatus {
            zone: (z + 1) as ZoneId,
            input: table(0, z),
            volume: volume_from_raw(table(1, z)),
            treble: tone_from_raw(table(2, z)),
            bass: tone_from_raw(table(3, z)),
            balance: balance_from_raw(table(4, z)),
            mute: table(5, z) == 0x02,
            // The burst encodes power opposite to single-zone power frames.
            power: table(6, z) == 0x01,
        })
        .collect();
    Some(statuses)
}

fn decode_names(body: &[u8], layout: &FrameLayout) -> Option<NameTable> {
    let (device_name, mut rest) = read_name(body)?;

    let mut read_list = |count: u8| {
        let mut names = Vec::new();
        for _ in 0..count {
            match read_name(rest) {
                Some((name, remaining)) => {
                    names.push(name);
                    rest = remaining;
                }
                None => break,
            }
        }
        names
    };

    let zones = read_list(layout.zone_count);
    let inputs = read_list(layout.input_count);

    Some(NameTable {
        device_name,
        zones,
        inputs,
    })
}

/// Read one length-prefixed name, returning it and the remaining bytes.
///
/// The trailing `0xCC` reads as a length longer than what is left, which ends
/// a name list cleanly.
fn read_name(buf: &[u8]) -> Option<(String, &[u8])> {
    let (&len, rest) = buf.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    let name = String::from_utf8_lossy(&rest[..len]).into_owned();
    Some((name, &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn layout() -> FrameLayout {
        FrameLayout::default()
    }

    fn decode_one(buf: &[u8]) -> Frame {
        match decode(buf, &layout()) {
            DecodeResult::Frame(frame, consumed) => {
                assert_eq!(consumed, buf.len());
                frame
            }
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    // ---------------------------------------------------------------
    // Value mapping
    // ---------------------------------------------------------------

    #[test]
    fn volume_offset_by_one() {
        assert_eq!(volume_to_raw(0), 0x01);
        assert_eq!(volume_to_raw(38), 0x27);
        assert_eq!(volume_from_raw(0x27), 38);
        assert_eq!(volume_from_raw(0x00), 0);
    }

    #[test]
    fn tone_centered_on_0x0d() {
        assert_eq!(tone_to_raw(-12), 0x01);
        assert_eq!(tone_to_raw(0), 0x0D);
        assert_eq!(tone_to_raw(12), 0x19);
        assert_eq!(tone_from_raw(0x19), 12);
        assert_eq!(tone_from_raw(0xFF), 127);
    }

    #[test]
    fn balance_end_points_match_captures() {
        assert_eq!(balance_to_raw(-100), 0x01);
        assert_eq!(balance_to_raw(0), 0x1F);
        assert_eq!(balance_to_raw(100), 0x3D);
        assert_eq!(balance_from_raw(0x01), -100);
        assert_eq!(balance_from_raw(0x1F), 0);
        assert_eq!(balance_from_raw(0x3D), 100);
    }

    #[test]
    fn balance_quantizes_to_device_steps() {
        for v in (-100..=100).step_by(10) {
            assert_eq!(quantize_balance(v as i8), v as i8);
        }
        assert_eq!(quantize_balance(35), 37);
        assert_eq!(quantize_balance(-35), -37);
    }

    // ---------------------------------------------------------------
    // Encoding against captured packets
    // ---------------------------------------------------------------

    #[test]
    fn status_query_matches_capture() {
        let bytes = encode(&Frame::StatusQuery);
        assert_eq!(
            bytes.to_vec(),
            hex("189618200f0000005706000000000000000000004d43552b5041532b820affffff8926")
        );
    }

    #[test]
    fn volume_command_layout() {
        let frame = Frame::control(ZoneSelector::single(3, 8).unwrap(), Setting::Volume(20));
        assert_eq!(
            encode(&frame).to_vec(),
            hex(concat!(
                "1896182016000000b704000000000000000000004d43552b5041532b",
                "8201150202010202020202ffcc26",
            ))
        );
    }

    #[test]
    fn mute_on_checksum_matches_capture() {
        let frame = Frame::control(ZoneSelector::single(1, 8).unwrap(), Setting::Mute(true));
        let bytes = encode(&frame);
        assert_eq!(&bytes[8..10], &[0xB1, 0x04]);
        assert_eq!(bytes[29], 0x0E);
        assert_eq!(bytes[30], 0x02);
    }

    #[test]
    fn power_on_carries_padding() {
        let zone2 = ZoneSelector::single(2, 8).unwrap();
        let on = encode(&Frame::control(zone2, Setting::Power(true)));
        let off = encode(&Frame::control(zone2, Setting::Power(false)));
        assert_eq!(on.len(), off.len() + 2);
        assert_eq!(&on[4..8], &[0x18, 0, 0, 0]);
        assert_eq!(&off[4..8], &[0x16, 0, 0, 0]);
    }

    // ---------------------------------------------------------------
    // Decoding
    // ---------------------------------------------------------------

    #[test]
    fn decode_captured_name_table() {
        let bytes = hex(concat!(
            "18961820a3000000823400000000000000000000",
            "4d43552b5041532b82150b4441582038385f363136450b4c6976696e6720526f6f6d",
            "0e4d617374657220426564726f6f6d0d4465636b2055707374616972730f4465636b",
            "20446f776e7374616972730a446f776e737461697273065a4f4e453636055a4f4e45",
            "37055a4f4e45380254560c476f6f676c65204d7573696306496e7075743306496e70",
            "75743406496e7075743507496e707574363606496e70757437cc26",
        ));
        match decode_one(&bytes) {
            Frame::Names(table) => {
                assert_eq!(table.device_name, "DAX 88_616E");
                assert_eq!(table.zones.len(), 8);
                assert_eq!(table.zones[0], "Living Room");
                assert_eq!(table.zones[7], "ZONE8");
                // The device omits the eighth input
                assert_eq!(table.inputs.len(), 7);
                assert_eq!(table.inputs[0], "TV");
                assert_eq!(table.inputs[1], "Google Music");
            }
            other => panic!("expected name table, got {:?}", other),
        }
    }

    #[test]
    fn decode_captured_status_burst() {
        let bytes = hex(concat!(
            "189618204c000000a90800000000000000000000",
            "4d43552b5041532b820c",
            "0108080808080808",
            "070f22171d080505",
            "0d0d0d0d0d0d0d0d",
            "0d0d0d0d0d0d0d0d",
            "1f1f1f1f1f1f1f1f",
            "0201020101010101",
            "0101010102010101",
            "010140180c14ffffcc26",
        ));
        match decode_one(&bytes) {
            Frame::Status(zones) => {
                assert_eq!(zones.len(), 8);
                let z1 = zones[0];
                assert_eq!(z1.zone, 1);
                assert_eq!(z1.input, 1);
                assert_eq!(z1.volume, 6);
                assert!(z1.mute);
                assert!(z1.power);
                assert_eq!(z1.bass, 0);
                assert_eq!(z1.balance, 0);
                let z3 = zones[2];
                assert_eq!(z3.input, 8);
                assert_eq!(z3.volume, 33);
                let z5 = zones[4];
                assert!(!z5.power);
                assert!(!z5.mute);
            }
            other => panic!("expected status burst, got {:?}", other),
        }
    }

    #[test]
    fn control_frames_round_trip() {
        let selector = ZoneSelector::for_zones([1, 4, 8], 8).unwrap();
        let settings = [
            Setting::Power(true),
            Setting::Power(false),
            Setting::Volume(0),
            Setting::Volume(38),
            Setting::Mute(true),
            Setting::Mute(false),
            Setting::Balance(-100),
            Setting::Balance(40),
            Setting::Bass(-12),
            Setting::Treble(12),
            Setting::Input(8),
        ];
        for setting in settings {
            let frame = Frame::control(selector, setting);
            assert_eq!(decode_one(&encode(&frame)), frame, "{:?}", setting);
        }
    }

    #[test]
    fn rename_round_trips() {
        let frame = Frame::Rename {
            kind: NameKind::Input,
            id: 2,
            name: "Turntable".to_string(),
        };
        assert_eq!(decode_one(&encode(&frame)), frame);
    }

    #[test]
    fn rename_is_sent_bare() {
        let frame = Frame::Rename {
            kind: NameKind::Zone,
            id: 1,
            name: "Den".to_string(),
        };
        assert_eq!(encode(&frame).to_vec(), hex("821301010344656ecc"));
    }

    #[test]
    fn rename_name_may_contain_end_byte() {
        // Combining marks start with a 0xCC byte in UTF-8
        let frame = Frame::Rename {
            kind: NameKind::Input,
            id: 4,
            name: "A\u{0300}B".to_string(),
        };
        let bytes = encode(&frame);
        assert!(bytes[5..bytes.len() - 1].contains(&BODY_END));
        assert_eq!(decode_one(&bytes), frame);
    }

    // ---------------------------------------------------------------
    // Bare frames
    // ---------------------------------------------------------------

    #[test]
    fn bare_control_frame_decodes() {
        let bytes = hex("82011a0202010202020202ffcc");
        assert_eq!(
            decode_one(&bytes),
            Frame::control(ZoneSelector::single(3, 8).unwrap(), Setting::Volume(25))
        );
    }

    #[test]
    fn bare_frame_split_needs_more_data() {
        let bytes = hex("82080202020202020201020202ffcc");
        for cut in 1..bytes.len() {
            assert_eq!(decode(&bytes[..cut], &layout()), DecodeResult::Incomplete);
        }
        assert_eq!(
            decode_one(&bytes),
            Frame::control(ZoneSelector::single(7, 8).unwrap(), Setting::Power(true))
        );
    }

    #[test]
    fn stray_start_byte_before_envelope_is_noise() {
        let mut buf = vec![FRAME_START, 0x01];
        buf.extend_from_slice(&encode(&Frame::StatusQuery));
        assert_eq!(decode(&buf, &layout()), DecodeResult::Invalid(1));
        assert_eq!(decode(&[FRAME_START, 0x42], &layout()), DecodeResult::Invalid(1));
    }

    // ---------------------------------------------------------------
    // Streams
    // ---------------------------------------------------------------

    /// Decode a stream delivered in chunks the way the session read loop does.
    fn decode_chunked(stream: &[u8], chunk: usize) -> Vec<Frame> {
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for piece in stream.chunks(chunk) {
            buf.extend_from_slice(piece);
            loop {
                match decode(&buf, &layout()) {
                    DecodeResult::Frame(frame, consumed) => {
                        buf.advance(consumed);
                        frames.push(frame);
                    }
                    DecodeResult::Invalid(skip) => buf.advance(skip),
                    DecodeResult::Incomplete => break,
                }
            }
        }
        frames
    }

    #[test]
    fn any_chunking_yields_the_same_frames() {
        let frames = vec![
            Frame::control(ZoneSelector::single(3, 8).unwrap(), Setting::Volume(25)),
            Frame::StatusQuery,
            Frame::control(ZoneSelector::for_zones([1, 2], 8).unwrap(), Setting::Mute(true)),
            Frame::Rename {
                kind: NameKind::Zone,
                id: 2,
                name: "Kitchen".to_string(),
            },
            Frame::control(ZoneSelector::all(8), Setting::Balance(-40)),
        ];

        let mut stream = vec![0x00, 0x18, 0x96];
        for (i, frame) in frames.iter().enumerate() {
            stream.extend_from_slice(&encode(frame));
            if i == 1 {
                stream.extend_from_slice(&[0x55, 0xAA]);
            }
        }
        // Device broadcast in bare form
        stream.extend_from_slice(&hex("82030f0101020202020202ffcc"));
        let mut expected = frames.clone();
        expected.push(Frame::control(
            ZoneSelector::for_zones([1, 2], 8).unwrap(),
            Setting::Bass(2),
        ));

        let whole = decode_chunked(&stream, stream.len());
        assert_eq!(whole, expected);
        for chunk in 1..stream.len() {
            assert_eq!(decode_chunked(&stream, chunk), whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn unknown_opcode_is_still_a_frame() {
        let bytes = encode_payload(0x10, &[0x05, 0x01, 0xCC]);
        assert_eq!(
            decode_one(&bytes),
            Frame::Unknown {
                opcode: 0x10,
                body: Bytes::from_static(&[0x05, 0x01, 0xCC]),
            }
        );
    }

    #[test]
    fn partial_frame_needs_more_data() {
        let bytes = encode(&Frame::StatusQuery);
        for cut in 1..bytes.len() {
            assert_eq!(decode(&bytes[..cut], &layout()), DecodeResult::Incomplete);
        }
    }

    #[test]
    fn bad_checksum_discards_one_byte() {
        let mut bytes = encode(&Frame::StatusQuery).to_vec();
        bytes[8] ^= 0xFF;
        assert_eq!(decode(&bytes, &layout()), DecodeResult::Invalid(1));
    }

    #[test]
    fn oversized_length_is_invalid() {
        let mut bytes = encode(&Frame::StatusQuery).to_vec();
        bytes[4..8].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_le_bytes());
        assert_eq!(decode(&bytes, &layout()), DecodeResult::Invalid(1));
    }

    #[test]
    fn short_control_body_is_invalid() {
        let bytes = encode_payload(opcode::VOLUME, &[0x10, 0x01, 0x02]);
        assert_eq!(decode(&bytes, &layout()), DecodeResult::Invalid(1));
    }

    #[test]
    fn resync_after_noise() {
        let frame = Frame::control(ZoneSelector::single(5, 8).unwrap(), Setting::Bass(4));
        let mut buf = vec![0x00, 0x18, 0x96, 0x42];
        buf.extend_from_slice(&encode(&frame));

        let mut offset = 0;
        let mut frames = Vec::new();
        loop {
            match decode(&buf[offset..], &layout()) {
                DecodeResult::Frame(f, n) => {
                    frames.push(f);
                    offset += n;
                }
                DecodeResult::Invalid(n) => offset += n,
                DecodeResult::Incomplete => break,
            }
        }
        assert_eq!(frames, vec![frame]);
        assert_eq!(offset, buf.len());
    }
}
