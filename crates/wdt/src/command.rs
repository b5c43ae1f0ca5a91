use tracing::error;

use crate::config::MAX_NAME_LEN;

/// Longest prefix of an unknown payload included in the diagnostic dump.
const DUMP_LIMIT: usize = 32;

/// A command decoded from one UDP datagram. The first byte selects the
/// variant; everything after it is the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `p<pid>`: liveness assertion from a supervised child.
    Heartbeat { pid: i32 },
    /// `a<name>`: reserved operator command, currently inert.
    Start { name: String },
    /// `o<name>`: reserved operator command, currently inert.
    Stop { name: String },
    /// `r<name>`: reserved operator command, currently inert.
    Restart { name: String },
    /// Unrecognized tag or malformed heartbeat payload.
    Unknown,
}

impl Command {
    /// Decode a datagram. Malformed input never fails hard: anything that
    /// cannot be decoded becomes `Unknown` and is logged with a truncated
    /// hex + printable dump.
    pub fn parse(data: &[u8]) -> Command {
        let Some(&tag) = data.first() else {
            return Command::Unknown;
        };

        match tag {
            b'p' => match parse_number(&data[1..]) {
                Some(n) if n >= 1 && n <= i32::MAX as i64 => {
                    Command::Heartbeat { pid: n as i32 }
                }
                _ => {
                    error!(
                        payload = %dump(data),
                        "heartbeat with invalid pid received"
                    );
                    Command::Unknown
                }
            },
            b'a' => Command::Start {
                name: payload_name(&data[1..]),
            },
            b'o' => Command::Stop {
                name: payload_name(&data[1..]),
            },
            b'r' => Command::Restart {
                name: payload_name(&data[1..]),
            },
            _ => {
                error!(payload = %dump(data), "unknown command received");
                Command::Unknown
            }
        }
    }
}

/// Extract a program name from a command payload: lossy UTF-8, truncated
/// to the name length limit.
fn payload_name(payload: &[u8]) -> String {
    let mut name = String::from_utf8_lossy(payload).into_owned();
    if name.len() > MAX_NAME_LEN {
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// Permissive decimal scan: skip leading bytes until a digit or `-`, accept
/// one optional `-`, then accumulate digits. Existing senders embed the pid
/// with no framing beyond the datagram itself, so leading noise is treated
/// as padding rather than an error. Returns `None` when no digits follow.
fn parse_number(payload: &[u8]) -> Option<i64> {
    let mut iter = payload.iter().copied().peekable();

    while let Some(&b) = iter.peek() {
        if b.is_ascii_digit() || b == b'-' {
            break;
        }
        iter.next();
    }

    let negative = iter.peek() == Some(&b'-');
    if negative {
        iter.next();
    }

    let mut value: i64 = 0;
    let mut digits = 0usize;
    while let Some(&b) = iter.peek() {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
        digits += 1;
        iter.next();
    }

    if digits == 0 {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// Render up to the first 32 bytes as `<printable> | <hex>`, mirroring the
/// diagnostic format operators already grep their logs for.
pub fn dump(data: &[u8]) -> String {
    let slice = &data[..data.len().min(DUMP_LIMIT)];

    let printable: String = slice
        .iter()
        .map(|&b| {
            if (32..127).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect();

    let hex: String = slice
        .iter()
        .map(|b| format!("{b:02X} "))
        .collect::<String>()
        .trim_end()
        .to_string();

    format!("{printable} | {hex}")
}
