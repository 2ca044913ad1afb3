use std::io;
use std::num::ParseIntError;

use thiserror::Error;

/// Errors reported by the debug tools.
///
/// The variants map onto the failure classes the protocol code has to
/// keep apart: transport failures kill a session, protocol and device
/// failures are reported to the peer and the session continues, and a
/// user break unwinds blocking calls without being a failure of either
/// kind.
#[derive(Error, Debug)]
pub enum DebugError {
    /// Socket or resolver failure. Fatal to the session it occurred on.
    #[error("socket I/O: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// A blocking call was unwound by the user-break flag.
    #[error("interrupted")]
    Interrupted,

    /// The remote end violated the wire protocol.
    #[error("protocol: {0}")]
    Protocol(String),

    /// The target device rejected an operation.
    #[error("device: {0}")]
    Device(String),
}

/// Decodes a single ASCII hex digit.
///
/// Invalid characters decode as zero, which matches the tolerant
/// behaviour GDB stubs are expected to have when fed malformed hex.
pub fn hexval(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Parses a run of leading hex digits from raw packet text.
///
/// Parsing stops at the first non-hex character; an empty or
/// non-numeric prefix yields zero.
pub fn parse_hex(text: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &c in text {
        if !c.is_ascii_hexdigit() {
            break;
        }
        value = (value << 4) | u32::from(hexval(c));
    }
    value
}

/// Parses a run of leading decimal digits from raw packet text.
///
/// Same termination rule as [`parse_hex`]; non-numeric input yields
/// zero.
pub fn parse_dec(text: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &c in text {
        if !c.is_ascii_digit() {
            break;
        }
        value = value * 10 + u32::from(c - b'0');
    }
    value
}

/// Decodes pairs of hex digits into bytes.
///
/// A trailing unpaired digit is ignored, and invalid digits decode as
/// zero nibbles.
pub fn hex_to_bytes(text: &[u8]) -> Vec<u8> {
    text.chunks_exact(2)
        .map(|pair| (hexval(pair[0]) << 4) | hexval(pair[1]))
        .collect()
}

/// Parses a string representation of a hexadecimal or decimal number.
///
/// This function attempts to parse the input string as a hexadecimal
/// number if it starts with "0x" or "0X". If it does not, it tries to
/// parse it as a decimal integer.
///
/// # Parameters
///
/// * `s`: A string slice containing the number to be parsed.
///
/// # Returns
///
/// Returns `Ok(u32)` if the parsing is successful, or an error of type
/// `ParseIntError` if the string cannot be parsed as a valid integer.
pub fn hex_parser(s: &str) -> Result<u32, ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexval_digits() {
        assert_eq!(hexval(b'0'), 0);
        assert_eq!(hexval(b'9'), 9);
        assert_eq!(hexval(b'a'), 10);
        assert_eq!(hexval(b'f'), 15);
        assert_eq!(hexval(b'A'), 10);
        assert_eq!(hexval(b'F'), 15);
    }

    #[test]
    fn hexval_invalid_is_zero() {
        assert_eq!(hexval(b'g'), 0);
        assert_eq!(hexval(b' '), 0);
        assert_eq!(hexval(0x03), 0);
    }

    #[test]
    fn parse_hex_stops_at_delimiter() {
        assert_eq!(parse_hex(b"2000,1"), 0x2000);
        assert_eq!(parse_hex(b"beef"), 0xbeef);
        assert_eq!(parse_hex(b"BEEF"), 0xbeef);
        assert_eq!(parse_hex(b""), 0);
        assert_eq!(parse_hex(b",1"), 0);
    }

    #[test]
    fn parse_dec_stops_at_delimiter() {
        assert_eq!(parse_dec(b"1,2200"), 1);
        assert_eq!(parse_dec(b"4"), 4);
        assert_eq!(parse_dec(b"x"), 0);
    }

    #[test]
    fn hex_to_bytes_pairs() {
        assert_eq!(hex_to_bytes(b"beef"), vec![0xbe, 0xef]);
        assert_eq!(hex_to_bytes(b"beefa"), vec![0xbe, 0xef]);
        assert_eq!(hex_to_bytes(b""), Vec::<u8>::new());
    }

    #[test]
    fn hex_parser_both_radices() {
        assert_eq!(hex_parser("0x2000"), Ok(0x2000));
        assert_eq!(hex_parser("0X10"), Ok(16));
        assert_eq!(hex_parser("2000"), Ok(2000));
        assert!(hex_parser("zz").is_err());
    }
}
