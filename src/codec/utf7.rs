use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

/// Base64 variant used inside shift sequences: `,` replaces `/`, no padding,
/// and trailing bits must be zero.
const MUTF7: GeneralPurpose = GeneralPurpose::new(
    &alphabet::IMAP_MUTF7,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireNone),
);

const SHIFT_IN: u8 = b'&';
const SHIFT_OUT: u8 = b'-';

/// Malformed wire-encoded folder name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("byte 0x{byte:02x} at offset {position} is not allowed in a mailbox name")]
    InvalidByte { position: usize, byte: u8 },

    #[error("shift sequence starting at offset {position} is not terminated")]
    UnterminatedShift { position: usize },

    #[error("invalid base64 in shift sequence at offset {position}")]
    InvalidBase64 { position: usize },

    #[error("shift sequence at offset {position} does not contain valid UTF-16")]
    InvalidUtf16 { position: usize },

    #[error("non-canonical encoding at offset {position}")]
    NonCanonical { position: usize },
}

fn is_direct(ch: char) -> bool {
    (' '..='~').contains(&ch)
}

/// Encode a display name into its wire form.
pub fn encode(display: &str) -> String {
    let mut out = String::with_capacity(display.len());
    let mut pending: Vec<u16> = Vec::new();

    for ch in display.chars() {
        if is_direct(ch) {
            flush_shifted(&mut out, &mut pending);
            if ch == '&' {
                out.push_str("&-");
            } else {
                out.push(ch);
            }
        } else {
            let mut units = [0u16; 2];
            pending.extend_from_slice(ch.encode_utf16(&mut units));
        }
    }
    flush_shifted(&mut out, &mut pending);

    out
}

fn flush_shifted(out: &mut String, pending: &mut Vec<u16>) {
    if pending.is_empty() {
        return;
    }

    let bytes: Vec<u8> = pending.iter().flat_map(|unit| unit.to_be_bytes()).collect();
    out.push(SHIFT_IN as char);
    out.push_str(&MUTF7.encode(bytes));
    out.push(SHIFT_OUT as char);
    pending.clear();
}

/// Decode a wire name into its display form.
///
/// Decoding is strict: only the canonical form produced by [`encode`] is
/// accepted, so two distinct wire names never decode to the same display name.
pub fn decode(wire: &[u8]) -> Result<String, EncodingError> {
    let mut out = String::with_capacity(wire.len());
    let mut pos = 0;
    // Adjacent shift sequences must be merged in canonical form.
    let mut previous_shift_end = None;

    while pos < wire.len() {
        let byte = wire[pos];
        if byte == SHIFT_IN {
            let start = pos;
            let body_start = pos + 1;
            let body_len = wire[body_start..]
                .iter()
                .position(|&b| b == SHIFT_OUT)
                .ok_or(EncodingError::UnterminatedShift { position: start })?;
            let body = &wire[body_start..body_start + body_len];
            pos = body_start + body_len + 1;

            if body.is_empty() {
                out.push('&');
                previous_shift_end = None;
                continue;
            }
            if previous_shift_end == Some(start) {
                return Err(EncodingError::NonCanonical { position: start });
            }

            let decoded = MUTF7
                .decode(body)
                .map_err(|_| EncodingError::InvalidBase64 { position: body_start })?;
            if decoded.len() % 2 != 0 {
                return Err(EncodingError::InvalidUtf16 { position: body_start });
            }

            let units: Vec<u16> = decoded
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            for ch in char::decode_utf16(units) {
                let ch = ch.map_err(|_| EncodingError::InvalidUtf16 { position: body_start })?;
                if is_direct(ch) {
                    return Err(EncodingError::NonCanonical { position: body_start });
                }
                out.push(ch);
            }
            previous_shift_end = Some(pos);
        } else if (0x20..=0x7e).contains(&byte) {
            out.push(byte as char);
            pos += 1;
        } else {
            return Err(EncodingError::InvalidByte { position: pos, byte });
        }
    }

    Ok(out)
}
