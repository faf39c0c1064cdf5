//! Filesystem-safe file names for folder segments and mailbox labels.
//! Anything outside `[A-Za-z0-9._-]` is written as `=XX` hex of its UTF-8 bytes.

const SAFE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789._-";

fn needs_encode(b: u8) -> bool {
    !SAFE_CHARS.contains(&b)
}

fn hex_digit_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Encode one name component. `.`, `..` and the empty name are escaped too,
/// so the result is always a plain file name.
pub fn encode(name: &str) -> String {
    match name {
        "" => return "=".to_string(),
        "." => return "=2E".to_string(),
        ".." => return "=2E=2E".to_string(),
        _ => {}
    }

    let bytes = name.as_bytes();
    if !bytes.iter().any(|&b| needs_encode(b)) {
        return name.to_string();
    }

    let mut out = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if needs_encode(b) {
            out.push_str(&format!("={:02X}", b));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Decode a component written by [`encode`]
pub fn decode(encoded: &str) -> String {
    if encoded == "=" {
        return String::new();
    }
    if !encoded.contains('=') {
        return encoded.to_string();
    }

    let bytes = encoded.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'=' && i + 2 < bytes.len() {
            if let (Some(high), Some(low)) =
                (hex_digit_value(bytes[i + 1]), hex_digit_value(bytes[i + 2]))
            {
                result.push(high << 4 | low);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).into_owned()
}

/// Directory name for a mailbox label
pub fn label_dir(label: &str) -> String {
    encode(&label.replace('@', "_at_"))
}
