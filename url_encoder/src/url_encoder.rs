/// Percent-encodes a byte string for use in a URL query component.
///
/// Unreserved characters (RFC 3986 §2.3) pass through untouched, everything
/// else becomes `%XX`. Tracker announces send raw 20-byte info hashes and
/// peer ids through this, so arbitrary bytes must survive the trip.
pub fn encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        if is_unreserved(*byte) {
            encoded.push(*byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}
