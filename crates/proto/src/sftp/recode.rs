//! Opportunistic GB18030 ↔ UTF-8 recoding at the protocol boundary.
//!
//! SFTP v3 has no encoding negotiation, and legacy Windows clients send
//! CP936 path names. Client-supplied paths that are not valid UTF-8 but
//! match the GBK byte pattern are decoded as GB18030 before they reach the
//! VFS, and names emitted by the VFS are encoded to GB18030 on the way
//! out. Everything else passes through unchanged.

use encoding_rs::GB18030;

/// Whether `data` matches the GBK byte pattern: ASCII single bytes, or a
/// lead byte in `0x81..=0xFE` followed by a trail byte in `0x40..=0xFE`
/// other than `0xF7`.
pub fn is_gbk(data: &[u8]) -> bool {
    let mut i = 0;
    while i < data.len() {
        let lead = data[i];
        if lead < 0x80 {
            i += 1;
            continue;
        }
        if !(0x81..=0xFE).contains(&lead) {
            return false;
        }
        match data.get(i + 1) {
            Some(&trail) if (0x40..=0xFE).contains(&trail) && trail != 0xF7 => i += 2,
            _ => return false,
        }
    }
    true
}

/// Recodes a client-supplied byte string into a UTF-8 path for the VFS.
///
/// Valid UTF-8 passes through; otherwise a GBK-shaped string is decoded as
/// GB18030. Bytes matching neither are kept with invalid sequences
/// replaced, since VFS paths are UTF-8.
pub fn incoming(data: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(data) {
        return s.to_string();
    }
    if is_gbk(data) {
        let (decoded, _, had_errors) = GB18030.decode(data);
        if !had_errors {
            return decoded.into_owned();
        }
    }
    String::from_utf8_lossy(data).into_owned()
}

/// Recodes a VFS-supplied name into GB18030 for the wire.
pub fn outgoing(name: &str) -> Vec<u8> {
    let (encoded, _, had_errors) = GB18030.encode(name);
    if had_errors {
        return name.as_bytes().to_vec();
    }
    encoded.into_owned()
}
