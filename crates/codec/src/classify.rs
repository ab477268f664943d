//! The packet classifier (C2): decides STUN vs DTLS vs opaque media from the
//! first bytes of a buffer. Never fails — malformed or ambiguous input
//! degrades to `Opaque`, per spec.md §7.

use crate::{dtls, stun};

const MIN_LEN: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Stun,
    Dtls,
    Opaque,
    TooShort,
}

/// Classifies one buffer. `offset`/`len` let the caller classify a slice of
/// a larger receive buffer without an extra copy.
///
/// # Test
///
/// ```
/// use ice_transport_codec::classify::{classify, Classification};
/// use ice_transport_codec::stun::MAGIC_COOKIE;
///
/// let mut binding_request = vec![0x00, 0x01, 0x00, 0x00];
/// binding_request.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
/// binding_request.extend_from_slice(&[0u8; 12]);
///
/// assert_eq!(
///     classify(&binding_request, 0, binding_request.len()),
///     Classification::Stun,
/// );
/// ```
pub fn classify(bytes: &[u8], offset: usize, len: usize) -> Classification {
    let Some(buf) = bytes.get(offset..offset + len) else {
        return Classification::TooShort;
    };

    if buf.len() < MIN_LEN {
        return Classification::TooShort;
    }

    if let Some((b0, b1)) = stun::looks_like_stun(buf) {
        return match stun::Method::decode(b0, b1) {
            Some(stun::Method::Binding)
            | Some(stun::Method::SharedSecret)
            | Some(stun::Method::OldRequest) => Classification::Stun,
            _ => Classification::Opaque,
        };
    }

    if dtls::looks_like_dtls(buf[0]) {
        return Classification::Dtls;
    }

    Classification::Opaque
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding_request() -> Vec<u8> {
        let mut msg = vec![0x00, 0x01, 0x00, 0x00];
        msg.extend_from_slice(&stun::MAGIC_COOKIE.to_be_bytes());
        msg.extend_from_slice(&[0u8; 12]);
        msg
    }

    #[test]
    fn classifies_stun_binding_request() {
        let msg = binding_request();
        assert_eq!(classify(&msg, 0, msg.len()), Classification::Stun);
    }

    #[test]
    fn classifies_unknown_method_as_opaque() {
        let mut msg = binding_request();
        msg[1] = 0x05; // not Binding/SharedSecret/OldRequest once masked
        assert_eq!(classify(&msg, 0, msg.len()), Classification::Opaque);
    }

    #[test]
    fn classifies_dtls_handshake_record() {
        let msg: Vec<u8> = vec![
            0x16, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 1, 0, 3, 0xAA, 0xBB, 0xCC,
        ];
        assert_eq!(classify(&msg, 0, msg.len()), Classification::Dtls);
    }

    #[test]
    fn classifies_under_14_bytes_as_too_short() {
        assert_eq!(classify(&[0u8; 13], 0, 13), Classification::TooShort);
    }

    #[test]
    fn classifies_random_bytes_as_opaque() {
        let msg = [0x80u8; 20];
        assert_eq!(classify(&msg, 0, msg.len()), Classification::Opaque);
    }

    #[test]
    fn classifies_out_of_range_slice_as_too_short() {
        assert_eq!(classify(&[0u8; 10], 0, 20), Classification::TooShort);
    }
}
