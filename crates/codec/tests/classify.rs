use ice_transport_codec::classify::{Classification, classify};
use ice_transport_codec::dtls::{self, ContentType, Version};
use ice_transport_codec::framing::{ExchangeBuffer, next_frame_len};
use ice_transport_codec::stun;

fn binding_request() -> Vec<u8> {
    let mut msg = vec![0x00, 0x01, 0x00, 0x00];
    msg.extend_from_slice(&stun::MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(&[0u8; 12]);
    msg
}

#[test]
fn classify_recognizes_a_stun_binding_request() {
    let msg = binding_request();
    assert_eq!(classify(&msg, 0, msg.len()), Classification::Stun);
}

#[test]
fn classify_recognizes_a_dtls_handshake_record() {
    let mut msg = vec![22, 254, 253];
    msg.extend_from_slice(&[0u8; 8]);
    msg.extend_from_slice(&3u16.to_be_bytes());
    msg.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

    assert_eq!(classify(&msg, 0, msg.len()), Classification::Dtls);

    let records = dtls::split_records(&msg);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content_type, ContentType::Handshake);
    assert_eq!(records[0].version, Version::V1_2);
}

#[test]
fn classify_falls_back_to_opaque_for_media() {
    let msg = [0x80u8; 172];
    assert_eq!(classify(&msg, 0, msg.len()), Classification::Opaque);
}

#[test]
fn ufrag_extraction_requires_a_username_attribute() {
    let msg = binding_request();
    assert!(stun::extract_ufrag(&msg).is_none());

    let non_stun = [0x80u8; 20];
    assert!(stun::extract_ufrag(&non_stun).is_none());
}

#[test]
fn tcp_framing_reassembles_a_stun_message_split_across_reads() {
    let mut buf = ExchangeBuffer::default();
    let msg = binding_request();

    let mut frame = (msg.len() as u16).to_be_bytes().to_vec();
    frame.extend_from_slice(&msg);

    let (first, second) = frame.split_at(5);

    buf[..first.len()].copy_from_slice(first);
    buf.advance(first.len());
    assert!(next_frame_len(&buf).is_none());

    buf[..second.len()].copy_from_slice(second);
    buf.advance(second.len());

    let total = next_frame_len(&buf).unwrap();
    assert_eq!(total, frame.len());

    let reassembled = buf.split(total);
    assert_eq!(&reassembled[2..], &msg[..]);
    assert_eq!(classify(&reassembled, 2, reassembled.len() - 2), Classification::Stun);
}
