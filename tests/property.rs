//! Property tests for the pure codecs: masking, frame headers, and close
//! payloads.

use proptest::prelude::*;
use ws_transport::protocol::close::{encode_close_payload, parse_close_payload};
use ws_transport::protocol::{xor_mask, CloseCode, FrameHeader, OpCode, MAX_HEADER_SIZE};

fn parse_header(bytes: &[u8]) -> FrameHeader {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(async {
            let mut cursor = bytes;
            FrameHeader::read(&mut cursor).await.unwrap()
        })
}

proptest! {
    #[test]
    fn mask_applied_twice_is_identity(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        mask in any::<[u8; 4]>(),
        offset in 0usize..4,
    ) {
        let mut data = payload.clone();
        let mid = xor_mask(&mut data, mask, offset);
        prop_assert_eq!(mid, (offset + payload.len()) & 3);
        xor_mask(&mut data, mask, offset);
        prop_assert_eq!(data, payload);
    }

    #[test]
    fn mask_matches_bytewise_definition(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        mask in any::<[u8; 4]>(),
        offset in 0usize..4,
    ) {
        let mut fast = payload.clone();
        xor_mask(&mut fast, mask, offset);

        let naive: Vec<u8> = payload
            .iter()
            .enumerate()
            .map(|(i, &b)| b ^ mask[(offset + i) % 4])
            .collect();
        prop_assert_eq!(fast, naive);
    }

    #[test]
    fn mask_split_points_are_invisible(
        payload in proptest::collection::vec(any::<u8>(), 1..512),
        mask in any::<[u8; 4]>(),
        split_seed in any::<usize>(),
    ) {
        let split = split_seed % payload.len();

        let mut whole = payload.clone();
        xor_mask(&mut whole, mask, 0);

        let mut parts = payload;
        let (head, tail) = parts.split_at_mut(split);
        let offset = xor_mask(head, mask, 0);
        xor_mask(tail, mask, offset);
        prop_assert_eq!(parts, whole);
    }

    #[test]
    fn header_roundtrips(
        fin in any::<bool>(),
        rsv1 in any::<bool>(),
        op_index in 0usize..3,
        masked in any::<bool>(),
        mask in any::<[u8; 4]>(),
        length in prop_oneof![
            0u64..=125,
            126u64..=65_535,
            65_536u64..=10_000_000,
            Just(u64::MAX >> 1),
        ],
    ) {
        let header = FrameHeader {
            fin,
            rsv1,
            rsv2: false,
            rsv3: false,
            op_code: [OpCode::Continuation, OpCode::Text, OpCode::Binary][op_index],
            masked,
            length,
            mask: if masked { mask } else { [0; 4] },
        };

        let mut buf = [0u8; MAX_HEADER_SIZE];
        let n = header.write(&mut buf).unwrap();
        prop_assert_eq!(n, header.wire_size());
        let parsed = parse_header(&buf[..n]);
        prop_assert_eq!(parsed, header);
    }

    #[test]
    fn close_payload_roundtrips(
        code in prop_oneof![
            (1000u16..=1003),
            (1007u16..=1014),
            (3000u16..=4999),
        ],
        reason in "[a-zA-Z0-9 ]{0,100}",
    ) {
        let payload = encode_close_payload(CloseCode::from_u16(code), &reason);
        let (parsed_code, parsed_reason) = parse_close_payload(&payload).unwrap();
        prop_assert_eq!(parsed_code.as_u16(), code);
        prop_assert_eq!(parsed_reason, reason);
    }
}
