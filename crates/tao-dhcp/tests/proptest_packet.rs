use proptest::prelude::*;
use std::net::Ipv4Addr;

use tao_dhcp::{DecodeError, DhcpOption, Message, MessageType, MAGIC_COOKIE, OPTIONS_OFFSET};

fn valid_header() -> Vec<u8> {
    let mut packet = vec![0u8; OPTIONS_OFFSET];
    packet[0] = 1;
    packet[1] = 1;
    packet[2] = 6;
    packet[236..240].copy_from_slice(&MAGIC_COOKIE);
    packet
}

fn arb_option() -> impl Strategy<Value = DhcpOption> {
    prop_oneof![
        any::<[u8; 4]>().prop_map(|o| DhcpOption::SubnetMask(Ipv4Addr::from(o))),
        prop::collection::vec(any::<[u8; 4]>(), 1..4)
            .prop_map(|v| DhcpOption::Router(v.into_iter().map(Ipv4Addr::from).collect())),
        any::<u32>().prop_map(DhcpOption::AddressTime),
        prop_oneof![Just(MessageType::Discover), Just(MessageType::Request)]
            .prop_map(DhcpOption::MessageType),
        prop::collection::vec(any::<u8>(), 0..20).prop_map(DhcpOption::ParameterRequestList),
        prop::collection::vec(any::<u8>(), 0..40).prop_map(DhcpOption::ClassIdentifier),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = Message::decode(&data);
    }

    #[test]
    fn decode_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&options_data);
        let _ = Message::decode(&packet);
    }

    #[test]
    fn option_region_without_end_is_rejected(
        options_data in prop::collection::vec(1u8..255, 0..64)
    ) {
        // every byte is a non-Pad, non-End code or a length, so End never appears
        let mut packet = valid_header();
        packet.extend_from_slice(&options_data);
        let result = Message::decode(&packet);
        prop_assert!(result.is_err());
        let not_too_short = !matches!(result, Err(DecodeError::TooShort { .. }));
        prop_assert!(not_too_short);
    }

    #[test]
    fn header_and_options_survive_encoding(
        xid: u32,
        secs: u16,
        flags: u16,
        yiaddr: [u8; 4],
        chaddr: [u8; 16],
        options in prop::collection::vec(arb_option(), 0..8)
    ) {
        let message = Message {
            xid,
            secs,
            flags,
            yiaddr: Ipv4Addr::from(yiaddr),
            chaddr,
            options,
            ..Message::default()
        };

        let bytes = message.to_vec().unwrap();
        prop_assert!(bytes.len() >= 300);
        prop_assert_eq!(Message::decode(&bytes).unwrap(), message);
    }
}
