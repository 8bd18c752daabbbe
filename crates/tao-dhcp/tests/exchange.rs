//! End-to-end DHCP exchanges over loopback UDP

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tao_dhcp::{
    DhcpConfig, DhcpEvent, DhcpOption, DhcpServer, LeaseTable, Message, MessageType, BOOTREPLY,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::timeout;

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);

struct Harness {
    client: UdpSocket,
    server_addr: SocketAddr,
    server: DhcpServer,
    shutdown: watch::Sender<bool>,
}

async fn start() -> Harness {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let reply_target = match client.local_addr().unwrap() {
        SocketAddr::V4(addr) => addr,
        SocketAddr::V6(_) => panic!("expected an IPv4 client socket"),
    };

    let range = "10.0.1.0/24".parse().unwrap();
    let config = DhcpConfig::new(SERVER_IP, range)
        .with_bind_addr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .with_reply_target(reply_target)
        .with_router(Ipv4Addr::new(10, 0, 1, 254))
        .with_boot_filename("pxelinux.0");

    let server = DhcpServer::bind(config, LeaseTable::new(range).shared())
        .await
        .unwrap();
    let server_addr = server.local_addr().unwrap();

    let (shutdown, shutdown_rx) = watch::channel(false);
    let runner = server.clone();
    tokio::spawn(async move { runner.run(shutdown_rx).await });

    Harness {
        client,
        server_addr,
        server,
        shutdown,
    }
}

fn client_message(mac: [u8; 6], message_type: MessageType, extra: Vec<DhcpOption>) -> Vec<u8> {
    let mut message = Message {
        xid: u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]]),
        flags: 0x8000,
        options: vec![DhcpOption::MessageType(message_type)],
        ..Message::default()
    };
    message.chaddr[..6].copy_from_slice(&mac);
    message.options.extend(extra);
    message.to_vec().unwrap()
}

async fn exchange(harness: &Harness, datagram: &[u8]) -> Message {
    harness
        .client
        .send_to(datagram, harness.server_addr)
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let (len, _) = timeout(Duration::from_secs(5), harness.client.recv_from(&mut buf))
        .await
        .expect("no reply from server")
        .unwrap();
    Message::decode(&buf[..len]).unwrap()
}

#[tokio::test]
async fn test_discover_then_request() {
    let harness = start().await;
    let mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];

    let offer = exchange(
        &harness,
        &client_message(
            mac,
            MessageType::Discover,
            vec![DhcpOption::ParameterRequestList(vec![1, 3, 28])],
        ),
    )
    .await;

    assert_eq!(offer.op, BOOTREPLY);
    assert_eq!(offer.xid, 0xccdd_eeff);
    assert_eq!(offer.message_type(), Some(MessageType::Offer));
    assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 1, 0));
    assert_eq!(
        offer.option(54),
        Some(&DhcpOption::ServerIdentifier(SERVER_IP))
    );
    assert_eq!(offer.option(51), Some(&DhcpOption::AddressTime(864_000)));
    assert_eq!(
        offer.option(3),
        Some(&DhcpOption::Router(vec![Ipv4Addr::new(10, 0, 1, 254)]))
    );
    assert_eq!(offer.siaddr, Ipv4Addr::UNSPECIFIED);

    let ack = exchange(&harness, &client_message(mac, MessageType::Request, vec![])).await;
    assert_eq!(ack.message_type(), Some(MessageType::Ack));
    assert_eq!(ack.yiaddr, offer.yiaddr);

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_pxe_discover_gets_boot_file() {
    let harness = start().await;

    let offer = exchange(
        &harness,
        &client_message(
            [0x52, 0x54, 0x00, 0x00, 0x00, 0x01],
            MessageType::Discover,
            vec![DhcpOption::ClassIdentifier(
                b"PXEClient:Arch:00000:UNDI:002001".to_vec(),
            )],
        ),
    )
    .await;

    assert_eq!(offer.siaddr, SERVER_IP);
    assert_eq!(offer.boot_file_name(), "pxelinux.0");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_listener() {
    let harness = start().await;
    let mut events = harness.server.subscribe();

    harness
        .client
        .send_to(&[1, 2, 3], harness.server_addr)
        .await
        .unwrap();

    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            DhcpEvent::Started { .. } => continue,
            DhcpEvent::Error { mac: None, error } => {
                assert!(error.contains("too short"));
                break;
            }
            other => panic!("expected Error event, got {:?}", other),
        }
    }

    let offer = exchange(
        &harness,
        &client_message([1; 6], MessageType::Discover, vec![]),
    )
    .await;
    assert_eq!(offer.message_type(), Some(MessageType::Offer));

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_discover_with_empty_router_option_gets_offer() {
    let harness = start().await;
    let datagram = client_message(
        [3; 6],
        MessageType::Discover,
        vec![DhcpOption::Unknown(3, vec![])],
    );
    assert_eq!(&datagram[240..246], &[53, 1, 1, 3, 0, 255]);

    let offer = exchange(&harness, &datagram).await;
    assert_eq!(offer.message_type(), Some(MessageType::Offer));
    assert_eq!(offer.yiaddr, Ipv4Addr::new(10, 0, 1, 0));

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_oversized_request_is_read_whole() {
    let harness = start().await;
    // long vendor option pushes the End option past a 1500-byte MTU
    let datagram = client_message(
        [4; 6],
        MessageType::Discover,
        (0..8)
            .map(|_| DhcpOption::Unknown(43, vec![0xab; 250]))
            .collect(),
    );
    assert!(datagram.len() > 1500);

    let offer = exchange(&harness, &datagram).await;
    assert_eq!(offer.message_type(), Some(MessageType::Offer));

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_release_gets_no_reply() {
    let harness = start().await;

    harness
        .client
        .send_to(
            &client_message([2; 6], MessageType::Release, vec![]),
            harness.server_addr,
        )
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let result = timeout(
        Duration::from_millis(300),
        harness.client.recv_from(&mut buf),
    )
    .await;
    assert!(result.is_err(), "server replied to RELEASE");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn test_shutdown_emits_stopped() {
    let harness = start().await;
    let mut events = harness.server.subscribe();

    harness.shutdown.send(true).unwrap();

    loop {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(event, DhcpEvent::Stopped) {
            break;
        }
    }
}
