//! End-to-end switch tests: handshakes, channels, loss recovery,
//! restarts, all over the in-memory transport.

use hashline_core::{ChannelState, Error, Hashname, Header, Identity, Packet, Reliability};
use hashline_crypto::{AgreementSecret, SigningKey};
use hashline_integration_tests::{fast_config, init_tracing, link, linked_pair, spawn_node_with};
use hashline_transport::{MemNetwork, Transport};
use rand_core::OsRng;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_echo_roundtrip_and_clean_close() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let echo = tokio::spawn(async move {
        let chan = b.switch.accept().await.unwrap();
        assert_eq!(chan.channel_type(), "echo");
        assert_eq!(chan.reliability(), Reliability::Reliable);
        while let Some(body) = chan.recv().await.unwrap() {
            chan.send(body).await.unwrap();
        }
        chan.close().await.unwrap();
        chan
    });

    let chan = a
        .switch
        .open_channel(b.hashname, "echo", Reliability::Reliable)
        .await
        .unwrap();
    assert_eq!(chan.remote(), b.hashname);

    for msg in [&b"first"[..], b"second", b"third"] {
        chan.send(msg).await.unwrap();
    }
    for msg in [&b"first"[..], b"second", b"third"] {
        let body = timeout(WAIT, chan.recv()).await.unwrap().unwrap();
        assert_eq!(body.as_deref(), Some(msg));
    }

    chan.close().await.unwrap();
    let server_chan = timeout(WAIT, echo).await.unwrap().unwrap();
    assert_eq!(timeout(WAIT, chan.recv()).await.unwrap().unwrap(), None);

    // Both ends have now sent and seen an end.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(chan.state(), ChannelState::Ended);
    assert_eq!(server_chan.state(), ChannelState::Ended);
}

#[tokio::test]
async fn test_midstream_loss_is_recovered() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "bulk", Reliability::Reliable)
        .await
        .unwrap();

    chan.send(&b"msg-0"[..]).await.unwrap();
    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    assert_eq!(
        timeout(WAIT, peer.recv()).await.unwrap().unwrap().as_deref(),
        Some(&b"msg-0"[..])
    );

    // Lose the next datagram off the wire; the gap report from the
    // receiver must trigger a retransmit.
    a.transport.drop_next(1);
    chan.send(&b"msg-1"[..]).await.unwrap();
    chan.send(&b"msg-2"[..]).await.unwrap();

    for expected in [&b"msg-1"[..], b"msg-2"] {
        let body = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
        assert_eq!(body.as_deref(), Some(expected));
    }

    let inspect = peer.inspect();
    assert!(inspect.missing.is_empty());
}

#[tokio::test]
async fn test_concurrent_channels_stay_isolated() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let chan = b.switch.accept().await.unwrap();
            tokio::spawn(async move {
                let tag = chan.channel_type().to_string();
                while let Some(body) = chan.recv().await.unwrap() {
                    let mut reply = tag.clone().into_bytes();
                    reply.push(b':');
                    reply.extend_from_slice(&body);
                    chan.send(reply).await.unwrap();
                }
            });
        }
    });

    let alpha = a
        .switch
        .open_channel(b.hashname, "alpha", Reliability::Reliable)
        .await
        .unwrap();
    let beta = a
        .switch
        .open_channel(b.hashname, "beta", Reliability::Reliable)
        .await
        .unwrap();
    assert_ne!(alpha.id(), beta.id());

    alpha.send(&b"1"[..]).await.unwrap();
    beta.send(&b"2"[..]).await.unwrap();

    let from_alpha = timeout(WAIT, alpha.recv()).await.unwrap().unwrap();
    let from_beta = timeout(WAIT, beta.recv()).await.unwrap().unwrap();
    assert_eq!(from_alpha.as_deref(), Some(&b"alpha:1"[..]));
    assert_eq!(from_beta.as_deref(), Some(&b"beta:2"[..]));

    drop(server);
}

#[tokio::test]
async fn test_open_is_idempotent() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    timeout(WAIT, a.switch.open(b.hashname))
        .await
        .unwrap()
        .unwrap();
    // A second open on an established line resolves immediately.
    timeout(WAIT, a.switch.open(b.hashname))
        .await
        .unwrap()
        .unwrap();

    let stats = a.switch.stats().await.unwrap();
    assert_eq!(stats.lines, 1);
}

#[tokio::test]
async fn test_unknown_peer_is_rejected() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, _b) = linked_pair(&net, fast_config());

    let stranger = Hashname::from_bytes([7u8; 32]);
    let err = a.switch.open(stranger).await.unwrap_err();
    assert!(matches!(err, Error::UnknownPeer(h) if h == stranger));
}

#[tokio::test]
async fn test_restarted_peer_supersedes_line() {
    init_tracing();
    let net = MemNetwork::new();

    let signing = SigningKey::generate(&mut OsRng);
    let agreement = AgreementSecret::generate(&mut OsRng);

    let a = spawn_node_with(&net, Identity::generate(&mut OsRng), fast_config());
    let b1 = spawn_node_with(
        &net,
        Identity::from_keys(signing.clone(), agreement.clone()),
        fast_config(),
    );
    link(&a, &b1);

    let chan = a
        .switch
        .open_channel(b1.hashname, "ping", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"before restart"[..]).await.unwrap();
    let peer = timeout(WAIT, b1.switch.accept()).await.unwrap().unwrap();
    assert_eq!(
        timeout(WAIT, peer.recv()).await.unwrap().unwrap().as_deref(),
        Some(&b"before restart"[..])
    );

    // The peer comes back with the same identity on a new endpoint and
    // must be able to open a fresh line through the stale one.
    b1.switch.shutdown().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let b2 = spawn_node_with(&net, Identity::from_keys(signing, agreement), fast_config());
    b2.switch.add_peer(a.keys, a.addr).unwrap();

    let chan2 = timeout(
        WAIT,
        b2.switch.open_channel(a.hashname, "ping", Reliability::Reliable),
    )
    .await
    .unwrap()
    .unwrap();
    chan2.send(&b"after restart"[..]).await.unwrap();

    let accepted = timeout(WAIT, a.switch.accept()).await.unwrap().unwrap();
    assert_eq!(
        timeout(WAIT, accepted.recv())
            .await
            .unwrap()
            .unwrap()
            .as_deref(),
        Some(&b"after restart"[..])
    );
    assert_eq!(a.switch.stats().await.unwrap().lines, 1);
}

#[tokio::test]
async fn test_stats_track_lines_and_handshakes() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "stat", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"x"[..]).await.unwrap();
    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    timeout(WAIT, peer.recv()).await.unwrap().unwrap();

    let a_stats = a.switch.stats().await.unwrap();
    let b_stats = b.switch.stats().await.unwrap();
    assert_eq!(a_stats.lines, 1);
    assert_eq!(b_stats.lines, 1);
    assert_eq!(a_stats.channels, 1);
    assert_eq!(b_stats.channels, 1);
    assert!(b_stats.handshakes_accepted >= 1);
    assert!(b_stats.packets_received >= 1);
}

#[tokio::test]
async fn test_forged_line_token_is_dropped() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());
    a.switch.open(b.hashname).await.unwrap();
    let before = a.switch.stats().await.unwrap();

    // A well-formed line packet whose token no live line answers to.
    let stranger = net.endpoint();
    let forged = Packet::new(
        Header {
            line: Some("ab".repeat(16)),
            iv: Some("00".repeat(24)),
            ..Header::of_type("line")
        },
        vec![0u8; 32],
    );
    stranger
        .send_to(&forged.encode().unwrap(), a.addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = a.switch.stats().await.unwrap();
    assert!(after.packets_received > before.packets_received);
    assert!(after.packets_dropped > before.packets_dropped);
    // The live line is untouched.
    assert_eq!(after.lines, 1);
}

#[tokio::test]
async fn test_shutdown_breaks_channels() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "doomed", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"x"[..]).await.unwrap();
    timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();

    a.switch.shutdown().await.unwrap();

    assert!(matches!(
        chan.send(&b"y"[..]).await.unwrap_err(),
        Error::BrokenChannel | Error::SwitchClosed
    ));
    assert!(matches!(
        chan.recv().await.unwrap_err(),
        Error::BrokenChannel
    ));
    assert!(matches!(
        a.switch.open(b.hashname).await.unwrap_err(),
        Error::SwitchClosed
    ));
}
