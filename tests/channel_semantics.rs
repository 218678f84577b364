//! Channel-level behavior: deadlines, peer errors, unreliable mode,
//! backpressure, and idle teardown.

use hashline_core::{Error, Reliability, SwitchConfig};
use hashline_integration_tests::{fast_config, init_tracing, linked_pair};
use hashline_transport::MemNetwork;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_read_deadline_expires_and_clears() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "tick", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"ping"[..]).await.unwrap();
    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    assert_eq!(
        timeout(WAIT, peer.recv()).await.unwrap().unwrap().as_deref(),
        Some(&b"ping"[..])
    );

    chan.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)));
    assert!(matches!(chan.recv().await.unwrap_err(), Error::Timeout));
    // An expired deadline keeps firing until it is replaced.
    assert!(matches!(chan.recv().await.unwrap_err(), Error::Timeout));

    chan.set_read_deadline(None);
    peer.send(&b"pong"[..]).await.unwrap();
    assert_eq!(
        timeout(WAIT, chan.recv()).await.unwrap().unwrap().as_deref(),
        Some(&b"pong"[..])
    );
}

#[tokio::test]
async fn test_peer_error_surfaces_reason() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "job", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"go"[..]).await.unwrap();

    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    peer.fail("busy").await.unwrap();

    match timeout(WAIT, chan.recv()).await.unwrap().unwrap_err() {
        Error::PeerError(reason) => assert_eq!(reason, "busy"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unreliable_channel_delivery() {
    init_tracing();
    let net = MemNetwork::new();
    let (a, b) = linked_pair(&net, fast_config());

    let chan = a
        .switch
        .open_channel(b.hashname, "gossip", Reliability::Unreliable)
        .await
        .unwrap();
    for msg in [&b"one"[..], b"two", b"three"] {
        chan.send(msg).await.unwrap();
    }

    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    assert_eq!(peer.channel_type(), "gossip");
    assert_eq!(peer.reliability(), Reliability::Unreliable);

    // The in-memory transport is loss-free and ordered, so all three
    // arrive even without sequencing.
    for msg in [&b"one"[..], b"two", b"three"] {
        let body = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
        assert_eq!(body.as_deref(), Some(msg));
    }

    chan.close().await.unwrap();
    assert_eq!(timeout(WAIT, peer.recv()).await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn test_send_window_backpressure() {
    init_tracing();
    let net = MemNetwork::new();
    let config = SwitchConfig {
        send_window: 2,
        ack_delay: Duration::from_millis(300),
        ack_threshold: 1_000,
        ..SwitchConfig::default()
    };
    let (a, b) = linked_pair(&net, config);

    let chan = a
        .switch
        .open_channel(b.hashname, "flood", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"m0"[..]).await.unwrap();
    chan.send(&b"m1"[..]).await.unwrap();

    // The window is full; the third send must block until the peer's
    // delayed ack releases it.
    let blocked = {
        let chan = chan.clone();
        tokio::spawn(async move { chan.send(&b"m2"[..]).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());

    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    timeout(WAIT, blocked).await.unwrap().unwrap().unwrap();

    for msg in [&b"m0"[..], b"m1", b"m2"] {
        let body = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
        assert_eq!(body.as_deref(), Some(msg));
    }
}

#[tokio::test]
async fn test_idle_line_breaks_channels() {
    init_tracing();
    let net = MemNetwork::new();
    let config = SwitchConfig {
        idle_timeout: Duration::from_millis(200),
        sweep_interval: Duration::from_millis(50),
        ..fast_config()
    };
    let (a, b) = linked_pair(&net, config);

    let chan = a
        .switch
        .open_channel(b.hashname, "quiet", Reliability::Reliable)
        .await
        .unwrap();
    chan.send(&b"last words"[..]).await.unwrap();
    let peer = timeout(WAIT, b.switch.accept()).await.unwrap().unwrap();
    timeout(WAIT, peer.recv()).await.unwrap().unwrap();

    // Park two readers on the channel before the line goes idle; the
    // teardown must wake both with a broken-channel error.
    let r1 = {
        let chan = chan.clone();
        tokio::spawn(async move { chan.recv().await })
    };
    let r2 = {
        let chan = chan.clone();
        tokio::spawn(async move { chan.recv().await })
    };

    // No traffic for well past the idle limit; the sweeper tears the
    // line down and breaks its channels.
    tokio::time::sleep(Duration::from_millis(600)).await;

    for reader in [r1, r2] {
        assert!(matches!(
            timeout(WAIT, reader).await.unwrap().unwrap().unwrap_err(),
            Error::BrokenChannel
        ));
    }
    assert!(matches!(
        chan.send(&b"too late"[..]).await.unwrap_err(),
        Error::BrokenChannel
    ));
    assert_eq!(a.switch.stats().await.unwrap().lines, 0);
}
