//! End-to-end tests for the relay over real WebSocket connections.
//!
//! Each test spawns a `TestRelayServer` on a random port and drives it with
//! tokio-tungstenite clients.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use bytes::Bytes;
use futures::StreamExt;
use relay_service::transport::Frame;
use relay_test_utils::*;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

fn http_status(err: tungstenite::Error) -> Option<u16> {
    match err {
        tungstenite::Error::Http(response) => Some(response.status().as_u16()),
        _ => None,
    }
}

#[tokio::test]
async fn test_relay_reaches_every_other_member() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut alice = server.connect_and_auth().await?;
    let mut bob = server.connect_and_auth().await?;
    let mut carol = server.connect_and_auth().await?;
    server.wait_for_clients(3).await?;

    send_binary(&mut alice, b"\x01\x02update").await?;

    assert_eq!(next_binary(&mut bob).await?, b"\x01\x02update");
    assert_eq!(next_binary(&mut carol).await?, b"\x01\x02update");

    // The sender never hears its own frame
    let echo = tokio::time::timeout(Duration::from_millis(200), alice.next()).await;
    assert!(echo.is_err(), "sender received its own frame: {echo:?}");

    Ok(())
}

#[tokio::test]
async fn test_frames_from_one_sender_arrive_in_order() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut alice = server.connect_and_auth().await?;
    let mut bob = server.connect_and_auth().await?;
    server.wait_for_clients(2).await?;

    for i in 0..20u8 {
        send_binary(&mut alice, &[i]).await?;
    }
    for i in 0..20u8 {
        assert_eq!(next_binary(&mut bob).await?, vec![i]);
    }

    Ok(())
}

#[tokio::test]
async fn test_wrong_secret_is_closed_without_joining() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut intruder = server.connect().await?;
    send_auth(&mut intruder, "not-the-secret").await?;

    expect_closed(&mut intruder).await?;
    server.wait_for_clients(0).await?;

    Ok(())
}

#[tokio::test]
async fn test_unauthenticated_client_receives_nothing() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut lurker = server.connect().await?;
    let mut alice = server.connect_and_auth().await?;
    let mut bob = server.connect_and_auth().await?;
    server.wait_for_clients(2).await?;

    send_binary(&mut alice, b"private").await?;
    assert_eq!(next_binary(&mut bob).await?, b"private");

    let leaked = tokio::time::timeout(Duration::from_millis(200), lurker.next()).await;
    assert!(leaked.is_err(), "unauthenticated client received {leaked:?}");

    Ok(())
}

#[tokio::test]
async fn test_capacity_rejects_upgrade_with_503() -> Result<()> {
    let server = TestRelayServer::spawn_with(&[("RELAY_MAX_CLIENTS", "2")]).await?;

    let _a = server.connect_and_auth().await?;
    let _b = server.connect_and_auth().await?;
    server.wait_for_clients(2).await?;

    let err = server.connect().await.expect_err("third client admitted");
    assert_eq!(http_status(err), Some(503));

    Ok(())
}

#[tokio::test]
async fn test_slot_is_reusable_after_disconnect() -> Result<()> {
    let server = TestRelayServer::spawn_with(&[("RELAY_MAX_CLIENTS", "1")]).await?;

    let mut first = server.connect_and_auth().await?;
    server.wait_for_clients(1).await?;

    first.close(None).await?;
    server.wait_for_clients(0).await?;

    let _second = server.connect_and_auth().await?;
    server.wait_for_clients(1).await?;

    Ok(())
}

#[tokio::test]
async fn test_unknown_room_is_404() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let err = tokio_tungstenite::connect_async(server.ws_url("another-room"))
        .await
        .expect_err("unknown room admitted");
    assert_eq!(http_status(err), Some(404));

    Ok(())
}

#[tokio::test]
async fn test_query_mode_checks_secret_before_upgrade() -> Result<()> {
    let server = TestRelayServer::spawn_with(&[("RELAY_AUTH_MODE", "query")]).await?;

    let err = tokio_tungstenite::connect_async(format!("{}?secret=wrong", server.room_url()))
        .await
        .expect_err("wrong secret admitted");
    assert_eq!(http_status(err), Some(401));

    // Correct secret joins without any auth frame
    let (mut alice, _) =
        tokio_tungstenite::connect_async(format!("{}?secret={}", server.room_url(), TEST_SECRET))
            .await?;
    let (mut bob, _) =
        tokio_tungstenite::connect_async(format!("{}?secret={}", server.room_url(), TEST_SECRET))
            .await?;
    server.wait_for_clients(2).await?;

    send_binary(&mut alice, b"hello").await?;
    assert_eq!(next_binary(&mut bob).await?, b"hello");

    Ok(())
}

#[tokio::test]
async fn test_idle_member_is_removed() -> Result<()> {
    let server = TestRelayServer::spawn_with(&[("RELAY_IDLE_TIMEOUT_SECONDS", "1")]).await?;

    let mut idle = server.connect_and_auth().await?;
    server.wait_for_clients(1).await?;

    expect_closed(&mut idle).await?;
    server.wait_for_clients(0).await?;

    Ok(())
}

#[tokio::test]
async fn test_websocket_and_in_memory_clients_share_a_room() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut memory_peer = server.attach_memory_client(IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert!(memory_peer.send_auth(TEST_SECRET));
    let mut ws = server.connect_and_auth().await?;
    server.wait_for_clients(2).await?;

    send_binary(&mut ws, b"from-ws").await?;
    let frame = tokio::time::timeout(Duration::from_secs(5), memory_peer.recv()).await?;
    assert_eq!(frame, Some(Frame::Binary(Bytes::from_static(b"from-ws"))));

    assert!(memory_peer.send_binary(b"from-memory"));
    assert_eq!(next_binary(&mut ws).await?, b"from-memory");

    Ok(())
}

#[tokio::test]
async fn test_hub_shutdown_closes_members() -> Result<()> {
    let server = TestRelayServer::spawn().await?;

    let mut alice = server.connect_and_auth().await?;
    server.wait_for_clients(1).await?;

    server.hub().shutdown();
    expect_closed(&mut alice).await?;

    Ok(())
}
