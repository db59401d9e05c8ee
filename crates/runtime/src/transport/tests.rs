use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

use super::*;
use serde_json::json;

#[tokio::test]
async fn sent_frames_carry_little_endian_length_prefix() {
    let (mut outbound_read, outbound_write) = duplex(1024);
    let (_inbound_read, inbound_write) = duplex(1024);

    let (transport, _rx) = PipeTransport::new(outbound_write, inbound_write);
    let (mut sender, _receiver) = transport.into_parts();

    let message = json!({"op": "release", "id": 1, "data": {"objectId": 2}});
    sender.send(message.clone()).await.unwrap();

    let mut length_buf = [0u8; 4];
    outbound_read.read_exact(&mut length_buf).await.unwrap();
    let length = u32::from_le_bytes(length_buf) as usize;

    let mut payload = vec![0u8; length];
    outbound_read.read_exact(&mut payload).await.unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&payload).unwrap(), message);
}

#[tokio::test]
async fn receiver_delivers_frames_in_order() {
    let (_outbound_read, outbound_write) = duplex(4096);
    let (inbound_read, mut inbound_write) = duplex(4096);

    let (mut transport, mut rx) = PipeTransport::new(outbound_write, inbound_read);
    let read_task = tokio::spawn(async move { transport.run().await });

    let messages = vec![
        json!({"op": "invokeMethod", "id": 1}),
        json!({"op": "dispatchEvent", "data": {"objectId": 3, "event": null}}),
        json!({"op": "release", "id": 2}),
    ];
    for message in &messages {
        let payload = serde_json::to_vec(message).unwrap();
        inbound_write.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
        inbound_write.write_all(&payload).await.unwrap();
    }
    inbound_write.flush().await.unwrap();

    for expected in &messages {
        assert_eq!(&rx.recv().await.unwrap(), expected);
    }

    drop(inbound_write);
    assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn clean_eof_between_frames_is_a_normal_shutdown() {
    let (_outbound_read, outbound_write) = duplex(1024);
    let (inbound_read, inbound_write) = duplex(1024);

    let (mut transport, _rx) = PipeTransport::new(outbound_write, inbound_read);
    drop(inbound_write);

    assert!(transport.run().await.is_ok());
}

#[tokio::test]
async fn truncated_length_prefix_is_an_error() {
    let (_outbound_read, outbound_write) = duplex(1024);
    let (inbound_read, mut inbound_write) = duplex(1024);

    let (mut transport, _rx) = PipeTransport::new(outbound_write, inbound_read);

    inbound_write.write_all(&[0x05, 0x00]).await.unwrap();
    inbound_write.flush().await.unwrap();
    drop(inbound_write);

    let err = transport.run().await.unwrap_err();
    assert!(err.to_string().contains("Failed to read length prefix"));
}

#[tokio::test]
async fn truncated_payload_is_an_error() {
    let (_outbound_read, outbound_write) = duplex(1024);
    let (inbound_read, mut inbound_write) = duplex(1024);

    let (mut transport, _rx) = PipeTransport::new(outbound_write, inbound_read);

    inbound_write.write_all(&8u32.to_le_bytes()).await.unwrap();
    inbound_write.write_all(b"tru").await.unwrap();
    inbound_write.flush().await.unwrap();
    drop(inbound_write);

    let err = transport.run().await.unwrap_err();
    assert!(err.to_string().contains("Failed to read frame payload"));
}

#[tokio::test]
async fn large_frames_round_trip() {
    let (_outbound_read, outbound_write) = duplex(1024 * 1024);
    let (inbound_read, mut inbound_write) = duplex(1024 * 1024);

    let (mut transport, mut rx) = PipeTransport::new(outbound_write, inbound_read);
    let read_task = tokio::spawn(async move { transport.run().await });

    let message = json!({"id": 1, "data": "x".repeat(100_000)});
    let payload = serde_json::to_vec(&message).unwrap();
    assert!(payload.len() > 32_768);

    inbound_write.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
    inbound_write.write_all(&payload).await.unwrap();
    inbound_write.flush().await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), message);

    drop(inbound_write);
    drop(rx);
    let _ = read_task.await;
}
