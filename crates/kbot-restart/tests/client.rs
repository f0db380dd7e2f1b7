#![cfg(unix)]

use kbot_protocol::ipc::IpcMessage;
use kbot_restart::RestartClient;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

#[tokio::test]
async fn request_restart_resolves_on_ack() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    std::env::set_var("KBOT_IPC_SOCKET", socket_path.to_str().unwrap());
    std::env::set_var("KBOT_SUPERVISED", "1");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let msg: IpcMessage = serde_json::from_str(line.trim()).unwrap();
        assert!(matches!(msg, IpcMessage::PlannedRestart { .. }));
        let mut reply = serde_json::to_string(&IpcMessage::RestartAck).unwrap();
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await.unwrap();
    });

    let client = RestartClient::from_env();
    assert!(client.is_supervised());
    client.request_restart("/tmp/checkpoint.json", Some(1000), Some(1)).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn request_restart_without_ipc_channel_fails_fast() {
    std::env::remove_var("KBOT_IPC_SOCKET");
    let client = RestartClient::default();
    let err = client.request_restart("/tmp/checkpoint.json", None, None).await.unwrap_err();
    assert_eq!(err.code(), "NO_IPC_CHANNEL");
}
