/// Event socket against an in-process Engine.IO / Socket.IO server
use futures_util::{SinkExt, StreamExt};
use koi_common::{ChannelToastSink, ClientError, ToastKind};
use koi_realtime::socket::{DomainEvent, EventSocket, EventSocketOptions};
use resilience::RetryConfig;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerWs = WebSocketStream<TcpStream>;

const OPEN: &str =
    r#"0{"sid":"s-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: Fn(ServerWs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler(ws));
            }
        }
    });
    format!("ws://{}", addr)
}

async fn recv_text(ws: &mut ServerWs) -> Option<String> {
    loop {
        match ws.next().await? {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

fn socket_for(url: &str) -> (EventSocket, mpsc::UnboundedReceiver<koi_common::Toast>) {
    let (sink, toasts) = ChannelToastSink::channel();
    let mut options = EventSocketOptions::new(url, Arc::new(|| Some("token-123".to_string())));
    options.connect_timeout = Duration::from_secs(2);
    options.reconnect = None;
    (EventSocket::new(options, Arc::new(sink)), toasts)
}

#[tokio::test]
async fn test_connect_joins_with_token_and_receives_events() {
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<String>();
    let url = spawn_server(move |mut ws| {
        let auth_tx = auth_tx.clone();
        async move {
            ws.send(Message::Text(OPEN.to_string())).await.unwrap();
            let connect = recv_text(&mut ws).await.unwrap();
            let _ = auth_tx.send(connect);
            ws.send(Message::Text(r#"40{"sid":"n-1"}"#.to_string())).await.unwrap();

            ws.send(Message::Text("2".to_string())).await.unwrap();
            let pong = recv_text(&mut ws).await.unwrap();
            let _ = auth_tx.send(pong);

            ws.send(Message::Text(
                r#"42["paymentCompleted",{"paymentId":"p-1","amount":250000,"description":"Entry fee paid"}]"#
                    .to_string(),
            ))
            .await
            .unwrap();
            while recv_text(&mut ws).await.is_some() {}
        }
    })
    .await;

    let (socket, mut toasts) = socket_for(&url);
    let mut events = socket.subscribe();
    socket.connect().await.unwrap();
    assert!(socket.is_connected());

    assert_eq!(auth_rx.recv().await.unwrap(), r#"40{"token":"token-123"}"#);
    assert_eq!(auth_rx.recv().await.unwrap(), "3");

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        DomainEvent::PaymentCompleted(payment) => {
            assert_eq!(payment.payment_id, "p-1");
            assert_eq!(payment.amount, 250000.0);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let toast = toasts.recv().await.unwrap();
    assert_eq!(toast.kind, ToastKind::Success);
    assert_eq!(toast.title, "Payment completed");
    assert_eq!(toast.body, "Entry fee paid");

    socket.disconnect().await;
    assert!(!socket.is_connected());
}

#[tokio::test]
async fn test_connect_error_is_a_handshake_failure() {
    let url = spawn_server(|mut ws| async move {
        ws.send(Message::Text(OPEN.to_string())).await.unwrap();
        let _ = recv_text(&mut ws).await;
        let _ = ws
            .send(Message::Text(r#"44{"message":"Invalid token"}"#.to_string()))
            .await;
    })
    .await;

    let (socket, _toasts) = socket_for(&url);
    let err = socket.connect().await.unwrap_err();

    match err {
        ClientError::Handshake(message) => assert_eq!(message, "Invalid token"),
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!socket.is_connected());
}

#[tokio::test]
async fn test_emit_sends_event_packet() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
    let url = spawn_server(move |mut ws| {
        let frames_tx = frames_tx.clone();
        async move {
            ws.send(Message::Text(OPEN.to_string())).await.unwrap();
            let _ = recv_text(&mut ws).await;
            ws.send(Message::Text("40".to_string())).await.unwrap();
            while let Some(text) = recv_text(&mut ws).await {
                let _ = frames_tx.send(text);
            }
        }
    })
    .await;

    let (socket, _toasts) = socket_for(&url);
    socket.connect().await.unwrap();
    socket
        .emit("joinShow", serde_json::json!({"showId": "s-1"}))
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(3), frames_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame, r#"42["joinShow",{"showId":"s-1"}]"#);
}

#[tokio::test]
async fn test_connect_without_token_is_skipped() {
    let (sink, _toasts) = ChannelToastSink::channel();
    let options = EventSocketOptions::new("ws://127.0.0.1:9", Arc::new(|| None));
    let socket = EventSocket::new(options, Arc::new(sink));

    socket.connect().await.unwrap();
    assert!(!socket.is_connected());
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_connect_again_after_server_disconnect() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let url = spawn_server(move |mut ws| {
        let connection = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            ws.send(Message::Text(OPEN.to_string())).await.unwrap();
            let _ = recv_text(&mut ws).await;
            ws.send(Message::Text("40".to_string())).await.unwrap();
            if connection == 0 {
                let _ = ws.send(Message::Text("41".to_string())).await;
            }
            while recv_text(&mut ws).await.is_some() {}
        }
    })
    .await;

    let (socket, _toasts) = socket_for(&url);
    socket.connect().await.unwrap();
    assert!(wait_until(|| !socket.is_connected()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    socket.connect().await.unwrap();
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert!(socket.is_connected());
    socket.emit("joinShow", serde_json::json!({"showId": "s-1"})).unwrap();

    socket.disconnect().await;
}

#[tokio::test]
async fn test_dropped_link_reconnects_and_resumes_events() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let url = spawn_server(move |mut ws| {
        let connection = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            ws.send(Message::Text(OPEN.to_string())).await.unwrap();
            let _ = recv_text(&mut ws).await;
            ws.send(Message::Text("40".to_string())).await.unwrap();
            if connection == 0 {
                // Drop the TCP link without a close frame
                return;
            }
            ws.send(Message::Text(
                r#"42["livestreamStarted",{"showId":"s-1","showName":"Spring Koi Expo"}]"#.to_string(),
            ))
            .await
            .unwrap();
            while recv_text(&mut ws).await.is_some() {}
        }
    })
    .await;

    let (sink, _toasts) = ChannelToastSink::channel();
    let mut options = EventSocketOptions::new(&url, Arc::new(|| Some("token-123".to_string())));
    options.connect_timeout = Duration::from_secs(2);
    options.reconnect = Some(RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(50),
        ..Default::default()
    });
    let socket = EventSocket::new(options, Arc::new(sink));
    let mut events = socket.subscribe();

    socket.connect().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        DomainEvent::LivestreamStarted(started) => assert_eq!(started.show_name, "Spring Koi Expo"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    assert!(socket.is_connected());

    socket.disconnect().await;
}
