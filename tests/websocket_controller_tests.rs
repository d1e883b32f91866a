//! WebsocketController against a local tokio-tungstenite server

use futures_util::{SinkExt, StreamExt};
use price_feeder::oracle::sources::{
    KeepAlive, MessageHandler, ProviderName, WebsocketController,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

fn recording_handler() -> (MessageHandler, Arc<Mutex<Vec<String>>>) {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let handler: MessageHandler = Arc::new(move |text: &str| {
        sink.lock().unwrap().push(text.to_string());
    });
    (handler, frames)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("server saw no message")
        .expect("server task ended")
}

#[tokio::test]
async fn test_subscribes_routes_frames_and_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for round in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            if let Some(Ok(Message::Text(text))) = ws.next().await {
                seen_tx.send(text).unwrap();
            }

            if round == 0 {
                ws.send(Message::Text("pong".to_string())).await.unwrap();
                ws.send(Message::Text(String::new())).await.unwrap();
                ws.send(Message::Text(r#"{"price":"1.5"}"#.to_string()))
                    .await
                    .unwrap();
                ws.close(None).await.unwrap();
            } else {
                while let Some(Ok(_)) = ws.next().await {}
            }
        }
    });

    let (handler, frames) = recording_handler();
    let cancel = CancellationToken::new();
    let subscription = json!({"op": "subscribe", "args": ["tickers.ATOMUSDT"]});
    let (controller, _handle) = WebsocketController::new(
        ProviderName::Bybit,
        url,
        vec![subscription.clone()],
        KeepAlive::Disabled,
        handler,
        cancel.clone(),
    );
    let task = tokio::spawn(controller.with_reconnect_delay(Duration::from_millis(10)).run());

    assert_eq!(recv(&mut seen_rx).await, subscription.to_string());
    // replayed after the server closed the first connection
    assert_eq!(recv(&mut seen_rx).await, subscription.to_string());

    assert_eq!(*frames.lock().unwrap(), vec![r#"{"price":"1.5"}"#.to_string()]);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_live_subscriptions_and_text_ping() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                if seen_tx.send(text).is_err() {
                    break;
                }
            }
        }
    });

    let (handler, _frames) = recording_handler();
    let cancel = CancellationToken::new();
    let (controller, handle) = WebsocketController::new(
        ProviderName::Mexc,
        url,
        vec![json!({"op": "sub.overview"})],
        KeepAlive::Text("ping"),
        handler,
        cancel.clone(),
    );
    let task = tokio::spawn(
        controller
            .with_ping_interval(Duration::from_secs(3600))
            .run(),
    );

    assert_eq!(recv(&mut seen_rx).await, r#"{"op":"sub.overview"}"#);
    // the first interval tick fires immediately
    assert_eq!(recv(&mut seen_rx).await, "ping");

    handle
        .subscribe(vec![json!({"op": "sub.kline", "symbol": "ATOM_USDT"})])
        .unwrap();
    let sub: serde_json::Value = serde_json::from_str(&recv(&mut seen_rx).await).unwrap();
    assert_eq!(sub["symbol"], "ATOM_USDT");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(handle.subscribe(vec![json!({})]).is_err());
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Ping(vec![7, 7])).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let seen = match msg {
                Message::Pong(data) => format!("pong {:?}", data),
                Message::Text(text) => text,
                _ => continue,
            };
            if seen_tx.send(seen).is_err() {
                break;
            }
        }
    });

    let (handler, frames) = recording_handler();
    let cancel = CancellationToken::new();
    let (controller, _handle) = WebsocketController::new(
        ProviderName::Binance,
        url,
        vec![json!({"method": "SUBSCRIBE", "params": ["atomusdt@ticker"], "id": 1})],
        KeepAlive::Disabled,
        handler,
        cancel.clone(),
    );
    let task = tokio::spawn(controller.run());

    let mut seen = vec![recv(&mut seen_rx).await, recv(&mut seen_rx).await];
    seen.sort();
    assert_eq!(seen[0], "pong [7, 7]");
    assert!(seen[1].contains("SUBSCRIBE"));
    assert!(frames.lock().unwrap().is_empty());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}
