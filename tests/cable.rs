//! End-to-end tests over real TCP sockets

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use cable_hub::{handle_connection, CableHandle, CableServer, Config, Hooks, OpCode};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

/// Serve upgrades for `handle` on an ephemeral port
async fn listen(handle: CableHandle) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handle_connection(stream, handle.clone()));
        }
    });
    format!("ws://{}", addr)
}

async fn dial(base: &str, room: &str) -> Ws {
    let (ws, _) = connect_async(format!("{}{}", base, room)).await.unwrap();
    ws
}

fn random_text(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

async fn next_frame(ws: &mut Ws) -> Frame {
    timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap()
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

struct Running {
    handle: CableHandle,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    closed: mpsc::UnboundedReceiver<()>,
}

fn start(config: Config, hooks: Hooks) -> Running {
    let (closed_tx, closed) = mpsc::unbounded_channel();
    let hooks = hooks.on_server_close(move || {
        let _ = closed_tx.send(());
    });
    let (server, handle) = CableServer::new(config, hooks).unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));
    Running {
        handle,
        shutdown,
        task,
        closed,
    }
}

impl Running {
    async fn stop(mut self) {
        self.shutdown.cancel();
        recv(&mut self.closed).await;
        timeout(WAIT, self.task).await.unwrap().unwrap();
        assert!(self.closed.try_recv().is_err(), "server close fired twice");
    }
}

fn ready_channel() -> (Hooks, mpsc::UnboundedReceiver<(String, String)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let hooks = Hooks::new().on_conn_ready(move |c| {
        let _ = tx.send((c.name.clone(), c.room.clone()));
    });
    (hooks, rx)
}

/// Write a raw HTTP request and read until the server hangs up
async fn raw_request(base: &str, request: &str) -> String {
    let addr = base.trim_start_matches("ws://");
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut buf))
        .await
        .expect("connection left open")
        .unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn test_plain_http_request_is_refused() {
    let (hooks, mut ready) = ready_channel();
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let response = raw_request(&base, "GET /test HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(!response.contains(" 101 "), "upgraded: {}", response);
    assert!(ready.try_recv().is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_rejected_upgrade_is_forbidden() {
    let (ready_tx, mut ready) = mpsc::unbounded_channel::<()>();
    let hooks = Hooks::new()
        .on_accept(|_| None)
        .on_conn_ready(move |_| {
            let _ = ready_tx.send(());
        });
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let response = raw_request(
        &base,
        "GET /test HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 403"), "got: {}", response);
    assert!(ready.try_recv().is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_relay_between_members() {
    let (hooks, mut ready) = ready_channel();
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut ws = dial(&base, "/test").await;
    let mut ws2 = dial(&base, "/test").await;
    recv(&mut ready).await;
    recv(&mut ready).await;

    for _ in 0..10 {
        let data = random_text(4096);
        ws.send(Frame::Text(data.clone())).await.unwrap();
        assert_eq!(next_frame(&mut ws2).await, Frame::Text(data));
    }

    let data: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
    ws2.send(Frame::Binary(data.clone())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await, Frame::Binary(data));

    // The sender never hears itself.
    assert!(timeout(Duration::from_millis(50), ws.next()).await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_echo_to_sender() {
    let (hooks, mut ready) = ready_channel();
    let config = Config {
        echo_to_sender: true,
        ..Config::default()
    };
    let server = start(config, hooks);
    let base = listen(server.handle.clone()).await;

    let mut ws = dial(&base, "/test").await;
    recv(&mut ready).await;

    ws.send(Frame::Binary(b"xxx".to_vec())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await, Frame::Binary(b"xxx".to_vec()));

    server.stop().await;
}

#[tokio::test]
async fn test_callbacks() {
    let (tx, mut events) = mpsc::unbounded_channel::<&'static str>();
    let (t1, t2, t3, t4, t5) = (tx.clone(), tx.clone(), tx.clone(), tx.clone(), tx);
    let hooks = Hooks::new()
        .on_room_ready(move |_| {
            let _ = t1.send("room_ready");
        })
        .on_conn_ready(move |_| {
            let _ = t2.send("conn_ready");
        })
        .on_message(move |_| {
            let _ = t3.send("message");
        })
        .on_conn_close(move |_, _| {
            let _ = t4.send("conn_close");
        })
        .on_room_close(move |_| {
            let _ = t5.send("room_close");
        });
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut ws = dial(&base, "/test").await;
    ws.send(Frame::Text(random_text(4096))).await.unwrap();
    ws.close(None).await.unwrap();

    for expected in ["room_ready", "conn_ready", "message", "conn_close", "room_close"] {
        assert_eq!(recv(&mut events).await, expected);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_server_broadcast_is_room_scoped() {
    let (hooks, mut ready) = ready_channel();
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut ws = dial(&base, "/test").await;
    let mut ws2 = dial(&base, "/test").await;
    let mut ws3 = dial(&base, "/test-2").await;
    for _ in 0..3 {
        recv(&mut ready).await;
    }

    for _ in 0..10 {
        let data = random_text(4096);
        server
            .handle
            .broadcast("/test", "test", OpCode::Text, data.clone())
            .await
            .unwrap();
        assert_eq!(next_frame(&mut ws).await, Frame::Text(data.clone()));
        assert_eq!(next_frame(&mut ws2).await, Frame::Text(data));
    }

    assert!(timeout(Duration::from_millis(50), ws3.next()).await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn test_many_rooms() {
    let (hooks, mut ready) = ready_channel();
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut conns = Vec::new();
    for i in 0..128 {
        let cable = format!("/test-{}", i);
        let mut ws = dial(&base, &cable).await;

        let (_, room) = recv(&mut ready).await;
        assert_eq!(room, cable);

        for _ in 0..10 {
            ws.send(Frame::Text(random_text(4096))).await.unwrap();
        }
        conns.push(ws);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_room_recreated_after_close() {
    let (tx, mut events) = mpsc::unbounded_channel::<String>();
    let (t1, t2, t3, t4) = (tx.clone(), tx.clone(), tx.clone(), tx);
    let hooks = Hooks::new()
        .on_room_ready(move |room| {
            let _ = t1.send(format!("ready {}", room));
        })
        .on_conn_ready(move |c| {
            let _ = t2.send(format!("conn {}", c.room));
        })
        .on_room_close(move |room| {
            let _ = t3.send(format!("close {}", room));
        })
        .on_server_close(move || {
            let _ = t4.send("server closed".to_string());
        });
    let (server, handle) = CableServer::new(Config::default(), hooks).unwrap();
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(server.run(shutdown.clone()));
    let base = listen(handle).await;

    let mut ws = dial(&base, "/again").await;
    assert_eq!(recv(&mut events).await, "ready /again");
    assert_eq!(recv(&mut events).await, "conn /again");
    ws.close(None).await.unwrap();
    assert_eq!(recv(&mut events).await, "close /again");

    let _ws = dial(&base, "/again").await;
    assert_eq!(recv(&mut events).await, "ready /again");
    assert_eq!(recv(&mut events).await, "conn /again");

    shutdown.cancel();
    assert_eq!(recv(&mut events).await, "close /again");
    assert_eq!(recv(&mut events).await, "server closed");
    timeout(WAIT, task).await.unwrap().unwrap();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_custom_names_and_broadcast_all() {
    let (tx, mut names) = mpsc::unbounded_channel::<String>();
    let hooks = Hooks::new()
        .on_accept(|req| {
            let path = req.uri().path().trim_start_matches('/').to_string();
            Some(cable_hub::Admission::new("/lobby", path))
        })
        .on_message(move |m| {
            let _ = tx.send(m.name.clone());
        });
    let (ready_tx, mut ready) = mpsc::unbounded_channel();
    let hooks = hooks.on_conn_ready(move |c| {
        let _ = ready_tx.send(c.room.clone());
    });
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut alice = dial(&base, "/alice").await;
    let mut bob = dial(&base, "/bob").await;
    assert_eq!(recv(&mut ready).await, "/lobby");
    assert_eq!(recv(&mut ready).await, "/lobby");

    alice.send(Frame::Text("hi".into())).await.unwrap();
    assert_eq!(recv(&mut names).await, "alice");
    assert_eq!(next_frame(&mut bob).await, Frame::Text("hi".into()));

    server
        .handle
        .broadcast_all("server", OpCode::Text, "notice")
        .await
        .unwrap();
    assert_eq!(recv(&mut names).await, "server");
    assert_eq!(next_frame(&mut alice).await, Frame::Text("notice".into()));
    assert_eq!(next_frame(&mut bob).await, Frame::Text("notice".into()));

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let (hooks, mut ready) = ready_channel();
    let server = start(Config::default(), hooks);
    let base = listen(server.handle.clone()).await;

    let mut ws = dial(&base, "/test").await;
    recv(&mut ready).await;

    server.stop().await;
    assert!(matches!(next_frame(&mut ws).await, Frame::Close(_)));
}
