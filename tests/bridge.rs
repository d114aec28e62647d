use ptz_wrap::config::{AppConfig, ConnectionConfig};
use ptz_wrap::transport::TransportError;
use ptz_wrap::{
    ControllerError, ControllerEvent, ControllerHandle, ControllerState, EventSink, EventStream,
    LogLevel,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(2);

struct Bench {
    handle: ControllerHandle,
    events: EventStream,
    tracker: TcpStream,
    mount: UdpSocket,
}

async fn bench() -> Bench {
    bench_with(|_| {}).await
}

async fn bench_with(configure: impl FnOnce(&mut AppConfig)) -> Bench {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mount = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut config = AppConfig::default();
    config.command_link = ConnectionConfig::Tcp {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
    };
    config.mount_link = ConnectionConfig::Udp {
        local_port: 0,
        remote_host: "127.0.0.1".to_string(),
        remote_port: mount.local_addr().unwrap().port(),
    };
    config.runtime.receive_timeout_ms = 50;
    configure(&mut config);

    let (sink, events) = EventSink::channel();
    let (handle, accepted) =
        tokio::join!(ControllerHandle::start(&config, sink), listener.accept());
    let (tracker, _) = accepted.unwrap();

    Bench {
        handle: handle.unwrap(),
        events,
        tracker,
        mount,
    }
}

async fn datagram(mount: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 64];
    let (n, _) = timeout(WAIT, mount.recv_from(&mut buf))
        .await
        .expect("datagram in time")
        .unwrap();
    buf[..n].to_vec()
}

async fn warning(events: &mut EventStream) -> String {
    loop {
        match timeout(WAIT, events.recv()).await.expect("event in time") {
            Some(ControllerEvent::Log(log)) if log.level == LogLevel::Warning => {
                return log.message
            }
            Some(_) => continue,
            None => panic!("event stream closed"),
        }
    }
}

#[tokio::test]
async fn tracker_over_tcp_drives_mount_over_udp() {
    let mut bench = bench().await;
    assert_eq!(bench.handle.state(), ControllerState::Connected);

    bench.tracker.write_all(b"AZ 090\r").await.unwrap();
    assert_eq!(
        datagram(&bench.mount).await,
        [0xFF, 0x01, 0x00, 0x4B, 0x23, 0x28, 0x97]
    );

    bench.tracker.write_all(b"C2\r").await.unwrap();
    let mut reply = [0u8; 15];
    timeout(WAIT, bench.tracker.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"AZ=090 EL=000\r\n");

    bench.handle.shutdown().await.unwrap();
    let mut rest = Vec::new();
    timeout(WAIT, bench.tracker.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn limits_set_over_the_wire_are_enforced() {
    let mut bench = bench().await;

    bench.tracker.write_all(b"LM 0000 0100\r").await.unwrap();
    // 200° from 0° is shorter going negative, where there is no room
    bench.tracker.write_all(b"AZ 200\r").await.unwrap();
    assert_eq!(
        warning(&mut bench.events).await,
        "rejected: negative azimuth limit reached"
    );

    bench.tracker.write_all(b"AZ 150\r").await.unwrap();
    assert_eq!(
        datagram(&bench.mount).await,
        [0xFF, 0x01, 0x00, 0x4B, 0x27, 0x10, 0x83]
    );
    assert!(warning(&mut bench.events).await.starts_with("clamped"));

    bench.tracker.write_all(b"C2\r").await.unwrap();
    let mut reply = [0u8; 15];
    timeout(WAIT, bench.tracker.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"AZ=100 EL=000\r\n");
    assert_eq!(bench.handle.snapshot().cumulative_deg, 100.0);

    bench.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn queued_commands_are_dropped_on_shutdown() {
    let mut bench = bench_with(|config| {
        config.mount.query_position = true;
        config.mount.response_timeout_ms = 300;
    })
    .await;

    // the worker is now waiting on a mount that never answers
    bench.handle.submit("C2").await.unwrap();
    assert_eq!(datagram(&bench.mount).await[3], 0x51);

    for _ in 0..5 {
        bench.handle.submit("C2").await.unwrap();
    }
    bench.handle.shutdown().await.unwrap();

    let mut infos = Vec::new();
    let mut last_state = None;
    while let Ok(Some(event)) = timeout(WAIT, bench.events.recv()).await {
        match event {
            ControllerEvent::Log(log) if log.level == LogLevel::Info => infos.push(log.message),
            ControllerEvent::StateChanged(state) => last_state = Some(state),
            _ => {}
        }
    }
    assert!(infos.iter().any(|m| m == "discarded 5 queued commands"), "{:?}", infos);
    assert_eq!(last_state, Some(ControllerState::Disconnected));

    // only the command in flight at shutdown was answered
    let mut replies = Vec::new();
    timeout(WAIT, bench.tracker.read_to_end(&mut replies))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replies, b"AZ=000 EL=000\r\n");
}

#[tokio::test]
async fn refused_command_link_fails_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut config = AppConfig::default();
    config.command_link = ConnectionConfig::Tcp {
        host: "127.0.0.1".to_string(),
        port,
    };

    let (sink, mut events) = EventSink::channel();
    let result = ControllerHandle::start(&config, sink).await;
    assert!(matches!(
        result,
        Err(ControllerError::Transport(TransportError::Connect { .. }))
    ));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen.first(),
        Some(&ControllerEvent::StateChanged(ControllerState::Connecting))
    );
    assert_eq!(
        seen.last(),
        Some(&ControllerEvent::StateChanged(ControllerState::Disconnected))
    );
    assert!(seen.iter().any(|event| matches!(
        event,
        ControllerEvent::Log(log) if log.level == LogLevel::Error
    )));
}
