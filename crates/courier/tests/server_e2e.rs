use courier::{procedure1, procedure2, to_si, RemoteError, RpcClient, RpcError, RpcServer, Runmode, ServiceRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

fn test_registry() -> Arc<ServiceRegistry> {
    let registry = ServiceRegistry::new();
    registry.register_procedure("multiply", procedure2(|a: i32, b: i32| Ok(a * b)));
    registry.register_procedure(
        "fault",
        procedure1(|_n: i32| -> anyhow::Result<i32> { Err(RemoteError::new(7, "Fault").into()) }),
    );
    registry.register_procedure(
        "slow",
        procedure1(|ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        }),
    );
    registry.register_procedure(
        "echo",
        procedure1(|rows: Vec<(String, u32)>| Ok(rows)),
    );
    Arc::new(registry)
}

async fn start_server(configure: impl FnOnce(&mut RpcServer)) -> (RpcServer, std::net::SocketAddr) {
    courier::logging::install();
    let mut server = RpcServer::new(test_registry());
    configure(&mut server);
    let port = portpicker::pick_unused_port().expect("no free port");
    let addr = server.listen("127.0.0.1", port).unwrap();
    server.start().unwrap();
    (server, addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiply_end_to_end() {
    let (mut server, addr) = start_server(|_| {}).await;

    let mut client = RpcClient::connect(addr).await.unwrap();
    let result = client
        .call("multiply", &[to_si(&2i32), to_si(&3i32)])
        .await
        .unwrap();
    assert_eq!(result.get_value::<i32>().unwrap(), 6);

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_method_keeps_connection_open() {
    let (mut server, addr) = start_server(|_| {}).await;

    let mut client = RpcClient::connect(addr).await.unwrap();
    let err = client.call("foo", &[]).await.unwrap_err();
    match err {
        RpcError::Remote(remote) => {
            assert_eq!(remote.rc, 0);
            assert_eq!(remote.message, "unknown method \"foo\"");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // A subsequent valid request on the same connection succeeds.
    let result = client
        .call("multiply", &[to_si(&4i32), to_si(&5i32)])
        .await
        .unwrap();
    assert_eq!(result.get_value::<i32>().unwrap(), 20);

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_exception_propagates_rc() {
    let (mut server, addr) = start_server(|_| {}).await;

    let mut client = RpcClient::connect(addr).await.unwrap();
    let err = client.call("fault", &[to_si(&1i32)]).await.unwrap_err();
    match err {
        RpcError::Remote(remote) => {
            assert_eq!(remote.rc, 7);
            assert_eq!(remote.message, "Fault");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dictionary_compressed_repeat_requests_decode() {
    let (mut server, addr) = start_server(|_| {}).await;

    // The same shape twice over one connection: the second request (and the
    // second reply) lean on the name dictionary built by the first.
    let rows = vec![("alpha".to_owned(), 1u32), ("beta".to_owned(), 2u32)];
    let mut client = RpcClient::connect(addr).await.unwrap();
    for _ in 0..2 {
        let result = client.call("echo", &[to_si(&rows)]).await.unwrap();
        let got = result.get_value::<Vec<(String, u32)>>().unwrap();
        assert_eq!(got, rows);
    }

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn keep_alive_timeout_closes_idle_connections() {
    let (mut server, addr) = start_server(|server| {
        server.set_keep_alive_timeout(Duration::from_millis(200));
    })
    .await;

    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    // Send nothing. The worker parks the socket on the supervisor, whose
    // keep-alive timer closes it.
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(3), socket.read(&mut buf))
        .await
        .expect("server did not close the idle connection")
        .unwrap();
    assert_eq!(n, 0);

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn read_timeout_closes_mid_request_connections() {
    let (mut server, addr) = start_server(|server| {
        server.set_read_timeout(Duration::from_millis(200));
    })
    .await;

    let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
    // Half a request, then silence.
    tokio::io::AsyncWriteExt::write_all(&mut socket, b"\xc0multi")
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(3), socket.read(&mut buf))
        .await
        .expect("server did not close the stalled connection")
        .unwrap();
    assert_eq!(n, 0);

    server.terminate().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_grows_beyond_min_threads_under_load() {
    let (mut server, addr) = start_server(|server| {
        server.set_min_threads(1);
        server.set_max_threads(8);
    })
    .await;

    let mut calls = Vec::new();
    for _ in 0..4 {
        calls.push(tokio::spawn(async move {
            let mut client = RpcClient::connect(addr).await.unwrap();
            client.call("slow", &[to_si(&150u64)]).await
        }));
    }
    for call in calls {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.get_value::<u64>().unwrap(), 150);
    }
    assert!(server.live_workers() <= 8);

    server.terminate().await.unwrap();
    assert_eq!(server.live_workers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn graceful_terminate_under_load() {
    let (mut server, addr) = start_server(|server| {
        server.set_min_threads(2);
        server.set_max_threads(16);
    })
    .await;

    let mut runmode = server.runmode_changes();
    let transitions = tokio::spawn(async move {
        let mut seen = Vec::new();
        while runmode.changed().await.is_ok() {
            let state = *runmode.borrow();
            seen.push(state);
            if state == Runmode::Stopped || state == Runmode::Failed {
                break;
            }
        }
        seen
    });

    let mut calls = Vec::new();
    for _ in 0..6 {
        calls.push(tokio::spawn(async move {
            let mut client = RpcClient::connect(addr).await.unwrap();
            client.call("slow", &[to_si(&300u64)]).await
        }));
    }
    // Let every call get in flight, then pull the plug.
    tokio::time::sleep(Duration::from_millis(100)).await;
    server.terminate().await.unwrap();

    // In-flight calls completed with their replies before the close.
    for call in calls {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.get_value::<u64>().unwrap(), 300);
    }

    assert_eq!(server.runmode(), Runmode::Stopped);
    assert_eq!(server.live_workers(), 0);

    let seen = transitions.await.unwrap();
    assert!(seen.contains(&Runmode::Terminating), "{seen:?}");
    assert_eq!(*seen.last().unwrap(), Runmode::Stopped);
}
