use courier::{procedure0, procedure1, procedure2, to_si, RemoteError, ServiceRegistry};
use courier_http::{jsonrpc, xmlrpc, HttpRpcError, JsonRpcClient, XmlRpcClient};
use std::sync::Arc;
use url::Url;

fn test_registry() -> Arc<ServiceRegistry> {
    let registry = ServiceRegistry::new();
    registry.register_procedure("multiply", procedure2(|a: i32, b: i32| Ok(a * b)));
    registry.register_procedure(
        "multiplyVector",
        procedure2(|a: Vec<i32>, b: Vec<i32>| {
            Ok(a.into_iter().zip(b).map(|(x, y)| x * y).collect::<Vec<_>>())
        }),
    );
    registry.register_procedure(
        "fault",
        procedure0(|| -> anyhow::Result<i32> { Err(RemoteError::new(7, "Fault").into()) }),
    );
    registry.register_procedure(
        "echoName",
        procedure1(|name: String| Ok(format!("Hello {name}"))),
    );
    Arc::new(registry)
}

async fn serve(router: axum::Router) -> Url {
    let port = portpicker::pick_unused_port().expect("no free port");
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test]
async fn xmlrpc_end_to_end() {
    let url = serve(xmlrpc::router(test_registry())).await;
    let client = XmlRpcClient::new(url);

    let result = client
        .call("multiply", &[to_si(&6i32), to_si(&7i32)])
        .await
        .unwrap();
    assert_eq!(result.get_value::<i32>().unwrap(), 42);

    let result = client
        .call(
            "multiplyVector",
            &[to_si(&vec![1i32, 2, 3]), to_si(&vec![4i32, 5, 6])],
        )
        .await
        .unwrap();
    assert_eq!(result.get_value::<Vec<i32>>().unwrap(), vec![4, 10, 18]);
}

#[tokio::test]
async fn xmlrpc_fault_propagates() {
    let url = serve(xmlrpc::router(test_registry())).await;
    let client = XmlRpcClient::new(url);

    match client.call("fault", &[]).await.unwrap_err() {
        HttpRpcError::Remote(remote) => {
            assert_eq!(remote.rc, 7);
            assert_eq!(remote.message, "Fault");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn xmlrpc_unknown_method_is_a_fault() {
    let url = serve(xmlrpc::router(test_registry())).await;
    let client = XmlRpcClient::new(url);

    match client.call("nope", &[]).await.unwrap_err() {
        HttpRpcError::Remote(remote) => {
            assert!(remote.message.contains("unknown method"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn xmlrpc_requires_its_content_type() {
    let url = serve(xmlrpc::router(test_registry())).await;
    let response = reqwest::Client::new()
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body("<methodCall/>")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 415);
}

#[tokio::test]
async fn xmlrpc_rejects_non_post() {
    let url = serve(xmlrpc::router(test_registry())).await;
    let response = reqwest::Client::new().get(url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 405);
}

#[tokio::test]
async fn jsonrpc_end_to_end() {
    let url = serve(jsonrpc::router(test_registry())).await;
    let client = JsonRpcClient::new(url);

    let result = client
        .call("multiply", &[to_si(&6i32), to_si(&7i32)])
        .await
        .unwrap();
    assert_eq!(result.get_value::<i32>().unwrap(), 42);

    let result = client.call("echoName", &[to_si(&"World")]).await.unwrap();
    assert_eq!(result.get_value::<String>().unwrap(), "Hello World");
}

#[tokio::test]
async fn jsonrpc_error_object_carries_the_rc() {
    let url = serve(jsonrpc::router(test_registry())).await;
    let client = JsonRpcClient::new(url);

    match client.call("fault", &[]).await.unwrap_err() {
        HttpRpcError::Remote(remote) => {
            assert_eq!(remote.rc, 7);
            assert_eq!(remote.message, "Fault");
        }
        other => panic!("unexpected {other:?}"),
    }

    match client.call("nope", &[]).await.unwrap_err() {
        HttpRpcError::Remote(remote) => {
            assert_eq!(remote.rc as i64, jsonrpc::ERR_METHOD_NOT_FOUND);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn jsonrpc_client_validates_the_content_type() {
    // A server answering 200 with the wrong content type must be rejected
    // before any decoding happens.
    let bogus = axum::Router::new().route(
        "/",
        axum::routing::post(|| async { ([("content-type", "text/plain")], "{}") }),
    );
    let url = serve(bogus).await;
    let client = JsonRpcClient::new(url);

    match client.call("multiply", &[]).await.unwrap_err() {
        HttpRpcError::ContentType(ct) => assert!(ct.starts_with("text/plain")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn shared_registry_serves_both_protocols() {
    let registry = test_registry();
    let xml_url = serve(xmlrpc::router(registry.clone())).await;
    let json_url = serve(jsonrpc::router(registry)).await;

    let xml = XmlRpcClient::new(xml_url);
    let json = JsonRpcClient::new(json_url);
    let args = [to_si(&3i32), to_si(&5i32)];
    assert_eq!(
        xml.call("multiply", &args)
            .await
            .unwrap()
            .get_value::<i32>()
            .unwrap(),
        15
    );
    assert_eq!(
        json.call("multiply", &args)
            .await
            .unwrap()
            .get_value::<i32>()
            .unwrap(),
        15
    );
}
