//! Integration tests running a real proxy in front of a mock upstream

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::CONTENT_ENCODING;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::BodyExt;
use hyper::StatusCode;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use proxy_tap::{Exchange, ProxyConfig, ProxyServer, RecordStore, StoreOptions, TargetUrl};
use serde_json::Value;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const USEITEM_PATH: &str = "/kcsapi/api_get_member/useitem";

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

async fn useitem(request: Request) -> Response {
    let body = request.into_body().collect().await.unwrap().to_bytes();
    let count = String::from_utf8_lossy(&body)
        .split('&')
        .find_map(|pair| pair.strip_prefix("count="))
        .and_then(|count| count.parse::<u32>().ok())
        .unwrap_or(0);
    let payload = format!(
        r#"svc_res={{"api_result":1,"api_data":[{{"api_id":10,"api_count":{count}}}]}}"#
    );
    ([(CONTENT_ENCODING, "gzip")], gzip(payload.as_bytes())).into_response()
}

async fn start_upstream() -> SocketAddr {
    let router = Router::new()
        .route(USEITEM_PATH, post(useitem))
        .route("/kcs2/img/common.png", get(|| async { Bytes::from_static(b"\x89PNG") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn start_proxy(upstream: SocketAddr) -> ProxyServer {
    let target = TargetUrl::try_new(format!("http://{upstream}")).unwrap();
    let config = ProxyConfig {
        request_timeout: Duration::from_secs(5),
        ..ProxyConfig::with_target(target)
    };
    ProxyServer::new(config)
}

async fn send(proxy: SocketAddr, method: &str, path: &str, body: &str) -> (StatusCode, Bytes) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Body>();
    let request = hyper::Request::builder()
        .method(method)
        .uri(format!("http://{proxy}{path}"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = client.request(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn wait_for_size<T: proxy_tap::Record>(store: &RecordStore<T>, size: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.size() < size {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("records delivered in time");
}

#[tokio::test]
async fn test_useitem_exchanges_through_real_proxy() {
    let upstream = start_upstream().await;
    let server = start_proxy(upstream).await;
    let store: Arc<RecordStore<Value>> = server
        .source()
        .request_filter(|head| head.path() == USEITEM_PATH)
        .try_converter(|exchange: Exchange| {
            let text = exchange.response_text().into_owned();
            let json = text.strip_prefix("svc_res=").unwrap_or(&text).to_string();
            serde_json::from_str::<Value>(&json)
        })
        .to_store(StoreOptions::with_max_count(2).unwrap());

    let server = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let proxy = server.local_addr().unwrap();

    for count in 1..=3 {
        let form = format!("api_token=x&count={count}");
        let (status, body) = send(proxy, "POST", USEITEM_PATH, &form).await;
        assert_eq!(status, StatusCode::OK);
        // The client still gets the untouched, compressed bytes
        assert_eq!(&body[..2], &[0x1f, 0x8b]);
    }
    let (status, _) = send(proxy, "GET", "/kcs2/img/common.png", "").await;
    assert_eq!(status, StatusCode::OK);

    server.shutdown().await.unwrap();

    assert_eq!(store.size(), 2);
    let counts: Vec<u64> = store
        .select_all()
        .iter()
        .filter_map(|value| value["api_data"][0]["api_count"].as_u64())
        .collect();
    assert_eq!(counts, vec![2, 3]);
    assert_eq!(
        store.current().and_then(|v| v["api_data"][0]["api_count"].as_u64()),
        Some(3)
    );
}

#[tokio::test]
async fn test_unwatched_traffic_is_not_captured() {
    let upstream = start_upstream().await;
    let server = start_proxy(upstream)
        .await
        .listen("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let proxy = server.local_addr().unwrap();

    let (status, body) = send(proxy, "GET", "/kcs2/img/common.png", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"\x89PNG");

    let stats = server.source().stats();
    assert_eq!(stats.exchanges_seen, 1);
    assert_eq!(stats.captures_started, 0);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_direct_store_sees_request_and_decoded_response() {
    let upstream = start_upstream().await;
    let server = start_proxy(upstream).await;
    let store = server.source().stream().to_store(StoreOptions::default());
    let server = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let proxy = server.local_addr().unwrap();

    send(proxy, "POST", USEITEM_PATH, "api_token=x&count=5").await;
    wait_for_size(&store, 1).await;

    let exchange = store.current().unwrap();
    assert_eq!(exchange.status(), StatusCode::OK);
    assert_eq!(exchange.path(), USEITEM_PATH);
    assert_eq!(&exchange.request_body[..], b"api_token=x&count=5");
    assert!(exchange.response_text().contains(r#""api_count":5"#));
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_upstream_answers_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let server = start_proxy(dead)
        .await
        .listen("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let (status, body) = send(server.local_addr().unwrap(), "GET", "/", "").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "CONNECTION_ERROR");
    server.shutdown().await.unwrap();
}
