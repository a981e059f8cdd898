//! End-to-end pipeline tests against the exchange source
//!
//! These drive the same seam the proxy transport uses: `begin` a capture,
//! feed it the raw (compressed) bytes, and settle it.

use flate2::write::GzEncoder;
use flate2::Compression;
use http::header::CONTENT_ENCODING;
use http::{HeaderValue, Method, StatusCode, Uri};
use parking_lot::Mutex;
use proxy_tap::{
    Exchange, ExchangeSource, RequestHead, ResponseHead, RouteTag, StoreOptions, Subscriber,
};
use rstest::rstest;
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;

const USEITEM_PATH: &str = "/kcsapi/api_get_member/useitem";
const SVC_PREFIX: &str = "svc_res=";

#[derive(Clone, Debug, Deserialize, PartialEq)]
struct UseItem {
    api_id: u32,
    api_count: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
struct UseItemResponse {
    api_result: i32,
    api_data: Vec<UseItem>,
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn useitem_body(count: u32) -> String {
    format!(r#"{SVC_PREFIX}{{"api_result":1,"api_data":[{{"api_id":10,"api_count":{count}}}]}}"#)
}

/// Run one exchange through the source the way the proxy transport does
fn proxy_exchange(
    source: &ExchangeSource,
    path: &str,
    body: &[u8],
    encoding: Option<&'static str>,
) {
    let uri: Uri = path.parse().unwrap();
    let Some(mut capture) = source.begin(RequestHead::new(Method::POST, uri)) else {
        return;
    };
    capture.push_request(b"api_token=abc&api_verno=1");

    let mut response = ResponseHead::new(StatusCode::OK);
    let payload = match encoding {
        Some(encoding) => {
            response
                .headers
                .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
            gzip(body)
        }
        None => body.to_vec(),
    };
    capture.set_response(response);
    let (head, tail) = payload.split_at(payload.len() / 2);
    capture.push_response(head);
    capture.push_response(tail);

    source.settle(capture);
}

fn parse_useitems(exchange: Exchange) -> Result<UseItemResponse, String> {
    let text = exchange.response_text();
    let json = text
        .strip_prefix(SVC_PREFIX)
        .ok_or_else(|| format!("missing {SVC_PREFIX} prefix"))?;
    serde_json::from_str(json).map_err(|e| e.to_string())
}

#[test]
fn test_useitem_pipeline_keeps_last_two() {
    let source = ExchangeSource::new();
    let store = source
        .stream()
        .filter(|exchange| exchange.path() == USEITEM_PATH)
        .try_converter(parse_useitems)
        .to_store(StoreOptions::with_max_count(2).unwrap());

    for count in 1..=3 {
        proxy_exchange(&source, USEITEM_PATH, useitem_body(count).as_bytes(), Some("gzip"));
    }
    proxy_exchange(&source, "/kcsapi/api_port/port", b"svc_res={}", Some("gzip"));

    assert_eq!(store.size(), 2);
    let counts: Vec<u32> = store
        .select_all()
        .iter()
        .map(|response| response.api_data[0].api_count)
        .collect();
    assert_eq!(counts, vec![2, 3]);
    assert_eq!(
        store.current().map(|r| r.api_data[0].api_count),
        Some(3)
    );
}

#[rstest]
#[case::gzip(Some("gzip"))]
#[case::identity(None)]
fn test_result_message_pipeline(#[case] encoding: Option<&'static str>) {
    let source = ExchangeSource::new();
    let store = source
        .stream()
        .filter(|exchange| exchange.path() == USEITEM_PATH)
        .try_converter(|exchange: Exchange| {
            let text = exchange.response_text().into_owned();
            let json = text.strip_prefix(SVC_PREFIX).unwrap_or(&text).to_string();
            serde_json::from_str::<serde_json::Value>(&json)
        })
        .to_store(StoreOptions::with_max_count(2).unwrap());

    for _ in 0..3 {
        proxy_exchange(&source, USEITEM_PATH, br#"svc_res={"api_result_msg":"ok"}"#, encoding);
    }

    assert_eq!(store.size(), 2);
    assert_eq!(store.evicted_count(), 1);
    let current = store.current().expect("exchange converted");
    assert_eq!(current["api_result_msg"], "ok");
}

#[test]
fn test_request_filter_pipeline_only_buffers_matching_paths() {
    let source = ExchangeSource::new();
    let store = source
        .request_filter(|head| head.path() == USEITEM_PATH)
        .try_converter(parse_useitems)
        .to_store(StoreOptions::with_max_count(2).unwrap());

    for count in 1..=3 {
        proxy_exchange(&source, USEITEM_PATH, useitem_body(count).as_bytes(), Some("gzip"));
        proxy_exchange(&source, "/kcs2/img/common.png", b"\x89PNG", None);
    }

    let stats = source.stats();
    assert_eq!(stats.exchanges_seen, 6);
    assert_eq!(stats.captures_started, 3);
    assert_eq!(stats.captures_skipped, 3);
    assert_eq!(store.current().map(|r| r.api_data[0].api_count), Some(3));
}

#[test]
fn test_nothing_is_buffered_without_subscribers() {
    let source = ExchangeSource::new();
    let pipeline = source
        .stream()
        .filter(|exchange| exchange.path() == USEITEM_PATH);

    proxy_exchange(&source, USEITEM_PATH, b"svc_res={}", None);
    assert_eq!(source.stats().captures_started, 0);

    let subscription = pipeline.subscribe_with(|_| {});
    proxy_exchange(&source, USEITEM_PATH, b"svc_res={}", None);
    assert_eq!(source.stats().captures_started, 1);

    subscription.unsubscribe();
    proxy_exchange(&source, USEITEM_PATH, b"svc_res={}", None);
    assert_eq!(source.stats().captures_started, 1);
}

#[rstest]
#[case::identity(None)]
#[case::gzip(Some("gzip"))]
fn test_body_arrives_decoded(#[case] encoding: Option<&'static str>) {
    let source = ExchangeSource::new();
    let store = source.stream().to_store(StoreOptions::default());

    proxy_exchange(&source, USEITEM_PATH, useitem_body(7).as_bytes(), encoding);

    let exchange = store.current().expect("exchange delivered");
    assert_eq!(exchange.response_text(), useitem_body(7));
    assert_eq!(&exchange.request_body[..], b"api_token=abc&api_verno=1");
}

#[test]
fn test_sibling_filters_get_isolated_copies() {
    let source = ExchangeSource::new();
    let tagged = source
        .stream()
        .filter(|_| true)
        .converter(|exchange: Exchange| {
            exchange.with_attribute("seen_by", serde_json::json!("left"))
        })
        .to_store(StoreOptions::default());
    let untouched = source.stream().filter(|_| true).to_store(StoreOptions::default());

    proxy_exchange(&source, USEITEM_PATH, b"svc_res={}", None);

    let left = tagged.current().unwrap();
    let right = untouched.current().unwrap();
    assert_eq!(left.id, right.id);
    assert_eq!(left.attribute("seen_by"), Some(&serde_json::json!("left")));
    assert!(right.attributes.is_empty());
}

#[test]
fn test_broken_body_is_reported_and_others_flow() {
    let source = ExchangeSource::new();
    let store = source.stream().to_store(StoreOptions::default());
    let faults = source.faults().to_store(StoreOptions::default());

    let mut broken = source
        .begin(RequestHead::new(Method::POST, Uri::from_static(USEITEM_PATH)))
        .unwrap();
    let mut response = ResponseHead::new(StatusCode::OK);
    response
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    broken.set_response(response);
    broken.push_response(b"this is not gzip");
    source.settle(broken);

    proxy_exchange(&source, USEITEM_PATH, useitem_body(1).as_bytes(), Some("gzip"));

    assert_eq!(faults.size(), 1);
    assert!(faults.current().unwrap().error.contains("gzip"));
    assert_eq!(store.size(), 1);
}

#[test]
fn test_tagged_route_reaches_only_its_stage() {
    let source = ExchangeSource::new();
    let tag = RouteTag::try_new("useitem".to_string()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscriber = Subscriber::new(move |exchange: Exchange| {
        sink.lock().push(exchange.route_tag.map(|t| t.into_inner()))
    });

    let stage = source.request_filter_tagged(tag, |head| head.path() == USEITEM_PATH);
    assert!(stage.subscribe(&subscriber));
    assert!(!stage.subscribe(&subscriber));

    proxy_exchange(&source, USEITEM_PATH, b"svc_res={}", None);
    proxy_exchange(&source, "/kcsapi/api_port/port", b"svc_res={}", None);

    assert_eq!(*seen.lock(), vec![Some("useitem".to_string())]);
    assert!(stage.unsubscribe(Some(subscriber.id())));
    assert!(!stage.unsubscribe(Some(subscriber.id())));
    assert_eq!(source.gate_count(), 0);
}
