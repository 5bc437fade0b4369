#[path = "common/mod.rs"]
mod common;

use bytes::Bytes;
use common::{advice_text, spawn, state, Scripted, TOKEN};
use http_body::Frame;
use http_body_util::StreamBody;
use reqwest::{Client, StatusCode};
use std::convert::Infallible;
use tokio_stream::iter;

#[tokio::test]
async fn chunked_payload_over_limit_returns_413() {
    let generator = Scripted::replying(&advice_text());
    let (base, handle) = spawn(state(generator.clone()).with_max_body_chars(64)).await;
    let url = format!("{}/advice", base);

    let payload = serde_json::json!({
        "mbtiType": "ENFP",
        "personalityData": { "title": "X".repeat(2048) }
    })
    .to_string();

    let chunk_bytes: Vec<_> = payload
        .as_bytes()
        .chunks(128)
        .map(Bytes::copy_from_slice)
        .collect();

    let stream = iter(
        chunk_bytes
            .into_iter()
            .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk))),
    );
    let body = StreamBody::new(stream);
    let body = reqwest::Body::wrap(body);

    let resp = Client::new()
        .post(&url)
        .header("authorization", format!("Bearer {}", TOKEN))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(resp.headers()["cache-control"], "no-store");
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["error"], "Payload too large");
    assert_eq!(generator.calls(), 0);
    handle.abort();
}

#[tokio::test]
async fn body_at_the_ceiling_is_accepted() {
    let generator = Scripted::replying(&advice_text());
    let body = common::valid_body().to_string();
    let limit = body.chars().count();
    let (base, handle) = spawn(state(generator.clone()).with_max_body_chars(limit)).await;

    let resp = Client::new()
        .post(format!("{}/advice", base))
        .header("authorization", format!("Bearer {}", TOKEN))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(generator.calls(), 1);
    handle.abort();
}
