#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::{advice_text, spawn, state, state_with, valid_body, Scripted, TOKEN};
use nurse_advice::services::InMemoryQuota;
use nurse_advice::RATE_LIMIT_REMAINING;
use reqwest::{Client, StatusCode};
use serde_json::Value;

async fn get_quota(base: &str) -> reqwest::Response {
    Client::new()
        .get(format!("{}/quota", base))
        .header("Authorization", format!("Bearer {}", TOKEN))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn quota_reflects_consumption_without_spending() {
    let (base, handle) = spawn(state(Scripted::replying(&advice_text()))).await;

    for _ in 0..2 {
        let resp = get_quota(&base).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[RATE_LIMIT_REMAINING], "3");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, serde_json::json!({ "remaining": 3, "used": 0, "dailyLimit": 3 }));
    }

    let resp = Client::new()
        .post(format!("{}/advice", base))
        .header("Authorization", format!("Bearer {}", TOKEN))
        .json(&valid_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = get_quota(&base).await.json().await.unwrap();
    assert_eq!(body["remaining"], 2);
    assert_eq!(body["used"], 1);
    handle.abort();
}

#[tokio::test]
async fn quota_resets_on_a_new_day() {
    let day = Arc::new(std::sync::Mutex::new(
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
    ));
    let clock_day = day.clone();
    let quota = Arc::new(InMemoryQuota::with_clock(
        1,
        Arc::new(move || *clock_day.lock().unwrap()),
    ));
    let (base, handle) = spawn(state_with(Scripted::replying(&advice_text()), quota)).await;

    let post = || {
        Client::new()
            .post(format!("{}/advice", base))
            .header("Authorization", format!("Bearer {}", TOKEN))
            .json(&valid_body())
            .send()
    };
    assert_eq!(post().await.unwrap().status(), StatusCode::OK);
    assert_eq!(post().await.unwrap().status(), StatusCode::TOO_MANY_REQUESTS);

    *day.lock().unwrap() = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let body: Value = get_quota(&base).await.json().await.unwrap();
    assert_eq!(body["remaining"], 1);
    assert_eq!(post().await.unwrap().status(), StatusCode::OK);
    handle.abort();
}

#[tokio::test]
async fn quota_requires_get_and_a_valid_session() {
    let (base, handle) = spawn(state(Scripted::replying(&advice_text()))).await;

    let resp = Client::new()
        .post(format!("{}/quota", base))
        .header("Authorization", format!("Bearer {}", TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers()["allow"], "GET");

    let resp = Client::new()
        .get(format!("{}/quota", base))
        .header("Authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().get(RATE_LIMIT_REMAINING).is_none());
    handle.abort();
}
