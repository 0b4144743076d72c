use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use slotmatch::{router, AppState, Config, Database};

fn app_with(config: Config) -> Router {
    let db = Database::in_memory().unwrap();
    router(AppState::new(db, config).unwrap())
}

fn app() -> Router {
    app_with(Config::default())
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn post_form(app: Router, uri: &str, body: &'static str) -> StatusCode {
    app.oneshot(
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
    .status()
}

async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn api_returns_matches_with_run_metadata() {
    let (status, body) = post_json(
        app(),
        "/api/matches",
        json!({
            "availability": [["ann", "mon"], ["bob", "mon"], ["cat", "mon"], ["cat", "tue"], ["dan", "tue"]],
            "exclusions": [["bob", "ann"]],
            "scores": [{ "pair": ["cat", "dan"], "score": 3.0 }],
            "return_graph": true
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["candidate_count"], 3);
    // Every remaining pair needs cat, so the scored one wins.
    assert_eq!(
        body["matches"],
        json!([{ "key": ["cat", "dan"], "slots": ["tue"], "score": 3.0 }])
    );
    assert_eq!(body["run_id"].as_str().unwrap().len(), 36);
    assert!(body["generated_at"].is_string());
    assert_eq!(body["graph"]["weighted"], true);
}

#[tokio::test]
async fn api_picks_the_heaviest_pairing() {
    let (status, body) = post_json(
        app(),
        "/api/matches",
        json!({
            "availability": [["ann", "mon"], ["bob", "mon"], ["cat", "mon"], ["cat", "tue"], ["dan", "tue"]],
            "scores": [{ "pair": ["ann", "cat"], "score": 10.0 }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["matches"],
        json!([{ "key": ["ann", "cat"], "slots": ["mon"], "score": 10.0 }])
    );
    assert!(body.get("graph").is_none());
}

#[tokio::test]
async fn input_errors_are_unprocessable() {
    let (status, body) = post_json(
        app(),
        "/api/matches",
        json!({
            "availability": [["ann", "mon"], ["bob", "mon"]],
            "exclusions": [["ann", "ann"]]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = post_json(
        app(),
        "/api/matches",
        json!({ "availability": [["ann", "mon"], ["bob", "mon"], ["ann", "mon"]] }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "DATA_ERROR");
}

#[tokio::test]
async fn expired_deadline_is_service_unavailable() {
    let config = Config {
        solve_timeout_ms: Some(0),
        ..Config::default()
    };
    let (status, body) = post_json(
        app_with(config),
        "/api/matches",
        json!({ "availability": [["ann", "mon"], ["bob", "mon"]] }),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "DEADLINE_EXCEEDED");
}

#[tokio::test]
async fn forms_feed_the_matches_page() {
    let app = app();

    let (status, page) = get_text(app.clone(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("action=\"/availability\""));

    for body in [
        "subject=ann&slot=mon",
        "subject=bob&slot=mon",
        "subject=cat&slot=mon",
    ] {
        assert_eq!(
            post_form(app.clone(), "/availability", body).await,
            StatusCode::SEE_OTHER
        );
    }
    assert_eq!(
        post_form(app.clone(), "/exclusions", "subject1=ann&subject2=bob").await,
        StatusCode::SEE_OTHER
    );
    assert_eq!(
        post_form(app.clone(), "/availability", "subject=+&slot=mon").await,
        StatusCode::UNPROCESSABLE_ENTITY
    );

    let (status, page) = get_text(app, "/matches").await;
    assert_eq!(status, StatusCode::OK);
    assert!(page.contains("<td>ann</td><td>cat</td><td>mon</td>"));
    assert!(page.contains("<li>bob</li>"));
}
