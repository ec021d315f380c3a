//! Integration tests for the HTTP API.

mod common;

use std::time::Duration;

use axum::http::{StatusCode, header};
use common::{
    Blocking, Scripted, SseReader, get, is_heartbeat, json_body, post_empty, post_json, test_app,
    test_app_with,
};
use leadstream::Message;
use serde_json::json;
use tower::ServiceExt;

fn lead(name: &str) -> Message {
    Message::from_value(json!({ "name": name, "phone": "555-0100" }))
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(Scripted::new(vec![]));

    let response = app.app().oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_start_job_returns_started() {
    let app = test_app(Scripted::new(vec![lead("Acme")]));

    let response = app
        .app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Mumbai", "search": "dentists", "session_id": "s1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "started");
    assert!(body["job_id"].is_string());
    assert!(app.state.registry.contains("s1"));
}

#[tokio::test]
async fn test_start_job_missing_field_creates_nothing() {
    let app = test_app(Scripted::new(vec![]));

    let response = app
        .app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Mumbai", "session_id": "s1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Missing required fields");
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(!app.state.registry.contains("s1"));
    assert!(!app.state.jobs.is_running("s1"));
}

#[tokio::test]
async fn test_start_job_blank_and_malformed_bodies_rejected() {
    let app = test_app(Scripted::new(vec![]));

    let blank = app
        .app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "", "search": "dentists", "session_id": "s1" }),
        ))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let no_body = app.app().oneshot(post_empty("/api/scrape")).await.unwrap();
    assert_eq!(no_body.status(), StatusCode::BAD_REQUEST);
    let body = json_body(no_body).await;
    assert_eq!(body["error"], "Missing required fields");

    assert!(app.state.registry.is_empty());
}

#[tokio::test]
async fn test_start_job_conflicts_while_running() {
    let (collector, release) = Blocking::new();
    let app = test_app(collector);
    let request = json!({ "location": "Delhi", "search": "cafes", "session_id": "busy" });

    let first = app
        .app()
        .oneshot(post_json("/api/scrape", &request))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .app()
        .oneshot(post_json("/api/scrape", &request))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let body = json_body(second).await;
    assert_eq!(body["code"], "CONFLICT");

    release.notify_one();
}

#[tokio::test]
async fn test_stream_delivers_messages_then_closes() {
    let app = test_app(Scripted::new(vec![
        lead("Acme"),
        Message::notice("page 2"),
        lead("Globex"),
    ]));

    let started = app
        .app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Chicago", "search": "plumbers", "session_id": "s1" }),
        ))
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);

    let response = app.app().oneshot(get("/api/stream/s1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let events = SseReader::new(response).data_until_close().await;
    assert_eq!(
        events,
        vec![
            json!({ "name": "Acme", "phone": "555-0100" }),
            json!({ "message": "page 2" }),
            json!({ "name": "Globex", "phone": "555-0100" }),
        ]
    );
}

#[tokio::test]
async fn test_stream_opened_before_job_sees_heartbeat_then_data() {
    let app = test_app(Scripted::slow(
        vec![lead("Initech")],
        Duration::from_millis(20),
    ));

    let response = app.app().oneshot(get("/api/stream/early")).await.unwrap();
    let mut reader = SseReader::new(response);

    let first = reader.next_event().await.unwrap();
    assert!(is_heartbeat(&first));

    let started = app
        .app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "London", "search": "bakeries", "session_id": "early" }),
        ))
        .await
        .unwrap();
    assert_eq!(started.status(), StatusCode::OK);

    let events = reader.data_until_close().await;
    assert_eq!(events, vec![json!({ "name": "Initech", "phone": "555-0100" })]);
}

#[tokio::test]
async fn test_stream_for_unknown_session_heartbeats() {
    let app = test_app(Scripted::new(vec![]));

    let response = app.app().oneshot(get("/api/stream/nobody")).await.unwrap();
    let mut reader = SseReader::new(response);

    for _ in 0..2 {
        let event = reader.next_event().await.unwrap();
        assert_eq!(event, json!({ "type": "heartbeat" }));
    }
    assert!(app.state.registry.contains("nobody"));
}

#[tokio::test]
async fn test_stream_closes_when_session_evicted() {
    let app = test_app(Scripted::new(vec![]));

    let response = app.app().oneshot(get("/api/stream/gone")).await.unwrap();
    let mut reader = SseReader::new(response);
    assert!(is_heartbeat(&reader.next_event().await.unwrap()));

    assert!(app.state.registry.evict("gone"));

    assert!(reader.data_until_close().await.is_empty());
}

#[tokio::test]
async fn test_failed_job_reports_error_then_closes() {
    let app = test_app(Scripted::new(vec![Message::error("Search failed")]));

    app.app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Houston", "search": "gyms", "session_id": "s1" }),
        ))
        .await
        .unwrap();

    let response = app.app().oneshot(get("/api/stream/s1")).await.unwrap();
    let events = SseReader::new(response).data_until_close().await;
    assert_eq!(
        events,
        vec![json!({ "message": "Search failed", "type": "error" })]
    );
}

#[tokio::test]
async fn test_stop_cancels_running_job() {
    let (collector, _release) = Blocking::new();
    let app = test_app(collector);

    app.app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Phoenix", "search": "roofers", "session_id": "s1" }),
        ))
        .await
        .unwrap();
    assert!(app.state.jobs.is_running("s1"));

    let response = app
        .app()
        .oneshot(post_json("/api/stop", &json!({ "session_id": "s1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "stopped" }));

    let stream = app.app().oneshot(get("/api/stream/s1")).await.unwrap();
    let events = SseReader::new(stream).data_until_close().await;
    assert_eq!(
        events,
        vec![
            json!({ "message": "running" }),
            json!({ "message": "Job stopped", "type": "warning" }),
        ]
    );
}

#[tokio::test]
async fn test_pause_and_stop_acknowledge_without_body() {
    let app = test_app(Scripted::new(vec![]));

    let pause = app.app().oneshot(post_empty("/api/pause")).await.unwrap();
    assert_eq!(pause.status(), StatusCode::OK);
    assert_eq!(json_body(pause).await, json!({ "status": "paused" }));

    let stop = app.app().oneshot(post_empty("/api/stop")).await.unwrap();
    assert_eq!(stop.status(), StatusCode::OK);
    assert_eq!(json_body(stop).await, json!({ "status": "stopped" }));
}

#[tokio::test]
async fn test_pause_does_not_halt_job() {
    let (collector, release) = Blocking::new();
    let app = test_app(collector);

    app.app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Glasgow", "search": "pubs", "session_id": "s1" }),
        ))
        .await
        .unwrap();

    let pause = app
        .app()
        .oneshot(post_json("/api/pause", &json!({ "session_id": "s1" })))
        .await
        .unwrap();
    assert_eq!(pause.status(), StatusCode::OK);
    assert!(app.state.jobs.is_running("s1"));

    release.notify_one();
}

#[tokio::test]
async fn test_reaper_runs_on_unrelated_request() {
    let app = test_app_with(Scripted::new(vec![]), |config| {
        config.sessions.idle_timeout_secs = 0;
    });

    app.state.registry.get_or_create(&"idle".into());
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = app.app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.state.registry.contains("idle"));
}

#[tokio::test]
async fn test_reaper_keeps_recent_sessions() {
    let app = test_app(Scripted::new(vec![]));

    app.state.registry.get_or_create(&"fresh".into());

    app.app().oneshot(get("/health")).await.unwrap();
    assert!(app.state.registry.contains("fresh"));
}

#[tokio::test]
async fn test_list_sessions() {
    let (collector, release) = Blocking::new();
    let app = test_app(collector);

    app.app()
        .oneshot(post_json(
            "/api/scrape",
            &json!({ "location": "Chennai", "search": "tailors", "session_id": "s1" }),
        ))
        .await
        .unwrap();

    let response = app.app().oneshot(get("/api/sessions")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let sessions = body.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], "s1");
    assert_eq!(sessions[0]["job_running"], true);

    release.notify_one();
}

#[tokio::test]
async fn test_locations() {
    let app = test_app(Scripted::new(vec![]));

    let countries = json_body(app.app().oneshot(get("/api/locations")).await.unwrap()).await;
    assert_eq!(
        countries,
        json!({ "countries": ["India", "United Kingdom", "United States"] })
    );

    let cities = json_body(
        app.app()
            .oneshot(get("/api/locations?country=India"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(
        cities,
        json!({ "cities": ["Bangalore", "Chennai", "Delhi", "Kolkata", "Mumbai"] })
    );

    let unknown = json_body(
        app.app()
            .oneshot(get("/api/locations?country=Atlantis"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(unknown, json!({ "cities": [] }));
}

#[tokio::test]
async fn test_downloads_list_and_fetch() {
    let app = test_app(Scripted::new(vec![]));
    std::fs::write(app.downloads.path().join("leads.csv"), "name,phone\nAcme,555\n").unwrap();
    std::fs::write(app.downloads.path().join("notes.txt"), "ignored").unwrap();

    let list = json_body(app.app().oneshot(get("/api/downloads")).await.unwrap()).await;
    assert_eq!(list, json!(["leads.csv"]));

    let response = app
        .app()
        .oneshot(get("/api/download/leads.csv"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"leads.csv\""
    );
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"name,phone\nAcme,555\n");
}

#[tokio::test]
async fn test_download_missing_and_traversal() {
    let app = test_app(Scripted::new(vec![]));

    let missing = app
        .app()
        .oneshot(get("/api/download/absent.csv"))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(missing).await["error"], "File not found");

    let traversal = app
        .app()
        .oneshot(get("/api/download/..%2Fsecret.csv"))
        .await
        .unwrap();
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_export_current() {
    let app = test_app(Scripted::new(vec![]));

    let empty = app
        .app()
        .oneshot(post_empty("/api/export-current"))
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(empty).await["error"], "No data available");

    std::fs::write(app.downloads.path().join("latest.csv"), "a,b\n").unwrap();
    let response = app
        .app()
        .oneshot(post_empty("/api/export-current"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"a,b\n");
}
