//! HTTP API tests
//!
//! Exercise the router in-process with `tower::ServiceExt::oneshot` against a
//! controller backed by a scripted media server.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use proctor_http::HttpServer;
use proctor_webrtc::{
    MediaAnswer, MediaServer, NoopNotifier, ProctorConfig, Result as CoreResult,
    StreamLifecycleController,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:EsAw\r\n\
a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:96 VP8/90000\r\n";

const ANSWER: &str = "v=0\r\n\
o=- 1693384512 1693384512 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:mtxU\r\n\
a=ice-pwd:mtxPasswordForTests0123\r\n\
a=setup:passive\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtpmap:96 VP8/90000\r\n";

/// Media server that answers every offer, or rejects when told to
#[derive(Default)]
struct StubMediaServer {
    reject: AtomicBool,
}

#[async_trait]
impl MediaServer for StubMediaServer {
    async fn publish(&self, stream_name: &str, _offer_sdp: &str) -> CoreResult<MediaAnswer> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(proctor_webrtc::Error::Upstream("400 Bad Request".to_string()));
        }
        Ok(MediaAnswer {
            answer_sdp: ANSWER.to_string(),
            resource_url: Some(format!("http://mediamtx.test/{}/whip/r1", stream_name)),
        })
    }

    async fn play(&self, _stream_name: &str, _offer_sdp: &str) -> CoreResult<MediaAnswer> {
        Ok(MediaAnswer {
            answer_sdp: ANSWER.to_string(),
            resource_url: None,
        })
    }

    async fn trickle(&self, _resource_url: &str, _fragment: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn unpublish(&self, _resource_url: &str) -> CoreResult<()> {
        Ok(())
    }
}

fn app_with(media_server: Arc<StubMediaServer>) -> Router {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let controller = StreamLifecycleController::new(
        &ProctorConfig::default(),
        media_server,
        Arc::new(NoopNotifier),
    )
    .unwrap();
    HttpServer::new("127.0.0.1:0", Arc::new(controller))
        .unwrap()
        .build_router()
}

fn app() -> Router {
    app_with(Arc::new(StubMediaServer::default()))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn sdp_request(uri: &str, sdp: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/sdp")
        .body(Body::from(sdp.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn start(app: &Router, participant_id: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/start",
            json!({ "participantId": participant_id, "examId": "e1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn test_health() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "status": "ok", "activeSessions": 0 })
    );
}

#[tokio::test]
async fn test_start_returns_session_and_urls() {
    let app = app();
    let started = start(&app, "p1").await;

    let session_id = started["sessionId"].as_str().unwrap();
    assert_eq!(started["streamName"], "e1_p1");
    assert_eq!(started["state"], "idle");
    assert_eq!(
        started["whipUrl"],
        format!("http://localhost:4001/api/webrtc/whip?session={}", session_id)
    );
    assert_eq!(started["rtspUrl"], "rtsp://127.0.0.1:8554/e1_p1");
    assert!(started.get("answerSdp").is_none());
}

#[tokio::test]
async fn test_duplicate_start_conflicts() {
    let app = app();
    start(&app, "p1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/start",
            json!({ "participant_id": "p1", "exam_id": "e1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["errorType"], "conflict");
}

#[tokio::test]
async fn test_blank_participant_rejected() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/start",
            json!({ "participantId": " ", "examId": "e1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_uses_error_body() {
    let app = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/start",
            json!({ "participantId": "p1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errorType"], "invalid_request");
    assert!(body["message"].as_str().unwrap().contains("examId"));

    let response = app
        .oneshot(
            Request::post("/api/webrtc/stop")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["errorType"], "invalid_request");
}

#[tokio::test]
async fn test_whip_publish_trickle_and_delete() {
    let app = app();
    let started = start(&app, "p1").await;
    let session_id = started["sessionId"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(sdp_request(
            &format!("/api/webrtc/whip?session={}", session_id),
            OFFER,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/api/webrtc/whip/{}", session_id).as_str()
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/sdp");
    assert_eq!(body_text(response).await, ANSWER);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/webrtc/sessions/{}", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["state"], "live");

    let fragment = "a=ice-ufrag:EsAw\r\nm=video 9 RTP/AVP 0\r\na=mid:0\r\n\
                    a=candidate:1 1 udp 2122260223 192.168.1.20 50000 typ host\r\n";
    let response = app
        .clone()
        .oneshot(
            Request::patch(format!("/api/webrtc/whip/{}", session_id))
                .header(header::CONTENT_TYPE, "application/trickle-ice-sdpfrag")
                .body(Body::from(fragment))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::delete(format!("/api/webrtc/whip/{}", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/webrtc/sessions/{}", session_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_whip_rejects_wrong_content_type() {
    let app = app();
    let started = start(&app, "p1").await;

    let response = app
        .clone()
        .oneshot(
            Request::post(format!(
                "/api/webrtc/whip?session={}",
                started["sessionId"].as_str().unwrap()
            ))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_whip_requires_session() {
    let response = app()
        .oneshot(sdp_request("/api/webrtc/whip", OFFER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_whip_by_stream_name() {
    let app = app();
    start(&app, "p1").await;

    let response = app
        .clone()
        .oneshot(sdp_request("/api/webrtc/whip?stream=e1_p1", OFFER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_upstream_rejection_maps_to_bad_gateway() {
    let media_server = Arc::new(StubMediaServer::default());
    media_server.reject.store(true, Ordering::SeqCst);
    let app = app_with(media_server);
    let started = start(&app, "p1").await;

    let response = app
        .clone()
        .oneshot(sdp_request(
            &format!(
                "/api/webrtc/whip?session={}",
                started["sessionId"].as_str().unwrap()
            ),
            OFFER,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["errorType"], "negotiation_failed");

    // The failed session no longer blocks the participant
    start(&app, "p1").await;
}

#[tokio::test]
async fn test_invalid_offer_is_bad_request() {
    let app = app();
    let started = start(&app, "p1").await;

    let response = app
        .clone()
        .oneshot(sdp_request(
            &format!(
                "/api/webrtc/whip?session={}",
                started["sessionId"].as_str().unwrap()
            ),
            "not an sdp",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stop_is_idempotent_and_heartbeat_after_stop() {
    let app = app();
    let started = start(&app, "p1").await;
    let session_id = started["sessionId"].as_str().unwrap();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/webrtc/stop",
                json!({ "sessionId": session_id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/heartbeat",
            json!({ "sessionId": session_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["errorType"], "session_closed");
}

#[tokio::test]
async fn test_heartbeat_unknown_session() {
    let response = app()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/heartbeat",
            json!({ "sessionId": "missing" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_whep_requires_live_stream() {
    let app = app();

    let response = app
        .clone()
        .oneshot(sdp_request("/api/webrtc/whep?stream=e1_p1", OFFER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/webrtc/start",
            json!({ "participantId": "p1", "examId": "e1", "offer": OFFER }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["state"], "live");

    let response = app
        .clone()
        .oneshot(sdp_request("/api/webrtc/whep?stream=e1_p1", OFFER))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_text(response).await, ANSWER);
}
