//! Integration test harness
//!
//! Provides a controller wired to in-process fakes:
//! - `FakeMediaServer` answers WHIP/WHEP and records trickle/DELETE calls
//! - `RecordingNotifier` records analysis start/stop notifications
//!
//! Basic usage pattern:
//!
//! 1. Build a `TestStack` (optionally tweaking `ProctorConfig`)
//! 2. Drive the controller
//! 3. Assert on the fakes, using `wait_until` for work done by spawned tasks

#![allow(dead_code)]

pub mod fakes;

use proctor_webrtc::{ProctorConfig, StreamLifecycleController};
use std::sync::Arc;
use std::time::Duration;

pub use fakes::{FakeMediaServer, RecordingNotifier};

/// Browser-style publish offer (audio + video)
pub const OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:EsAw\r\n\
a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n\
a=fingerprint:sha-256 0F:74:31:25:CB:A2:13:EC:28:6F:6D:2C:61:FF:5D:C2:BC:B9:DB:3D:98:14:8D:1A:BB:EA:33:0C:A4:60:A8:8E\r\n\
a=setup:actpass\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtcp-mux\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:EsAw\r\n\
a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\n\
a=fingerprint:sha-256 0F:74:31:25:CB:A2:13:EC:28:6F:6D:2C:61:FF:5D:C2:BC:B9:DB:3D:98:14:8D:1A:BB:EA:33:0C:A4:60:A8:8E\r\n\
a=setup:actpass\r\n\
a=mid:1\r\n\
a=sendonly\r\n\
a=rtcp-mux\r\n\
a=rtpmap:96 VP8/90000\r\n";

/// Answer the fake media server returns
pub const ANSWER: &str = "v=0\r\n\
o=- 1693384512 1693384512 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:mtxU\r\n\
a=ice-pwd:mtxPasswordForTests0123\r\n\
a=setup:passive\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
a=rtcp-mux\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
c=IN IP4 0.0.0.0\r\n\
a=ice-ufrag:mtxU\r\n\
a=ice-pwd:mtxPasswordForTests0123\r\n\
a=setup:passive\r\n\
a=mid:1\r\n\
a=recvonly\r\n\
a=rtcp-mux\r\n\
a=rtpmap:96 VP8/90000\r\n";

/// Initialize tracing for tests (safe to call repeatedly)
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn")
        .with_test_writer()
        .try_init();
}

/// Controller plus handles on its fakes
pub struct TestStack {
    pub controller: Arc<StreamLifecycleController>,
    pub media_server: Arc<FakeMediaServer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestStack {
    pub fn new() -> Self {
        Self::with(FakeMediaServer::new(), |_| {})
    }

    pub fn with(media_server: FakeMediaServer, configure: impl FnOnce(&mut ProctorConfig)) -> Self {
        Self::with_notifier(media_server, RecordingNotifier::new(), configure)
    }

    pub fn with_notifier(
        media_server: FakeMediaServer,
        notifier: RecordingNotifier,
        configure: impl FnOnce(&mut ProctorConfig),
    ) -> Self {
        init_test_tracing();

        let mut config = ProctorConfig::default();
        configure(&mut config);

        let media_server = Arc::new(media_server);
        let notifier = Arc::new(notifier);
        let controller = StreamLifecycleController::new(
            &config,
            Arc::clone(&media_server) as Arc<dyn proctor_webrtc::MediaServer>,
            Arc::clone(&notifier) as Arc<dyn proctor_webrtc::AnalysisNotifier>,
        )
        .expect("test config is valid");

        Self {
            controller: Arc::new(controller),
            media_server,
            notifier,
        }
    }
}

/// Poll `condition` until it holds, sleeping between checks
///
/// Works under a paused clock: each sleep lets spawned tasks run.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
