//! Integration tests for the webhook + onboarding REST surface.
//!
//! Each test spins up an Axum server on a random port backed by an
//! in-memory database, a stub model and a recording sender, then drives it
//! over real HTTP.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use meal_assist::channels::{MessageSender, WebhookState, webhook_routes};
use meal_assist::clock::{Clock, FixedClock};
use meal_assist::conversation::{ConversationCore, CoreConfig, MealLogEntry};
use meal_assist::error::{ChannelError, LlmError};
use meal_assist::llm::{
    CompletionRequest, CompletionResponse, FailoverGateway, GatewayConfig, LlmProvider,
    RetryPolicy,
};
use meal_assist::onboarding::{OnboardingEngine, OnboardingRouteState, onboarding_routes};
use meal_assist::store::{Database, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ALICE: &str = "919800000001";

/// Stub model answering by prompt substring; unknown prompts fail.
struct StubLlm {
    rules: Vec<(&'static str, &'static str)>,
    delay: Duration,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.rules
            .iter()
            .find(|(needle, _)| request.prompt.contains(*needle))
            .map(|(_, reply)| CompletionResponse {
                content: reply.to_string(),
            })
            .ok_or_else(|| LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "no scripted answer".into(),
            })
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl MessageSender for RecordingSender {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), text.to_string()));
        Ok(())
    }
}

struct Server {
    port: u16,
    db: Arc<dyn Database>,
    sent: Arc<RecordingSender>,
}

/// Start an Axum server on a random port.
async fn start_server() -> Server {
    start_server_with_delay(Duration::ZERO).await
}

/// Start a server whose model takes `delay` to answer each prompt.
async fn start_server_with_delay(delay: Duration) -> Server {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm {
        rules: vec![
            ("Latest user message: \"I had dal for lunch\"", "log_meal"),
            ("food item name from this message: I had dal for lunch.", "dal"),
            ("Message: \"I had dal for lunch\"", "lunch"),
        ],
        delay,
    });
    let gateway = Arc::new(FailoverGateway::new(
        vec![llm],
        GatewayConfig {
            retry: RetryPolicy::new(1, Duration::ZERO),
            call_timeout: Duration::from_secs(2),
        },
    ));
    let sent = Arc::new(RecordingSender::default());
    let sender = Arc::clone(&sent) as Arc<dyn MessageSender>;
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::at_local_hour(13, chrono_tz::Asia::Kolkata));

    let onboarding = Arc::new(OnboardingEngine::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        Arc::clone(&sender),
        Arc::clone(&clock),
    ));
    let core = Arc::new(ConversationCore::new(
        Arc::clone(&db),
        gateway,
        Arc::clone(&onboarding),
        sender,
        clock,
        CoreConfig::default(),
    ));
    let app = webhook_routes(WebhookState {
        core,
        verify_token: "s3cret".to_string().into(),
    })
    .merge(onboarding_routes(OnboardingRouteState { engine: onboarding }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    Server { port, db, sent }
}

/// Poll until `sender` has at least `count` meal logs.
async fn wait_for_logs(db: &Arc<dyn Database>, sender: &str, count: usize) -> Vec<MealLogEntry> {
    loop {
        let logs = db.list_meal_logs(sender, 10).await.unwrap();
        if logs.len() >= count {
            return logs;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn text_delivery(id: &str, from: &str, body: &str) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "messages": [{"id": id, "from": from, "type": "text", "text": {"body": body}}]
                }
            }]
        }]
    })
}

// ── Verification ─────────────────────────────────────────────────────

#[tokio::test]
async fn verification_echoes_challenge() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{}/webhook?hub.mode=subscribe&hub.verify_token=s3cret&hub.challenge=12345",
            server.port
        ))
        .await
        .unwrap();

        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "12345");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn verification_rejects_wrong_token() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{}/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=12345",
            server.port
        ))
        .await
        .unwrap();

        assert_eq!(resp.status(), 403);
    })
    .await
    .expect("test timed out");
}

// ── Delivery ─────────────────────────────────────────────────────────

#[tokio::test]
async fn redelivered_message_logs_once() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/webhook", server.port);
        let body = text_delivery("wamid.1", ALICE, "I had dal for lunch");

        for _ in 0..2 {
            let resp = client.post(&url).json(&body).send().await.unwrap();
            assert_eq!(resp.status(), 200);
        }

        wait_for_logs(&server.db, ALICE, 1).await;
        // Let the redelivery finish too.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let logs = server.db.list_meal_logs(ALICE, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].food, "dal");

        let sent = server.sent.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![(ALICE.to_string(), "Yum! Logged: \"dal\" for Lunch 🍽️".to_string())]
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn delivery_is_acknowledged_before_processing() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server_with_delay(Duration::from_millis(500)).await;
        let client = reqwest::Client::new();

        let started = std::time::Instant::now();
        let resp = client
            .post(format!("http://127.0.0.1:{}/webhook", server.port))
            .json(&text_delivery("wamid.1", ALICE, "I had dal for lunch"))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(server.db.list_meal_logs(ALICE, 10).await.unwrap().is_empty());

        let logs = wait_for_logs(&server.db, ALICE, 1).await;
        assert_eq!(logs[0].food, "dal");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn garbage_payload_still_gets_200() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://127.0.0.1:{}/webhook", server.port))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        assert!(server.sent.sent.lock().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

// ── REST ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{}/health", server.port))
            .await
            .unwrap();

        assert_eq!(resp.status(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn onboarding_status_404_then_profile() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let url = format!("http://127.0.0.1:{}/api/onboarding/{ALICE}", server.port);

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 404);

        let mut delta = serde_json::Map::new();
        delta.insert("diet_type".into(), json!("eggetarian"));
        server
            .db
            .merge_preferences(ALICE, &delta, chrono::Utc::now())
            .await
            .unwrap();

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["phone"], ALICE);
        assert_eq!(json["preferences"]["values"]["diet_type"], "eggetarian");
    })
    .await
    .expect("test timed out");
}
