use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::future::join_all;
use lnpaywall::handlers::protected_routes;
use lnpaywall::listener::{ListenerHandle, ListenerStatus, SettlementListener};
use lnpaywall_axum::Paywall;
use lnpaywall_types::backend::MemoryBackend;
use lnpaywall_types::invoice::{InvoiceEvent, InvoiceState};
use lnpaywall_types::table::PaymentTable;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const CONTENT: &str = "Weather report: 15 degrees Celsius, cloudy and with a chance of Lightning.";

struct Harness {
    backend: MemoryBackend,
    table: PaymentTable,
    app: Router,
    listener: ListenerHandle,
    cancellation: CancellationToken,
}

impl Harness {
    async fn start() -> Self {
        let backend = MemoryBackend::new();
        let table = PaymentTable::new();
        let cancellation = CancellationToken::new();
        let listener =
            SettlementListener::new(backend.clone(), table.clone()).spawn(cancellation.clone());
        listener
            .status()
            .wait_for(ListenerStatus::is_connected)
            .await
            .unwrap();
        let paywall = Paywall::new(backend.clone(), table.clone())
            .with_amount_sat(1)
            .with_description("Weather report");
        let app = protected_routes("/weather", paywall.layer(), CONTENT.to_string());
        Self {
            backend,
            table,
            app,
            listener,
            cancellation,
        }
    }

    async fn get(&self, token: Option<&str>) -> Response {
        let mut builder = Request::builder().uri("/weather");
        if let Some(token) = token {
            builder = builder.header("X-Correlation-Token", token);
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn settle(&self, memo: &str) {
        self.backend.emit(InvoiceEvent {
            id: "feed".to_string(),
            state: InvoiceState::Settled,
            memo: memo.to_string(),
            amount_paid_msat: Some(1000),
        });
    }

    async fn wait_settled(&self, token: &str) {
        let token = token.parse().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.table.is_settled(&token) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("token was not settled in time");
    }

    async fn stop(self) {
        self.cancellation.cancel();
        self.listener.join().await;
    }
}

async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn challenge_then_payment_unlocks_resource() {
    let harness = Harness::start().await;

    let challenge = harness.get(None).await;
    assert_eq!(challenge.status(), StatusCode::PAYMENT_REQUIRED);
    let token = challenge
        .headers()
        .get("x-correlation-token")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let payment_request = body_string(challenge).await;

    let early = harness.get(Some(&token)).await;
    assert_eq!(early.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(early).await, "Error: Invoice has not been paid");

    harness.backend.pay(&payment_request).unwrap();
    harness.wait_settled(&token).await;

    let paid = harness.get(Some(&token)).await;
    assert_eq!(paid.status(), StatusCode::OK);
    assert_eq!(body_string(paid).await, CONTENT);

    harness.stop().await;
}

#[tokio::test]
async fn settlement_memo_grants_access_to_its_token() {
    let harness = Harness::start().await;

    harness.settle("Weather report || abc123");
    harness.wait_settled("abc123").await;

    let paid = harness.get(Some("abc123")).await;
    assert_eq!(paid.status(), StatusCode::OK);
    assert_eq!(body_string(paid).await, CONTENT);

    let other = harness.get(Some("unknown-token")).await;
    assert_eq!(other.status(), StatusCode::BAD_REQUEST);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_memos_do_not_stop_the_listener() {
    let harness = Harness::start().await;

    harness.settle("no separator at all");
    harness.settle("Weather report ||");
    harness.settle("Weather report || good-token");
    harness.wait_settled("good-token").await;
    assert_eq!(harness.table.len(), 1);

    let paid = harness.get(Some("good-token")).await;
    assert_eq!(paid.status(), StatusCode::OK);

    harness.stop().await;
}

#[tokio::test]
async fn duplicate_settlements_are_harmless() {
    let harness = Harness::start().await;

    harness.settle("Weather report || twice");
    harness.settle("Weather report || twice");
    harness.settle("Weather report || marker");
    harness.wait_settled("marker").await;

    let entry = harness.table.get(&"twice".parse().unwrap()).unwrap();
    assert!(entry.is_settled());
    assert_eq!(harness.table.stats().settled, 2);

    let paid = harness.get(Some("twice")).await;
    assert_eq!(paid.status(), StatusCode::OK);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_challenges_get_distinct_tokens() {
    let harness = Harness::start().await;

    let requests = (0..1000).map(|_| harness.get(None));
    let mut tokens: Vec<String> = join_all(requests)
        .await
        .into_iter()
        .map(|response| {
            assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
            response.headers()["x-correlation-token"]
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 1000);
    assert_eq!(harness.table.stats().pending, 1000);
    assert_eq!(harness.backend.invoice_count(), 1000);

    harness.stop().await;
}
