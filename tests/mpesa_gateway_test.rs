//! MpesaGateway against an in-process stub of the provider HTTP API.

use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use quotepay_backend::payments::error::PaymentError;
use quotepay_backend::payments::provider::PaymentGateway;
use quotepay_backend::payments::providers::{MpesaConfig, MpesaGateway};
use quotepay_backend::payments::types::ProviderIds;
use quotepay_backend::services::payment_events::PaymentOutcome;
use quotepay_backend::services::payment_orchestrator::PaymentOrchestrator;
use quotepay_backend::workers::confirmation_poller::PollerConfig;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

impl Captured {
    fn record(&self, headers: &HeaderMap, body: Value) {
        self.bodies.lock().unwrap().push(body);
        self.auth.lock().unwrap().push(
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        );
    }

    fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub provider");
    let addr = listener.local_addr().expect("stub address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub provider");
    });
    format!("http://{}", addr)
}

fn gateway(base_url: String, token: Option<&str>) -> MpesaGateway {
    MpesaGateway::new(MpesaConfig {
        base_url,
        api_token: token.map(str::to_string),
        timeout_secs: 5,
        ..MpesaConfig::default()
    })
    .expect("valid gateway config")
}

fn ids() -> ProviderIds {
    ProviderIds {
        request_id: "C1".to_string(),
        correlation_id: "M1".to_string(),
    }
}

#[tokio::test]
async fn push_sends_camel_case_body_with_product_tag() {
    let captured = Captured::default();
    let sink = captured.clone();
    let app = Router::new().route(
        "/api/mpesa/stk-push",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.record(&headers, body);
                Json(json!({
                    "checkOutRequestId": "ws_CO_1",
                    "merchantRequestId": "29115-1"
                }))
            }
        }),
    );
    let gateway = gateway(serve(app).await, Some("secret-token"));

    let ids = gateway
        .push_payment("QT-2001", "0712345678", Decimal::ONE)
        .await
        .expect("push accepted");

    assert_eq!(ids.request_id, "ws_CO_1");
    assert_eq!(ids.correlation_id, "29115-1");

    let bodies = captured.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["phoneNumber"], "0712345678");
    assert_eq!(bodies[0]["reference"], "QT-2001");
    assert_eq!(bodies[0]["productTag"], "marine");
    assert_eq!(bodies[0]["amount"].as_f64(), Some(1.0));
    assert_eq!(
        captured.auth.lock().unwrap()[0].as_deref(),
        Some("Bearer secret-token")
    );
}

#[tokio::test]
async fn push_rejects_invalid_phone_before_any_request() {
    let captured = Captured::default();
    let sink = captured.clone();
    let app = Router::new().route(
        "/api/mpesa/stk-push",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.record(&headers, body);
                StatusCode::OK
            }
        }),
    );
    let gateway = gateway(serve(app).await, None);

    let err = gateway
        .push_payment("QT-2002", "12345", Decimal::ONE)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::ValidationError { .. }));
    assert!(captured.bodies().is_empty());
}

#[tokio::test]
async fn push_with_empty_ids_is_an_invalid_response() {
    let app = Router::new().route(
        "/api/mpesa/stk-push",
        post(|| async {
            Json(json!({ "checkOutRequestId": "", "merchantRequestId": "29115-1" }))
        }),
    );
    let gateway = gateway(serve(app).await, None);

    let err = gateway
        .push_payment("QT-2003", "0712345678", Decimal::ONE)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::InvalidResponse { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn push_server_error_is_retryable_provider_error() {
    let app = Router::new().route(
        "/api/mpesa/stk-push",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable") }),
    );
    let gateway = gateway(serve(app).await, None);

    let err = gateway
        .push_payment("QT-2004", "0712345678", Decimal::ONE)
        .await
        .unwrap_err();

    match err {
        PaymentError::ProviderError {
            provider,
            provider_code,
            retryable,
            ..
        } => {
            assert_eq!(provider, "mpesa");
            assert_eq!(provider_code.as_deref(), Some("500"));
            assert!(retryable);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn status_check_sends_both_ids_and_parses_receipt() {
    let captured = Captured::default();
    let sink = captured.clone();
    let app = Router::new().route(
        "/api/mpesa/stk-status",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.record(&headers, body);
                Json(json!({ "resultCode": 0, "mpesaCode": "QAX1" }))
            }
        }),
    );
    let gateway = gateway(serve(app).await, None);

    let status = gateway.check_status(&ids()).await.expect("status parsed");

    assert_eq!(status.result_code, 0);
    assert_eq!(status.mpesa_code.as_deref(), Some("QAX1"));
    assert_eq!(
        captured.bodies(),
        vec![json!({ "merchantRequestId": "M1", "checkOutRequestId": "C1" })]
    );
    assert_eq!(captured.auth.lock().unwrap()[0], None);
}

#[tokio::test]
async fn status_check_with_malformed_body_is_invalid_response() {
    let app = Router::new().route(
        "/api/mpesa/stk-status",
        post(|| async { "<html>gateway</html>" }),
    );
    let gateway = gateway(serve(app).await, None);

    let err = gateway.check_status(&ids()).await.unwrap_err();

    assert!(matches!(err, PaymentError::InvalidResponse { .. }));
}

#[tokio::test]
async fn unreachable_provider_is_a_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("address");
    drop(listener);
    let gateway = gateway(format!("http://{}", addr), None);

    let err = gateway.check_status(&ids()).await.unwrap_err();

    assert!(matches!(err, PaymentError::NetworkError { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn orchestrator_confirms_payment_over_http() {
    let checks = Arc::new(Mutex::new(0u32));
    let counter = checks.clone();
    let app = Router::new()
        .route(
            "/api/mpesa/stk-push",
            post(|| async {
                Json(json!({ "checkOutRequestId": "C1", "merchantRequestId": "M1" }))
            }),
        )
        .route(
            "/api/mpesa/stk-status",
            post(move || {
                let counter = counter.clone();
                async move {
                    let mut seen = counter.lock().unwrap();
                    *seen += 1;
                    if *seen < 3 {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                    } else {
                        (
                            StatusCode::OK,
                            Json(json!({ "resultCode": 0, "mpesaCode": "QAX1" })),
                        )
                    }
                }
            }),
        );
    let gateway = Arc::new(gateway(serve(app).await, None));
    let orchestrator = PaymentOrchestrator::new(
        gateway,
        PollerConfig {
            interval: Duration::from_millis(20),
            max_attempts: 5,
            request_timeout: Duration::from_secs(2),
        },
    );

    let stream = orchestrator
        .initiate("QT-2005", "0712345678", Decimal::ONE)
        .await
        .expect("push accepted");
    let outcome = tokio::time::timeout(Duration::from_secs(5), stream.outcome())
        .await
        .expect("outcome within budget");

    assert_eq!(
        outcome,
        Some(PaymentOutcome::Succeeded {
            mpesa_code: "QAX1".to_string(),
            attempts: 3
        })
    );
    assert_eq!(*checks.lock().unwrap(), 3);
}
