use crate::constants::{INVALID_SIGNATURE, SUCCESS};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use blockseal_core::{
    CancellationToken, ChainError, ChainSnapshot, Ledger, SealError, SignatureError, Storage,
    Transaction,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

pub(crate) type SharedLedger = Arc<Ledger<Box<dyn Storage>>>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ledger: SharedLedger,
    /// Cancelled on shutdown; every seal runs under a child of it.
    pub(crate) shutdown: CancellationToken,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: Option<u64>,
    hash: Option<String>,
    pending: usize,
}

#[derive(Serialize)]
struct VerifyReport {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
}

/// `add-transaction` form. Key and signature are base64; the key itself is OpenSSH text.
#[derive(Deserialize)]
struct TransactionForm {
    sender: String,
    receiver: String,
    amount: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "publicKey", alias = "public_key")]
    public_key: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, String> {
    BASE64_ENGINE
        .decode(value.trim())
        .map_err(|err| format!("{field} is not valid base64: {err}"))
}

impl TransactionForm {
    fn into_parts(self) -> Result<(Transaction, Option<Vec<u8>>), String> {
        let amount: f64 = self
            .amount
            .trim()
            .parse()
            .map_err(|_| format!("amount {:?} is not a number", self.amount))?;
        if !amount.is_finite() {
            return Err(format!("amount {amount} is not finite"));
        }
        let tx = match (non_empty(self.public_key), non_empty(self.signature)) {
            (None, None) => Transaction::unsigned(self.sender, self.receiver, amount),
            (Some(public_key), Some(signature)) => Transaction::signed(
                self.sender,
                self.receiver,
                amount,
                decode_field("publicKey", &public_key)?,
                decode_field("signature", &signature)?,
            ),
            _ => return Err("publicKey and signature must be sent together".into()),
        };
        Ok((tx, non_empty(self.message).map(String::into_bytes)))
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chain", get(chain))
        .route("/chain/head", get(head))
        .route("/verify", get(verify))
        .route("/add-transaction", post(add_transaction))
        .route("/create-block", post(create_block))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn internal_error(err: impl Display) -> Response {
    error!(%err, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn head(State(state): State<AppState>) -> Json<Head> {
    let snapshot = state.ledger.state();
    let tip = snapshot.last_block();
    Json(Head {
        height: tip.map(|b| b.index),
        hash: tip.map(|b| b.hash_hex()),
        pending: snapshot.pending().len(),
    })
}

async fn chain(State(state): State<AppState>) -> Json<ChainSnapshot> {
    Json(state.ledger.snapshot())
}

async fn verify(State(state): State<AppState>) -> Response {
    let ledger = Arc::clone(&state.ledger);
    match tokio::task::spawn_blocking(move || ledger.verify_integrity()).await {
        Ok(Ok(())) => Json(VerifyReport {
            ok: true,
            index: None,
            problem: None,
        })
        .into_response(),
        Ok(Err(err)) => Json(VerifyReport {
            ok: false,
            index: err.index(),
            problem: Some(err.to_string()),
        })
        .into_response(),
        Err(err) => internal_error(err),
    }
}

async fn add_transaction(
    State(state): State<AppState>,
    Form(form): Form<TransactionForm>,
) -> Response {
    let (tx, message) = match form.into_parts() {
        Ok(parts) => parts,
        Err(reason) => {
            warn!(%reason, "malformed transaction");
            return (StatusCode::BAD_REQUEST, INVALID_SIGNATURE).into_response();
        }
    };
    let ledger = Arc::clone(&state.ledger);
    match tokio::task::spawn_blocking(move || ledger.submit(tx, message.as_deref())).await {
        Ok(Ok(())) => (StatusCode::OK, SUCCESS).into_response(),
        Ok(Err(ChainError::InvalidSignature(SignatureError::InvalidPublicKey(_)))) => {
            (StatusCode::BAD_REQUEST, INVALID_SIGNATURE).into_response()
        }
        Ok(Err(ChainError::InvalidSignature(_))) => {
            (StatusCode::OK, INVALID_SIGNATURE).into_response()
        }
        Ok(Err(err)) => internal_error(err),
        Err(err) => internal_error(err),
    }
}

async fn create_block(State(state): State<AppState>) -> Response {
    let ledger = Arc::clone(&state.ledger);
    let cancel = state.shutdown.child_token();
    // abandon the search if the client goes away
    let guard = cancel.clone().drop_guard();
    let outcome =
        tokio::task::spawn_blocking(move || ledger.seal_next_block_with(&cancel)).await;
    guard.disarm();

    match outcome {
        Ok(Ok(block)) => {
            debug!(index = block.index, "create-block sealed a block");
            (StatusCode::OK, SUCCESS).into_response()
        }
        Ok(Err(ChainError::EmptyPendingPool)) => {
            debug!("create-block with an empty pending pool");
            (StatusCode::OK, SUCCESS).into_response()
        }
        Ok(Err(ChainError::Seal(err @ (SealError::Cancelled | SealError::DeadlineExceeded)))) => {
            warn!(%err, "create-block abandoned");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
        Ok(Err(err)) => internal_error(err),
        Err(err) => internal_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use blockseal_core::signature::{generate_keypair, sign, signing_message, ClientKeys};
    use blockseal_core::{LedgerConfig, MemoryStore};
    use http_body_util::BodyExt;
    use std::sync::OnceLock;
    use tower::ServiceExt;

    fn keys() -> &'static ClientKeys {
        static KEYS: OnceLock<ClientKeys> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair(2048).unwrap())
    }

    fn app_with(shutdown: CancellationToken) -> (Router, SharedLedger) {
        let store: Box<dyn Storage> = Box::new(MemoryStore::new());
        let ledger =
            Arc::new(Ledger::open(Arc::new(store), LedgerConfig::with_difficulty(1)).unwrap());
        ledger.create_genesis().unwrap();
        let state = AppState {
            ledger: Arc::clone(&ledger),
            shutdown,
        };
        (router(state), ledger)
    }

    fn app() -> (Router, SharedLedger) {
        app_with(CancellationToken::new())
    }

    fn form(fields: &[(&str, &str)]) -> String {
        fields
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_form(sender: &str, receiver: &str, amount: &str, signed_amount: f64) -> String {
        let keys = keys();
        let signature = sign(&keys.private_pem, sender, receiver, signed_amount).unwrap();
        let message = signing_message(sender, receiver, signed_amount).unwrap();
        form(&[
            ("sender", sender),
            ("receiver", receiver),
            ("amount", amount),
            ("message", &String::from_utf8(message).unwrap()),
            ("publicKey", &BASE64_ENGINE.encode(&keys.public_openssh)),
            ("signature", &BASE64_ENGINE.encode(signature)),
        ])
    }

    async fn send(app: &Router, method: &str, uri: &str, body: String) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn unsigned_transaction_is_admitted() {
        let (app, ledger) = app();
        let body = form(&[("sender", "Alice"), ("receiver", "Bob"), ("amount", "10")]);
        let (status, text) = send(&app, "POST", "/add-transaction", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, SUCCESS);
        assert_eq!(ledger.pending(), vec![Transaction::unsigned("Alice", "Bob", 10.0)]);
    }

    #[tokio::test]
    async fn signed_transaction_is_admitted() {
        let (app, ledger) = app();
        let (status, text) = send(
            &app,
            "POST",
            "/add-transaction",
            signed_form("Alice", "Bob", "12.5", 12.5),
        )
        .await;
        assert_eq!((status, text.as_str()), (StatusCode::OK, SUCCESS));
        let pending = ledger.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].is_signed());
    }

    #[tokio::test]
    async fn tampered_amount_is_rejected() {
        let (app, ledger) = app();
        // signed for 12.5, submitted as 99
        let body = signed_form("Alice", "Bob", "99", 12.5);
        let (status, text) = send(&app, "POST", "/add-transaction", body).await;
        assert_eq!((status, text.as_str()), (StatusCode::OK, INVALID_SIGNATURE));
        assert!(ledger.pending().is_empty());
    }

    #[tokio::test]
    async fn malformed_fields_are_bad_requests() {
        let (app, ledger) = app();
        for body in [
            form(&[("sender", "Alice"), ("receiver", "Bob"), ("amount", "ten")]),
            form(&[("sender", "Alice"), ("receiver", "Bob"), ("amount", "inf")]),
            form(&[
                ("sender", "Alice"),
                ("receiver", "Bob"),
                ("amount", "1"),
                ("publicKey", "@@@"),
                ("signature", "AAAA"),
            ]),
            form(&[
                ("sender", "Alice"),
                ("receiver", "Bob"),
                ("amount", "1"),
                ("signature", "AAAA"),
            ]),
            // well-formed base64, but not an OpenSSH key
            form(&[
                ("sender", "Alice"),
                ("receiver", "Bob"),
                ("amount", "1"),
                ("publicKey", "c3NoLXJzYSBBQUFB"),
                ("signature", "AAAA"),
            ]),
        ] {
            let (status, text) = send(&app, "POST", "/add-transaction", body).await;
            assert_eq!((status, text.as_str()), (StatusCode::BAD_REQUEST, INVALID_SIGNATURE));
        }
        assert!(ledger.pending().is_empty());
    }

    #[tokio::test]
    async fn create_block_on_empty_pool_is_a_no_op() {
        let (app, ledger) = app();
        let (status, text) = send(&app, "POST", "/create-block", String::new()).await;
        assert_eq!((status, text.as_str()), (StatusCode::OK, SUCCESS));
        assert_eq!(ledger.height(), Some(0));
    }

    #[tokio::test]
    async fn create_block_seals_pending_transactions() {
        let (app, ledger) = app();
        let body = form(&[("sender", "Alice"), ("receiver", "Bob"), ("amount", "3")]);
        send(&app, "POST", "/add-transaction", body).await;
        let (status, text) = send(&app, "POST", "/create-block", String::new()).await;
        assert_eq!((status, text.as_str()), (StatusCode::OK, SUCCESS));
        assert_eq!(ledger.height(), Some(1));
        assert!(ledger.pending().is_empty());

        let (status, text) = send(&app, "GET", "/verify", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn shutdown_cancels_sealing() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (app, ledger) = app_with(shutdown);
        ledger.admit(Transaction::unsigned("Alice", "Bob", 1.0)).unwrap();
        let (status, _) = send(&app, "POST", "/create-block", String::new()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ledger.height(), Some(0));
        assert_eq!(ledger.pending().len(), 1);
    }

    #[tokio::test]
    async fn head_and_chain_reflect_state() {
        let (app, ledger) = app();
        let (status, text) = send(&app, "GET", "/chain/head", String::new()).await;
        assert_eq!(status, StatusCode::OK);
        let head: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(head["height"], 0);
        assert_eq!(head["hash"], ledger.block(0).unwrap().hash_hex());

        let (_, text) = send(&app, "GET", "/chain", String::new()).await;
        let snapshot: ChainSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(snapshot, ledger.snapshot());
    }
}
