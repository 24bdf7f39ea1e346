//! Integration tests for RegistryClient.
//!
//! Uses a stateful wiremock responder that behaves like a handle server:
//! records are kept in memory, mutating requests are challenged with fresh
//! nonces, and every signature is checked against the admin public key.
//! Tests cover create/read/update/delete, both authentication modes,
//! identifier allocation and batch isolation.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use handle_registry::{
    verify_signature, AuthMode, CandidateSource, EntryValue, HandleConfig, HandleError,
    IdentifierAllocator, Record, RegistryClient, RsaSigner, SessionState, SigningKey, ValueEntry,
    DEFAULT_ADMIN_PERMISSIONS,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const ADMIN: &str = "300:0.NA/20.5000.1025";
const PREFIX: &str = "20.5000.1025/";
const HANDLES_PATH: &str = "/api/handles/20.5000.1025/";
const SESSIONS_PATH: &str = "/api/sessions/";

fn private_key() -> RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("failed to generate key")
    })
    .clone()
}

// ==================== Mock registry ====================

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, serde_json::Value>,
    /// Outstanding nonces by session id.
    nonces: HashMap<String, Vec<u8>>,
    /// Sessions confirmed through `PUT {sessions}this`.
    sessions: HashSet<String>,
    /// Client nonces seen in signed requests, in order.
    cnonces: Vec<String>,
    next_id: u64,
    reject_signatures: bool,
}

#[derive(Clone)]
struct MockRegistry {
    state: Arc<Mutex<RegistryState>>,
    public_key: RsaPublicKey,
}

impl MockRegistry {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            public_key: RsaPublicKey::from(&private_key()),
        }
    }

    async fn mount(&self, server: &MockServer) {
        Mock::given(any())
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    fn seed(&self, suffix: &str, record: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(suffix.to_string(), record);
    }

    fn stored(&self, suffix: &str) -> Option<serde_json::Value> {
        self.state.lock().unwrap().records.get(suffix).cloned()
    }

    fn cnonces(&self) -> Vec<String> {
        self.state.lock().unwrap().cnonces.clone()
    }

    fn revoke_sessions(&self) {
        self.state.lock().unwrap().sessions.clear();
    }

    fn reject_signatures(&self) {
        self.state.lock().unwrap().reject_signatures = true;
    }

    fn issue_nonce(state: &mut RegistryState) -> (String, String) {
        state.next_id += 1;
        let session_id = format!("sess-{}", state.next_id);
        let nonce: [u8; 16] = rand::random();
        state.nonces.insert(session_id.clone(), nonce.to_vec());
        (session_id, BASE64.encode(nonce))
    }

    fn challenge(state: &mut RegistryState) -> ResponseTemplate {
        let (session_id, nonce) = Self::issue_nonce(state);
        ResponseTemplate::new(401)
            .insert_header(
                "www-authenticate",
                format!(
                    r#"Handle sessionId="{}", nonce="{}", error="Identity not verified""#,
                    session_id, nonce
                )
                .as_str(),
            )
            .set_body_json(serde_json::json!({"responseCode": 402}))
    }

    /// Check a signed header against the nonce issued for its session.
    fn verify(&self, state: &mut RegistryState, params: &HashMap<String, String>) -> bool {
        let (Some(session_id), Some(cnonce), Some(signature)) = (
            params.get("sessionid"),
            params.get("cnonce"),
            params.get("signature"),
        ) else {
            return false;
        };
        if params.get("id").map(String::as_str) != Some(ADMIN)
            || params.get("type").map(String::as_str) != Some("HS_PUBKEY")
            || params.get("alg").map(String::as_str) != Some("SHA256")
        {
            return false;
        }
        let Some(server_nonce) = state.nonces.remove(session_id) else {
            return false;
        };
        let (Ok(client_nonce), Ok(signature)) = (BASE64.decode(cnonce), BASE64.decode(signature))
        else {
            return false;
        };

        state.cnonces.push(cnonce.clone());
        if state.reject_signatures {
            return false;
        }

        let mut message = server_nonce;
        message.extend_from_slice(&client_nonce);
        verify_signature(&self.public_key, &message, &signature).is_ok()
    }

    fn authorized(&self, state: &mut RegistryState, header: Option<&str>) -> bool {
        let Some(header) = header else {
            return false;
        };
        let params = auth_params(header);

        if params.contains_key("signature") {
            return self.verify(state, &params);
        }
        params
            .get("sessionid")
            .is_some_and(|id| state.sessions.contains(id))
    }

    fn sessions(&self, request: &Request, state: &mut RegistryState) -> ResponseTemplate {
        let path = request.url.path();

        match (request.method.as_str(), path) {
            ("POST", SESSIONS_PATH) => {
                let (session_id, nonce) = Self::issue_nonce(state);
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"sessionId": session_id, "nonce": nonce}))
            }
            ("PUT", p) if p == format!("{}this", SESSIONS_PATH) => {
                let header = authorization(request);
                let params = header.map(auth_params).unwrap_or_default();
                let session_id = params.get("sessionid").cloned().unwrap_or_default();

                if header.is_some_and(|h| h.starts_with("Handle version=\"0\""))
                    && self.verify(state, &params)
                {
                    state.sessions.insert(session_id.clone());
                    ResponseTemplate::new(200).set_body_json(
                        serde_json::json!({"sessionId": session_id, "authenticated": true}),
                    )
                } else {
                    ResponseTemplate::new(401).set_body_json(serde_json::json!({
                        "sessionId": session_id,
                        "authenticated": false,
                        "error": "Identity not verified"
                    }))
                }
            }
            _ => ResponseTemplate::new(405),
        }
    }

    fn handles(&self, request: &Request, state: &mut RegistryState, suffix: &str) -> ResponseTemplate {
        let not_found = || {
            ResponseTemplate::new(404).set_body_json(
                serde_json::json!({"responseCode": 100, "message": "Handle Not Found"}),
            )
        };

        if request.method.as_str() == "GET" {
            return match state.records.get(suffix) {
                Some(record) => ResponseTemplate::new(200).set_body_json(record.clone()),
                None => not_found(),
            };
        }

        if !self.authorized(state, authorization(request)) {
            return Self::challenge(state);
        }

        let handle = format!("{}{}", PREFIX, suffix);
        match request.method.as_str() {
            "PUT" => {
                let Ok(mut body) = serde_json::from_slice::<serde_json::Value>(&request.body)
                else {
                    return ResponseTemplate::new(400);
                };
                let guarded = request
                    .url
                    .query_pairs()
                    .any(|(k, v)| k == "overwrite" && v == "false");
                if guarded && state.records.contains_key(suffix) {
                    return ResponseTemplate::new(409).set_body_json(serde_json::json!({
                        "responseCode": 101, "message": "Handle already exists"
                    }));
                }
                body["responseCode"] = serde_json::json!(1);
                let existed = state.records.insert(suffix.to_string(), body).is_some();
                ResponseTemplate::new(if existed { 200 } else { 201 })
                    .set_body_json(serde_json::json!({"responseCode": 1, "handle": handle}))
            }
            "DELETE" => match state.records.remove(suffix) {
                Some(_) => ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"responseCode": 1, "handle": handle})),
                None => not_found(),
            },
            _ => ResponseTemplate::new(405),
        }
    }
}

impl Respond for MockRegistry {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let path = request.url.path().to_string();

        if path.starts_with(SESSIONS_PATH) {
            return self.sessions(request, &mut state);
        }
        match path.strip_prefix(HANDLES_PATH) {
            Some(suffix) if !suffix.is_empty() => self.handles(request, &mut state, suffix),
            _ => ResponseTemplate::new(404),
        }
    }
}

fn authorization(request: &Request) -> Option<&str> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
}

/// `key="value"` pairs with lowercased keys; the scheme word is ignored.
fn auth_params(header: &str) -> HashMap<String, String> {
    header
        .split(',')
        .filter_map(|part| part.split_once('='))
        .filter_map(|(k, v)| {
            let key = k.split_whitespace().last()?.to_ascii_lowercase();
            Some((key, v.trim().trim_matches('"').to_string()))
        })
        .collect()
}

// ==================== Fixtures ====================

fn config(server: &MockServer, mode: AuthMode) -> HandleConfig {
    HandleConfig::default()
        .with_base_url(format!("{}{}", server.uri(), HANDLES_PATH))
        .with_prefix(PREFIX)
        .with_admin_id(ADMIN)
        .with_sessions_url(format!("{}{}", server.uri(), SESSIONS_PATH))
        .with_auth_mode(mode)
}

fn signer() -> Arc<RsaSigner> {
    Arc::new(RsaSigner::new(Arc::new(SigningKey::new(private_key(), ADMIN))))
}

async fn create_test_client(server: &MockServer, mode: AuthMode) -> RegistryClient {
    RegistryClient::with_signer(config(server, mode), signer()).expect("failed to create client")
}

fn sample_record() -> Record {
    Record::new("")
        .with_entry(ValueEntry::string(1, "URL", "https://sandbox.dissco.tech/"))
        .with_entry(ValueEntry::admin(
            100,
            "0.NA/20.5000.1025",
            DEFAULT_ADMIN_PERMISSIONS,
        ))
}

#[derive(Debug)]
struct FixedCandidates(Mutex<Vec<&'static str>>);

impl CandidateSource for FixedCandidates {
    fn next_candidate(&self) -> String {
        let mut items = self.0.lock().unwrap();
        if items.is_empty() {
            "zzzz-zzzz".to_string()
        } else {
            items.remove(0).to_string()
        }
    }
}

// ==================== CRUD ====================

#[tokio::test]
async fn test_create_then_read_round_trip() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let sample = sample_record();
    let client = create_test_client(&server, AuthMode::KeyPair).await;
    let created = client
        .create(sample.clone(), Some("abc-123"))
        .await
        .expect("create failed");
    assert_eq!(created.handle, "20.5000.1025/abc-123");

    let record = client.read("abc-123").await.expect("read failed");
    assert_eq!(record.handle, "20.5000.1025/abc-123");
    assert_eq!(record.values, sample.values);
}

#[tokio::test]
async fn test_create_never_replaces_existing_record() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::Session).await;
    client.create(sample_record(), Some("taken")).await.unwrap();
    let before = registry.stored("taken").unwrap();

    let other = Record::new("")
        .with_entry(ValueEntry::string(1, "URL", "https://elsewhere.example.org/"))
        .with_entry(ValueEntry::admin(100, "0.NA/20.5000.1025", DEFAULT_ADMIN_PERMISSIONS));
    let err = client.create(other, Some("taken")).await.unwrap_err();

    assert!(matches!(err, HandleError::AlreadyExists { ref handle } if handle == "taken"));
    assert_eq!(registry.stored("taken").unwrap(), before);
}

#[tokio::test]
async fn test_update_changes_only_target_entry() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    client
        .create(sample_record(), Some("upd-0001"))
        .await
        .expect("create failed");
    let before = registry.stored("upd-0001").unwrap();

    client
        .update("upd-0001", 0, "new@example.org")
        .await
        .expect("update failed");

    let after = registry.stored("upd-0001").unwrap();
    assert_eq!(after["values"][0]["data"]["value"], "new@example.org");
    assert_eq!(after["values"][0]["index"], before["values"][0]["index"]);
    assert_eq!(after["values"][0]["type"], before["values"][0]["type"]);
    assert_eq!(after["values"][1], before["values"][1]);
}

#[tokio::test]
async fn test_update_preserves_unknown_fields() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;
    registry.seed(
        "legacy",
        serde_json::json!({
            "responseCode": 1,
            "handle": "20.5000.1025/legacy",
            "values": [
                {"index": 1, "ttl": 86400, "type": "URL", "timestamp": "2022-06-09T10:00:00Z",
                 "data": {"value": "https://old.example.org/", "format": "string"},
                 "refs": []},
                {"index": 100, "type": "HS_ADMIN", "timestamp": "",
                 "data": {"value": {"index": 200, "handle": "0.NA/20.5000.1025",
                                    "permissions": "011111110011", "legacyByteLength": true},
                          "format": "admin", "encoding": "utf8"}}
            ]
        }),
    );
    let before = registry.stored("legacy").unwrap();

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    client
        .update("legacy", 0, "https://new.example.org/")
        .await
        .expect("update failed");

    let after = registry.stored("legacy").unwrap();
    assert_eq!(after["values"][0]["refs"], serde_json::json!([]));
    assert_eq!(after["values"][0]["timestamp"], "2022-06-09T10:00:00Z");
    assert_eq!(after["values"][1], before["values"][1]);
}

#[tokio::test]
async fn test_update_out_of_range_position() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    client.create(sample_record(), Some("short")).await.unwrap();

    let result = client.update("short", 5, EntryValue::from("x")).await;
    assert!(matches!(result, Err(HandleError::InvalidRecord { .. })));
}

#[tokio::test]
async fn test_delete_then_read_is_not_found() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    client.create(sample_record(), Some("gone")).await.unwrap();
    assert!(client.exists("gone").await.unwrap());

    client.delete("gone").await.expect("delete failed");

    let err = client.read("gone").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!client.exists("gone").await.unwrap());
}

#[tokio::test]
async fn test_delete_missing_record() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    let result = client.delete("never-existed").await;
    assert!(matches!(result, Err(HandleError::NotFound { ref handle }) if handle == "never-existed"));
}

// ==================== Key-pair mode ====================

#[tokio::test]
async fn test_key_pair_uses_fresh_client_nonces() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    client.create(sample_record(), Some("n-1")).await.unwrap();
    client.create(sample_record(), Some("n-2")).await.unwrap();
    client.delete("n-1").await.unwrap();

    let cnonces = registry.cnonces();
    assert_eq!(cnonces.len(), 3);
    let distinct: HashSet<_> = cnonces.iter().collect();
    assert_eq!(distinct.len(), 3, "client nonce reused: {:?}", cnonces);
}

#[tokio::test]
async fn test_key_pair_rejected_signature_is_terminal() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;
    registry.reject_signatures();

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    let err = client
        .create(sample_record(), Some("denied"))
        .await
        .unwrap_err();

    assert!(matches!(err, HandleError::AuthenticationFailed { .. }));
    // One challenge answered, no retry loop.
    assert_eq!(registry.cnonces().len(), 1);
    assert!(registry.stored("denied").is_none());
}

#[tokio::test]
async fn test_client_from_key_file() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let pem = private_key()
        .to_pkcs8_pem(LineEnding::LF)
        .expect("encode key");
    let mut key_file = tempfile::NamedTempFile::new().unwrap();
    key_file.write_all(pem.as_bytes()).unwrap();

    let config = config(&server, AuthMode::KeyPair).with_key_path(key_file.path());
    let client = RegistryClient::new(config).expect("client from key file");

    client
        .create(sample_record(), Some("from-file"))
        .await
        .expect("create failed");
    assert!(registry.stored("from-file").is_some());
}

#[tokio::test]
async fn test_missing_key_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = HandleConfig::default()
        .with_admin_id(ADMIN)
        .with_key_path(dir.path().join("absent.pem"));

    let result = RegistryClient::new(config);
    assert!(matches!(result, Err(HandleError::KeyUnavailable { .. })));
}

// ==================== Session mode ====================

#[tokio::test]
async fn test_session_mode_reuses_one_handshake() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::Session).await;
    client.create(sample_record(), Some("s-1")).await.unwrap();
    client.create(sample_record(), Some("s-2")).await.unwrap();
    client.update("s-1", 0, "https://moved.example.org/").await.unwrap();
    client.delete("s-2").await.unwrap();

    let manager = client.session().expect("session mode");
    assert_eq!(manager.handshake_count(), 1);
    assert_eq!(manager.state().await, SessionState::Authenticated);
    // Only the handshake itself was signed.
    assert_eq!(registry.cnonces().len(), 1);
}

#[tokio::test]
async fn test_session_expiry_requires_reestablish() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::Session).await;
    client.create(sample_record(), Some("exp-1")).await.unwrap();

    registry.revoke_sessions();

    let err = client
        .create(sample_record(), Some("exp-2"))
        .await
        .unwrap_err();
    assert!(err.is_auth_failure());

    let manager = client.session().unwrap();
    assert_eq!(manager.state().await, SessionState::Rejected);

    manager.reestablish().await.expect("reestablish failed");
    client.create(sample_record(), Some("exp-2")).await.unwrap();
    assert_eq!(manager.handshake_count(), 2);
}

#[tokio::test]
async fn test_session_handshake_rejected() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;
    registry.reject_signatures();

    let client = create_test_client(&server, AuthMode::Session).await;
    let err = client
        .create(sample_record(), Some("nope"))
        .await
        .unwrap_err();

    assert!(matches!(err, HandleError::SessionRejected { .. }));
    assert_eq!(client.session().unwrap().handshake_count(), 1);
}

// ==================== Allocation ====================

#[tokio::test]
async fn test_create_skips_taken_identifiers() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;
    registry.seed("AAAAAAAA", serde_json::json!({"handle": "20.5000.1025/AAAAAAAA", "values": []}));
    registry.seed("BBBBBBBB", serde_json::json!({"handle": "20.5000.1025/BBBBBBBB", "values": []}));

    let client = create_test_client(&server, AuthMode::KeyPair)
        .await
        .with_allocator(IdentifierAllocator::new(
            Arc::new(FixedCandidates(Mutex::new(vec![
                "AAAAAAAA", "BBBBBBBB", "CCCCCCCC",
            ]))),
            50,
        ));

    let created = client.create(sample_record(), None).await.unwrap();
    assert_eq!(created.suffix, "CCCCCCCC");
    assert_eq!(created.handle, "20.5000.1025/CCCCCCCC");
    assert!(registry.stored("CCCCCCCC").is_some());
}

#[tokio::test]
async fn test_allocation_exhausted() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;
    registry.seed("zzzz-zzzz", serde_json::json!({"handle": "20.5000.1025/zzzz-zzzz", "values": []}));

    let client = create_test_client(&server, AuthMode::KeyPair)
        .await
        .with_allocator(IdentifierAllocator::new(
            Arc::new(FixedCandidates(Mutex::new(Vec::new()))),
            3,
        ));

    let err = client.create(sample_record(), None).await.unwrap_err();
    assert!(matches!(err, HandleError::AllocationExhausted { attempts: 3 }));
}

#[tokio::test]
async fn test_minted_identifiers_are_base32() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = create_test_client(&server, AuthMode::KeyPair).await;
    let created = client.create(sample_record(), None).await.unwrap();

    assert_eq!(created.suffix.len(), 9);
    assert_eq!(&created.suffix[4..5], "-");
    assert!(created.handle.starts_with(PREFIX));
}

// ==================== Batch ====================

#[tokio::test]
async fn test_batch_create_and_delete() {
    let server = MockServer::start().await;
    let registry = MockRegistry::new();
    registry.mount(&server).await;

    let client = RegistryClient::with_signer(
        config(&server, AuthMode::Session).with_batch_concurrency(3),
        signer(),
    )
    .unwrap();

    let inputs: Vec<_> = (0..6)
        .map(|i| (sample_record(), Some(format!("batch-{}", i))))
        .chain(std::iter::once((Record::new(""), Some("invalid".to_string()))))
        .collect();
    let report = client.create_many(inputs).await;

    assert_eq!(report.len(), 7);
    assert_eq!(report.succeeded().count(), 6);
    assert!(matches!(
        report.items[6].result,
        Err(HandleError::InvalidRecord { .. })
    ));
    for (i, item) in report.items.iter().take(6).enumerate() {
        assert_eq!(item.index, i);
        assert_eq!(
            item.result.as_ref().unwrap().handle,
            format!("20.5000.1025/batch-{}", i)
        );
    }
    assert_eq!(client.session().unwrap().handshake_count(), 1);

    let report = client
        .delete_many(vec!["batch-0".into(), "missing".into(), "batch-1".into()])
        .await;
    assert!(report.items[0].result.is_ok());
    assert!(report.items[1]
        .result
        .as_ref()
        .is_err_and(HandleError::is_not_found));
    assert!(report.items[2].result.is_ok());
    assert!(registry.stored("batch-0").is_none());
    assert!(registry.stored("batch-2").is_some());
}
