use augur_domain::entities::attempt::AttemptContext;
use augur_domain::entities::validation::Artifact;
use augur_domain::errors::CollaboratorError;
use augur_domain::repositories::collaborator::{Collaborator, IntentRequest, SummaryRequest};
use augur_domain::services::vocabulary::Vocabulary;
use augur_infrastructure::collaborators::{
    HttpCollaboratorConfig, HttpIntentClient, HttpSummaryClient,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Loopback server answering each connection with the next scripted
/// `(status, body)`; the last entry repeats. Request bodies are kept.
struct MockModelServer {
    base_url: String,
    stop: Arc<AtomicBool>,
    bodies: Arc<Mutex<Vec<String>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockModelServer {
    fn start(script: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{}", addr);
        let stop = Arc::new(AtomicBool::new(false));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let stop_clone = stop.clone();
        let bodies_clone = bodies.clone();

        let handle = thread::spawn(move || {
            listener.set_nonblocking(true).expect("nonblocking");
            let mut served = 0usize;
            while !stop_clone.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let (status, body) = &script[served.min(script.len() - 1)];
                        served += 1;
                        let _ = handle_connection(&mut stream, *status, body, &bodies_clone);
                    }
                    Err(_) => thread::sleep(Duration::from_millis(5)),
                }
            }
        });

        Self {
            base_url,
            stop,
            bodies,
            handle: Some(handle),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.bodies.lock().expect("bodies").clone()
    }
}

impl Drop for MockModelServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_connection(
    stream: &mut TcpStream,
    status: u16,
    body: &str,
    bodies: &Mutex<Vec<String>>,
) -> Result<(), String> {
    stream
        .set_nonblocking(false)
        .map_err(|e| e.to_string())?;
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .map_err(|e| e.to_string())?;

    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut tmp).map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("connection closed before headers".to_string());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut tmp).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    bodies
        .lock()
        .map_err(|e| e.to_string())?
        .push(String::from_utf8_lossy(&buf[header_end..]).to_string());

    let reason = if status == 200 { "OK" } else { "Error" };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream
        .write_all(header.as_bytes())
        .map_err(|e| e.to_string())?;
    stream.write_all(body.as_bytes()).map_err(|e| e.to_string())?;
    Ok(())
}

fn config(url: &str, retries: u32) -> HttpCollaboratorConfig {
    HttpCollaboratorConfig {
        url: url.to_string(),
        timeout_ms: 2_000,
        retries,
        model: Some("test-model".to_string()),
    }
}

fn intent_request() -> IntentRequest {
    IntentRequest {
        question: "How many Mondays closed down in 2024?".to_string(),
        relations: vec!["ohlcv_candles".to_string()],
        columns: vec!["close".to_string()],
        vocabulary: Vocabulary::standard().hint(),
    }
}

#[test]
fn intent_client_retries_server_errors_then_parses_steps() {
    let steps = r#"{"artifact": {"kind": "steps", "body": [
        {"id": "s1", "operation": "count",
         "atoms": [{"when": "2024", "what": "change", "filter": "monday"}]}
    ]}}"#;
    let server = MockModelServer::start(vec![
        (503, r#"{"error": "busy"}"#.to_string()),
        (200, steps.to_string()),
    ]);
    let client = HttpIntentClient::new(&config(&server.base_url, 1)).expect("client");

    let artifact = client.generate(&intent_request()).expect("artifact");
    match artifact {
        Artifact::Steps(steps) => {
            assert_eq!(steps.len(), 1);
            assert_eq!(steps[0].operation, "count");
        }
        other => panic!("unexpected artifact {other:?}"),
    }

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let envelope: serde_json::Value = serde_json::from_str(&requests[1]).expect("json body");
    assert_eq!(envelope["model"], "test-model");
    assert_eq!(
        envelope["request"]["question"],
        "How many Mondays closed down in 2024?"
    );
    assert!(envelope.get("attempt").is_none());
}

#[test]
fn revise_sends_attempt_feedback() {
    let server = MockModelServer::start(vec![(
        200,
        r#"{"artifact": {"kind": "query", "body": "SELECT close FROM ohlcv_candles"}}"#.to_string(),
    )]);
    let client = HttpIntentClient::new(&config(&server.base_url, 0)).expect("client");
    let context = AttemptContext::first(3).next(
        Some("SELECT clsoe FROM ohlcv_candles".to_string()),
        "unknown column 'clsoe' (did you mean 'close'?)".to_string(),
    );

    let artifact = client.revise(&intent_request(), &context).expect("artifact");
    assert_eq!(
        artifact,
        Artifact::Query("SELECT close FROM ohlcv_candles".to_string())
    );

    let requests = server.requests();
    let envelope: serde_json::Value = serde_json::from_str(&requests[0]).expect("json body");
    assert_eq!(envelope["attempt"]["attempt"], 2);
    assert!(envelope["attempt"]["feedback"][0]
        .as_str()
        .unwrap_or_default()
        .contains("clsoe"));
}

#[test]
fn client_errors_are_not_retried() {
    let server = MockModelServer::start(vec![(400, r#"{"error": "bad"}"#.to_string())]);
    let client = HttpIntentClient::new(&config(&server.base_url, 3)).expect("client");
    let err = client.generate(&intent_request()).expect_err("400");
    assert_eq!(err, CollaboratorError::Status { status: 400 });
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn summary_client_rejects_empty_and_malformed_text() {
    let server = MockModelServer::start(vec![
        (200, r#"{"text": "   "}"#.to_string()),
        (200, r#"{"summary": "wrong field"}"#.to_string()),
        (200, r#"{"text": "Mondays averaged -0.42%."}"#.to_string()),
    ]);
    let client = HttpSummaryClient::new(&config(&server.base_url, 0)).expect("client");
    let request = SummaryRequest {
        question: "q".to_string(),
        results: serde_json::json!({"avg": -0.42}),
    };

    assert!(matches!(
        client.generate(&request),
        Err(CollaboratorError::Malformed(_))
    ));
    assert!(matches!(
        client.generate(&request),
        Err(CollaboratorError::Malformed(_))
    ));
    assert_eq!(
        client.generate(&request).expect("text"),
        "Mondays averaged -0.42%."
    );
}

#[test]
fn unreachable_endpoint_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let client = HttpSummaryClient::new(&config(&url, 1)).expect("client");
    let request = SummaryRequest {
        question: "q".to_string(),
        results: serde_json::Value::Null,
    };
    assert!(matches!(
        client.generate(&request),
        Err(CollaboratorError::Transport(_))
    ));
}
