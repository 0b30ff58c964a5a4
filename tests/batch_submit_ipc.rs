use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const LINE_TIMEOUT: Duration = Duration::from_secs(15);

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    /// Notifications seen while waiting for responses.
    events: Vec<Value>,
}

impl Sidecar {
    fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_enrollbatchd");
        let mut child = Command::new(exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn enrollbatchd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            stdin,
            lines: rx,
            events: Vec::new(),
        }
    }

    fn next_value(&mut self) -> Value {
        let line = self
            .lines
            .recv_timeout(LINE_TIMEOUT)
            .expect("sidecar output line");
        serde_json::from_str(line.trim()).expect("parse sidecar json")
    }

    /// Sends one request and returns its response, buffering notifications.
    fn request(&mut self, id: &str, method: &str, params: Value) -> Value {
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        loop {
            let value = self.next_value();
            if value.get("event").is_some() {
                self.events.push(value);
                continue;
            }
            assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
            return value;
        }
    }

    fn request_ok(&mut self, id: &str, method: &str, params: Value) -> Value {
        let value = self.request(id, method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a request expected to fail.
    fn request_err(&mut self, id: &str, method: &str, params: Value) -> Value {
        let value = self.request(id, method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().expect("error object")
    }

    /// Waits for a notification matching `pred`, looking at buffered ones first.
    fn wait_event(&mut self, name: &str, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self
            .events
            .iter()
            .position(|e| e["event"] == json!(name) && pred(&e["params"]))
        {
            return self.events.remove(pos);
        }
        let deadline = Instant::now() + LINE_TIMEOUT;
        while Instant::now() < deadline {
            let value = self.next_value();
            if value["event"] == json!(name) && pred(&value["params"]) {
                return value;
            }
            self.events.push(value);
        }
        panic!("no {} notification", name);
    }

    fn close(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Minimal stand-in for the allocator service: previews are `M0001..`, the
/// batch endpoint answers with `batch_reply`.
struct StubService {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubService {
    fn start(batch_status: u16, batch_reply: Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let reply = batch_reply.clone();
                let seen = seen.clone();
                thread::spawn(move || serve(stream, batch_status, reply, seen));
            }
        });
        Self { base_url, requests }
    }

    fn posts(&self) -> Vec<Recorded> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter(|r| r.method == "POST")
            .cloned()
            .collect()
    }
}

fn serve(stream: TcpStream, batch_status: u16, batch_reply: Value, seen: Arc<Mutex<Vec<Recorded>>>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }
    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let (status, reply) = if method == "GET" && path == "/preview-matricula/" {
        let n = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("quantidade="))
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        let ids: Vec<String> = (1..=n).map(|i| format!("M{:04}", i)).collect();
        (200, json!({ "matriculas": ids }))
    } else if method == "POST" && path == "/alunos/salvar-lote/" {
        (batch_status, batch_reply)
    } else {
        (404, json!({ "detail": "not found" }))
    };

    seen.lock().expect("lock").push(Recorded {
        method,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    });

    let payload = reply.to_string();
    let mut stream = stream;
    let _ = write!(
        stream,
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        payload.len(),
        payload
    );
    let _ = stream.flush();
}

fn open_with_two(sc: &mut Sidecar, stub: &StubService) {
    sc.request_ok(
        "open",
        "session.open",
        json!({ "baseUrl": stub.base_url, "csrfToken": "csrf-abc" }),
    );
    sc.request_ok("add", "records.add", json!({}));
    for (i, (name, cpf)) in [("Ana", "111.111.111-11"), ("Bia", "222.222.222-22")]
        .iter()
        .enumerate()
    {
        sc.request_ok(
            &format!("n{}", i),
            "records.setField",
            json!({ "index": i, "field": "nome", "value": format!("  {}  ", name) }),
        );
        sc.request_ok(
            &format!("c{}", i),
            "records.setField",
            json!({ "index": i, "field": "cpf", "value": cpf }),
        );
    }
    // The add re-requests previews for two records.
    sc.wait_event("preview.applied", |p| {
        p["previews"].as_array().map(|a| a.len()) == Some(2)
    });
}

#[test]
fn successful_batch_posts_payload_and_ends_session() {
    let stub = StubService::start(200, json!({ "status": "sucesso", "total": 2 }));
    let mut sc = Sidecar::spawn();
    open_with_two(&mut sc, &stub);

    let list = sc.request_ok("list", "records.list", json!({}));
    assert_eq!(list["records"][0]["previewId"], json!("M0001"));
    assert_eq!(list["records"][1]["previewId"], json!("M0002"));

    let receipt = sc.request_ok("submit", "batch.submit", json!({}));
    assert_eq!(receipt["status"], json!("success"));
    assert_eq!(receipt["total"], json!(2));
    assert_eq!(receipt["navigateTo"], json!("/listar_aluno/"));
    assert_eq!(receipt["previouslyAccepted"], json!([]));

    let posts = stub.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].header("x-csrftoken"), Some("csrf-abc"));
    let body: Value = serde_json::from_str(&posts[0].body).expect("body json");
    let alunos = body["alunos"].as_array().expect("alunos");
    assert_eq!(alunos.len(), 2);
    assert_eq!(alunos[0]["nome"], json!("Ana"));
    assert_eq!(alunos[1]["nome"], json!("Bia"));
    assert_eq!(alunos[1]["matricula"], json!("M0002"));
    assert_eq!(alunos[0]["usa_transporte_escolar"], json!(false));

    sc.wait_event("batch.submitted", |p| p["total"] == json!(2));
    sc.wait_event("session.closed", |_| true);

    let e = sc.request_err("again", "records.add", json!({}));
    assert_eq!(e["code"], json!("session_closed"));
    let health = sc.request_ok("h", "health", json!({}));
    assert_eq!(health["sessionOpen"], json!(false));
    sc.close();
}

#[test]
fn partial_batch_keeps_records_and_flags_resubmission() {
    let stub = StubService::start(
        400,
        json!({
            "status": "parcial",
            "erros": [{ "aluno": "Bia", "erro": "CPF já cadastrado" }]
        }),
    );
    let mut sc = Sidecar::spawn();
    open_with_two(&mut sc, &stub);

    let e = sc.request_err("s1", "batch.submit", json!({}));
    assert_eq!(e["code"], json!("partial_batch_failure"));
    assert_eq!(e["details"]["errors"][0]["record"], json!("Bia"));
    assert_eq!(e["details"]["errors"][0]["reason"], json!("CPF já cadastrado"));
    assert_eq!(e["details"]["previouslyAccepted"], json!([]));

    let list = sc.request_ok("l", "records.list", json!({}));
    assert_eq!(list["count"], json!(2));

    // Second attempt: Ana was accepted the first time.
    let e = sc.request_err("s2", "batch.submit", json!({}));
    assert_eq!(e["code"], json!("partial_batch_failure"));
    assert_eq!(e["details"]["previouslyAccepted"], json!([1]));
    assert_eq!(stub.posts().len(), 2);
    sc.close();
}

#[test]
fn total_failure_uses_service_message() {
    let stub = StubService::start(
        500,
        json!({ "status": "erro", "mensagem": "banco indisponível" }),
    );
    let mut sc = Sidecar::spawn();
    open_with_two(&mut sc, &stub);

    let e = sc.request_err("s", "batch.submit", json!({}));
    assert_eq!(e["code"], json!("total_batch_failure"));
    assert!(e["message"]
        .as_str()
        .map(|m| m.contains("banco indisponível"))
        .unwrap_or(false));
    let health = sc.request_ok("h", "health", json!({}));
    assert_eq!(health["sessionOpen"], json!(true));
    sc.close();
}
