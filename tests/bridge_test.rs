use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Value, json};

use skillgate::bridge::{Bridge, BridgeConfig, BridgeHandle, ExecutionDriver};
use skillgate::client::SkillClient;
use skillgate::events::Event;
use skillgate::host::{FrameLoop, FrameWaker, HostScheduler, QuitSignal};
use skillgate::journal::Journal;
use skillgate::journal::sqlite::SqliteJournal;
use skillgate::skills::{FnSkill, ParamSpec, ParamType, SkillRegistry};

/// A frame loop on its own thread that drives the bridge unless paused.
struct TestHost {
    quit: QuitSignal,
    waker: Arc<FrameWaker>,
    paused: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestHost {
    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.waker.request_tick();
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.quit.trigger();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn config() -> BridgeConfig {
    BridgeConfig {
        addr: "127.0.0.1:0".parse().unwrap(),
        keep_alive_interval: Duration::from_millis(10),
        ..BridgeConfig::default()
    }
}

/// Start a bridge whose host ticks on a dedicated thread. `build` runs on
/// that thread, so the registry never crosses threads.
fn spawn_host<F>(
    config: BridgeConfig,
    journal: Option<Arc<dyn Journal>>,
    paused: bool,
    build: F,
) -> (BridgeHandle, TestHost)
where
    F: FnOnce() -> SkillRegistry + Send + 'static,
{
    let paused = Arc::new(AtomicBool::new(paused));
    let (waker_tx, waker_rx) = mpsc::channel();
    let (ctx_tx, ctx_rx) = mpsc::channel();
    let host_paused = Arc::clone(&paused);

    let thread = thread::spawn(move || {
        // Idle ticks are slow; progress relies on the keep-alive nudge.
        let frame_loop = FrameLoop::new(Duration::from_secs(30));
        waker_tx
            .send((frame_loop.waker(), frame_loop.quit_signal()))
            .unwrap();
        let Ok(ctx) = ctx_rx.recv() else {
            return;
        };
        let mut driver = ExecutionDriver::new(ctx, build());
        frame_loop.run(|| {
            if !host_paused.load(Ordering::SeqCst) {
                driver.drive();
            }
        });
    });

    let (waker, quit): (Arc<FrameWaker>, QuitSignal) = waker_rx.recv().unwrap();
    let bridge = Bridge::new(config)
        .scheduler(waker.clone())
        .journal(journal)
        .start()
        .unwrap();
    ctx_tx.send(bridge.driver_context()).unwrap();

    let host = TestHost {
        quit,
        waker,
        paused,
        thread: Some(thread),
    };
    (bridge, host)
}

fn echo_registry() -> SkillRegistry {
    let mut registry = SkillRegistry::new();
    registry.register(
        FnSkill::new("echo", "Return the message", |args| {
            Ok(json!(args.str("message")?))
        })
        .param(ParamSpec::required("message", ParamType::String)),
    );
    registry
}

fn client(bridge: &BridgeHandle) -> SkillClient {
    SkillClient::new(&bridge.url())
}

async fn wait_for_depth(bridge: &BridgeHandle, depth: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.queue_depth() < depth {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue never reached expected depth");
}

#[tokio::test]
async fn health_and_manifest_answer_from_host() {
    let (bridge, _host) = spawn_host(config(), None, false, echo_registry);
    let client = client(&bridge);

    let health = client.health().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["serverRunning"], true);
    assert_eq!(health["skills"], 1);

    let manifest = client.skills().await.unwrap();
    assert_eq!(manifest["version"], "1.0.0");
    assert_eq!(manifest["baseUrl"], bridge.url());
    assert_eq!(manifest["skills"][0]["name"], "echo");
    assert_eq!(manifest["skills"][0]["endpoint"], "POST /skill/echo");
    assert_eq!(manifest["skills"][0]["parameters"][0]["type"], "string");
}

#[tokio::test]
async fn skill_invocation_succeeds_with_cors() {
    let (bridge, _host) = spawn_host(config(), None, false, echo_registry);

    let resp = reqwest::Client::new()
        .post(format!("{}SKILL/Echo", bridge.url()))
        .body(r#"{"Message": "hi"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.headers()["content-type"], "application/json");

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "success", "skill": "echo", "result": "hi"}));
}

#[tokio::test]
async fn preflight_gets_204_without_touching_queue() {
    // Paused: a queued preflight would never be answered.
    let (bridge, _host) = spawn_host(config(), None, true, echo_registry);

    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}skill/echo", bridge.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let headers = resp.headers();
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-allow-methods"], "GET, POST, OPTIONS");
    assert_eq!(headers["access-control-allow-headers"], "Content-Type");
    assert!(resp.text().await.unwrap().is_empty());
    assert_eq!(bridge.stats().received, 0);
}

#[tokio::test]
async fn errors_are_structured() {
    let (bridge, _host) = spawn_host(config(), None, false, echo_registry);
    let client = client(&bridge);

    let unknown = client.call("nope", &json!({})).await.unwrap();
    assert_eq!(unknown.status, 404);
    assert_eq!(unknown.body["type"], "OperationNotFound");
    assert_eq!(unknown.body["availableSkills"], json!(["echo"]));

    let missing = client.call("echo", &json!({})).await.unwrap();
    assert_eq!(missing.status, 400);
    assert_eq!(missing.body["parameter"], "message");

    let resp = reqwest::Client::new()
        .post(format!("{}skills", bridge.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "NotFound");
}

#[tokio::test]
async fn invocations_run_in_receipt_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let skill_log = Arc::clone(&log);
    let (bridge, host) = spawn_host(config(), None, true, move || {
        let mut registry = SkillRegistry::new();
        registry.register(
            FnSkill::new("record", "Append n to the log", move |args| {
                skill_log.lock().unwrap().push(args.i64("n")?);
                Ok(Value::Null)
            })
            .param(ParamSpec::required("n", ParamType::Integer)),
        );
        registry
    });
    let client = client(&bridge);

    let mut pending = Vec::new();
    for n in 0..8 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.call("record", &json!({"n": n})).await.unwrap()
        }));
        wait_for_depth(&bridge, n as usize + 1).await;
    }
    host.resume();

    for reply in futures::future::join_all(pending).await {
        assert_eq!(reply.unwrap().status, 200);
    }
    assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<i64>>());
}

#[tokio::test]
async fn concurrent_requests_execute_exactly_once() {
    let calls = Arc::new(AtomicU64::new(0));
    let skill_calls = Arc::clone(&calls);
    let (bridge, _host) = spawn_host(config(), None, false, move || {
        let mut registry = SkillRegistry::new();
        registry.register(FnSkill::new("count", "Count invocations", move |_| {
            Ok(json!(skill_calls.fetch_add(1, Ordering::SeqCst) + 1))
        }));
        registry
    });
    let client = client(&bridge);

    let replies = futures::future::join_all((0..25).map(|_| {
        let client = client.clone();
        async move { client.call("count", &json!({})).await.unwrap() }
    }))
    .await;

    let mut seen: Vec<u64> = replies
        .iter()
        .map(|r| r.body["result"].as_u64().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=25).collect::<Vec<u64>>());
    assert_eq!(calls.load(Ordering::SeqCst), 25);
    assert_eq!(bridge.stats().processed, 25);
}

#[tokio::test]
async fn rate_limit_refuses_excess_in_one_window() {
    let config = BridgeConfig {
        rate_limit: 3,
        ..config()
    };
    let (bridge, host) = spawn_host(config, None, true, echo_registry);
    let client = client(&bridge);

    let mut pending = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.call("echo", &json!({"message": i.to_string()})).await.unwrap()
        }));
        wait_for_depth(&bridge, i + 1).await;
    }
    // Not an invocation, so not limited.
    let health = client.clone();
    let health = tokio::spawn(async move { health.health().await.unwrap() });
    wait_for_depth(&bridge, 6).await;
    host.resume();

    let replies: Vec<_> = futures::future::join_all(pending)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    let statuses: Vec<u16> = replies.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![200, 200, 200, 429, 429]);
    assert_eq!(replies[3].body["type"], "RateLimited");
    assert_eq!(replies[3].body["limit"], 3);
    assert_eq!(health.await.unwrap()["status"], "ok");
    assert_eq!(bridge.stats().rate_limited, 2);
}

#[tokio::test]
async fn rate_limit_window_resets_after_a_second() {
    let config = BridgeConfig {
        rate_limit: 1,
        ..config()
    };
    let (bridge, _host) = spawn_host(config, None, false, echo_registry);
    let client = client(&bridge);
    let call = |message: &'static str| {
        let client = client.clone();
        async move { client.call("echo", &json!({"message": message})).await.unwrap() }
    };

    assert_eq!(call("first").await.status, 200);
    let refused = call("second").await;
    assert_eq!(refused.status, 429);
    assert_eq!(refused.body["type"], "RateLimited");

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let reply = call("third").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["result"], "third");
    assert_eq!(bridge.stats().rate_limited, 1);
}

#[tokio::test]
async fn timed_out_request_completes_late_and_is_journaled() {
    let journal: Arc<dyn Journal> = Arc::new(SqliteJournal::in_memory().unwrap());
    let config = BridgeConfig {
        wait_timeout: Duration::from_millis(200),
        ..config()
    };
    let ran = Arc::new(AtomicBool::new(false));
    let skill_ran = Arc::clone(&ran);
    let (bridge, host) = spawn_host(config, Some(Arc::clone(&journal)), true, move || {
        let mut registry = echo_registry();
        registry.register(FnSkill::new("touch", "Mark as run", move |_| {
            skill_ran.store(true, Ordering::SeqCst);
            Ok(json!("touched"))
        }));
        registry
    });
    let mut events = bridge.events().subscribe();
    let client = client(&bridge);

    let reply = client.call("touch", &json!({})).await.unwrap();
    assert_eq!(reply.status, 504);
    assert_eq!(reply.body["type"], "GatewayTimeout");
    assert!(!ran.load(Ordering::SeqCst));

    host.resume();
    let late = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Event::LateCompletion(late) = events.recv().await.unwrap() {
                return late;
            }
        }
    })
    .await
    .expect("no late completion event");
    assert_eq!(late.path, "/skill/touch");
    assert_eq!(late.status, 200);
    assert!(ran.load(Ordering::SeqCst));

    // The bridge keeps serving after a timeout.
    let reply = client.call("echo", &json!({"message": "still here"})).await.unwrap();
    assert_eq!(reply.status, 200);

    let entries = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let entries = journal.recent(10).await.unwrap();
            if !entries.is_empty() {
                return entries;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late completion never journaled");
    assert_eq!(entries[0].completion.path, "/skill/touch");
    assert!(entries[0].completion.body.contains("touched"));

    let stats = bridge.stats();
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.late, 1);
}

#[tokio::test]
async fn stop_answers_queued_requests_with_503() {
    let ran = Arc::new(AtomicU64::new(0));
    let skill_ran = Arc::clone(&ran);
    let (bridge, _host) = spawn_host(config(), None, true, move || {
        let mut registry = SkillRegistry::new();
        registry.register(FnSkill::new("work", "Never reached", move |_| {
            skill_ran.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }));
        registry
    });
    let mut events = bridge.events().subscribe();
    let client = client(&bridge);

    let mut pending = Vec::new();
    for i in 0..3 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.call("work", &json!({})).await.unwrap()
        }));
        wait_for_depth(&bridge, i + 1).await;
    }

    bridge.stop();
    for reply in futures::future::join_all(pending).await {
        let reply = reply.unwrap();
        assert_eq!(reply.status, 503);
        assert_eq!(reply.body["type"], "ServerStopped");
    }
    assert!(!bridge.is_running());
    assert_eq!(bridge.queue_depth(), 0);
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let stopped = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Event::Stopped { drained } = events.recv().await.unwrap() {
                return drained;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(stopped, 3);
}

#[tokio::test]
async fn full_queue_refuses_admission() {
    let config = BridgeConfig {
        max_queue_depth: 2,
        ..config()
    };
    let (bridge, host) = spawn_host(config, None, true, echo_registry);
    let client = client(&bridge);

    let mut pending = Vec::new();
    for i in 0..2 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.call("echo", &json!({"message": "queued"})).await.unwrap()
        }));
        wait_for_depth(&bridge, i + 1).await;
    }

    let refused = client.call("echo", &json!({"message": "late"})).await.unwrap();
    assert_eq!(refused.status, 429);
    assert_eq!(refused.body["type"], "QueueFull");

    host.resume();
    for reply in futures::future::join_all(pending).await {
        assert_eq!(reply.unwrap().status, 200);
    }
}

#[tokio::test]
async fn keep_alive_wakes_an_idle_host() {
    // The host idles for 30s between ticks; only the nudge can make this fast.
    let (bridge, _host) = spawn_host(config(), None, false, echo_registry);
    let client = client(&bridge);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        client.call("echo", &json!({"message": "wake"})),
    )
    .await
    .expect("host was not woken")
    .unwrap();
    assert_eq!(reply.body["result"], "wake");
}

#[tokio::test]
async fn oversized_body_is_refused_with_cors() {
    let config = BridgeConfig {
        max_body_bytes: 1024,
        ..config()
    };
    let (bridge, _host) = spawn_host(config, None, false, echo_registry);

    let message = "x".repeat(4096);
    let resp = reqwest::Client::new()
        .post(format!("{}skill/echo", bridge.url()))
        .body(json!({ "message": message }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["type"], "PayloadTooLarge");

    let stats = bridge.stats();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.processed, 0);

    // Bodies under the limit still go through.
    let reply = client(&bridge)
        .call("echo", &json!({"message": "small"}))
        .await
        .unwrap();
    assert_eq!(reply.status, 200);
}

#[tokio::test]
async fn invalid_utf8_body_is_a_binding_error() {
    let (bridge, _host) = spawn_host(config(), None, false, echo_registry);

    let resp = reqwest::Client::new()
        .post(format!("{}skill/echo", bridge.url()))
        .body(b"{\"message\": \"ab\xFFcd\"}".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "ArgumentBinding");
    assert_eq!(body["skill"], "echo");
    assert!(body["error"].as_str().unwrap().contains("UTF-8"));
    assert_eq!(bridge.stats().processed, 0);

    // Management routes ignore the body.
    let resp = reqwest::Client::new()
        .get(format!("{}health", bridge.url()))
        .body(vec![0xFF, 0xFE])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
