mod common;

use common::{Recorder, Reply, StubTransport};
use micro_request::builder::QUICK_TEST_TIMEOUT;
use micro_request::task::TaskState;
use micro_request::{Agent, Request, RequestError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn agent(recorder: &Arc<Recorder>, reply: Reply) -> Arc<Agent> {
    Agent::builder().transport(StubTransport::factory(recorder, reply)).build()
}

#[tokio::test]
async fn concurrent_views_send_once() {
    let recorder = Arc::new(Recorder::default());
    let agent = Agent::builder()
        .transport(StubTransport::factory_with_delay(
            &recorder,
            Reply::with_headers(200, &[("Content-Type", "text/html; charset=utf-8")], b"<title>hi</title>"),
            Duration::from_millis(20),
        ))
        .build();
    let request = Arc::new(Request::get("http://example.com/").with_agent(&agent));

    let mut handles = Vec::new();
    for i in 0..12 {
        let request = Arc::clone(&request);
        handles.push(tokio::spawn(async move {
            match i % 4 {
                0 => request.bytes().await.map(|b| b.len()),
                1 => request.text().await.map(|t| t.len()),
                2 => request.html().await.map(|d| d.title().map_or(0, |t| t.len())),
                _ => request.send().await.map(|_| 0),
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(recorder.round_trips(), 1);
    assert_eq!(request.state(), TaskState::Fulfilled);
    assert_eq!(request.html().await.unwrap().title().as_deref(), Some("hi"));
    assert_eq!(agent.outstanding(), 0);
}

#[tokio::test]
async fn quick_test_failure_does_not_leak() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::Fail);

    let mut request = Request::default().with_agent(&agent);
    request.url = "http://example.com/".into();
    request.quick_test = true;

    let result = request.text().await;
    assert!(matches!(result, Err(RequestError::Transport { .. })), "{result:?}");
    assert_eq!(recorder.round_trips(), 1);
    assert_eq!(agent.transports().outstanding(), 0);
    assert_eq!(agent.clients().outstanding(), 0);

    let configs = recorder.configs.lock();
    assert_eq!(configs[0].connect_timeout, QUICK_TEST_TIMEOUT);
    assert_eq!(configs[0].read_timeout, QUICK_TEST_TIMEOUT);
    assert_eq!(recorder.requests.lock()[0].0, "GET");
}

#[tokio::test]
async fn cancel_before_start_sends_nothing() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::ok(b"unused"));

    let request = Request::get("http://example.com/").with_agent(&agent);
    assert!(request.cancel());
    assert!(!request.cancel());

    assert!(matches!(request.json().await, Err(RequestError::Cancelled)));
    assert_eq!(recorder.round_trips(), 0);
    assert_eq!(agent.outstanding(), 0);
}

#[tokio::test]
async fn cancel_in_flight_stops_the_exchange() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::Hang);
    let request = Arc::new(Request::get("http://example.com/").with_agent(&agent));

    let waiter = {
        let request = Arc::clone(&request);
        tokio::spawn(async move { request.bytes().await })
    };
    while recorder.round_trips() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(!request.cancel());
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(RequestError::Cancelled)));
    assert!(result.is_err_and(|e| e.is_cancellation()));
    assert!(request.is_cancelled());
    assert_eq!(agent.outstanding(), 0);
}

#[tokio::test(start_paused = true)]
async fn total_timeout_expires() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::Hang);
    let mut request = Request::get("http://example.com/").with_agent(&agent);
    request.timeout = Some(Duration::from_secs(3));

    let result = request.send().await;
    assert!(matches!(result, Err(RequestError::TimedOut)), "{result:?}");
    assert!(result.is_err_and(|e| e.is_cancellation()));
    assert!(!request.is_cancelled());
    assert_eq!(agent.outstanding(), 0);
}

#[tokio::test]
async fn outcome_is_recorded() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(
        &recorder,
        Reply::with_headers(201, &[("Content-Type", "application/json"), ("X-Id", "a"), ("x-id", "b")], br#"{"id": 7}"#),
    );
    let mut request = Request::post("http://example.com/items").with_agent(&agent);
    request.text = "{}".into();

    #[derive(serde::Deserialize)]
    struct Created {
        id: u32,
    }
    let created: Created = request.json_into().await.unwrap();
    assert_eq!(created.id, 7);

    assert_eq!(request.status_code(), Some(201));
    assert_eq!(request.status_message(), Some("201 Created"));
    assert_eq!(request.header("X-ID"), Some("a"));
    assert_eq!(request.response_header_list().len(), 3);
    assert_eq!(request.response_header_map().len(), 2);
    assert_eq!(request.response_binary().map(|b| b.len()), Some(9));

    let sent = recorder.requests.lock();
    assert_eq!(sent[0].0, "POST");
    assert_eq!(sent[0].2[0], ("content-type".to_owned(), "text/plain;charset=utf-8".to_owned()));
}

#[tokio::test]
async fn empty_body_is_an_empty_buffer() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::Respond { status: 204, headers: Vec::new(), body: Vec::new() });
    let request = Request::get("http://example.com/").with_agent(&agent);

    assert!(request.bytes().await.unwrap().is_empty());
    assert_eq!(request.response_binary().map(|b| b.len()), Some(0));
}

#[tokio::test]
async fn clones_send_separately() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::ok(b"x"));
    let request = Request::get("http://example.com/").with_agent(&agent);
    let copy = request.clone();

    request.send().await.unwrap();
    copy.send().await.unwrap();
    request.send().await.unwrap();
    assert_eq!(recorder.round_trips(), 2);
}

#[tokio::test]
async fn unbounded_phase_timeout_is_accepted() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::ok(b"ok"));
    let mut request = Request::get("http://example.com/").with_agent(&agent);
    request.connect_timeout = Some(Duration::MAX);

    request.send().await.unwrap();
    assert_eq!(recorder.configs.lock()[0].connect_timeout, Duration::MAX);
    assert!(!request.is_cancelled());
}

#[tokio::test]
async fn file_body_is_announced_before_custom_headers() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"0123456789").unwrap();

    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::ok(b""));
    let mut request = Request::post("http://example.com/upload").with_agent(&agent);
    request.file = Some(file.path().to_path_buf());
    request.headers.push(("X-A".into(), "1".into()));
    request.send().await.unwrap();

    let sent = recorder.requests.lock();
    let headers: Vec<(&str, &str)> = sent[0].2.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
    assert_eq!(headers, vec![("content-type", "application/octet-stream"), ("content-length", "10"), ("X-A", "1")]);
}

#[tokio::test]
async fn invalid_header_fails_before_sending() {
    let recorder = Arc::new(Recorder::default());
    let agent = agent(&recorder, Reply::ok(b""));
    let mut request = Request::get("http://example.com/").with_agent(&agent);
    request.headers.push(("Bad Name".into(), "1".into()));

    assert!(matches!(request.text().await, Err(RequestError::InvalidHeader { .. })));
    assert_eq!(recorder.round_trips(), 0);
    assert_eq!(agent.outstanding(), 0);
}
