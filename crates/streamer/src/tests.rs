//! Tests for dispatch, the server loop and the client pump over mock transports.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde_json::Value;
use serde_json::json;

use crate::client;
use crate::client::ClientChannel;
use crate::codec::Request;
use crate::codec::Response;
use crate::config::ChannelConfig;
use crate::dispatch;
use crate::dispatch::DispatchTable;
use crate::dispatch::Handler;
use crate::dispatch::MethodSet;
use crate::mock_transport::BrokenTransport;
use crate::mock_transport::MessageTransport;
use crate::server;
use crate::server::ServerChannel;
use crate::transport::Transport;

// --- Helpers ---

struct Calculator {
    offset: i64,
}

impl Handler for Arc<Calculator> {
    fn methods(self) -> MethodSet {
        let add = self.clone();
        MethodSet::new("Math.Calculator")
            .method("Add", move |a: i64, b: i64| a + b + add.offset)
            .try_method("Divide", |a: i64, b: i64| {
                if b == 0 {
                    Err("Division by zero")
                } else {
                    Ok(a / b)
                }
            })
            .method("Nothing", || ())
            .method("Explode", |_: i64| -> i64 { panic!("kaboom") })
    }
}

fn calculator_table() -> Arc<DispatchTable> {
    let table = Arc::new(DispatchTable::new());
    table.bind(Arc::new(Calculator { offset: 0 })).unwrap();
    table
}

fn request(id: u64, method: &str, args: Vec<Value>) -> Request {
    Request::new(id, method, args)
}

fn client_over(transport: MessageTransport) -> Arc<ClientChannel> {
    Arc::new(ClientChannel::with_transport(
        Box::new(transport),
        ChannelConfig::new().with_peer_name("test-client"),
    ))
}

async fn read_requests(transport: &MessageTransport, count: usize) -> Vec<Request> {
    let mut requests = Vec::with_capacity(count);
    for _ in 0..count {
        let frame = transport.recv().await.unwrap().expect("client closed early");
        requests.push(Request::decode(&frame).unwrap());
    }
    requests
}

async fn reply(transport: &MessageTransport, response: Response) {
    transport.send(&response.encode().unwrap()).await.unwrap();
}

async fn wait_closed(channel: &ClientChannel) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !channel.is_closed() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("channel never closed");
}

// --- Dispatch ---

#[test]
fn test_dispatch_invokes_bound_method() {
    let table = calculator_table();
    let response = table.dispatch(request(1, "Math.Calculator.Add", vec![json!(2), json!(3)]));
    assert_eq!(response, Response::ok(1, Some(json!(5))));
}

#[test]
fn test_dispatch_is_case_insensitive() {
    let table = calculator_table();
    let response = table.dispatch(request(2, "math.calculator.add", vec![json!(1), json!(1)]));
    assert_eq!(response.result, Some(json!(2)));
    assert!(table.contains("MATH.CALCULATOR.ADD"));
}

#[test]
fn test_void_method_has_no_result() {
    let table = calculator_table();
    let response = table.dispatch(request(3, "Math.Calculator.Nothing", vec![]));
    assert_eq!(response.result, None);
    assert_eq!(response.error, None);
}

#[test]
fn test_unknown_method() {
    let table = calculator_table();
    let response = table.dispatch(request(4, "Math.Calculator.Sqrt", vec![json!(4)]));
    assert_eq!(response.id, 4);
    assert_eq!(response.error.as_deref(), Some("Unknown method 'Math.Calculator.Sqrt'"));
}

#[test]
fn test_missing_method_name() {
    let table = calculator_table();
    let response = table.dispatch(Request {
        id: 5,
        method: None,
        args: vec![],
    });
    assert_eq!(response.error.as_deref(), Some("Unknown method ''"));
}

#[test]
fn test_handler_error_becomes_message() {
    let table = calculator_table();
    let response = table.dispatch(request(6, "Math.Calculator.Divide", vec![json!(1), json!(0)]));
    assert_eq!(response.error.as_deref(), Some("Division by zero"));
    assert_eq!(response.result, None);
}

#[test]
fn test_handler_panic_becomes_message() {
    let table = calculator_table();
    let response = table.dispatch(request(7, "Math.Calculator.Explode", vec![json!(1)]));
    assert_eq!(response.error.as_deref(), Some("kaboom"));

    // the table is still usable afterwards
    let response = table.dispatch(request(8, "Math.Calculator.Add", vec![json!(1), json!(2)]));
    assert_eq!(response.result, Some(json!(3)));
}

#[test]
fn test_argument_count_mismatch() {
    let table = calculator_table();
    let response = table.dispatch(request(9, "Math.Calculator.Add", vec![json!(1)]));
    assert_eq!(response.error.as_deref(), Some("Expected 2 argument(s), got 1"));
}

#[test]
fn test_argument_shape_mismatch() {
    let table = calculator_table();
    let response = table.dispatch(request(10, "Math.Calculator.Add", vec![json!("one"), json!(2)]));
    let error = response.error.unwrap();
    assert!(error.starts_with("Argument 0 could not be converted"), "{}", error);
}

#[test]
fn test_duplicate_methods_reject_whole_bind() {
    let table = Arc::new(DispatchTable::new());
    let methods = MethodSet::new("Sample.Dup")
        .method("Run", || 1)
        .method("run", || 2);

    let err = table.bind(methods).err().unwrap();
    assert_eq!(err, dispatch::Error::DuplicateMethod("Sample.Dup.run".into()));
    assert!(err.to_string().starts_with("Duplicate definitions of Sample.Dup.run"));
    assert!(table.is_empty());

    // a failed bind leaves the table free for a valid handler
    table.bind(MethodSet::new("Sample.Ok").method("Run", || 1)).unwrap();
    assert_eq!(table.len(), 1);
}

#[test]
fn test_second_bind_is_rejected() {
    let table = calculator_table();
    let before = table.len();

    let err = table
        .bind(MethodSet::new("Sample.Other").method("Run", || 1))
        .err()
        .unwrap();
    assert_eq!(err, dispatch::Error::AlreadyBound);
    assert_eq!(err.to_string(), "Can't bind to different objects");
    assert_eq!(table.len(), before);
    assert!(!table.contains("Sample.Other.Run"));
}

#[test]
fn test_unbind_removes_methods() {
    let table = Arc::new(DispatchTable::new());
    let binding = table.bind(Arc::new(Calculator { offset: 10 })).unwrap();

    let response = table.dispatch(request(1, "Math.Calculator.Add", vec![json!(1), json!(2)]));
    assert_eq!(response.result, Some(json!(13)));

    binding.unbind();
    binding.unbind();
    assert!(table.is_empty());

    let response = table.dispatch(request(2, "Math.Calculator.Add", vec![json!(1), json!(2)]));
    assert_eq!(response.error.as_deref(), Some("Unknown method 'Math.Calculator.Add'"));
}

#[test]
fn test_method_set_lists_qualified_names() {
    let methods = Arc::new(Calculator { offset: 0 }).methods();
    assert_eq!(methods.full_name(), "Math.Calculator");
    assert_eq!(methods.qualified_names(), vec![
        "Math.Calculator.Add",
        "Math.Calculator.Divide",
        "Math.Calculator.Nothing",
        "Math.Calculator.Explode",
    ]);
}

#[test]
fn test_dropping_binding_keeps_methods() {
    let table = Arc::new(DispatchTable::new());
    drop(table.bind(Arc::new(Calculator { offset: 0 })).unwrap());
    assert!(table.contains("Math.Calculator.Add"));
}

// --- Server loop ---

#[tokio::test]
async fn test_server_answers_each_request() {
    let (server_end, client_end) = MessageTransport::pair();
    let server = ServerChannel::with_transport(Box::new(server_end), ChannelConfig::default());
    server.bind(Arc::new(Calculator { offset: 0 })).unwrap();
    let task = server.spawn();

    for (id, method) in [(1, "Math.Calculator.Add"), (2, "Math.Calculator.Missing")] {
        let payload = request(id, method, vec![json!(20), json!(22)]).encode().unwrap();
        client_end.send(&payload).await.unwrap();
    }

    let first = Response::decode(&client_end.recv().await.unwrap().unwrap()).unwrap();
    let second = Response::decode(&client_end.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(first, Response::ok(1, Some(json!(42))));
    assert_eq!(second.id, 2);
    assert!(second.error.unwrap().starts_with("Unknown method"));

    drop(client_end);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_before_bind_answers_unknown() {
    let (server_end, client_end) = MessageTransport::pair();
    let task = ServerChannel::with_transport(Box::new(server_end), ChannelConfig::default()).spawn();

    client_end
        .send(&request(1, "Math.Calculator.Add", vec![]).encode().unwrap())
        .await
        .unwrap();
    let response = Response::decode(&client_end.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(response.error.as_deref(), Some("Unknown method 'Math.Calculator.Add'"));

    drop(client_end);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_handles_requests_one_at_a_time() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let steps = {
        let log = log.clone();
        MethodSet::new("Sample.Sequence").method("Step", move |n: i64| {
            log.lock().unwrap().push(format!("enter {}", n));
            std::thread::sleep(Duration::from_millis(20));
            log.lock().unwrap().push(format!("exit {}", n));
            n
        })
    };

    let (server_end, client_end) = MessageTransport::pair();
    let server = ServerChannel::with_transport(Box::new(server_end), ChannelConfig::default());
    server.bind(steps).unwrap();
    let task = server.spawn();

    for id in [1, 2] {
        let payload = request(id, "Sample.Sequence.Step", vec![json!(id)]).encode().unwrap();
        client_end.send(&payload).await.unwrap();
    }

    let first = Response::decode(&client_end.recv().await.unwrap().unwrap()).unwrap();
    let second = Response::decode(&client_end.recv().await.unwrap().unwrap()).unwrap();
    assert_eq!(first, Response::ok(1, Some(json!(1))));
    assert_eq!(second, Response::ok(2, Some(json!(2))));
    assert_eq!(*log.lock().unwrap(), vec!["enter 1", "exit 1", "enter 2", "exit 2"]);

    drop(client_end);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_oversized_result_is_answered_with_error() {
    let (server_end, client_end) = MessageTransport::pair_with_limit(256);
    let server = ServerChannel::with_transport(
        Box::new(server_end),
        ChannelConfig::new().with_peer_name("test-server"),
    );
    assert_eq!(server.peer_name(), "test-server");
    server
        .bind(MethodSet::new("Sample.Blob").method("Big", |n: usize| "x".repeat(n)))
        .unwrap();
    let task = server.spawn();

    let channel = client_over(client_end);
    assert_eq!(channel.peer_name(), "test-client");

    match channel.invoke_as::<String, _>("Sample.Blob.Big", (1000usize,)).await {
        Err(client::Error::Remote(message)) => {
            assert!(message.starts_with("Result could not be sent"), "{}", message)
        }
        other => panic!("expected remote error, got {:?}", other),
    }

    // the connection keeps serving
    let small: String = channel.invoke_as("Sample.Blob.Big", (3usize,)).await.unwrap();
    assert_eq!(small, "xxx");
    assert!(!channel.is_closed());
    assert!(!task.is_finished());
}

#[tokio::test]
async fn test_server_stops_on_malformed_request() {
    let (server_end, client_end) = MessageTransport::pair();
    let task = ServerChannel::with_transport(Box::new(server_end), ChannelConfig::default()).spawn();

    client_end.send(b"not json").await.unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, server::Error::Codec(_)), "got {:?}", err);
}

// --- Client pump ---

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    const CALLS: usize = 16;

    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let mut calls = Vec::new();
    for n in 0..CALLS as i64 {
        let channel = channel.clone();
        calls.push(tokio::spawn(async move {
            let doubled: i64 = channel.invoke_as("Math.Doubler.Double", (n,)).await.unwrap();
            (n, doubled)
        }));
    }

    let mut requests = read_requests(&server_end, CALLS).await;
    requests.shuffle(&mut rand::thread_rng());
    for req in requests {
        let n = req.args[0].as_i64().unwrap();
        reply(&server_end, Response::ok(req.id, Some(json!(n * 2)))).await;
    }

    for call in calls {
        let (n, doubled) = call.await.unwrap();
        assert_eq!(doubled, n * 2);
    }
    assert_eq!(channel.pending_calls(), 0);
}

#[tokio::test]
async fn test_ids_are_unique_and_increasing() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let first = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke("A.B.C", ()).await })
    };
    let req = read_requests(&server_end, 1).await.remove(0);
    assert_eq!(req.id, 1);
    assert_eq!(req.method_name(), "A.B.C");
    assert!(req.args.is_empty());
    reply(&server_end, Response::ok(req.id, None)).await;
    assert_eq!(first.await.unwrap().unwrap(), None);

    let second = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke("A.B.C", ()).await })
    };
    let req = read_requests(&server_end, 1).await.remove(0);
    assert_eq!(req.id, 2);
    reply(&server_end, Response::ok(req.id, None)).await;
    second.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_remote_error_fails_only_that_call() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let call = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke_as::<i64, _>("A.B.Fail", ()).await })
    };
    let req = read_requests(&server_end, 1).await.remove(0);
    reply(&server_end, Response::err(req.id, "nope")).await;

    match call.await.unwrap() {
        Err(client::Error::Remote(message)) => assert_eq!(message, "nope"),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert!(!channel.is_closed());
}

#[tokio::test]
async fn test_result_of_wrong_shape_is_decode_error() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let call = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke_as::<i64, _>("A.B.C", ()).await })
    };
    let req = read_requests(&server_end, 1).await.remove(0);
    reply(&server_end, Response::ok(req.id, Some(json!("not a number")))).await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, client::Error::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_unknown_response_id_is_discarded() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let call = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke_as::<String, _>("A.B.C", ()).await })
    };
    let req = read_requests(&server_end, 1).await.remove(0);

    reply(&server_end, Response::ok(999, Some(json!("stray")))).await;
    reply(&server_end, Response::ok(req.id, Some(json!("mine")))).await;

    assert_eq!(call.await.unwrap().unwrap(), "mine");
    assert!(!channel.is_closed());
}

#[tokio::test]
async fn test_stream_end_fails_every_pending_call() {
    const CALLS: usize = 5;

    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let mut calls = Vec::new();
    for _ in 0..CALLS {
        let channel = channel.clone();
        calls.push(tokio::spawn(async move { channel.invoke("A.B.Slow", ()).await }));
    }

    read_requests(&server_end, CALLS).await;
    drop(server_end);

    for call in calls {
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, client::Error::ChannelClosed(_)), "got {:?}", err);
    }
    assert!(channel.is_closed());
    assert_eq!(channel.pending_calls(), 0);
}

#[tokio::test]
async fn test_call_after_close_fails_immediately() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    drop(server_end);
    wait_closed(&channel).await;

    let err = tokio::time::timeout(Duration::from_secs(5), channel.invoke("A.B.C", ()))
        .await
        .expect("call hung on a closed channel")
        .unwrap_err();
    assert!(matches!(err, client::Error::ChannelClosed(_)), "got {:?}", err);
    assert_eq!(channel.pending_calls(), 0);
}

#[tokio::test]
async fn test_transport_error_closes_channel() {
    let channel = ClientChannel::with_transport(Box::new(BrokenTransport), ChannelConfig::default());
    wait_closed(&channel).await;

    let err = channel.invoke("A.B.C", ()).await.unwrap_err();
    assert!(matches!(err, client::Error::ChannelClosed(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_malformed_response_closes_channel() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    let call = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke("A.B.C", ()).await })
    };
    read_requests(&server_end, 1).await;
    server_end.send(b"{\"R\": 1}").await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, client::Error::ChannelClosed(_)), "got {:?}", err);
    assert!(channel.is_closed());
}

#[tokio::test]
async fn test_cancelled_calls_release_pending_entries() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = client_over(client_end);

    for _ in 0..100 {
        let outcome = tokio::time::timeout(Duration::from_millis(1), channel.invoke("A.B.Never", ())).await;
        assert!(outcome.is_err());
    }
    assert_eq!(channel.pending_calls(), 0);
    assert!(!channel.is_closed());

    // abandoned requests may still arrive, but each one is a whole frame
    let call = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.invoke_as::<i64, _>("A.B.After", ()).await })
    };
    let req = loop {
        let req = read_requests(&server_end, 1).await.remove(0);
        if req.method_name() == "A.B.After" {
            break req;
        }
        assert_eq!(req.method_name(), "A.B.Never");
    };
    reply(&server_end, Response::ok(req.id, Some(json!(7)))).await;
    assert_eq!(call.await.unwrap().unwrap(), 7);
    assert_eq!(channel.pending_calls(), 0);
}

#[tokio::test]
async fn test_call_timeout_releases_pending_entry() {
    let (client_end, server_end) = MessageTransport::pair();
    let channel = ClientChannel::with_transport(
        Box::new(client_end),
        ChannelConfig::new().with_call_timeout(Duration::from_millis(50)),
    );

    let err = channel.invoke("A.B.Never", ()).await.unwrap_err();
    assert!(matches!(err, client::Error::Timeout), "got {:?}", err);
    assert_eq!(channel.pending_calls(), 0);

    // a late answer is discarded without closing the channel
    let req = read_requests(&server_end, 1).await.remove(0);
    reply(&server_end, Response::ok(req.id, Some(json!(1)))).await;
    tokio::task::yield_now().await;
    assert!(!channel.is_closed());
}
