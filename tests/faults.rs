//! Failure-path behavior: in-band producer errors, truncated and malformed
//! streams, guards, and cancellation on both sides.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, SinkExt, StreamExt};
use tson::{
    nonce, Config, DecodeError, EncodeError, Fault, NoopObserver, ProducerId, Promise,
    StreamObserver, Tson, Value, ValueStream,
};

#[derive(Default)]
struct CountingObserver {
    interrupted: AtomicUsize,
    producer_faults: AtomicUsize,
}

#[async_trait]
impl StreamObserver for CountingObserver {
    async fn on_producer_fault(&self, _id: ProducerId, _error: &EncodeError) {
        self.producer_faults.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_interrupted(&self, _error: &DecodeError) {
        self.interrupted.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_fixture() -> Tson<CountingObserver> {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    Tson::new(cfg, CountingObserver::default())
}

fn plain_fixture() -> Tson {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    Tson::new(cfg, NoopObserver)
}

fn chunk_source(chunks: &[&str]) -> impl futures::Stream<Item = String> + Send + 'static {
    stream::iter(chunks.iter().map(|c| c.to_string()).collect::<Vec<_>>())
}

#[tokio::test]
async fn producer_error_is_in_band_and_spares_siblings() {
    let tson = counting_fixture();

    let items = ValueStream::from_stream(stream::iter(vec![
        Ok(Value::from("item: 0")),
        Ok(Value::from("item: 1")),
        Ok(Value::from("item: 2")),
        Err(Fault::named("CrashError", "worker exploded")),
    ]));
    let root = Value::object([
        ("items", Value::Stream(items)),
        ("answer", Value::Promise(Promise::resolved(Value::from(42i64)))),
    ]);

    let mut parsed = tson.parse(tson.stringify(root).unwrap()).await.unwrap();

    let Some(Value::Stream(mut items)) = parsed.take("items") else {
        panic!("expected a stream under 'items'");
    };
    for i in 0..3 {
        let got = items.next().await.unwrap().unwrap();
        assert_eq!(got.as_str(), Some(format!("item: {i}").as_str()));
    }
    assert_eq!(
        items.next().await.unwrap().unwrap_err(),
        Fault::named("CrashError", "worker exploded")
    );
    assert!(items.next().await.is_none());

    let Some(Value::Promise(answer)) = parsed.take("answer") else {
        panic!("expected a promise under 'answer'");
    };
    assert_eq!(answer.value().await.unwrap().as_i64(), Some(42));

    // An in-band producer error is the producer's own business: the
    // observer hears nothing.
    assert_eq!(tson.obs.producer_faults.load(Ordering::SeqCst), 0);
    assert_eq!(tson.obs.interrupted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn truncated_stream_interrupts_every_handle_once() {
    let tson = counting_fixture();
    let head = "[\n{\"json\":{\"s\":[\"Stream\",0,\"__tson\"],\"p\":[\"Promise\",1,\"__tson\"]},\"nonce\":\"__tson\"}\n,\n[\n";
    let rows = "[0,[0,\"a\"]]\n,\n[0,[0,\"b\"]]";

    let mut parsed = tson.parse(chunk_source(&[head, rows])).await.unwrap();

    let Some(Value::Stream(mut s)) = parsed.take("s") else {
        panic!("expected a stream under 's'");
    };
    assert_eq!(s.next().await.unwrap().unwrap().as_str(), Some("a"));
    assert_eq!(s.next().await.unwrap().unwrap().as_str(), Some("b"));
    let fault = s.next().await.unwrap().unwrap_err();
    assert_eq!(fault, Fault::Interrupted);
    assert_eq!(fault.to_string(), "Stream ended unexpectedly");
    assert!(s.next().await.is_none());

    let Some(Value::Promise(p)) = parsed.take("p") else {
        panic!("expected a promise under 'p'");
    };
    assert_eq!(p.value().await.unwrap_err(), Fault::Interrupted);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tson.obs.interrupted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn row_for_an_unknown_id_tears_the_session_down() {
    let tson = counting_fixture();
    let head = "[\n{\"json\":{\"p\":[\"Promise\",0,\"__tson\"]},\"nonce\":\"__tson\"}\n,\n[\n";
    let bogus_row = "[5,[0,1]]\n]\n]";

    let mut parsed = tson.parse(chunk_source(&[head, bogus_row])).await.unwrap();

    let Some(Value::Promise(p)) = parsed.take("p") else {
        panic!("expected a promise under 'p'");
    };
    assert!(matches!(p.value().await.unwrap_err(), Fault::Protocol(_)));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tson.obs.interrupted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn root_guard_failure_aborts_before_any_bytes() {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    cfg.guards = vec![Arc::new(|v: &Value| v.as_str() != Some("7"))];
    let tson = Tson::new(cfg, NoopObserver);

    let err = tson.stringify(Value::BigInt(7)).unwrap_err();
    assert!(matches!(err, EncodeError::GuardRejected { key } if key == "bigint"));
}

#[tokio::test]
async fn event_fold_fault_terminates_one_producer_and_reports_it() {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    cfg.guards = vec![Arc::new(|v: &Value| v.as_str() != Some("7"))];
    let tson = Tson::new(cfg, CountingObserver::default());

    let root = Value::object([
        ("poisoned", Value::Stream(ValueStream::from_values([Value::BigInt(7)]))),
        ("answer", Value::Promise(Promise::resolved(Value::from(42i64)))),
    ]);

    let mut parsed = tson.parse(tson.stringify(root).unwrap()).await.unwrap();

    let Some(Value::Stream(mut poisoned)) = parsed.take("poisoned") else {
        panic!("expected a stream under 'poisoned'");
    };
    let fault = poisoned.next().await.unwrap().unwrap_err();
    assert!(
        matches!(&fault, Fault::User { name, .. } if name == "EncodeError"),
        "unexpected fault: {fault:?}"
    );

    let Some(Value::Promise(answer)) = parsed.take("answer") else {
        panic!("expected a promise under 'answer'");
    };
    assert_eq!(answer.value().await.unwrap().as_i64(), Some(42));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(tson.obs.producer_faults.load(Ordering::SeqCst), 1);
    assert_eq!(tson.obs.interrupted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn consumer_guard_faults_only_the_offending_handle() {
    let producer = plain_fixture();
    let root = Value::object([
        ("bad", Value::Promise(Promise::resolved(Value::BigInt(7)))),
        ("good", Value::Promise(Promise::resolved(Value::from(42i64)))),
    ]);
    let text = producer.stringify(root).unwrap().concat().await;

    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    cfg.guards = vec![Arc::new(|v: &Value| v.as_bigint() != Some(7))];
    let consumer = Tson::new(cfg, NoopObserver);

    let mut parsed = consumer.parse(chunk_source(&[&text])).await.unwrap();

    let Some(Value::Promise(bad)) = parsed.take("bad") else {
        panic!("expected a promise under 'bad'");
    };
    assert!(
        matches!(bad.value().await.unwrap_err(), Fault::User { name, .. } if name == "GuardRejected")
    );

    let Some(Value::Promise(good)) = parsed.take("good") else {
        panic!("expected a promise under 'good'");
    };
    assert_eq!(good.value().await.unwrap().as_i64(), Some(42));
}

#[tokio::test]
async fn consumer_guard_in_the_head_fails_parse() {
    let producer = plain_fixture();
    let text = producer
        .stringify(Value::object([("n", Value::BigInt(7))]))
        .unwrap()
        .concat()
        .await;

    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    cfg.guards = vec![Arc::new(|v: &Value| v.as_bigint() != Some(7))];
    let consumer = Tson::new(cfg, NoopObserver);

    let err = consumer.parse(chunk_source(&[&text])).await.unwrap_err();
    assert!(matches!(err, DecodeError::GuardRejected { .. }));
}

#[tokio::test]
async fn cancelling_the_consumer_interrupts_pending_handles() {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    let cancel = cfg.cancel.clone();
    let tson = Tson::new(cfg, NoopObserver);

    let (mut tx, rx) = futures::channel::mpsc::unbounded::<String>();
    tx.send("[\n{\"json\":{\"p\":[\"Promise\",0,\"__tson\"]},\"nonce\":\"__tson\"}\n,\n[\n".into())
        .await
        .unwrap();

    let mut parsed = tson.parse(rx).await.unwrap();
    let Some(Value::Promise(p)) = parsed.take("p") else {
        panic!("expected a promise under 'p'");
    };

    cancel.cancel();
    assert_eq!(p.value().await.unwrap_err(), Fault::Interrupted);
}

#[tokio::test]
async fn cancelling_the_producer_leaves_the_frame_unterminated() {
    let mut cfg = Config::default();
    cfg.nonce = nonce::fixed("__tson");
    let cancel = cfg.cancel.clone();
    let producer = Tson::new(cfg, NoopObserver);

    // A promise that never settles keeps the drain loop waiting.
    let (never, _slot) = Promise::pending();
    let mut chunks = producer
        .stringify(Value::object([("p", Value::Promise(never))]))
        .unwrap();

    let mut text = String::new();
    text.push_str(&chunks.next().await.unwrap());
    cancel.cancel();
    while let Some(chunk) = chunks.next().await {
        text.push_str(&chunk);
    }
    assert!(
        !text.trim_end().ends_with(']'),
        "frame should be left open, got: {text}"
    );

    // A fresh consumer observes the truncation as an interruption.
    let consumer = counting_fixture();
    let mut parsed = consumer.parse(chunk_source(&[&text])).await.unwrap();
    let Some(Value::Promise(p)) = parsed.take("p") else {
        panic!("expected a promise under 'p'");
    };
    assert_eq!(p.value().await.unwrap_err(), Fault::Interrupted);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(consumer.obs.interrupted.load(Ordering::SeqCst), 1);
}
