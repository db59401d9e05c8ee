mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use common::{TestRoot, launch, wait_until};
use tether_host::{Emitter, FunctionTable, ScriptArg, ScriptValue, ValueCell};
use tether_runtime::Listener;

fn emitter_functions() -> FunctionTable {
    let mut table = FunctionTable::new();
    table.define("newEmitter", |_root, _args| async move {
        Ok(ScriptValue::Object(Arc::new(Emitter::new())))
    });
    table.define("fire", |context, args| async move {
        let emitter = context
            .downcast_arc::<Emitter>()
            .ok()
            .ok_or_else(|| tether_host::Error::execution("context is not an emitter"))?;
        let event = args.first().and_then(ScriptArg::as_value).cloned().unwrap_or(Value::Null);
        emitter.fire(event);
        Ok(ScriptValue::Data(Value::Null))
    });
    table.define("newList", |_root, _args| async move {
        Ok(ScriptValue::Object(Arc::new(ValueCell::new(json!([])))))
    });
    table
}

fn recording_listener(log: &Arc<Mutex<Vec<Value>>>) -> Listener {
    let log = Arc::clone(log);
    Arc::new(move |event: &Value| log.lock().push(event.clone()))
}

fn tagging_listener(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
    let log = Arc::clone(log);
    Arc::new(move |_: &Value| log.lock().push(tag.to_string()))
}

#[tokio::test]
async fn emitter_handles_are_statically_tagged() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let emitter = root.evaluate_handle("newEmitter", ()).await.unwrap();
    assert!(emitter.emitter().is_some());

    let list = root.evaluate_handle("newList", ()).await.unwrap();
    assert!(list.emitter().is_none());
}

#[tokio::test]
async fn listeners_receive_remote_events() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let handle = root.evaluate_handle("newEmitter", ()).await.unwrap();
    let emitter = handle.emitter().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    emitter.add_listener(recording_listener(&log)).await.unwrap();

    emitter.evaluate("fire", json!("hello")).await.unwrap();

    wait_until(|| log.lock().len() == 1).await;
    assert_eq!(*log.lock(), vec![json!("hello")]);
}

#[tokio::test]
async fn every_listener_fires_once_in_registration_order() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let handle = root.evaluate_handle("newEmitter", ()).await.unwrap();
    let emitter = handle.emitter().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    emitter.add_listener(tagging_listener(&log, "hello")).await.unwrap();
    emitter.add_listener(tagging_listener(&log, "bye")).await.unwrap();

    emitter.evaluate("fire", ()).await.unwrap();

    wait_until(|| log.lock().len() == 2).await;
    assert_eq!(*log.lock(), vec!["hello", "bye"]);
}

#[tokio::test]
async fn removing_one_listener_leaves_the_rest_intact() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let handle = root.evaluate_handle("newEmitter", ()).await.unwrap();
    let emitter = handle.emitter().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let hello = tagging_listener(&log, "hello");
    let bye = tagging_listener(&log, "bye");
    emitter.add_listener(hello.clone()).await.unwrap();
    emitter.add_listener(bye.clone()).await.unwrap();

    emitter.evaluate("fire", ()).await.unwrap();
    wait_until(|| log.lock().len() == 2).await;

    emitter.remove_listener(&bye).await.unwrap();
    emitter.evaluate("fire", ()).await.unwrap();

    wait_until(|| log.lock().len() == 3).await;
    assert_eq!(*log.lock(), vec!["hello", "bye", "hello"]);
}

#[tokio::test]
async fn duplicate_registrations_fire_once_each() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let handle = root.evaluate_handle("newEmitter", ()).await.unwrap();
    let emitter = handle.emitter().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let listener = recording_listener(&log);
    emitter.add_listener(listener.clone()).await.unwrap();
    emitter.add_listener(listener.clone()).await.unwrap();

    emitter.evaluate("fire", json!(1)).await.unwrap();
    wait_until(|| log.lock().len() == 2).await;

    // Removing drops only the first occurrence; one registration stays live.
    emitter.remove_listener(&listener).await.unwrap();
    emitter.evaluate("fire", json!(2)).await.unwrap();

    wait_until(|| log.lock().len() == 3).await;
    assert_eq!(*log.lock(), vec![json!(1), json!(1), json!(2)]);
}

#[tokio::test]
async fn events_fired_before_anyone_listens_are_dropped() {
    let evaluator = launch(Arc::new(TestRoot), emitter_functions());
    let root = evaluator.root_handle();

    let handle = root.evaluate_handle("newEmitter", ()).await.unwrap();
    let emitter = handle.emitter().unwrap();

    emitter.evaluate("fire", json!("lost")).await.unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    emitter.add_listener(recording_listener(&log)).await.unwrap();
    emitter.evaluate("fire", json!("heard")).await.unwrap();

    wait_until(|| log.lock().len() == 1).await;
    assert_eq!(*log.lock(), vec![json!("heard")]);
}

#[tokio::test]
async fn listeners_stop_after_their_handle_is_released() {
    let mut table = emitter_functions();
    let shared = Arc::new(Emitter::new());
    table.define("sharedEmitter", move |_root, _args| {
        let emitter = Arc::clone(&shared);
        async move { Ok(ScriptValue::Object(emitter)) }
    });
    let evaluator = launch(Arc::new(TestRoot), table);
    let root = evaluator.root_handle();

    let keeper = root.evaluate_handle("sharedEmitter", ()).await.unwrap();
    let alias = root.evaluate_handle("sharedEmitter", ()).await.unwrap();
    assert_eq!(keeper.object_id(), alias.object_id());

    let emitter = keeper.emitter().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    emitter.add_listener(recording_listener(&log)).await.unwrap();

    emitter.evaluate("fire", json!("before")).await.unwrap();
    wait_until(|| log.lock().len() == 1).await;

    // Releasing the subscribed handle clears its local listeners; the alias
    // keeps the remote object alive and can still fire into the void.
    keeper.release(tether_runtime::ReleaseOptions::default()).await.unwrap();
    alias.evaluate("fire", json!("after")).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(*log.lock(), vec![json!("before")]);
}
