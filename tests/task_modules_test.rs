use std::sync::Arc;

use serde_json::{json, Map};
use taskq::tasks::{test_async::FAN_OUT, TASK_MODULES, TASK_ROOT};
use taskq_core::codec::{Codec, JsonCodec};
use taskq_core::traits::Broker;
use taskq_dispatcher::{Dispatcher, DispatcherHandle, ModuleContext, TaskRegistry};
use taskq_infrastructure::InMemoryBroker;

fn build_dispatcher(broker: InMemoryBroker) -> Arc<Dispatcher> {
    let handle = DispatcherHandle::new();
    let ctx = ModuleContext::new("my_celery_mq", handle.clone()).with_queues(
        "my_celery_mq",
        "fetch_queue",
        "notify_queue",
    );

    let mut registry = TaskRegistry::new();
    registry.discover(TASK_ROOT, TASK_MODULES, &ctx).unwrap();

    let codec: Arc<dyn Codec> = Arc::new(JsonCodec::new());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Arc::new(broker),
        codec,
        "my_celery_mq",
    ));
    handle.bind(&dispatcher).unwrap();
    dispatcher
}

#[tokio::test(start_paused = true)]
async fn test_ping_calls_pong_and_fans_out() {
    let broker = InMemoryBroker::new();
    let dispatcher = build_dispatcher(broker.clone());

    let result = dispatcher
        .invoke_sync("my_celery_mq.tasks.test_async", Vec::new(), Map::new())
        .await
        .unwrap();
    assert_eq!(result, json!("ping task finished."));

    let codec = JsonCodec::new();
    let messages: Vec<_> = broker
        .snapshot("my_celery_mq")
        .await
        .iter()
        .map(|payload| codec.decode(payload).unwrap())
        .collect();
    assert_eq!(messages.len(), (FAN_OUT * 2) as usize);
    assert_eq!(messages[0].task_name, "my_celery_mq.tasks.test_async.pong");
    assert_eq!(messages[1].task_name, "my_celery_mq.tasks.test_async.PongTask");
    assert_eq!(messages[39].args, vec![json!(19)]);
}

#[tokio::test(start_paused = true)]
async fn test_pong_tasks_return_messages() {
    let dispatcher = build_dispatcher(InMemoryBroker::new());

    let pong = dispatcher
        .task("my_celery_mq.tasks.test_async.pong")
        .unwrap()
        .invoke_sync(vec![json!(3)], Map::new())
        .await
        .unwrap();
    assert_eq!(pong, json!("pong task 3 finished."));

    let pong = dispatcher
        .invoke_sync("my_celery_mq.tasks.test_async.pong", Vec::new(), Map::new())
        .await
        .unwrap();
    assert_eq!(pong, json!("pong task 0 finished."));

    let mut kwargs = Map::new();
    kwargs.insert("ts".to_string(), json!("abc"));
    let pong_task = dispatcher
        .invoke_sync("my_celery_mq.tasks.test_async.PongTask", Vec::new(), kwargs)
        .await
        .unwrap();
    assert_eq!(pong_task, json!("PongTask abc finished."));
}

#[tokio::test]
async fn test_notify_task_is_routed_to_notify_queue() {
    let broker = InMemoryBroker::new();
    let dispatcher = build_dispatcher(broker.clone());

    dispatcher
        .task("my_celery_mq.tasks.master_notify")
        .unwrap()
        .enqueue(Vec::new(), Map::new())
        .await
        .unwrap();
    assert_eq!(broker.length("notify_queue").await.unwrap(), 1);
    assert_eq!(broker.length("my_celery_mq").await.unwrap(), 0);

    let value = dispatcher
        .invoke_sync("my_celery_mq.tasks.master_notify", Vec::new(), Map::new())
        .await
        .unwrap();
    assert_eq!(value, json!(true));
}
