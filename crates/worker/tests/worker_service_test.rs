use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, Mutex};

use taskq_core::codec::{Codec, JsonCodec};
use taskq_core::models::{TaskState, TaskStatus};
use taskq_core::traits::{Broker, BrokerCapability, ResultBackend, TaskError};
use taskq_core::{TaskqError, TaskqResult};
use taskq_dispatcher::{
    Dispatcher, EnqueueOptions, FnTask, RetryPolicy, TaskDefinition, TaskRegistry,
};
use taskq_infrastructure::InMemoryBroker;
use taskq_worker::{ExecutionOutcome, TaskExecutionManager, WorkerService};

/// 记录全部写入状态的结果后端
#[derive(Default)]
struct RecordingBackend {
    states: Mutex<Vec<TaskState>>,
}

impl RecordingBackend {
    async fn terminal_states(&self) -> Vec<TaskState> {
        self.states
            .lock()
            .await
            .iter()
            .filter(|s| s.status.is_terminal())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ResultBackend for RecordingBackend {
    async fn store(&self, state: &TaskState) -> TaskqResult<()> {
        self.states.lock().await.push(state.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> TaskqResult<Option<TaskState>> {
        Ok(self
            .states
            .lock()
            .await
            .iter()
            .rev()
            .find(|s| s.task_id == task_id)
            .cloned())
    }
}

struct DownBroker;

#[async_trait]
impl Broker for DownBroker {
    fn name(&self) -> &str {
        "down"
    }

    fn capability(&self) -> BrokerCapability {
        BrokerCapability::HeadTail
    }

    async fn ping(&self) -> TaskqResult<()> {
        Err(TaskqError::broker("PING", "connection refused"))
    }

    async fn push(&self, _queue: &str, _payload: Vec<u8>) -> TaskqResult<()> {
        Err(TaskqError::broker("RPUSH", "connection refused"))
    }

    async fn pop_head(&self, _queue: &str) -> TaskqResult<Option<Vec<u8>>> {
        Err(TaskqError::broker("LPOP", "connection refused"))
    }

    async fn length(&self, _queue: &str) -> TaskqResult<usize> {
        Err(TaskqError::broker("LLEN", "connection refused"))
    }

    async fn flush(&self, _queue: &str) -> TaskqResult<()> {
        Err(TaskqError::broker("DEL", "connection refused"))
    }
}

fn dispatcher_with(definitions: Vec<TaskDefinition>, broker: Arc<dyn Broker>) -> Arc<Dispatcher> {
    let mut registry = TaskRegistry::new();
    for definition in definitions {
        registry.register(definition).unwrap();
    }
    Arc::new(Dispatcher::new(
        Arc::new(registry),
        broker,
        Arc::new(JsonCodec::new()),
        "default",
    ))
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

fn always_retry(attempts: Arc<AtomicUsize>) -> TaskDefinition {
    FnTask::new("app.flaky")
        .retry_policy(RetryPolicy::default().with_max_retries(2))
        .blocking(move |_ctx, _args, _kwargs| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::retry_after(Duration::ZERO, "upstream unavailable"))
        })
}

#[tokio::test]
async fn test_retry_until_exhausted_reaches_one_terminal_state() {
    let broker = InMemoryBroker::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = dispatcher_with(vec![always_retry(attempts.clone())], Arc::new(broker.clone()));
    let manager = TaskExecutionManager::new(dispatcher.clone(), Some(backend.clone()), None);

    let id = dispatcher
        .enqueue("app.flaky", vec![], Map::new(), EnqueueOptions::new())
        .await
        .unwrap();

    let codec = JsonCodec::new();
    let mut outcomes = Vec::new();
    while let Some(payload) = broker.pop_head("default").await.unwrap() {
        let message = codec.decode(&payload).unwrap();
        assert_eq!(message.id, id);
        outcomes.push(manager.execute(message).await);
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0], ExecutionOutcome::Retried { retry_count: 1, .. }));
    assert!(matches!(outcomes[1], ExecutionOutcome::Retried { retry_count: 2, .. }));
    assert!(matches!(
        outcomes[2],
        ExecutionOutcome::Failed(TaskqError::MaxRetriesExceeded { max_retries: 2, .. })
    ));

    let terminal = backend.terminal_states().await;
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].status, TaskStatus::Failure);
    assert_eq!(terminal[0].retries, 2);
}

#[tokio::test]
async fn test_success_is_stored() {
    let broker = InMemoryBroker::new();
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.add").handler(|_ctx, args, _kwargs| async move {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        })],
        Arc::new(broker.clone()),
    );
    let manager = TaskExecutionManager::new(dispatcher.clone(), Some(backend.clone()), None);

    let message = taskq_core::models::EnqueuedMessage::new("app.add", "default")
        .with_args(vec![json!(1), json!(2)]);
    let outcome = manager.execute(message.clone()).await;
    assert!(matches!(outcome, ExecutionOutcome::Succeeded(ref v) if *v == json!(3)));

    let state = backend.get(&message.id).await.unwrap().unwrap();
    assert_eq!(state.status, TaskStatus::Success);
    assert_eq!(state.result, Some(json!(3)));
}

#[tokio::test]
async fn test_fault_and_unknown_task_fail_once() {
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.boom").blocking(|_ctx, _args, _kwargs| Err(TaskError::fault("boom")))],
        Arc::new(InMemoryBroker::new()),
    );
    let manager = TaskExecutionManager::new(dispatcher, Some(backend.clone()), None);

    let outcome = manager
        .execute(taskq_core::models::EnqueuedMessage::new("app.boom", "default"))
        .await;
    assert!(matches!(outcome, ExecutionOutcome::Failed(TaskqError::HandlerFault { .. })));

    let outcome = manager
        .execute(taskq_core::models::EnqueuedMessage::new("app.missing", "default"))
        .await;
    assert!(matches!(outcome, ExecutionOutcome::Failed(TaskqError::UnknownTask { .. })));
    assert_eq!(backend.terminal_states().await.len(), 2);
}

#[tokio::test]
async fn test_time_limit_is_enforced() {
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.slow").handler(|_ctx, _args, _kwargs| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        })],
        Arc::new(InMemoryBroker::new()),
    );
    let manager = TaskExecutionManager::new(dispatcher, None, Some(Duration::from_millis(50)));

    let outcome = manager
        .execute(taskq_core::models::EnqueuedMessage::new("app.slow", "default"))
        .await;
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(TaskqError::TimeLimitExceeded { .. })
    ));
    assert!(outcome.is_terminal());
}

#[tokio::test]
async fn test_worker_recycles_children_and_drains_queue() {
    let broker = InMemoryBroker::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.count").blocking(move |_ctx, _args, _kwargs| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!(null))
        })],
        Arc::new(broker.clone()),
    );
    for i in 0..5 {
        dispatcher
            .enqueue("app.count", vec![json!(i)], Map::new(), EnqueueOptions::new())
            .await
            .unwrap();
    }

    let worker = WorkerService::builder(dispatcher)
        .concurrency(1)
        .max_tasks_per_child(Some(1))
        .poll_interval_ms(10)
        .build();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    wait_until(|| {
        let handled = handled.clone();
        async move { handled.load(Ordering::SeqCst) == 5 }
    })
    .await;
    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(broker.length("default").await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_retries_through_broker() {
    let broker = InMemoryBroker::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let backend = Arc::new(RecordingBackend::default());
    let dispatcher = dispatcher_with(vec![always_retry(attempts.clone())], Arc::new(broker.clone()));
    dispatcher
        .enqueue("app.flaky", vec![], Map::new(), EnqueueOptions::new())
        .await
        .unwrap();

    let worker = WorkerService::builder(dispatcher)
        .concurrency(2)
        .poll_interval_ms(10)
        .result_backend(Some(backend.clone()))
        .build();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let probe = backend.clone();
    wait_until(move || {
        let probe = probe.clone();
        async move { !probe.terminal_states().await.is_empty() }
    })
    .await;
    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(backend.terminal_states().await.len(), 1);
}

#[tokio::test]
async fn test_delayed_messages_are_returned_on_shutdown() {
    let broker = InMemoryBroker::new();
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.later").blocking(|_ctx, _args, _kwargs| Ok(json!(null)))],
        Arc::new(broker.clone()),
    );
    let id = dispatcher
        .enqueue(
            "app.later",
            vec![],
            Map::new(),
            EnqueueOptions::new().countdown(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    let worker = WorkerService::builder(dispatcher)
        .concurrency(1)
        .poll_interval_ms(10)
        .build();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let probe = broker.clone();
    wait_until(move || {
        let probe = probe.clone();
        async move { probe.length("default").await.unwrap() == 0 }
    })
    .await;
    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();

    let remaining = broker.snapshot("default").await;
    assert_eq!(remaining.len(), 1);
    let message = JsonCodec::new().decode(&remaining[0]).unwrap();
    assert_eq!(message.id, id);
    assert!(message.eta.is_some());
}

#[tokio::test]
async fn test_late_ack_requeues_interrupted_task() {
    let broker = InMemoryBroker::new();
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let dispatcher = dispatcher_with(
        vec![FnTask::new("app.long").handler(move |_ctx, _args, _kwargs| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!(null))
            }
        })],
        Arc::new(broker.clone()),
    );
    dispatcher
        .enqueue("app.long", vec![], Map::new(), EnqueueOptions::new())
        .await
        .unwrap();

    let worker = WorkerService::builder(dispatcher)
        .concurrency(1)
        .acks_late(true)
        .poll_interval_ms(10)
        .build();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let running = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let probe = started.clone();
    wait_until(move || {
        let probe = probe.clone();
        async move { probe.load(Ordering::SeqCst) }
    })
    .await;
    shutdown_tx.send(()).unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(broker.length("default").await.unwrap(), 1);
}

#[tokio::test]
async fn test_worker_fails_when_broker_is_down() {
    let dispatcher = dispatcher_with(Vec::new(), Arc::new(DownBroker));
    let worker = WorkerService::builder(dispatcher).build();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let err = worker.run(shutdown_rx).await.unwrap_err();
    assert!(matches!(err, TaskqError::BrokerUnavailable(_)));
}
