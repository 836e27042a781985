//! The task intake loop: fetch, dispatch, repeat.
//!
//! One polling loop claims task batches from the queue. Each claimed task
//! runs as its own tokio task; the next fetch cycle starts only after the
//! whole batch has finished, which bounds in-flight work to one batch
//! width. The dispatch path itself is policy-driven: the QoS strategy
//! decides redelivery handling and pre-publish marking, the completion
//! strategy decides whether a publish already completes the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::broker::Broker;
use crate::builder::CommandBuilder;
use crate::codec::Codec;
use crate::directory::Directory;
use crate::error::ExecutionError;
use crate::policy::{Completer, CompletionStrategy, QosStrategy};
use crate::queue::TaskQueue;
use crate::translate;
use crate::types::task::Task;

/// Intake tuning and the policies stamped onto every dispatch.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// This process's worker id, used to lock and complete tasks.
    pub worker_id: String,
    /// External-task topic to subscribe on.
    pub topic: String,
    /// Batch width per fetch cycle.
    pub max_tasks: u32,
    /// Lock duration requested at fetch time.
    pub lock_duration: Duration,
    /// Idle wait between empty fetch cycles.
    pub poll_interval: Duration,
    /// Dispatch QoS strategy.
    pub qos: QosStrategy,
    /// Completion strategy.
    pub completion: CompletionStrategy,
    /// Grace delay applied to completion calls.
    pub completion_grace: Duration,
}

/// Claims tasks and turns each into a published protocol command.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<dyn TaskQueue>,
    broker: Arc<dyn Broker>,
    builder: CommandBuilder,
    completer: Completer,
    options: ExecutorOptions,
}

impl TaskExecutor {
    /// Wires an executor from its collaborators.
    pub fn new(
        options: ExecutorOptions,
        queue: Arc<dyn TaskQueue>,
        broker: Arc<dyn Broker>,
        directory: Arc<dyn Directory>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let builder = CommandBuilder::new(
            directory,
            codec,
            options.worker_id.clone(),
            options.completion,
        );
        let completer = Completer::new(queue.clone(), options.completion_grace);
        Self { inner: Arc::new(Inner { queue, broker, builder, completer, options }) }
    }

    /// Runs fetch cycles until `cancel` fires. Cancellation is honored
    /// between cycles; a batch in flight always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) {
        let options = &self.inner.options;
        info!(
            worker_id = %options.worker_id,
            topic = %options.topic,
            qos = %options.qos,
            completion = %options.completion,
            "task intake started"
        );
        loop {
            let fetched = tokio::select! {
                () = cancel.cancelled() => break,
                fetched = self.inner.queue.fetch_and_lock(
                    &options.worker_id,
                    options.max_tasks,
                    &options.topic,
                    options.lock_duration,
                ) => fetched,
            };
            let tasks = match fetched {
                Ok(tasks) => tasks,
                Err(error) => {
                    warn!(%error, "fetch cycle failed");
                    Vec::new()
                }
            };
            debug!(count = tasks.len(), "fetch cycle done");
            if tasks.is_empty() {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(options.poll_interval) => {}
                }
                continue;
            }

            let mut batch = JoinSet::new();
            for task in tasks {
                let executor = self.clone();
                let span = info_span!("task", task_id = %task.id);
                batch.spawn(async move { executor.execute(task).await }.instrument(span));
            }
            while let Some(joined) = batch.join_next().await {
                if let Err(error) = joined {
                    error!(%error, "task execution panicked");
                }
            }
        }
        info!("task intake stopped");
    }

    /// Carries one claimed task through translation, policy checks,
    /// publish, and (per strategy) completion. Every fatal error fails the
    /// task at the queue with its sanitized message.
    pub async fn execute(&self, task: Task) {
        if let Some(prior) = &task.error_message {
            warn!(prior_error = %prior, "task carries an earlier failure");
        }
        if self.inner.options.qos.rejects_redelivery(task.retries) {
            let error = ExecutionError::Timeout { task_id: task.id.clone() };
            self.fail_task(&task, &error).await;
            return;
        }
        if let Err(error) = self.dispatch(&task).await {
            self.fail_task(&task, &error).await;
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<(), ExecutionError> {
        let request = translate::to_command_request(task)?;
        let command = self.inner.builder.build(task, &request).await?;
        let payload =
            serde_json::to_vec(&command.envelope).map_err(|e| ExecutionError::Format {
                field: "envelope".into(),
                detail: e.to_string(),
            })?;

        // The at-most-once guarantee hangs on this ordering: the retry mark
        // must be durable at the queue before the payload can reach a
        // handler.
        if self.inner.options.qos.marks_before_publish() {
            self.inner.queue.set_retries(&task.id, 1).await?;
        }
        self.inner
            .broker
            .publish(&command.topic, &payload)
            .await
            .map_err(|e| ExecutionError::Publish {
                topic: command.topic.clone(),
                detail: e.to_string(),
            })?;
        info!(topic = %command.topic, "command published");

        if self.inner.options.completion.completes_on_dispatch() {
            let completed = self
                .inner
                .completer
                .complete(&task.id, &self.inner.options.worker_id, None)
                .await;
            match completed {
                Ok(()) => info!("task completed optimistically"),
                Err(error) => warn!(%error, "optimistic completion failed"),
            }
        }
        Ok(())
    }

    async fn fail_task(&self, task: &Task, error: &ExecutionError) {
        error!(%error, "task failed");
        let message = error.task_facing_message();
        let failed =
            self.inner.completer.fail(&task.id, &self.inner.options.worker_id, message).await;
        if let Err(queue_error) = failed {
            error!(%queue_error, "could not report task failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, Subscription};
    use crate::codec::JsonCodec;
    use crate::directory::DirectoryError;
    use crate::queue::QueueError;
    use crate::types::metadata::{
        DeviceMetadata, FieldSpec, ProtocolMetadata, ServiceMetadata, ValueType,
        WireFormat,
    };
    use crate::types::task::{TaskOutput, TaskVariable};
    use crate::types::value::VarValue;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        SetRetries { task_id: String, retries: i64 },
        Publish { topic: String },
        Complete { task_id: String, worker_id: String, with_output: bool },
        Fail { task_id: String, message: String },
    }

    type Log = Arc<Mutex<Vec<Event>>>;

    #[derive(Default)]
    struct ScriptedQueue {
        log: Log,
        break_set_retries: bool,
    }

    #[async_trait]
    impl TaskQueue for ScriptedQueue {
        async fn fetch_and_lock(
            &self,
            _worker_id: &str,
            _max_tasks: u32,
            _topic: &str,
            _lock_duration: Duration,
        ) -> Result<Vec<Task>, QueueError> {
            Ok(vec![])
        }

        async fn set_retries(
            &self,
            task_id: &str,
            retries: i64,
        ) -> Result<(), QueueError> {
            self.log
                .lock()
                .push(Event::SetRetries { task_id: task_id.into(), retries });
            if self.break_set_retries {
                return Err(QueueError::Transport("connection reset".into()));
            }
            Ok(())
        }

        async fn complete(
            &self,
            task_id: &str,
            worker_id: &str,
            output: Option<&TaskOutput>,
        ) -> Result<(), QueueError> {
            self.log.lock().push(Event::Complete {
                task_id: task_id.into(),
                worker_id: worker_id.into(),
                with_output: output.is_some(),
            });
            Ok(())
        }

        async fn fail(
            &self,
            task_id: &str,
            _worker_id: &str,
            error_message: &str,
        ) -> Result<(), QueueError> {
            self.log.lock().push(Event::Fail {
                task_id: task_id.into(),
                message: error_message.into(),
            });
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedBroker {
        log: Log,
        break_publish: bool,
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn ensure_topic(&self, _topic: &str) -> Result<(), BrokerError> {
            Ok(())
        }

        async fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), BrokerError> {
            if self.break_publish {
                return Err(BrokerError::Publish {
                    topic: topic.into(),
                    detail: "broker down".into(),
                });
            }
            self.log.lock().push(Event::Publish { topic: topic.into() });
            Ok(())
        }

        async fn subscribe(
            &self,
            topic: &str,
            _group: &str,
        ) -> Result<Box<dyn Subscription>, BrokerError> {
            Err(BrokerError::Subscribe {
                topic: topic.into(),
                detail: "not consumable".into(),
            })
        }
    }

    struct StaticDirectory;

    #[async_trait]
    impl Directory for StaticDirectory {
        async fn resolve_device(
            &self,
            _device_id: &str,
            _identity: &str,
        ) -> Result<DeviceMetadata, DirectoryError> {
            Ok(DeviceMetadata { id: "d1".into(), ..DeviceMetadata::default() })
        }

        async fn resolve_service(
            &self,
            _service_id: &str,
        ) -> Result<ServiceMetadata, DirectoryError> {
            Ok(ServiceMetadata {
                id: "s1".into(),
                protocol: ProtocolMetadata {
                    id: "p1".into(),
                    handler_topic: "mqtt".into(),
                },
                inputs: vec![FieldSpec {
                    name: "level".into(),
                    value_type: ValueType::Integer,
                    format: WireFormat::Json,
                    format_info: None,
                    literal: None,
                    segment: "body".into(),
                }],
                ..ServiceMetadata::default()
            })
        }

        async fn check_access(
            &self,
            _identity: &str,
            _resource_id: &str,
        ) -> Result<bool, DirectoryError> {
            Ok(true)
        }
    }

    fn options(qos: QosStrategy, completion: CompletionStrategy) -> ExecutorOptions {
        ExecutorOptions {
            worker_id: "worker-1".into(),
            topic: "execute_in_vid".into(),
            max_tasks: 10,
            lock_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(10),
            qos,
            completion,
            completion_grace: Duration::ZERO,
        }
    }

    fn executor(
        qos: QosStrategy,
        completion: CompletionStrategy,
        queue: ScriptedQueue,
        broker: ScriptedBroker,
    ) -> TaskExecutor {
        TaskExecutor::new(
            options(qos, completion),
            Arc::new(queue),
            Arc::new(broker),
            Arc::new(StaticDirectory),
            Arc::new(JsonCodec),
        )
    }

    fn task(retries: Option<i64>) -> Task {
        let payload = r#"{"instance_id":"d1","service_id":"s1","inputs":{"level":7}}"#;
        Task {
            id: "t1".into(),
            retries,
            variables: [(
                "payload".to_string(),
                TaskVariable::new(VarValue::String(payload.into())),
            )]
            .into(),
            ..Task::default()
        }
    }

    #[tokio::test]
    async fn pessimistic_dispatch_publishes_and_leaves_the_task_locked() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtLeastOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        e.execute(task(None)).await;
        assert_eq!(*log.lock(), vec![Event::Publish { topic: "mqtt".into() }]);
    }

    #[tokio::test]
    async fn optimistic_dispatch_completes_empty_after_the_publish() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtLeastOnce,
            CompletionStrategy::Optimistic,
            queue,
            broker,
        );

        e.execute(task(None)).await;
        assert_eq!(
            *log.lock(),
            vec![
                Event::Publish { topic: "mqtt".into() },
                Event::Complete {
                    task_id: "t1".into(),
                    worker_id: "worker-1".into(),
                    with_output: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn at_most_once_marks_retries_strictly_before_the_publish() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtMostOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        e.execute(task(None)).await;
        assert_eq!(
            *log.lock(),
            vec![
                Event::SetRetries { task_id: "t1".into(), retries: 1 },
                Event::Publish { topic: "mqtt".into() },
            ]
        );
    }

    #[tokio::test]
    async fn redelivered_task_fails_fast_under_at_most_once() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtMostOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        e.execute(task(Some(1))).await;
        assert_eq!(
            *log.lock(),
            vec![Event::Fail {
                task_id: "t1".into(),
                message: "communication timeout".into(),
            }]
        );
    }

    #[tokio::test]
    async fn other_retry_counts_dispatch_normally_under_at_most_once() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtMostOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        e.execute(task(Some(3))).await;
        let events = log.lock();
        assert_eq!(events[0], Event::SetRetries { task_id: "t1".into(), retries: 1 });
        assert_eq!(events[1], Event::Publish { topic: "mqtt".into() });
    }

    #[tokio::test]
    async fn malformed_payload_fails_with_the_sanitized_message() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtLeastOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        let mut t = task(None);
        t.variables.clear();
        e.execute(t).await;
        assert_eq!(
            *log.lock(),
            vec![Event::Fail {
                task_id: "t1".into(),
                message: "invalid task payload (json)".into(),
            }]
        );
    }

    #[tokio::test]
    async fn publish_failure_fails_the_task_and_skips_optimistic_completion() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), ..ScriptedQueue::default() };
        let broker = ScriptedBroker { log: log.clone(), break_publish: true };
        let e = executor(
            QosStrategy::AtLeastOnce,
            CompletionStrategy::Optimistic,
            queue,
            broker,
        );

        e.execute(task(None)).await;
        assert_eq!(
            *log.lock(),
            vec![Event::Fail {
                task_id: "t1".into(),
                message: "unable to publish command".into(),
            }]
        );
    }

    #[tokio::test]
    async fn failed_retry_mark_aborts_before_the_publish() {
        let log: Log = Log::default();
        let queue = ScriptedQueue { log: log.clone(), break_set_retries: true };
        let broker = ScriptedBroker { log: log.clone(), ..ScriptedBroker::default() };
        let e = executor(
            QosStrategy::AtMostOnce,
            CompletionStrategy::Pessimistic,
            queue,
            broker,
        );

        e.execute(task(None)).await;
        assert_eq!(
            *log.lock(),
            vec![
                Event::SetRetries { task_id: "t1".into(), retries: 1 },
                Event::Fail {
                    task_id: "t1".into(),
                    message: "task queue unavailable".into(),
                },
            ]
        );
    }
}
