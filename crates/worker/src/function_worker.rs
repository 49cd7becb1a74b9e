use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conductor_domain::{Task, TaskResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::worker::{default_identity, Worker, DEFAULT_POLL_INTERVAL};

type Input = Map<String, Value>;

/// 可以包装成 worker 的函数形状
///
/// 接收整个任务或只接收输入数据，返回完整结果或只返回输出数据。
/// 只返回输出时结果为 COMPLETED；非对象输出会被包装成 `{"result": ...}`。
pub enum WorkerFunction {
    TaskToResult(Box<dyn Fn(&Task) -> anyhow::Result<TaskResult> + Send + Sync>),
    TaskToOutput(Box<dyn Fn(&Task) -> anyhow::Result<Value> + Send + Sync>),
    InputToResult(Box<dyn Fn(Input) -> anyhow::Result<TaskResult> + Send + Sync>),
    InputToOutput(Box<dyn Fn(Input) -> anyhow::Result<Value> + Send + Sync>),
}

impl WorkerFunction {
    pub fn task_to_result<F>(f: F) -> Self
    where
        F: Fn(&Task) -> anyhow::Result<TaskResult> + Send + Sync + 'static,
    {
        WorkerFunction::TaskToResult(Box::new(f))
    }

    pub fn task_to_output<F, O>(f: F) -> Self
    where
        F: Fn(&Task) -> anyhow::Result<O> + Send + Sync + 'static,
        O: Serialize,
    {
        WorkerFunction::TaskToOutput(Box::new(move |task| Ok(serde_json::to_value(f(task)?)?)))
    }

    /// 输入数据先反序列化为 `I`，字段不匹配时执行失败
    pub fn input_to_result<F, I>(f: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<TaskResult> + Send + Sync + 'static,
        I: DeserializeOwned,
    {
        WorkerFunction::InputToResult(Box::new(move |input| {
            let input: I = serde_json::from_value(Value::Object(input))?;
            f(input)
        }))
    }

    pub fn input_to_output<F, I, O>(f: F) -> Self
    where
        F: Fn(I) -> anyhow::Result<O> + Send + Sync + 'static,
        I: DeserializeOwned,
        O: Serialize,
    {
        WorkerFunction::InputToOutput(Box::new(move |input| {
            let input: I = serde_json::from_value(Value::Object(input))?;
            Ok(serde_json::to_value(f(input)?)?)
        }))
    }

    fn call(&self, task: &Task, worker_id: &str) -> anyhow::Result<TaskResult> {
        match self {
            WorkerFunction::TaskToResult(f) => Ok(bind_result(f(task)?, task, worker_id)),
            WorkerFunction::TaskToOutput(f) => Ok(output_result(f(task)?, task, worker_id)),
            WorkerFunction::InputToResult(f) => {
                Ok(bind_result(f(task.input_data.clone())?, task, worker_id))
            }
            WorkerFunction::InputToOutput(f) => {
                Ok(output_result(f(task.input_data.clone())?, task, worker_id))
            }
        }
    }
}

fn bind_result(mut result: TaskResult, task: &Task, worker_id: &str) -> TaskResult {
    result.task_id = task.task_id.clone();
    result.workflow_instance_id = task.workflow_instance_id.clone();
    result.worker_id = worker_id.to_string();
    result
}

fn output_result(output: Value, task: &Task, worker_id: &str) -> TaskResult {
    let output_data = match output {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    TaskResult::new_for(task, worker_id)
        .completed()
        .with_output(output_data)
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// 由函数构造的 worker
pub struct FunctionWorker {
    task_definition_name: String,
    function: WorkerFunction,
    domain: Option<String>,
    poll_interval_nanos: AtomicU64,
    worker_id: Option<String>,
    paused: AtomicBool,
}

impl FunctionWorker {
    pub fn new<S: Into<String>>(task_definition_name: S, function: WorkerFunction) -> Self {
        Self {
            task_definition_name: task_definition_name.into(),
            function,
            domain: None,
            poll_interval_nanos: AtomicU64::new(duration_nanos(DEFAULT_POLL_INTERVAL)),
            worker_id: None,
            paused: AtomicBool::new(false),
        }
    }

    pub fn with_domain<S: Into<String>>(mut self, domain: S) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        self.set_poll_interval(poll_interval);
        self
    }

    pub fn with_worker_id<S: Into<String>>(mut self, worker_id: S) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }
}

#[async_trait]
impl Worker for FunctionWorker {
    fn task_definition_name(&self) -> &str {
        &self.task_definition_name
    }

    fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_nanos(self.poll_interval_nanos.load(Ordering::Relaxed))
    }

    /// 运行中修改后，下一次休眠即使用新的间隔
    fn set_poll_interval(&self, poll_interval: Duration) {
        self.poll_interval_nanos
            .store(duration_nanos(poll_interval), Ordering::Relaxed);
    }

    fn identity(&self) -> String {
        self.worker_id.clone().unwrap_or_else(default_identity)
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    async fn execute(&self, task: &Task) -> anyhow::Result<TaskResult> {
        self.function.call(task, &self.identity())
    }
}
