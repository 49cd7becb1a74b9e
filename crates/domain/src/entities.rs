use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 服务端下发给 Worker 的任务实例
///
/// 字段与 Conductor REST 接口的 JSON 结构保持一致（camelCase）。
/// Worker 只读取任务，从不修改。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub task_id: String,
    pub task_type: String,
    pub task_def_name: Option<String>,
    pub workflow_instance_id: String,
    pub workflow_type: Option<String>,
    pub reference_task_name: Option<String>,
    pub status: Option<TaskStatus>,
    pub input_data: Map<String, Value>,
    pub output_data: Map<String, Value>,
    pub correlation_id: Option<String>,
    pub domain: Option<String>,
    pub worker_id: Option<String>,
    pub retry_count: i32,
    pub poll_count: i32,
    pub seq: i32,
    pub scheduled_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub update_time: i64,
    pub callback_after_seconds: i64,
    pub response_timeout_seconds: i64,
    pub reason_for_incompletion: Option<String>,
    pub iteration: i32,
    pub sub_workflow_id: Option<String>,
}

impl Task {
    pub fn new<S: Into<String>>(task_id: S, task_type: S, workflow_instance_id: S) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            workflow_instance_id: workflow_instance_id.into(),
            ..Default::default()
        }
    }

    pub fn with_input<K: Into<String>>(mut self, key: K, value: Value) -> Self {
        self.input_data.insert(key.into(), value);
        self
    }

    /// 轮询结果只有在携带非空 task_id 时才算有效任务
    pub fn has_id(&self) -> bool {
        !self.task_id.is_empty()
    }
}

/// 服务端视角的任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    InProgress,
    Canceled,
    Failed,
    FailedWithTerminalError,
    Completed,
    CompletedWithErrors,
    Scheduled,
    TimedOut,
    Skipped,
}

/// Worker 可上报的结果状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResultStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    FailedWithTerminalError,
}

impl TaskResultStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskResultStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskResultStatus::InProgress => "IN_PROGRESS",
            TaskResultStatus::Completed => "COMPLETED",
            TaskResultStatus::Failed => "FAILED",
            TaskResultStatus::FailedWithTerminalError => "FAILED_WITH_TERMINAL_ERROR",
        }
    }
}

impl std::fmt::Display for TaskResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条任务执行日志，只追加不修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskExecLog {
    pub log: String,
    pub task_id: String,
    /// 毫秒级时间戳
    pub created_time: i64,
}

impl TaskExecLog {
    pub fn new<S: Into<String>>(log: S, task_id: S) -> Self {
        Self {
            log: log.into(),
            task_id: task_id.into(),
            created_time: Utc::now().timestamp_millis(),
        }
    }
}

/// 一次执行的结果上报
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskResult {
    pub task_id: String,
    pub workflow_instance_id: String,
    pub worker_id: String,
    pub status: TaskResultStatus,
    pub output_data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_after_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskExecLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_output_payload_storage_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_workflow_id: Option<String>,
}

impl TaskResult {
    /// 为指定任务创建一个 IN_PROGRESS 结果
    pub fn new_for<S: Into<String>>(task: &Task, worker_id: S) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = TaskResultStatus::Completed;
        self
    }

    pub fn failed<S: Into<String>>(mut self, reason: S) -> Self {
        self.status = TaskResultStatus::Failed;
        self.reason_for_incompletion = Some(reason.into());
        self
    }

    pub fn failed_with_terminal_error<S: Into<String>>(mut self, reason: S) -> Self {
        self.status = TaskResultStatus::FailedWithTerminalError;
        self.reason_for_incompletion = Some(reason.into());
        self
    }

    pub fn add_output<K: Into<String>>(&mut self, key: K, value: Value) {
        self.output_data.insert(key.into(), value);
    }

    pub fn with_output(mut self, output: Map<String, Value>) -> Self {
        self.output_data = output;
        self
    }

    pub fn log<S: Into<String>>(&mut self, message: S) {
        let entry = TaskExecLog::new(message.into(), self.task_id.clone());
        self.logs.push(entry);
    }
}
