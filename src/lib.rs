//! Conductor 工作流编排服务的 Rust SDK
//!
//! 核心是 worker 运行框架：实现 [`Worker`]（或用 [`FunctionWorker`] 包装函数），
//! 交给 [`WorkerHost`] 以每个 worker 一个进程的方式运行轮询循环。

pub use conductor_client as client;
pub use conductor_config as config;
pub use conductor_domain as domain;
pub use conductor_errors as errors;
pub use conductor_observability as observability;
pub use conductor_worker as worker;

pub use conductor_client::{TaskApi, TaskResourceClient};
pub use conductor_config::{Configuration, LogConfig, MetricsSettings, WorkerIni, WorkerRuntimeConfig};
pub use conductor_domain::{Task, TaskExecLog, TaskResult, TaskResultStatus, TaskStatus};
pub use conductor_errors::{ConductorError, ConductorResult};
pub use conductor_observability::{init_logging, MetricsCollector, PrometheusMetricsCollector};
pub use conductor_worker::{FunctionWorker, TaskRunner, Worker, WorkerFunction, WorkerHost};
