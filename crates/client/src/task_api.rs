use async_trait::async_trait;
use conductor_domain::{Task, TaskExecLog, TaskResult};
use conductor_errors::ConductorResult;

/// Conductor 任务资源接口
///
/// 轮询循环只依赖这个 trait；传输失败统一以 `ConductorError` 返回。
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// 为任务类型拉取一个任务，队列为空时返回 `None`
    async fn poll(
        &self,
        task_type: &str,
        worker_id: Option<&str>,
        domain: Option<&str>,
    ) -> ConductorResult<Option<Task>>;

    async fn batch_poll(
        &self,
        task_type: &str,
        worker_id: Option<&str>,
        count: Option<u32>,
        timeout_ms: Option<u64>,
        domain: Option<&str>,
    ) -> ConductorResult<Vec<Task>>;

    async fn get_task(&self, task_id: &str) -> ConductorResult<Task>;

    /// 上报执行结果，返回服务端响应正文
    async fn update_task(&self, result: &TaskResult) -> ConductorResult<String>;

    async fn append_log(&self, task_id: &str, message: &str) -> ConductorResult<()>;

    async fn get_logs(&self, task_id: &str) -> ConductorResult<Vec<TaskExecLog>>;

    async fn queue_size(&self, task_type: &str) -> ConductorResult<i64>;
}
