use std::time::Duration;

use async_trait::async_trait;
use conductor_domain::{Task, TaskResult};

/// 默认轮询间隔
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 任务执行契约
///
/// 每个实现负责一种任务类型。`execute` 返回 `Err` 或 panic 时，
/// 轮询循环会把它转换成 FAILED 结果，不会中断循环。
#[async_trait]
pub trait Worker: Send + Sync {
    /// 任务定义名，即轮询的任务类型
    fn task_definition_name(&self) -> &str;

    fn domain(&self) -> Option<&str> {
        None
    }

    /// 当前的轮询间隔，每一轮休眠前都会重新读取
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// 轮询循环启动时下发解析后的间隔；间隔固定的实现忽略即可
    fn set_poll_interval(&self, _poll_interval: Duration) {}

    /// 轮询和上报结果时使用的 worker 标识，默认是主机名
    fn identity(&self) -> String {
        default_identity()
    }

    /// 暂停时不轮询，但仍然按间隔休眠
    fn paused(&self) -> bool {
        false
    }

    async fn execute(&self, task: &Task) -> anyhow::Result<TaskResult>;

    /// 每轮结束时调用，任务类型名带缓存的实现可以在这里失效缓存
    fn clear_task_definition_name_cache(&self) {}
}

/// 当前主机名，无法获取时为 `unknown`
pub fn default_identity() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}
