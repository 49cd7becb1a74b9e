use std::time::Duration;

use conductor_errors::{ConductorError, ConductorResult};
use tracing::{debug, error};

use crate::env_source::EnvSource;
use crate::worker_ini::WorkerIni;

pub const ENV_PREFIX: &str = "conductor_worker";

const DOMAIN: &str = "domain";
const POLLING_INTERVAL: &str = "polling_interval";

/// 某个任务类型在 Worker 进程内的生效配置
///
/// 进程启动时解析一次，之后只读。
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRuntimeConfig {
    pub task_type: String,
    pub domain: Option<String>,
    pub poll_interval: Duration,
}

/// 解析秒为单位的轮询间隔，拒绝负数、NaN 和无穷大
pub fn parse_poll_interval(raw: &str) -> ConductorResult<Duration> {
    let seconds: f64 = raw.trim().parse().map_err(|e| {
        ConductorError::config_error(format!("polling_interval '{raw}' 不是数字: {e}"))
    })?;
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        ConductorError::config_error(format!("polling_interval '{raw}' 无效: {e}"))
    })
}

/// 按优先级解析 domain 和 polling_interval：
///
/// 1. `conductor_worker_<taskType>_<field>`（以及大写形式）
/// 2. `conductor_worker_<field>`（以及大写形式）
/// 3. `worker.ini` 中任务自己的 section，回退到 DEFAULT section
/// 4. Worker 构造时的默认值
///
/// 数值格式错误只记录日志，保留上一层的值。
pub struct WorkerPropertyResolver<'a> {
    env: &'a dyn EnvSource,
    ini: &'a WorkerIni,
}

impl<'a> WorkerPropertyResolver<'a> {
    pub fn new(env: &'a dyn EnvSource, ini: &'a WorkerIni) -> Self {
        Self { env, ini }
    }

    pub fn resolve(
        &self,
        task_type: &str,
        default_domain: Option<&str>,
        default_poll_interval: Duration,
    ) -> WorkerRuntimeConfig {
        let mut domain = default_domain
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        let mut poll_interval = default_poll_interval;

        let env_domain = self.env_property(DOMAIN, task_type);
        if let Some(value) = &env_domain {
            domain = Some(value.clone());
        }

        let mut poll_interval_from_env = false;
        if let Some(raw) = self.env_property(POLLING_INTERVAL, task_type) {
            match parse_poll_interval(&raw) {
                Ok(value) => {
                    poll_interval = value;
                    poll_interval_from_env = true;
                }
                Err(e) => error!(task_type, "读取环境变量中的轮询间隔失败: {}", e),
            }
        }

        if env_domain.is_none() {
            if let Some(value) = self.ini.get(task_type, DOMAIN) {
                domain = Some(value.to_string()).filter(|d| !d.is_empty());
            }
        }

        if !poll_interval_from_env {
            if let Some(raw) = self.ini.get(task_type, POLLING_INTERVAL) {
                match parse_poll_interval(raw) {
                    Ok(value) => {
                        poll_interval = value;
                        debug!(task_type, "从配置文件覆盖轮询间隔为 {:?}", poll_interval);
                    }
                    Err(e) => error!(
                        task_type,
                        "读取配置文件中的轮询间隔失败: {}，使用 {:?}", e, poll_interval
                    ),
                }
            }
        }

        WorkerRuntimeConfig {
            task_type: task_type.to_string(),
            domain,
            poll_interval,
        }
    }

    /// 任务专属变量优先于通用变量，空字符串视为未设置
    fn env_property(&self, property: &str, task_type: &str) -> Option<String> {
        let prefix_upper = ENV_PREFIX.to_uppercase();
        let property_upper = property.to_uppercase();

        let specific = [
            format!("{ENV_PREFIX}_{task_type}_{property}"),
            format!("{prefix_upper}_{task_type}_{property_upper}"),
            format!("{prefix_upper}_{}_{property_upper}", task_type.to_uppercase()),
        ];
        let generic = [
            format!("{ENV_PREFIX}_{property}"),
            format!("{prefix_upper}_{property_upper}"),
        ];

        specific
            .iter()
            .chain(generic.iter())
            .find_map(|key| self.env.var(key).filter(|value| !value.is_empty()))
    }
}
