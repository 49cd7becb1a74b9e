use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use conductor_client::TaskResourceClient;
use conductor_config::{
    Configuration, ConfigValidator, MetricsSettings, ProcessEnv, WorkerIni,
    WorkerPropertyResolver,
};
use conductor_errors::{ConductorError, ConductorResult};
use conductor_observability::{
    clear_shards, init_logging, MetricsCollector, MetricsProvider, PrometheusMetricsCollector,
};
use tracing::{debug, error, info, warn};

use crate::process::{ProcessHandle, ProcessLauncher, ProcessRole, ProcessSpawner};
use crate::task_runner::TaskRunner;
use crate::worker::Worker;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct ManagedProcess {
    role: ProcessRole,
    handle: Box<dyn ProcessHandle>,
    exited: bool,
}

impl ManagedProcess {
    /// 已退出时返回 true，并记录退出状态
    fn reap(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.handle.try_wait() {
            Ok(Some(status)) => {
                info!(pid = self.handle.id(), role = %self.role.env_value(), %status, "Process exited");
                self.exited = true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(pid = self.handle.id(), "检查进程状态失败: {}", e);
                self.exited = true;
            }
        }
        self.exited
    }
}

/// 多 worker 进程组
///
/// 每个 worker 在独立的子进程中运行自己的轮询循环；配置了指标时
/// 额外启动一个指标进程。子进程由当前程序重新执行产生，
/// 在子进程中 [`start`](Self::start) 会直接进入对应角色并在结束后退出进程。
pub struct WorkerHost {
    workers: Vec<Arc<dyn Worker>>,
    configuration: Configuration,
    metrics_settings: Option<MetricsSettings>,
    worker_ini: WorkerIni,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    processes: Mutex<Vec<ManagedProcess>>,
    started: AtomicBool,
}

impl WorkerHost {
    /// 校验所有 worker 并读取 `worker.ini`，不启动任何进程
    pub fn new(
        workers: Vec<Arc<dyn Worker>>,
        configuration: Configuration,
        metrics_settings: Option<MetricsSettings>,
    ) -> ConductorResult<Self> {
        for (index, worker) in workers.iter().enumerate() {
            validate_worker(index, worker.as_ref())?;
        }
        configuration.validate()?;
        if let Some(settings) = &metrics_settings {
            settings.validate()?;
        }

        Ok(Self {
            workers,
            configuration,
            metrics_settings,
            worker_ini: WorkerIni::load(),
            spawner: None,
            processes: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// 替换子进程启动方式，默认重新执行当前程序
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_worker_ini(mut self, worker_ini: WorkerIni) -> Self {
        self.worker_ini = worker_ini;
        self
    }

    pub fn workers(&self) -> &[Arc<dyn Worker>] {
        &self.workers
    }

    pub fn worker_ini(&self) -> &WorkerIni {
        &self.worker_ini
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn process_count(&self) -> usize {
        self.lock_processes().len()
    }

    pub fn process_ids(&self) -> Vec<u32> {
        self.lock_processes().iter().map(|p| p.handle.id()).collect()
    }

    /// 为每个 worker 启动一个进程，配置了指标时再启动指标进程
    ///
    /// 在子进程中调用时进入该进程的角色，执行结束后退出进程，不会返回。
    pub fn start(&self) -> ConductorResult<()> {
        if let Some(role) = ProcessRole::from_env() {
            self.run_child(role);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConductorError::AlreadyStarted);
        }

        let spawner: Arc<dyn ProcessSpawner> = match &self.spawner {
            Some(spawner) => Arc::clone(spawner),
            None => Arc::new(ProcessLauncher::current_exe()?),
        };

        info!("Starting worker processes...");
        if let Some(settings) = &self.metrics_settings {
            if let Err(e) = clear_shards(&settings.directory) {
                warn!("清理旧的指标分片失败: {}", e);
            }
        }

        let mut roles: Vec<ProcessRole> = (0..self.workers.len()).map(ProcessRole::Worker).collect();
        if self.metrics_settings.is_some() {
            roles.push(ProcessRole::Metrics);
        }

        for role in roles {
            match spawner.spawn(role) {
                Ok(handle) => {
                    debug!(pid = handle.id(), role = %role.env_value(), "Started process");
                    self.lock_processes().push(ManagedProcess {
                        role,
                        handle,
                        exited: false,
                    });
                }
                Err(e) => {
                    error!("启动子进程失败: {}", e);
                    self.stop();
                    return Err(e);
                }
            }
        }
        info!(count = self.process_count(), "Started all processes");
        Ok(())
    }

    /// 阻塞直到所有子进程退出
    pub fn join(&self) {
        loop {
            let all_exited = self
                .lock_processes()
                .iter_mut()
                .fold(true, |all, process| process.reap() && all);
            if all_exited {
                break;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        info!("Joined all processes");
    }

    /// 结束所有子进程；可以重复调用，单个进程失败不影响其他进程
    pub fn stop(&self) {
        let mut processes = self.lock_processes();
        if processes.is_empty() {
            return;
        }
        info!("Stopping worker processes...");
        for process in processes.iter_mut() {
            if process.reap() {
                continue;
            }
            let pid = process.handle.id();
            match process.handle.kill() {
                Ok(()) => debug!(pid, "Killed process"),
                Err(e) => {
                    debug!(pid, "结束进程失败，尝试terminate: {}", e);
                    match process.handle.terminate() {
                        Ok(()) => debug!(pid, "Terminated process"),
                        Err(e) => warn!(pid, "terminate进程失败: {}", e),
                    }
                }
            }
        }
        info!("Stopped worker processes");
    }

    fn lock_processes(&self) -> MutexGuard<'_, Vec<ManagedProcess>> {
        self.processes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run_child(&self, role: ProcessRole) -> ! {
        let code = match self.run_role(role) {
            Ok(()) => 0,
            Err(e) => {
                error!(role = %role.env_value(), "子进程异常退出: {}", e);
                1
            }
        };
        std::process::exit(code)
    }

    fn run_role(&self, role: ProcessRole) -> ConductorResult<()> {
        if let Err(e) = init_logging(&self.configuration.effective_log_config()) {
            eprintln!("初始化日志失败: {e}");
        }
        match role {
            ProcessRole::Worker(index) => self.run_worker(index),
            ProcessRole::Metrics => self.run_metrics_provider(),
        }
    }

    fn run_worker(&self, index: usize) -> ConductorResult<()> {
        let worker = self.workers.get(index).cloned().ok_or_else(|| {
            ConductorError::process_error(format!("没有索引为{index}的worker"))
        })?;

        let runtime_config = WorkerPropertyResolver::new(&ProcessEnv, &self.worker_ini).resolve(
            worker.task_definition_name(),
            worker.domain(),
            worker.poll_interval(),
        );

        let metrics: Option<Arc<dyn MetricsCollector>> = match &self.metrics_settings {
            Some(settings) => match PrometheusMetricsCollector::install(settings) {
                Ok(collector) => Some(collector as Arc<dyn MetricsCollector>),
                Err(e) => {
                    warn!("安装指标收集器失败，继续运行但不上报指标: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let task_api = Arc::new(TaskResourceClient::new(&self.configuration)?);
        TaskRunner::new(worker, task_api, metrics, runtime_config).run_blocking()
    }

    fn run_metrics_provider(&self) -> ConductorResult<()> {
        let settings = self
            .metrics_settings
            .clone()
            .ok_or_else(|| ConductorError::process_error("指标进程缺少指标配置"))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConductorError::process_error(format!("创建tokio运行时失败: {e}")))?;
        runtime
            .block_on(MetricsProvider::new(settings).run())
            .map_err(|e| ConductorError::Metrics(format!("{e:#}")))
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate_worker(index: usize, worker: &dyn Worker) -> ConductorResult<()> {
    let name = worker.task_definition_name();
    if name.trim().is_empty() {
        return Err(ConductorError::invalid_worker(format!(
            "第{index}个worker的任务定义名为空"
        )));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(ConductorError::invalid_worker(format!(
            "任务定义名不能包含空白字符: {name:?}"
        )));
    }
    Ok(())
}
