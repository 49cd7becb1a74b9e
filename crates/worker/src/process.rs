use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use conductor_errors::{ConductorError, ConductorResult};

/// 子进程角色通过这个环境变量传递
pub const ROLE_ENV: &str = "CONDUCTOR_WORKER_HOST_ROLE";

/// 子进程在进程组中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// 运行第 n 个 worker 的轮询循环
    Worker(usize),
    /// 合并指标分片
    Metrics,
}

impl ProcessRole {
    /// 当前进程的角色，父进程返回 `None`
    pub fn from_env() -> Option<Self> {
        std::env::var(ROLE_ENV).ok().and_then(|value| Self::parse(&value))
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "metrics" => Some(ProcessRole::Metrics),
            other => other
                .strip_prefix("worker:")
                .and_then(|index| index.parse().ok())
                .map(ProcessRole::Worker),
        }
    }

    pub fn env_value(&self) -> String {
        match self {
            ProcessRole::Worker(index) => format!("worker:{index}"),
            ProcessRole::Metrics => "metrics".to_string(),
        }
    }
}

/// 已启动子进程的句柄
pub trait ProcessHandle: Send {
    fn id(&self) -> u32;

    /// 强制结束进程
    fn kill(&mut self) -> io::Result<()>;

    /// 请求进程退出，`kill` 失败时使用
    fn terminate(&mut self) -> io::Result<()>;

    /// 非阻塞地检查进程是否已经退出
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;
}

/// 启动子进程
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, role: ProcessRole) -> ConductorResult<Box<dyn ProcessHandle>>;
}

/// 基于 `std::process::Child` 的句柄
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        let status = Command::new("kill")
            .arg("-TERM")
            .arg(self.child.id().to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("kill -TERM 失败: {status}")))
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

/// 重新执行一个程序作为子进程，并通过 [`ROLE_ENV`] 告知角色
///
/// 默认执行当前可执行文件和当前参数，子进程里的 `WorkerHost::start`
/// 据此进入对应角色。
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    quiet: bool,
}

impl ProcessLauncher {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            quiet: false,
        }
    }

    pub fn current_exe() -> ConductorResult<Self> {
        let program = std::env::current_exe()
            .map_err(|e| ConductorError::process_error(format!("获取当前可执行文件失败: {e}")))?;
        let mut launcher = Self::new(program);
        launcher.args = std::env::args_os().skip(1).collect();
        Ok(launcher)
    }

    /// 替换子进程参数
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env<K: Into<OsString>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// 丢弃子进程的标准输出和标准错误
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn command(&self, role: ProcessRole) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(ROLE_ENV, role.env_value())
            .stdin(Stdio::null());
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
    }
}

impl ProcessSpawner for ProcessLauncher {
    fn spawn(&self, role: ProcessRole) -> ConductorResult<Box<dyn ProcessHandle>> {
        let child = self.command(role).spawn().map_err(|e| {
            ConductorError::process_error(format!(
                "启动{}进程失败: {}: {}",
                role.env_value(),
                self.program.display(),
                e
            ))
        })?;
        Ok(Box::new(ChildProcess::new(child)))
    }
}
