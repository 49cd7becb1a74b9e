use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("网络错误: {0}")]
    Network(String),
    #[error("HTTP状态错误: {status} - {body}")]
    HttpStatus { status: u16, body: String },
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的Worker: {0}")]
    InvalidWorker(String),
    #[error("Worker进程已经启动")]
    AlreadyStarted,
    #[error("进程错误: {0}")]
    Process(String),
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("指标错误: {0}")]
    Metrics(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type ConductorResult<T> = Result<T, ConductorError>;

impl ConductorError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn invalid_worker<S: Into<String>>(msg: S) -> Self {
        Self::InvalidWorker(msg.into())
    }
    pub fn process_error<S: Into<String>>(msg: S) -> Self {
        Self::Process(msg.into())
    }
    pub fn http_status<S: Into<String>>(status: u16, body: S) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// 用作指标 `exception` 标签的简短错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Network(_) => "network",
            ConductorError::HttpStatus { .. } => "http_status",
            ConductorError::Serialization(_) => "serialization",
            ConductorError::Configuration(_) => "configuration",
            ConductorError::InvalidWorker(_) => "invalid_worker",
            ConductorError::AlreadyStarted => "already_started",
            ConductorError::Process(_) => "process",
            ConductorError::TaskExecution(_) => "task_execution",
            ConductorError::Metrics(_) => "metrics",
            ConductorError::Internal(_) => "internal",
        }
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConductorError::InvalidWorker(_) | ConductorError::AlreadyStarted
        )
    }
    pub fn is_retryable(&self) -> bool {
        match self {
            ConductorError::Network(_) => true,
            ConductorError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ConductorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConductorError::Serialization(err.to_string())
        } else if let Some(status) = err.status() {
            ConductorError::http_status(status.as_u16(), err.to_string())
        } else {
            ConductorError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ConductorError {
    fn from(err: serde_json::Error) -> Self {
        ConductorError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ConductorError {
    fn from(err: std::io::Error) -> Self {
        ConductorError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for ConductorError {
    fn from(err: config::ConfigError) -> Self {
        ConductorError::Configuration(err.to_string())
    }
}

impl From<anyhow::Error> for ConductorError {
    fn from(err: anyhow::Error) -> Self {
        ConductorError::Internal(err.to_string())
    }
}
