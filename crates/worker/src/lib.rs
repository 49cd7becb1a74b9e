pub mod function_worker;
pub mod process;
pub mod task_runner;
pub mod worker;
pub mod worker_host;

pub use function_worker::{FunctionWorker, WorkerFunction};
pub use process::{ChildProcess, ProcessHandle, ProcessLauncher, ProcessRole, ProcessSpawner, ROLE_ENV};
pub use task_runner::{TaskRunner, UPDATE_RETRY_ATTEMPTS, UPDATE_RETRY_BACKOFF_STEP};
pub use worker::{default_identity, Worker, DEFAULT_POLL_INTERVAL};
pub use worker_host::WorkerHost;
