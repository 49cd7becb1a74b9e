use std::sync::Arc;
use std::time::Duration;

use conductor_config::{Configuration, MetricsSettings};
use conductor_domain::Task;
use conductor_observability::init_logging;
use conductor_worker::{FunctionWorker, Worker, WorkerFunction, WorkerHost};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct GreetInput {
    name: String,
}

fn main() -> anyhow::Result<()> {
    let configuration = Configuration::from_env();
    init_logging(&configuration.effective_log_config())?;

    // 只接收输入、只返回输出
    let greet = FunctionWorker::new(
        "greet",
        WorkerFunction::input_to_output(|input: GreetInput| {
            Ok(json!({ "greeting": format!("Hello, {}!", input.name) }))
        }),
    )
    .with_poll_interval(Duration::from_millis(500));

    // 接收整个任务，返回标量输出
    let count_inputs = FunctionWorker::new(
        "count_inputs",
        WorkerFunction::task_to_output(|task: &Task| Ok(task.input_data.len())),
    );

    let workers: Vec<Arc<dyn Worker>> = vec![Arc::new(greet), Arc::new(count_inputs)];
    let metrics = MetricsSettings::new(std::env::temp_dir().join("conductor-demo-metrics"));
    let host = WorkerHost::new(workers, configuration, Some(metrics))?;

    host.start()?;
    host.join();
    Ok(())
}
