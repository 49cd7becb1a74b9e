use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use conductor_config::MetricsSettings;
use tracing::{debug, error, info, warn};

const SHARD_PREFIX: &str = "worker-";
const SHARD_EXTENSION: &str = "prom";

/// Worker 进程的指标分片路径
pub fn shard_path(directory: &Path, pid: u32) -> PathBuf {
    directory.join(format!("{SHARD_PREFIX}{pid}.{SHARD_EXTENSION}"))
}

/// 删除上一次运行遗留的分片，目录不存在时什么也不做
pub fn clear_shards(directory: &Path) -> Result<()> {
    if !directory.exists() {
        return Ok(());
    }
    for path in list_shards(directory)? {
        std::fs::remove_file(&path)
            .with_context(|| format!("删除指标分片失败: {}", path.display()))?;
    }
    Ok(())
}

fn list_shards(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut shards = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let path = entry?.path();
        let is_shard = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(SHARD_PREFIX))
            && path.extension().and_then(|ext| ext.to_str()) == Some(SHARD_EXTENSION);
        if is_shard {
            shards.push(path);
        }
    }
    shards.sort();
    Ok(shards)
}

/// 合并多个进程的 Prometheus 文本
///
/// 同一指标族的样本合并成连续的一组，`# HELP` / `# TYPE` 只保留一份。
/// 相同标签的样本跨进程聚合：counter、histogram 以及 summary 的
/// `_sum` / `_count` 求和，gauge 和 summary 分位数取最大值。
/// 样本的时间戳会被丢弃。
pub fn merge_exposition<I, S>(texts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for text in texts {
        for line in text.as_ref().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('#') {
                let mut parts = comment.trim_start().splitn(3, ' ');
                let (Some(keyword), Some(name)) = (parts.next(), parts.next()) else {
                    continue;
                };
                if keyword != "HELP" && keyword != "TYPE" {
                    continue;
                }
                let rest = parts.next().unwrap_or("").trim().to_string();
                let family = family_entry(&mut families, &mut index, name);
                if keyword == "HELP" {
                    family.help.get_or_insert(rest);
                } else {
                    family.kind.get_or_insert(rest);
                }
                continue;
            }

            let Some((series, value)) = split_sample(line) else {
                debug!("无法解析的指标行: {}", line);
                continue;
            };
            let sample_name = series.split('{').next().unwrap_or(series);
            let family_name = owning_family(&index, sample_name).to_string();
            family_entry(&mut families, &mut index, &family_name).add_sample(series, value);
        }
    }

    let mut merged = String::new();
    for family in &families {
        if let Some(help) = &family.help {
            merged.push_str(&format!("# HELP {} {}\n", family.name, help));
        }
        if let Some(kind) = &family.kind {
            merged.push_str(&format!("# TYPE {} {}\n", family.name, kind));
        }
        for (series, value) in &family.samples {
            merged.push_str(&format!("{} {}\n", series, format_value(*value)));
        }
    }
    merged
}

struct MetricFamily {
    name: String,
    help: Option<String>,
    kind: Option<String>,
    samples: Vec<(String, f64)>,
    sample_index: HashMap<String, usize>,
}

impl MetricFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: None,
            kind: None,
            samples: Vec::new(),
            sample_index: HashMap::new(),
        }
    }

    fn add_sample(&mut self, series: &str, value: f64) {
        let Some(&position) = self.sample_index.get(series) else {
            self.sample_index
                .insert(series.to_string(), self.samples.len());
            self.samples.push((series.to_string(), value));
            return;
        };
        let takes_max = match self.kind.as_deref() {
            Some("gauge") => true,
            Some("summary") => series.contains("quantile=\""),
            _ => false,
        };
        let current = &mut self.samples[position].1;
        *current = if takes_max {
            current.max(value)
        } else {
            *current + value
        };
    }
}

fn family_entry<'a>(
    families: &'a mut Vec<MetricFamily>,
    index: &mut HashMap<String, usize>,
    name: &str,
) -> &'a mut MetricFamily {
    let position = *index.entry(name.to_string()).or_insert_with(|| {
        families.push(MetricFamily::new(name));
        families.len() - 1
    });
    &mut families[position]
}

/// histogram / summary 的 `_bucket`、`_sum`、`_count` 样本归属于基础指标族
fn owning_family<'a>(index: &HashMap<String, usize>, sample_name: &'a str) -> &'a str {
    if index.contains_key(sample_name) {
        return sample_name;
    }
    ["_bucket", "_sum", "_count"]
        .iter()
        .filter_map(|suffix| sample_name.strip_suffix(suffix))
        .find(|base| index.contains_key(*base))
        .unwrap_or(sample_name)
}

/// 拆分为 `name{labels}` 和数值，标签值里的空格和 `}` 不影响拆分
fn split_sample(line: &str) -> Option<(&str, f64)> {
    let series_end = match line.find('{') {
        Some(open) => {
            let mut in_quotes = false;
            let mut escaped = false;
            let mut close = None;
            for (offset, ch) in line[open..].char_indices() {
                match ch {
                    _ if escaped => escaped = false,
                    '\\' if in_quotes => escaped = true,
                    '"' => in_quotes = !in_quotes,
                    '}' if !in_quotes => {
                        close = Some(open + offset + 1);
                        break;
                    }
                    _ => {}
                }
            }
            close?
        }
        None => line.find(char::is_whitespace)?,
    };
    let (series, rest) = line.split_at(series_end);
    let value = rest.split_whitespace().next()?.parse().ok()?;
    Some((series.trim(), value))
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// 指标进程：周期性合并所有 Worker 分片，可选地通过 HTTP 暴露
pub struct MetricsProvider {
    settings: MetricsSettings,
}

impl MetricsProvider {
    pub fn new(settings: MetricsSettings) -> Self {
        Self { settings }
    }

    /// 合并一次所有分片并原子地写入输出文件
    pub fn collect_once(&self) -> Result<String> {
        let mut texts = Vec::new();
        for shard in list_shards(&self.settings.directory)? {
            match std::fs::read_to_string(&shard) {
                Ok(text) => texts.push(text),
                // 分片可能正在被替换
                Err(e) => debug!("读取指标分片失败: {}: {}", shard.display(), e),
            }
        }
        let merged = merge_exposition(&texts);

        let output = self.settings.output_path();
        let tmp = output.with_extension("tmp");
        std::fs::write(&tmp, &merged)?;
        std::fs::rename(&tmp, &output)?;
        Ok(merged)
    }

    pub async fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.settings.directory).with_context(|| {
            format!("创建指标目录失败: {}", self.settings.directory.display())
        })?;

        if let Some(address) = self.settings.listen_address {
            let listener = tokio::net::TcpListener::bind(address)
                .await
                .with_context(|| format!("绑定指标端口失败: {address}"))?;
            let app = metrics_router(self.settings.output_path());
            info!("指标HTTP端点已启动: http://{}/metrics", address);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!("指标HTTP服务异常退出: {}", e);
                }
            });
        }

        info!(
            output = %self.settings.output_path().display(),
            "Metrics provider started"
        );
        let mut ticker = tokio::time::interval(self.settings.update_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.collect_once() {
                warn!("合并指标分片失败: {}", e);
            }
        }
    }
}

/// `GET /metrics` 返回最近一次合并的结果
pub fn metrics_router(output_path: PathBuf) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .with_state(output_path)
}

async fn serve_metrics(State(output_path): State<PathBuf>) -> impl IntoResponse {
    let body = tokio::fs::read_to_string(&output_path)
        .await
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
