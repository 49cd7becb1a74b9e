use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use conductor_errors::ConductorResult;
use tracing::{debug, error};

pub const WORKER_INI_FILE_NAME: &str = "worker.ini";
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// 本地 `worker.ini` 配置
///
/// 每个任务类型一个 section，`DEFAULT` section 为所有任务提供缺省值。
/// section 名和键名先精确匹配，再忽略大小写匹配。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerIni {
    sections: HashMap<String, HashMap<String, String>>,
}

impl WorkerIni {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 当前工作目录下的 `worker.ini`
    pub fn default_path() -> ConductorResult<PathBuf> {
        Ok(std::env::current_dir()?.join(WORKER_INI_FILE_NAME))
    }

    /// 读取默认位置的配置文件，任何失败都退化为空配置
    pub fn load() -> Self {
        let path = match Self::default_path() {
            Ok(path) => path,
            Err(e) => {
                error!("无法确定worker配置文件路径: {}", e);
                return Self::empty();
            }
        };
        match Self::load_from(&path) {
            Ok(ini) => ini,
            Err(e) => {
                error!("读取worker配置文件失败: {}: {}", path.display(), e);
                Self::empty()
            }
        }
    }

    /// 文件不存在时返回空配置
    pub fn load_from(path: &Path) -> ConductorResult<Self> {
        if !path.exists() {
            debug!("worker配置文件不存在，使用空配置: {}", path.display());
            return Ok(Self::empty());
        }
        let config = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini).required(false))
            .build()?;
        Self::from_config(config)
    }

    pub fn parse(content: &str) -> ConductorResult<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Ini))
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> ConductorResult<Self> {
        let mut sections = HashMap::new();
        let root: HashMap<String, config::Value> = config.try_deserialize()?;
        for (name, value) in root {
            // section 之外的键没有意义，直接忽略
            if let Ok(table) = value.into_table() {
                collect_section(name, table, &mut sections);
            }
        }
        Ok(Self { sections })
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// 任务 section 名称（不含 `DEFAULT`）
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .sections
            .keys()
            .map(String::as_str)
            .filter(|name| !name.eq_ignore_ascii_case(DEFAULT_SECTION))
            .collect();
        names.sort_unstable();
        names
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// 先查任务自己的 section，再回退到 `DEFAULT`
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|entries| lookup(entries, key))
            .or_else(|| {
                self.section(DEFAULT_SECTION)
                    .and_then(|entries| lookup(entries, key))
            })
    }

    fn section(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(name).or_else(|| {
            self.sections
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
                .map(|(_, entries)| entries)
        })
    }
}

/// `config` 把 `[my.task]` 解析成嵌套表，这里按点号还原成原来的 section 名
fn collect_section(
    name: String,
    table: config::Map<String, config::Value>,
    sections: &mut HashMap<String, HashMap<String, String>>,
) {
    let mut entries = HashMap::new();
    for (key, value) in table {
        if matches!(value.kind, config::ValueKind::Table(_)) {
            if let Ok(nested) = value.into_table() {
                collect_section(format!("{name}.{key}"), nested, sections);
            }
        } else if let Ok(value) = value.into_string() {
            entries.insert(key, value);
        }
    }
    if !entries.is_empty() {
        sections.entry(name).or_default().extend(entries);
    }
}

fn lookup<'a>(entries: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    entries
        .get(key)
        .or_else(|| {
            entries
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}
