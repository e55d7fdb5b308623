use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

/// 默认配置文件
const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 重复对象的处理策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// 都处理，在报告中标记为疑似重复
    ProcessBoth,
    /// 只处理第一个，后续重复项跳过
    SkipDuplicate,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process_both" => Ok(DuplicatePolicy::ProcessBoth),
            "skip_duplicate" => Ok(DuplicatePolicy::SkipDuplicate),
            other => Err(format!("未知的重复处理策略: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 输入表（.csv / .toml）
    pub input_path: String,
    /// 输出目录（断点续跑依据）
    pub output_dir: String,
    /// 运行日志文件
    pub run_log_file: String,
    /// 生成接口的系统提示词文件
    pub master_prompt_path: String,
    /// 同时处理的对象数量
    pub max_concurrent_subjects: usize,
    /// 全局同时进行的生成调用数量（跨所有对象）
    pub max_concurrent_generations: usize,
    /// 单个章节的最大尝试次数（仅限流可重试）
    pub max_generation_attempts: u32,
    /// 限流退避的基础等待时间（毫秒），按 2^n 递增
    pub backoff_base_ms: u64,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_max_tokens: u32,
    // --- 排盘配置 ---
    /// 节气时刻使用的时区（分钟），默认 UTC+9
    pub utc_offset_minutes: i32,
    /// 大运排几步
    pub luck_cycle_len: usize,
    /// 报告年份，默认当年
    pub report_year: Option<i32>,
    /// 岁运覆盖的年数
    pub annual_span: u32,
    pub duplicate_policy: DuplicatePolicy,
    // --- 渲染 ---
    pub chrome_executable: Option<String>,
    // --- 投递配置（未配置的渠道不启用）---
    pub upload_endpoint: Option<String>,
    pub upload_token: Option<String>,
    pub mail_endpoint: Option<String>,
    pub mail_token: Option<String>,
    pub mail_sender: Option<String>,
    // --- 费用估算 ---
    pub avg_input_tokens: u32,
    pub avg_output_tokens: u32,
    /// 每百万输入 token 的价格（美元）
    pub input_price_per_million: f64,
    /// 每百万输出 token 的价格（美元）
    pub output_price_per_million: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: "input/subjects.csv".to_string(),
            output_dir: "output".to_string(),
            run_log_file: "run_log.txt".to_string(),
            master_prompt_path: "prompts/master_prompt.txt".to_string(),
            max_concurrent_subjects: 1,
            max_concurrent_generations: 5,
            max_generation_attempts: 4,
            backoff_base_ms: 2_000,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_max_tokens: 8_000,
            utc_offset_minutes: 540,
            luck_cycle_len: 10,
            report_year: None,
            annual_span: 10,
            duplicate_policy: DuplicatePolicy::ProcessBoth,
            chrome_executable: None,
            upload_endpoint: None,
            upload_token: None,
            mail_endpoint: None,
            mail_token: None,
            mail_sender: None,
            avg_input_tokens: 3_000,
            avg_output_tokens: 2_000,
            input_price_per_million: 3.0,
            output_price_per_million: 15.0,
        }
    }
}

impl Config {
    /// 加载配置：配置文件（`SAJU_CONFIG` 或 `./config.toml`，可选）→ 环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("SAJU_CONFIG").ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_FILE));

        let base = if path.exists() {
            Self::from_file(&path)?
        } else if explicit.is_some() {
            return Err(ConfigError::MissingFile {
                name: "配置".to_string(),
                path: path.display().to_string(),
            });
        } else {
            Self::default()
        };

        base.with_env()
    }

    /// 默认值 + 环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env()
    }

    /// 读取 TOML 配置文件，缺省字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::FileParseFailed {
            path: path.display().to_string(),
            source: Box::new(e),
        })?;
        Self::from_toml_str(&text).map_err(|e| match e {
            ConfigError::FileParseFailed { source, .. } => ConfigError::FileParseFailed {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::FileParseFailed {
            path: "<inline>".to_string(),
            source: Box::new(e),
        })
    }

    /// 用环境变量覆盖
    pub fn with_env(self) -> Result<Self, ConfigError> {
        Ok(Self {
            input_path: env_or("INPUT_PATH", self.input_path),
            output_dir: env_or("OUTPUT_DIR", self.output_dir),
            run_log_file: env_or("RUN_LOG_FILE", self.run_log_file),
            master_prompt_path: env_or("MASTER_PROMPT_PATH", self.master_prompt_path),
            max_concurrent_subjects: env_parse(
                "MAX_CONCURRENT_SUBJECTS",
                self.max_concurrent_subjects,
            )?,
            max_concurrent_generations: env_parse(
                "MAX_CONCURRENT_GENERATIONS",
                self.max_concurrent_generations,
            )?,
            max_generation_attempts: env_parse(
                "MAX_GENERATION_ATTEMPTS",
                self.max_generation_attempts,
            )?,
            backoff_base_ms: env_parse("BACKOFF_BASE_MS", self.backoff_base_ms)?,
            llm_api_key: env_or("LLM_API_KEY", self.llm_api_key),
            llm_api_base_url: env_or("LLM_API_BASE_URL", self.llm_api_base_url),
            llm_model_name: env_or("LLM_MODEL_NAME", self.llm_model_name),
            llm_max_tokens: env_parse("LLM_MAX_TOKENS", self.llm_max_tokens)?,
            utc_offset_minutes: env_parse("UTC_OFFSET_MINUTES", self.utc_offset_minutes)?,
            luck_cycle_len: env_parse("LUCK_CYCLE_LEN", self.luck_cycle_len)?,
            report_year: env_parse_opt("REPORT_YEAR", self.report_year)?,
            annual_span: env_parse("ANNUAL_SPAN", self.annual_span)?,
            duplicate_policy: env_parse("DUPLICATE_POLICY", self.duplicate_policy)?,
            chrome_executable: env_opt("CHROME_EXECUTABLE", self.chrome_executable),
            upload_endpoint: env_opt("UPLOAD_ENDPOINT", self.upload_endpoint),
            upload_token: env_opt("UPLOAD_TOKEN", self.upload_token),
            mail_endpoint: env_opt("MAIL_ENDPOINT", self.mail_endpoint),
            mail_token: env_opt("MAIL_TOKEN", self.mail_token),
            mail_sender: env_opt("MAIL_SENDER", self.mail_sender),
            avg_input_tokens: env_parse("AVG_INPUT_TOKENS", self.avg_input_tokens)?,
            avg_output_tokens: env_parse("AVG_OUTPUT_TOKENS", self.avg_output_tokens)?,
            input_price_per_million: env_parse(
                "INPUT_PRICE_PER_MILLION",
                self.input_price_per_million,
            )?,
            output_price_per_million: env_parse(
                "OUTPUT_PRICE_PER_MILLION",
                self.output_price_per_million,
            )?,
        })
    }

    /// 报告年份
    pub fn effective_report_year(&self) -> i32 {
        self.report_year
            .unwrap_or_else(|| chrono::Datelike::year(&chrono::Local::now()))
    }

    /// 整批致命的检查：任何一项不满足都不处理任何对象
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_api_key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "LLM_API_KEY".to_string(),
            });
        }
        if self.max_concurrent_subjects == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_concurrent_subjects".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.max_concurrent_generations == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_concurrent_generations".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.max_generation_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_generation_attempts".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.luck_cycle_len == 0 || self.luck_cycle_len > 12 {
            return Err(ConfigError::InvalidValue {
                name: "luck_cycle_len".to_string(),
                reason: "必须在 1..=12 之间".to_string(),
            });
        }
        if !(-720..=840).contains(&self.utc_offset_minutes) {
            return Err(ConfigError::InvalidValue {
                name: "utc_offset_minutes".to_string(),
                reason: format!("{} 不是有效的时区偏移", self.utc_offset_minutes),
            });
        }
        if self.upload_endpoint.is_some() && self.upload_token.is_none() {
            return Err(ConfigError::MissingCredential {
                name: "UPLOAD_TOKEN".to_string(),
            });
        }
        if self.mail_endpoint.is_some()
            && (self.mail_token.is_none() || self.mail_sender.is_none())
        {
            return Err(ConfigError::MissingCredential {
                name: "MAIL_TOKEN / MAIL_SENDER".to_string(),
            });
        }
        for (name, path) in [
            ("提示词", &self.master_prompt_path),
            ("输入", &self.input_path),
        ] {
            if !Path::new(path).is_file() {
                return Err(ConfigError::MissingFile {
                    name: name.to_string(),
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_opt(name: &str, default: Option<String>) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or(default)
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    Ok(env_parse_opt(name, None)?.unwrap_or(default))
}

fn env_parse_opt<T: FromStr>(name: &str, default: Option<T>) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value,
                expected_type: std::any::type_name::<T>().to_string(),
            }),
        Err(_) => Ok(default),
    }
}
