use std::fmt;

/// 历法换算 / 排盘错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    /// 日期在对照表中不存在（月份/日期越界、闰月标记错误等）
    #[error("无效日期: {0}")]
    InvalidDate(String),
    /// 日期超出对照表覆盖范围
    #[error("日期超出支持范围: {0}")]
    UnsupportedRange(String),
    /// 引擎内部不变量被破坏（合法输入下不应出现）
    #[error("排盘计算错误: {0}")]
    Calculation(String),
}

/// 输入行解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// 必填字段缺失
    MissingField { field: &'static str },
    /// 字段格式不正确
    InvalidField {
        field: &'static str,
        value: String,
    },
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeError::MissingField { field } => write!(f, "缺少必填字段: {}", field),
            IntakeError::InvalidField { field, value } => {
                write!(f, "字段 {} 的值无效: '{}'", field, value)
            }
        }
    }
}

impl std::error::Error for IntakeError {}

/// 单个阶段的错误（只影响当前对象，不会中断整批）
#[derive(Debug)]
pub enum StageError {
    /// 输入行无法解析
    Intake(IntakeError),
    /// 历法换算 / 排盘失败
    Calendar(CalendarError),
    /// 生成接口限流（可重试）
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },
    /// 生成内容错误（不可重试）
    Content { message: String },
    /// 图表渲染失败
    Render {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 文档组装失败
    Assembly {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 投递失败
    Delivery { channel: String, message: String },
    /// 章节未全部生成
    ChaptersIncomplete { failed: Vec<(u8, String)> },
    /// 产物读写失败
    Artifact {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 非法的状态迁移
    InvalidTransition { from: String, stage: String },
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Intake(e) => write!(f, "输入错误: {}", e),
            StageError::Calendar(e) => write!(f, "{}", e),
            StageError::RateLimited {
                message,
                retry_after_ms,
            } => write!(f, "生成接口限流 (建议等待: {:?}ms): {}", retry_after_ms, message),
            StageError::Content { message } => write!(f, "生成内容错误: {}", message),
            StageError::Render { source } => write!(f, "图表渲染失败: {}", source),
            StageError::Assembly { source } => write!(f, "文档组装失败: {}", source),
            StageError::Delivery { channel, message } => {
                write!(f, "投递失败 ({}): {}", channel, message)
            }
            StageError::ChaptersIncomplete { failed } => {
                let detail = failed
                    .iter()
                    .map(|(number, reason)| format!("第{}章: {}", number, reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "{} 个章节生成失败 [{}]", failed.len(), detail)
            }
            StageError::Artifact { path, source } => {
                write!(f, "产物读写失败 ({}): {}", path, source)
            }
            StageError::InvalidTransition { from, stage } => {
                write!(f, "非法状态迁移: {} 状态下不能执行阶段 {}", from, stage)
            }
        }
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StageError::Intake(e) => Some(e),
            StageError::Calendar(e) => Some(e),
            StageError::Render { source }
            | StageError::Assembly { source }
            | StageError::Artifact { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<CalendarError> for StageError {
    fn from(err: CalendarError) -> Self {
        StageError::Calendar(err)
    }
}

impl From<IntakeError> for StageError {
    fn from(err: IntakeError) -> Self {
        StageError::Intake(err)
    }
}

impl StageError {
    /// 是否可以退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::RateLimited { .. })
    }

    /// 引擎缺陷（合法输入下不应出现，报告中需要特别标记）
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            StageError::Calendar(CalendarError::Calculation(_))
                | StageError::InvalidTransition { .. }
        )
    }

    /// 创建产物读写错误
    pub fn artifact(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StageError::Artifact {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// 创建渲染错误
    pub fn render(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StageError::Render {
            source: source.into(),
        }
    }

    /// 创建组装错误
    pub fn assembly(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StageError::Assembly {
            source: source.into(),
        }
    }

    /// 创建投递错误
    pub fn delivery(channel: impl Into<String>, message: impl fmt::Display) -> Self {
        StageError::Delivery {
            channel: channel.into(),
            message: message.to_string(),
        }
    }
}

/// 配置错误（整批致命，在处理任何对象之前终止）
#[derive(Debug)]
pub enum ConfigError {
    /// 环境变量解析失败
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 必需的凭据缺失
    MissingCredential { name: String },
    /// 必需的文件不存在
    MissingFile { name: String, path: String },
    /// 配置值不合法
    InvalidValue { name: String, reason: String },
    /// 配置文件解析失败
    FileParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::EnvVarParseFailed {
                var_name,
                value,
                expected_type,
            } => {
                write!(
                    f,
                    "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                    var_name, value, expected_type
                )
            }
            ConfigError::MissingCredential { name } => write!(f, "缺少必需的凭据: {}", name),
            ConfigError::MissingFile { name, path } => {
                write!(f, "{} 文件不存在: {}", name, path)
            }
            ConfigError::InvalidValue { name, reason } => {
                write!(f, "配置项 {} 不合法: {}", name, reason)
            }
            ConfigError::FileParseFailed { path, source } => {
                write!(f, "配置文件解析失败 ({}): {}", path, source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::FileParseFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 配置错误
    Config(ConfigError),
    /// 输入文件错误
    Input {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 报告写入错误
    Report {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Input { path, source } => write!(f, "输入文件错误 ({}): {}", path, source),
            AppError::Report { path, source } => write!(f, "报告写入错误 ({}): {}", path, source),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Input { source, .. } | AppError::Report { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            AppError::Other(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建输入文件错误
    pub fn input(
        path: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        AppError::Input {
            path: path.into(),
            source: source.into(),
        }
    }

    /// 创建报告写入错误
    pub fn report(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Report {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 阶段结果类型
pub type StageResult<T> = Result<T, StageError>;
