//! LLM 服务 - 业务能力层
//!
//! 只负责"生成一个章节"的能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型（兼容 OpenAI API 的服务）

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use super::ChapterGenerator;
use crate::config::Config;
use crate::error::StageError;
use crate::models::chapter::ChapterTemplate;
use crate::models::subject::SubjectRecord;

/// 接口错误对象里的 type / code 取这些值时可以退避重试
const RETRYABLE_API_KINDS: [&str; 7] = [
    "rate_limit_exceeded",
    "rate_limit_error",
    "overloaded",
    "overloaded_error",
    "server_error",
    "service_unavailable",
    "timeout",
];

/// 额度用尽，重试没有意义
const QUOTA_EXHAUSTED: &str = "insufficient_quota";

/// 没有结构化信息时（5xx 的原始响应体、流式错误）按文本兜底判断
const RETRYABLE_MARKERS: [&str; 13] = [
    "429",
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "529",
    "502",
    "503",
    "504",
    "bad gateway",
    "service unavailable",
    "timed out",
    "timeout",
];

/// LLM 服务
///
/// 职责：
/// - 以主提示词为系统消息，为单个对象生成单个章节
/// - 把接口错误归类为限流（可重试）或内容错误（不可重试）
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    max_tokens: u32,
    master_prompt: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    ///
    /// # 参数
    /// - `config`: 接口地址、密钥、模型
    /// - `master_prompt`: 系统提示词全文
    pub fn new(config: &Config, master_prompt: String) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            max_tokens: config.llm_max_tokens,
            master_prompt,
        }
    }

    /// 通用的 LLM 调用
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    ///
    /// # 返回
    /// 返回 LLM 的响应内容
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
    ) -> Result<String, StageError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.chars().count());

        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()
                .map_err(|e| content_error(format!("无法构建系统消息: {}", e)))?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| content_error(format!("无法构建用户消息: {}", e)))?;
        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.7)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|e| content_error(format!("无法构建请求: {}", e)))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            classify_openai_error(&e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| content_error("LLM 返回内容为空"))?;

        Ok(content)
    }
}

#[async_trait]
impl ChapterGenerator for LlmService {
    async fn generate_chapter(
        &self,
        chapter: &ChapterTemplate,
        subject: &SubjectRecord,
    ) -> Result<String, StageError> {
        let user_message = build_chapter_message(chapter, subject);
        self.send_to_llm(&user_message, Some(self.master_prompt.as_str()))
            .await
    }
}

/// 构建章节生成的用户消息
pub fn build_chapter_message(chapter: &ChapterTemplate, subject: &SubjectRecord) -> String {
    format!(
        "[사주 데이터]\n{}\n위 데이터를 바탕으로 \"{}\"을 작성해주세요.\n목차의 소주제를 모두 포함하여 작성하세요.\n고객명: {}",
        subject.to_prompt_text(),
        chapter.heading(),
        subject.name()
    )
}

/// 把接口错误归类为可重试（限流、过载、网络故障）或内容错误
pub fn classify_openai_error(err: &OpenAIError) -> StageError {
    match err {
        OpenAIError::Reqwest(e) => {
            let transient = e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status()
                    .is_some_and(|s| s.as_u16() == 429 || s.is_server_error());
            if transient {
                rate_limited(err.to_string(), None)
            } else {
                content_error(err.to_string())
            }
        }
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::JSONDeserialize(..)
        | OpenAIError::InvalidArgument(_)
        | OpenAIError::FileSaveError(_)
        | OpenAIError::FileReadError(_) => content_error(err.to_string()),
        OpenAIError::StreamError(_) => classify_failure(&err.to_string()),
    }
}

fn classify_api_error(api: &ApiError) -> StageError {
    let kinds: Vec<&str> = [api.r#type.as_deref(), api.code.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    let message = api.to_string();

    if kinds.contains(&QUOTA_EXHAUSTED) {
        return content_error(message);
    }
    if kinds.iter().any(|k| RETRYABLE_API_KINDS.contains(k)) {
        let hint = parse_retry_after(&api.message.to_lowercase());
        return rate_limited(message, hint);
    }
    if kinds.is_empty() {
        // 5xx 的响应体不是 JSON，只剩原文
        return classify_failure(&message);
    }
    content_error(message)
}

/// 按错误信息文本归类：限流 / 过载 / 超时可以重试，其余都是内容错误
pub fn classify_failure(message: &str) -> StageError {
    let lowered = message.to_lowercase();
    if RETRYABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        StageError::RateLimited {
            message: message.to_string(),
            retry_after_ms: parse_retry_after(&lowered),
        }
    } else {
        content_error(message)
    }
}

/// 从 "retry after 20s" / "try again in 1.5s" 之类的提示中提取等待时间
fn parse_retry_after(lowered: &str) -> Option<u64> {
    let start = ["retry after ", "try again in "]
        .iter()
        .find_map(|marker| lowered.find(marker).map(|i| i + marker.len()))?;
    let rest = &lowered[start..];
    let number: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = number.parse().ok()?;
    let unit = rest[number.len()..].trim_start();
    let ms = if unit.starts_with("ms") {
        value
    } else {
        value * 1000.0
    };
    Some(ms.round() as u64)
}

fn rate_limited(message: impl Into<String>, retry_after_ms: Option<u64>) -> StageError {
    StageError::RateLimited {
        message: message.into(),
        retry_after_ms,
    }
}

fn content_error(message: impl Into<String>) -> StageError {
    StageError::Content {
        message: message.into(),
    }
}

/// 批次费用估算
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl CostEstimate {
    /// 按平均 token 数和每百万 token 价格估算
    ///
    /// # 参数
    /// - `calls`: 预计的生成调用次数（对象数 × 章节数）
    pub fn estimate(calls: u64, config: &Config) -> Self {
        let input_tokens = calls * config.avg_input_tokens as u64;
        let output_tokens = calls * config.avg_output_tokens as u64;
        let cost_usd = input_tokens as f64 / 1_000_000.0 * config.input_price_per_million
            + output_tokens as f64 / 1_000_000.0 * config.output_price_per_million;
        Self {
            calls,
            input_tokens,
            output_tokens,
            cost_usd: (cost_usd * 10_000.0).round() / 10_000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_overload_are_retryable() {
        for message in [
            "HTTP 429 Too Many Requests",
            "Rate limit reached for gpt-4o",
            "upstream overloaded_error",
            "operation timed out",
        ] {
            assert!(classify_failure(message).is_retryable(), "{}", message);
        }
    }

    #[test]
    fn other_failures_are_content_errors() {
        let err = classify_failure("invalid_request_error: content policy violation");
        assert!(!err.is_retryable());
        assert!(matches!(err, StageError::Content { .. }));
    }

    #[test]
    fn retry_hint_is_extracted() {
        match classify_failure("Rate limit reached. Please try again in 1.5s.") {
            StageError::RateLimited { retry_after_ms, .. } => assert_eq!(retry_after_ms, Some(1500)),
            other => panic!("unexpected: {:?}", other),
        }
        match classify_failure("429: retry after 200ms") {
            StageError::RateLimited { retry_after_ms, .. } => assert_eq!(retry_after_ms, Some(200)),
            other => panic!("unexpected: {:?}", other),
        }
        match classify_failure("429") {
            StageError::RateLimited { retry_after_ms, .. } => assert_eq!(retry_after_ms, None),
            other => panic!("unexpected: {:?}", other),
        }
    }

    fn api_error(kind: Option<&str>, code: Option<&str>, message: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: message.to_string(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn structured_api_errors_are_classified_by_kind() {
        let limited = classify_openai_error(&api_error(
            Some("tokens"),
            Some("rate_limit_exceeded"),
            "Rate limit reached. Please try again in 2s.",
        ));
        match limited {
            StageError::RateLimited { retry_after_ms, .. } => assert_eq!(retry_after_ms, Some(2000)),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(classify_openai_error(&api_error(Some("overloaded_error"), None, "busy")).is_retryable());

        let quota = classify_openai_error(&api_error(
            Some("insufficient_quota"),
            Some("insufficient_quota"),
            "You exceeded your current quota",
        ));
        assert!(!quota.is_retryable());

        // 正文里碰巧出现 503 不算限流
        let invalid = classify_openai_error(&api_error(
            Some("invalid_request_error"),
            Some("context_length_exceeded"),
            "This model's maximum context length is 4096, you requested 4503 tokens",
        ));
        assert!(matches!(invalid, StageError::Content { .. }));
    }

    #[test]
    fn untyped_server_bodies_fall_back_to_text() {
        let err = classify_openai_error(&api_error(None, None, "503 Service Unavailable"));
        assert!(err.is_retryable());
        let err = classify_openai_error(&api_error(None, None, "<html>502 Bad Gateway</html>"));
        assert!(err.is_retryable());
        let err = classify_openai_error(&api_error(None, None, "model not found"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn client_side_failures_are_not_retried() {
        let err = classify_openai_error(&OpenAIError::InvalidArgument("model is empty".into()));
        assert!(matches!(err, StageError::Content { .. }));
        let json = serde_json::from_str::<u8>("x").unwrap_err();
        let err = classify_openai_error(&OpenAIError::JSONDeserialize(json, "x".into()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_retryable() {
        let config = Config {
            llm_api_key: "test-key".to_string(),
            llm_api_base_url: "http://127.0.0.1:9/v1".to_string(),
            ..Config::default()
        };
        let service = LlmService::new(&config, String::new());
        let err = service.send_to_llm("안녕", None).await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }

    #[test]
    fn cost_estimate_uses_configured_prices() {
        let config = Config::default();
        // 2 个对象 × 15 章
        let estimate = CostEstimate::estimate(30, &config);
        assert_eq!(estimate.input_tokens, 90_000);
        assert_eq!(estimate.output_tokens, 60_000);
        // 0.09 × 3 + 0.06 × 15
        assert!((estimate.cost_usd - 1.17).abs() < 1e-9);
    }

    #[tokio::test]
    #[ignore = "需要 LLM_API_KEY，会产生真实调用费用"]
    async fn generates_a_chapter_against_the_live_api() {
        use std::sync::Arc;

        use crate::calendar::TabulatedSolarTerms;
        use crate::models::chapter::CHAPTERS;
        use crate::models::intake::IntakeRecord;
        use crate::models::subject::SubjectId;
        use crate::saju::{SexagenaryEngine, Sex};
        use crate::calendar::{CalendarSystem, CivilDate};

        let config = Config::from_env().unwrap();
        let intake = IntakeRecord {
            name: "A".to_string(),
            birth_date: CivilDate::new(1990, 5, 15),
            hour: 14,
            minute: 30,
            sex: Sex::Male,
            calendar: CalendarSystem::Solar,
            is_leap_month: false,
            email: None,
            phone: None,
        };
        let engine = SexagenaryEngine::new(Arc::new(TabulatedSolarTerms::embedded(540).unwrap()), 10);
        let subject =
            SubjectRecord::compute(SubjectId::from_intake(&intake), intake, &engine, 2026, 5).unwrap();

        let service = LlmService::new(&config, "한국어로 짧게 답하세요.".to_string());
        let text = service.generate_chapter(&CHAPTERS[1], &subject).await.unwrap();
        assert!(!text.is_empty());
    }
}
