//! 投递渠道 - 业务能力层
//!
//! - `HttpUploadChannel`: 把 PDF 上传到云端，返回分享链接
//! - `MailGatewayChannel`: 通过邮件网关发信，正文里带上分享链接

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::document_assembler::escape_html;
use super::{DeliveryChannel, DeliveryConfirmation, DeliveryRequest};
use crate::error::StageError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// 上传接口的响应
#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(alias = "url", alias = "webViewLink", alias = "share_link")]
    link: String,
    #[serde(default, alias = "file_id", alias = "fileId")]
    id: Option<String>,
}

/// 云端上传
pub struct HttpUploadChannel {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpUploadChannel {
    pub const NAME: &'static str = "upload";

    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for HttpUploadChannel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryConfirmation, StageError> {
        let bytes = tokio::fs::read(&request.document)
            .await
            .map_err(|e| StageError::artifact(request.document.display().to_string(), e))?;
        let file_name = request
            .document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.pdf", request.subject));

        debug!("[{}] 上传 {} ({} 字节)", request.subject, file_name, bytes.len());
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .query(&[("name", file_name.as_str())])
            .header(CONTENT_TYPE, "application/pdf")
            .body(bytes)
            .send()
            .await
            .map_err(|e| StageError::delivery(Self::NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::delivery(
                Self::NAME,
                format!("HTTP {}: {}", status, text),
            ));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StageError::delivery(Self::NAME, format!("无法解析响应: {}", e)))?;

        Ok(DeliveryConfirmation {
            channel: Self::NAME.to_string(),
            confirmation: body.id.unwrap_or_else(|| body.link.clone()),
            link: Some(body.link),
            delivered_at: Local::now(),
        })
    }
}

/// 邮件网关请求体
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl MailMessage {
    /// 生成给客户的邮件
    pub fn for_request(sender: &str, to: &str, request: &DeliveryRequest) -> Self {
        let mut html = format!(
            "<p>안녕하세요, {} 님.</p>\
             <p>요청하신 사주 리포트가 완성되었습니다.</p>",
            escape_html(&request.name)
        );
        match &request.share_link {
            Some(link) => html.push_str(&format!(
                "<hr><p><strong>📥 파일 다운로드</strong></p>\
                 <p><a href=\"{}\" target=\"_blank\">여기를 클릭하여 파일을 다운로드하세요</a></p>",
                escape_html(link)
            )),
            None => html.push_str("<p>리포트 파일은 별도로 안내드리겠습니다.</p>"),
        }
        html.push_str("<p>감사합니다.</p>");

        Self {
            from: sender.to_string(),
            to: to.to_string(),
            subject: format!("[사주 리포트] {} 님의 리포트가 도착했습니다", request.name),
            html,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MailResponse {
    #[serde(default, alias = "message_id", alias = "messageId")]
    id: Option<String>,
}

/// 邮件网关
pub struct MailGatewayChannel {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    sender: String,
}

impl MailGatewayChannel {
    pub const NAME: &'static str = "mail";

    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            endpoint: endpoint.into(),
            token: token.into(),
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl DeliveryChannel for MailGatewayChannel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies_to(&self, request: &DeliveryRequest) -> bool {
        request
            .email
            .as_deref()
            .is_some_and(|email| !email.trim().is_empty())
    }

    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryConfirmation, StageError> {
        let to = request
            .email
            .as_deref()
            .ok_or_else(|| StageError::delivery(Self::NAME, "没有收件人邮箱"))?;
        let message = MailMessage::for_request(&self.sender, to, request);

        debug!("[{}] 发送邮件到 {}", request.subject, to);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&message)
            .send()
            .await
            .map_err(|e| StageError::delivery(Self::NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::delivery(
                Self::NAME,
                format!("HTTP {}: {}", status, text),
            ));
        }

        // 网关不一定返回消息 ID
        let id = response
            .json::<MailResponse>()
            .await
            .ok()
            .and_then(|r| r.id);

        Ok(DeliveryConfirmation {
            channel: Self::NAME.to_string(),
            confirmation: id.unwrap_or_else(|| format!("{} {}", status.as_u16(), to)),
            link: request.share_link.clone(),
            delivered_at: Local::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::models::subject::SubjectId;

    fn request(email: Option<&str>, link: Option<&str>) -> DeliveryRequest {
        DeliveryRequest {
            subject: SubjectId::new("홍길동_19900515_1430"),
            name: "홍길동".to_string(),
            email: email.map(String::from),
            document: PathBuf::from("out/홍길동_19900515_1430/홍길동_19900515_1430_report.pdf"),
            share_link: link.map(String::from),
        }
    }

    #[test]
    fn mail_is_only_sent_to_subjects_with_an_address() {
        let channel = MailGatewayChannel::new("http://localhost/mail", "t", "noreply@example.com");
        assert!(channel.applies_to(&request(Some("a@example.com"), None)));
        assert!(!channel.applies_to(&request(None, None)));
        assert!(!channel.applies_to(&request(Some("  "), None)));
    }

    #[test]
    fn mail_body_embeds_share_link() {
        let message = MailMessage::for_request(
            "noreply@example.com",
            "a@example.com",
            &request(Some("a@example.com"), Some("https://drive.example.com/f/1")),
        );
        assert_eq!(message.to, "a@example.com");
        assert!(message.subject.contains("홍길동"));
        assert!(message.html.contains("href=\"https://drive.example.com/f/1\""));

        let without = MailMessage::for_request("s", "a@example.com", &request(None, None));
        assert!(!without.html.contains("href"));
    }

    #[test]
    fn mail_body_escapes_the_name() {
        let mut req = request(Some("a@example.com"), None);
        req.name = "<b>홍&길동</b>".to_string();
        let message = MailMessage::for_request("s", "a@example.com", &req);
        assert!(message.html.contains("&lt;b&gt;홍&amp;길동&lt;/b&gt; 님"));
        assert!(!message.html.contains("<b>"));
        // 邮件标题是纯文本，不转义
        assert!(message.subject.contains("<b>홍&길동</b>"));
    }

    #[test]
    fn upload_response_accepts_common_field_names() {
        let r: UploadResponse =
            serde_json::from_str(r#"{"webViewLink":"https://x/1","fileId":"abc"}"#).unwrap();
        assert_eq!(r.link, "https://x/1");
        assert_eq!(r.id.as_deref(), Some("abc"));
        let r: UploadResponse = serde_json::from_str(r#"{"url":"https://x/2"}"#).unwrap();
        assert_eq!(r.id, None);
    }
}
