//! 产物存储 - 基础设施层
//!
//! 输出目录是断点续跑的唯一依据。每个对象一个子目录：
//!
//! ```text
//! <output>/<subject_id>/
//!     chart.json              排盘结果
//!     images/*.png            图表
//!     images/manifest.json    图表清单
//!     chapters/chNN.md        章节正文
//!     <subject_id>_report.pdf 成品文档
//!     delivery.json           投递回执
//! ```
//!
//! 所有写入都是"临时文件 + rename"的整体替换，中断时不会留下半个文件。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::debug;

use crate::error::StageError;
use crate::models::chapter::ChapterTemplate;
use crate::models::subject::SubjectId;

const CHART_FILE: &str = "chart.json";
const IMAGES_DIR: &str = "images";
const MANIFEST_FILE: &str = "manifest.json";
const CHAPTERS_DIR: &str = "chapters";
const RECEIPT_FILE: &str = "delivery.json";

/// 产物存储
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, id: &SubjectId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn chart_path(&self, id: &SubjectId) -> PathBuf {
        self.subject_dir(id).join(CHART_FILE)
    }

    pub fn images_dir(&self, id: &SubjectId) -> PathBuf {
        self.subject_dir(id).join(IMAGES_DIR)
    }

    /// 清单里记录的图片路径（相对于对象目录）
    pub fn relative_image_path(file_name: &str) -> PathBuf {
        Path::new(IMAGES_DIR).join(file_name)
    }

    pub fn image_manifest_path(&self, id: &SubjectId) -> PathBuf {
        self.images_dir(id).join(MANIFEST_FILE)
    }

    pub fn chapters_dir(&self, id: &SubjectId) -> PathBuf {
        self.subject_dir(id).join(CHAPTERS_DIR)
    }

    pub fn chapter_path(&self, id: &SubjectId, chapter: &ChapterTemplate) -> PathBuf {
        self.chapters_dir(id).join(chapter.file_name())
    }

    pub fn document_path(&self, id: &SubjectId) -> PathBuf {
        self.subject_dir(id).join(format!("{}_report.pdf", id))
    }

    pub fn receipt_path(&self, id: &SubjectId) -> PathBuf {
        self.subject_dir(id).join(RECEIPT_FILE)
    }

    /// 原子写入：先写同目录下的临时文件，再 rename 覆盖
    pub async fn write_atomic(
        &self,
        path: &Path,
        contents: impl AsRef<[u8]>,
    ) -> Result<(), StageError> {
        let target = path.display().to_string();
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StageError::artifact(parent.display().to_string(), e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = parent.join(format!(".{}.tmp", file_name));

        if let Err(e) = fs::write(&tmp_path, contents.as_ref()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StageError::artifact(target.clone(), e));
        }
        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StageError::artifact(target.clone(), e));
        }

        debug!("已写入 {}", target);
        Ok(())
    }

    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StageError> {
        let mut buf = serde_json::to_string_pretty(value)
            .map_err(|e| StageError::artifact(path.display().to_string(), e))?;
        buf.push('\n');
        self.write_atomic(path, buf).await
    }

    /// 读取 JSON 产物；文件不存在或内容损坏都视为"没有产物"
    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Option<T> {
        let contents = fs::read_to_string(path).await.ok()?;
        match serde_json::from_str(&contents) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("产物无法解析，按缺失处理 {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 读取文本产物；空文件视为缺失
    pub async fn read_text(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path)
            .await
            .ok()
            .filter(|s| !s.trim().is_empty())
    }

    /// 删除从命盘派生的全部产物（图表、章节、文档、回执），返回实际删掉的个数
    ///
    /// 排盘结果变化时调用，必须在写新的 chart.json 之前：
    /// 中途中断的话旧 chart.json 还在，下次会再次重算并清理。
    pub async fn clear_derived(&self, id: &SubjectId) -> Result<usize, StageError> {
        let mut removed = 0;
        for dir in [self.images_dir(id), self.chapters_dir(id)] {
            match fs::remove_dir_all(&dir).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StageError::artifact(dir.display().to_string(), e)),
            }
        }
        for file in [self.document_path(id), self.receipt_path(id)] {
            match fs::remove_file(&file).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StageError::artifact(file.display().to_string(), e)),
            }
        }
        Ok(removed)
    }

    /// 非空文件是否存在
    pub async fn is_present(&self, path: &Path) -> bool {
        match fs::metadata(path).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }
}
