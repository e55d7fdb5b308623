//! 章节目录

use serde::Serialize;

/// 章节模板（编号 + 标题），编号即生成接口的模板 id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChapterTemplate {
    pub number: u8,
    pub title: &'static str,
}

impl ChapterTemplate {
    /// `제3장. 일년 전체 운의 큰 흐름`
    pub fn heading(&self) -> String {
        format!("제{}장. {}", self.number, self.title)
    }

    /// 章节文件名：`ch03.md`
    pub fn file_name(&self) -> String {
        format!("ch{:02}.md", self.number)
    }
}

/// 固定的 15 章
pub const CHAPTERS: [ChapterTemplate; 15] = [
    ChapterTemplate { number: 1, title: "일년 운세 리포트의 해석 관점" },
    ChapterTemplate { number: 2, title: "사주 구조 핵심 요약" },
    ChapterTemplate { number: 3, title: "일년 전체 운의 큰 흐름" },
    ChapterTemplate { number: 4, title: "상반기 월별 운의 작동 구조" },
    ChapterTemplate { number: 5, title: "하반기 월별 운의 변화 포인트" },
    ChapterTemplate { number: 6, title: "감정·심리 흐름" },
    ChapterTemplate { number: 7, title: "인간관계 전반의 운 흐름" },
    ChapterTemplate { number: 8, title: "연애·부부·이성 운" },
    ChapterTemplate { number: 9, title: "직업·일·커리어 운" },
    ChapterTemplate { number: 10, title: "재물·수입·지출 운" },
    ChapterTemplate { number: 11, title: "건강·에너지 흐름" },
    ChapterTemplate { number: 12, title: "선택이 중요한 시점들" },
    ChapterTemplate { number: 13, title: "조심해야 할 작용" },
    ChapterTemplate { number: 14, title: "해 운을 활용하는 전략" },
    ChapterTemplate { number: 15, title: "이 한 해가 남기는 의미" },
];

pub fn chapter(number: u8) -> Option<&'static ChapterTemplate> {
    CHAPTERS.iter().find(|c| c.number == number)
}
