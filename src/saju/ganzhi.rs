//! 天干、地支与六十甲子

use std::fmt;

use serde::{Deserialize, Serialize};

/// 五行
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Element {
    Wood,
    Fire,
    Earth,
    Metal,
    Water,
}

impl Element {
    pub const ALL: [Element; 5] = [
        Element::Wood,
        Element::Fire,
        Element::Earth,
        Element::Metal,
        Element::Water,
    ];

    /// 在 木火土金水 相生顺序中的位置
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn hanja(self) -> &'static str {
        match self {
            Element::Wood => "木",
            Element::Fire => "火",
            Element::Earth => "土",
            Element::Metal => "金",
            Element::Water => "水",
        }
    }

    pub fn hangul(self) -> &'static str {
        match self {
            Element::Wood => "목",
            Element::Fire => "화",
            Element::Earth => "토",
            Element::Metal => "금",
            Element::Water => "수",
        }
    }
}

/// 阴阳
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Yang,
    Yin,
}

impl Polarity {
    fn of_index(index: usize) -> Self {
        if index % 2 == 0 {
            Polarity::Yang
        } else {
            Polarity::Yin
        }
    }
}

/// 天干
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Stem(u8);

impl Stem {
    const HANJA: [&'static str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];
    const HANGUL: [&'static str; 10] = ["갑", "을", "병", "정", "무", "기", "경", "신", "임", "계"];

    /// 按序号构造（自动取模）
    pub fn from_index(index: i64) -> Self {
        Stem(index.rem_euclid(10) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn hanja(self) -> &'static str {
        Self::HANJA[self.index()]
    }

    pub fn hangul(self) -> &'static str {
        Self::HANGUL[self.index()]
    }

    pub fn element(self) -> Element {
        Element::ALL[self.index() / 2]
    }

    pub fn polarity(self) -> Polarity {
        Polarity::of_index(self.index())
    }
}

/// 地支
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Branch(u8);

impl Branch {
    const HANJA: [&'static str; 12] = [
        "子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥",
    ];
    const HANGUL: [&'static str; 12] = [
        "자", "축", "인", "묘", "진", "사", "오", "미", "신", "유", "술", "해",
    ];
    const ANIMALS: [&'static str; 12] = [
        "쥐", "소", "호랑이", "토끼", "용", "뱀", "말", "양", "원숭이", "닭", "개", "돼지",
    ];
    const ELEMENTS: [Element; 12] = [
        Element::Water,
        Element::Earth,
        Element::Wood,
        Element::Wood,
        Element::Earth,
        Element::Fire,
        Element::Fire,
        Element::Earth,
        Element::Metal,
        Element::Metal,
        Element::Earth,
        Element::Water,
    ];

    /// 按序号构造（自动取模）
    pub fn from_index(index: i64) -> Self {
        Branch(index.rem_euclid(12) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn hanja(self) -> &'static str {
        Self::HANJA[self.index()]
    }

    pub fn hangul(self) -> &'static str {
        Self::HANGUL[self.index()]
    }

    /// 生肖
    pub fn animal(self) -> &'static str {
        Self::ANIMALS[self.index()]
    }

    pub fn element(self) -> Element {
        Self::ELEMENTS[self.index()]
    }

    pub fn polarity(self) -> Polarity {
        Polarity::of_index(self.index())
    }
}

/// 一柱：六十甲子中的一个
///
/// 只保存 0..60 的组合序号，天干 = 序号 mod 10，地支 = 序号 mod 12，
/// 因此两个子循环始终同步。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Pillar(u8);

impl Pillar {
    /// 按序号构造（自动取模）
    pub fn from_index(index: i64) -> Self {
        Pillar(index.rem_euclid(60) as u8)
    }

    /// 由天干地支组合；阴阳不一致的组合不存在，返回 None
    pub fn from_parts(stem: Stem, branch: Branch) -> Option<Self> {
        if stem.index() % 2 != branch.index() % 2 {
            return None;
        }
        // 满足 i ≡ s (mod 10) 且 i ≡ b (mod 12) 的唯一 i
        let index = 6 * stem.index() as i64 - 5 * branch.index() as i64;
        Some(Pillar::from_index(index))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn stem(self) -> Stem {
        Stem::from_index(self.0 as i64)
    }

    pub fn branch(self) -> Branch {
        Branch::from_index(self.0 as i64)
    }

    /// 在六十甲子中前进 / 后退 `delta` 步
    pub fn offset(self, delta: i64) -> Self {
        Pillar::from_index(self.0 as i64 + delta)
    }

    pub fn hanja(self) -> String {
        format!("{}{}", self.stem().hanja(), self.branch().hanja())
    }

    pub fn hangul(self) -> String {
        format!("{}{}", self.stem().hangul(), self.branch().hangul())
    }
}

/// 按序号反序列化天干、地支、六十甲子，越界即报错
macro_rules! index_serde {
    ($ty:ident, $len:expr, $what:expr) => {
        impl TryFrom<u8> for $ty {
            type Error = String;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                if value < $len {
                    Ok($ty(value))
                } else {
                    Err(format!("{}序号越界: {}", $what, value))
                }
            }
        }

        impl From<$ty> for u8 {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

index_serde!(Stem, 10, "天干");
index_serde!(Branch, 12, "地支");
index_serde!(Pillar, 60, "六十甲子");

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.hanja(), self.hangul())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_index_determines_both_cycles() {
        for i in 0..60 {
            let p = Pillar::from_index(i);
            assert_eq!(p.stem().index() as i64, i % 10);
            assert_eq!(p.branch().index() as i64, i % 12);
            assert_eq!(Pillar::from_parts(p.stem(), p.branch()), Some(p));
        }
    }

    #[test]
    fn mismatched_parity_has_no_pillar() {
        assert_eq!(Pillar::from_parts(Stem::from_index(0), Branch::from_index(1)), None);
    }

    #[test]
    fn offsets_wrap_around_the_cycle() {
        let jiazi = Pillar::from_index(0);
        assert_eq!(jiazi.offset(-1).hanja(), "癸亥");
        assert_eq!(jiazi.offset(61).hanja(), "乙丑");
        assert_eq!(Pillar::from_index(10).hanja(), "甲戌");
        assert_eq!(Pillar::from_index(6).hangul(), "경오");
    }

    #[test]
    fn attributes() {
        let gyeong = Stem::from_index(6);
        assert_eq!(gyeong.element(), Element::Metal);
        assert_eq!(gyeong.polarity(), Polarity::Yang);
        assert_eq!(Branch::from_index(6).animal(), "말");
        assert_eq!(Branch::from_index(11).element(), Element::Water);
    }

    #[test]
    fn serde_rejects_out_of_range_index() {
        assert!(serde_json::from_str::<Pillar>("60").is_err());
        assert!(serde_json::from_str::<Stem>("10").is_err());
        assert!(serde_json::from_str::<Branch>("12").is_err());
        assert_eq!(serde_json::from_str::<Branch>("11").unwrap().hanja(), "亥");
        assert_eq!(serde_json::to_string(&Stem::from_index(6)).unwrap(), "6");
        assert_eq!(serde_json::from_str::<Pillar>("16").unwrap().hanja(), "庚辰");
    }
}
