//! 大运（대운）
//!
//! 顺逆由年干阴阳与性别决定：阳年男、阴年女为顺排，其余逆排。
//! 起运岁数按出生时刻到相邻"节"的分钟差折算，三天折合一年。

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ganzhi::{Pillar, Polarity};
use super::pillars::SexagenaryEngine;
use crate::calendar::solar_terms;
use crate::calendar::ResolvedDate;
use crate::error::CalendarError;

/// 三天 = 一年，即 6 小时 = 一个月
const MINUTES_PER_LUCK_MONTH: i64 = 6 * 60;

/// 起运岁数上限
const MAX_START_AGE: u32 = 10;

/// 性别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn label(self) -> &'static str {
        match self {
            Sex::Male => "남성",
            Sex::Female => "여성",
        }
    }
}

/// 大运排列方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// 阳年男 / 阴年女 顺排
    pub fn from_rule(year_polarity: Polarity, sex: Sex) -> Self {
        match (year_polarity, sex) {
            (Polarity::Yang, Sex::Male) | (Polarity::Yin, Sex::Female) => Direction::Forward,
            _ => Direction::Reverse,
        }
    }

    fn step(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Forward => "순행",
            Direction::Reverse => "역행",
        }
    }
}

/// 一步大运
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuckPillar {
    pub pillar: Pillar,
    /// 开始生效的岁数（含）
    pub start_age: u32,
}

impl LuckPillar {
    pub fn end_age(&self) -> u32 {
        self.start_age + 9
    }
}

/// 大运序列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LuckCycle {
    pub direction: Direction,
    /// 出生时刻到交界"节"的分钟数
    pub distance_minutes: i64,
    /// 作为起算依据的"节"的时刻
    pub boundary: NaiveDateTime,
    /// 精确起运：年 + 月
    pub start_years: u32,
    pub start_months: u32,
    /// 四舍五入后的大运数（1..=10），第一步大运从这个岁数开始
    pub start_age: u32,
    pub pillars: Vec<LuckPillar>,
}

impl LuckCycle {
    /// 某岁所在的大运
    pub fn pillar_at_age(&self, age: u32) -> Option<&LuckPillar> {
        self.pillars
            .iter()
            .find(|p| age >= p.start_age && age <= p.end_age())
    }
}

impl SexagenaryEngine {
    /// 计算大运
    ///
    /// # 参数
    /// - `year_pillar`: 已算出的年柱；缺失或与出生时刻不一致时返回计算错误
    /// - `sex`: 性别
    /// - `resolved`: 换算后的阳历出生时刻
    pub fn compute_luck_cycle(
        &self,
        year_pillar: Option<Pillar>,
        sex: Sex,
        resolved: &ResolvedDate,
    ) -> Result<LuckCycle, CalendarError> {
        let year_pillar = year_pillar
            .ok_or_else(|| CalendarError::Calculation("缺少年柱，无法排大运".to_string()))?;
        let instant = resolved.instant()?;

        let expected = self.year_pillar(instant)?;
        if expected != year_pillar {
            return Err(CalendarError::Calculation(format!(
                "年柱 {} 与出生时刻 {} 不符（应为 {}）",
                year_pillar.hanja(),
                resolved,
                expected.hanja()
            )));
        }

        let month_pillar = self.month_pillar(instant, year_pillar)?;
        let direction = Direction::from_rule(year_pillar.stem().polarity(), sex);

        // 顺排看下一个节，逆排看上一个节
        let (_, boundary) = match direction {
            Direction::Forward => solar_terms::month_opening_after(self.terms(), instant)?,
            Direction::Reverse => solar_terms::month_opening_at_or_before(self.terms(), instant)?,
        };
        let distance_minutes = (boundary - instant).num_minutes().abs();

        let total_months = (distance_minutes / MINUTES_PER_LUCK_MONTH) as u32;
        let start_age = ((total_months + 6) / 12).clamp(1, MAX_START_AGE);

        let pillars = (1..=self.luck_cycle_len)
            .map(|i| LuckPillar {
                pillar: month_pillar.offset(direction.step() * i as i64),
                start_age: start_age + 10 * (i as u32 - 1),
            })
            .collect();

        Ok(LuckCycle {
            direction,
            distance_minutes,
            boundary,
            start_years: total_months / 12,
            start_months: total_months % 12,
            start_age,
            pillars,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::calendar::{to_solar, CalendarSystem, CivilDate, TabulatedSolarTerms};

    fn engine() -> SexagenaryEngine {
        SexagenaryEngine::new(Arc::new(TabulatedSolarTerms::embedded(540).unwrap()), 10)
    }

    fn solar(y: i32, m: u32, d: u32, h: u32, min: u32) -> ResolvedDate {
        to_solar(CivilDate::new(y, m, d), h, min, CalendarSystem::Solar, false).unwrap()
    }

    fn luck(sex: Sex, date: &ResolvedDate) -> LuckCycle {
        let e = engine();
        let pillars = e.compute_pillars(date).unwrap();
        e.compute_luck_cycle(Some(pillars.year), sex, date).unwrap()
    }

    fn hanja(cycle: &LuckCycle) -> Vec<String> {
        cycle.pillars.iter().map(|p| p.pillar.hanja()).collect()
    }

    #[test]
    fn direction_rule() {
        assert_eq!(Direction::from_rule(Polarity::Yang, Sex::Male), Direction::Forward);
        assert_eq!(Direction::from_rule(Polarity::Yin, Sex::Female), Direction::Forward);
        assert_eq!(Direction::from_rule(Polarity::Yang, Sex::Female), Direction::Reverse);
        assert_eq!(Direction::from_rule(Polarity::Yin, Sex::Male), Direction::Reverse);
    }

    #[test]
    fn male_yang_year_runs_forward() {
        let cycle = luck(Sex::Male, &solar(1990, 5, 15, 14, 30));
        assert_eq!(cycle.direction, Direction::Forward);
        // 下一个节为 1990-06-06 07:46 芒种
        assert_eq!(cycle.distance_minutes, 31276);
        assert_eq!((cycle.start_years, cycle.start_months), (7, 2));
        assert_eq!(cycle.start_age, 7);
        assert_eq!(
            hanja(&cycle),
            ["壬午", "癸未", "甲申", "乙酉", "丙戌", "丁亥", "戊子", "己丑", "庚寅", "辛卯"]
        );
        assert_eq!(cycle.pillars[1].start_age, 17);
        assert_eq!(cycle.pillar_at_age(30).map(|p| p.pillar.hanja()), Some("甲申".to_string()));
        assert!(cycle.pillar_at_age(3).is_none());
    }

    #[test]
    fn female_yang_year_runs_reverse() {
        let cycle = luck(Sex::Female, &solar(1990, 5, 15, 14, 30));
        assert_eq!(cycle.direction, Direction::Reverse);
        // 上一个节为 1990-05-06 03:35 立夏
        assert_eq!(cycle.distance_minutes, 13615);
        assert_eq!((cycle.start_years, cycle.start_months), (3, 1));
        assert_eq!(cycle.start_age, 3);
        assert_eq!(
            hanja(&cycle),
            ["庚辰", "己卯", "戊寅", "丁丑", "丙子", "乙亥", "甲戌", "癸酉", "壬申", "辛未"]
        );
    }

    #[test]
    fn female_yin_year_runs_forward() {
        let cycle = luck(Sex::Female, &solar(1985, 12, 31, 23, 30));
        assert_eq!(cycle.direction, Direction::Forward);
        assert_eq!(cycle.distance_minutes, 7258);
        assert_eq!(cycle.start_age, 2);
        assert_eq!(cycle.pillars[0].pillar.hanja(), "己丑");
    }

    #[test]
    fn recomputation_is_identical() {
        let date = solar(1990, 5, 15, 14, 30);
        assert_eq!(luck(Sex::Male, &date), luck(Sex::Male, &date));
    }

    #[test]
    fn missing_year_pillar_is_a_calculation_error() {
        let date = solar(1990, 5, 15, 14, 30);
        let err = engine().compute_luck_cycle(None, Sex::Male, &date).unwrap_err();
        assert!(matches!(err, CalendarError::Calculation(_)));
    }

    #[test]
    fn inconsistent_year_pillar_is_rejected() {
        let date = solar(1990, 5, 15, 14, 30);
        let wrong = Pillar::from_index(0);
        assert!(engine().compute_luck_cycle(Some(wrong), Sex::Male, &date).is_err());
    }

    #[test]
    fn length_follows_engine_setting() {
        let e = SexagenaryEngine::new(Arc::new(TabulatedSolarTerms::embedded(540).unwrap()), 8);
        let date = solar(1990, 5, 15, 14, 30);
        let year = e.compute_pillars(&date).unwrap().year;
        let cycle = e.compute_luck_cycle(Some(year), Sex::Male, &date).unwrap();
        assert_eq!(cycle.pillars.len(), 8);
        assert_eq!(cycle.pillars[7].start_age, 77);
    }
}
