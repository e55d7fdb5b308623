//! 四柱排盘
//!
//! 全部为整数运算和查表，不使用浮点数。
//!
//! 交界规则：交界时刻本身归入新的时段。
//! - 年：立春时刻及之后属于新的一年
//! - 月：每个"节"的时刻及之后属于新的月份
//! - 日：23:00 及之后属于下一天（子时归次日）

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::ganzhi::{Branch, Pillar, Stem};
use crate::calendar::solar_terms::{self, SolarTermSource};
use crate::calendar::ResolvedDate;
use crate::error::CalendarError;

/// 日柱参考日：1900-01-01 为甲戌日（序号 10）
const DAY_EPOCH_PILLAR: i64 = 10;

/// 子时从 23:00 开始，并归入下一天
pub const DAY_BOUNDARY_HOUR: u32 = 23;

/// 年柱参考：公元 4 年为甲子年
const YEAR_EPOCH: i64 = 4;

fn day_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// 四柱
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourPillars {
    pub year: Pillar,
    pub month: Pillar,
    pub day: Pillar,
    pub hour: Pillar,
}

impl FourPillars {
    pub fn as_array(&self) -> [Pillar; 4] {
        [self.year, self.month, self.day, self.hour]
    }
}

/// 排盘引擎
///
/// 只持有节气数据源，本身无状态；同样的输入永远得到同样的结果。
#[derive(Clone)]
pub struct SexagenaryEngine {
    pub(super) terms: Arc<dyn SolarTermSource>,
    pub(super) luck_cycle_len: usize,
}

impl SexagenaryEngine {
    /// 创建排盘引擎
    ///
    /// # 参数
    /// - `terms`: 节气时刻来源
    /// - `luck_cycle_len`: 大运排几步
    pub fn new(terms: Arc<dyn SolarTermSource>, luck_cycle_len: usize) -> Self {
        Self {
            terms,
            luck_cycle_len,
        }
    }

    /// 节气时刻来源
    pub fn terms(&self) -> &dyn SolarTermSource {
        self.terms.as_ref()
    }

    /// 计算四柱
    pub fn compute_pillars(&self, resolved: &ResolvedDate) -> Result<FourPillars, CalendarError> {
        let instant = resolved.instant()?;
        let year = self.year_pillar(instant)?;
        let month = self.month_pillar(instant, year)?;
        let day = day_pillar(resolved.date()?, resolved.hour());
        let hour = hour_pillar(day, resolved.hour());

        Ok(FourPillars {
            year,
            month,
            day,
            hour,
        })
    }

    /// 年柱：以立春为界
    pub fn year_pillar(&self, instant: NaiveDateTime) -> Result<Pillar, CalendarError> {
        let cycle_year = self.cycle_year(instant)?;
        Ok(Pillar::from_index(cycle_year as i64 - YEAR_EPOCH))
    }

    /// 出生时刻所属的干支纪年（立春之前算上一年）
    pub fn cycle_year(&self, instant: NaiveDateTime) -> Result<i32, CalendarError> {
        let year = chrono::Datelike::year(&instant);
        let lichun = self.terms.solar_term_boundary(year)?;
        Ok(if instant >= lichun { year } else { year - 1 })
    }

    /// 月柱：月支由所在的节气月决定，月干由年干按"甲己之年丙作首"推出
    pub fn month_pillar(
        &self,
        instant: NaiveDateTime,
        year: Pillar,
    ) -> Result<Pillar, CalendarError> {
        let (term, _) = solar_terms::month_opening_at_or_before(self.terms.as_ref(), instant)?;
        let branch = term.month_branch().ok_or_else(|| {
            CalendarError::Calculation(format!("{:?} 不是月份交界节气", term))
        })?;
        Ok(month_pillar_for(year.stem(), branch))
    }
}

/// 给定年干和月支（子 = 0），求月柱
pub fn month_pillar_for(year_stem: Stem, month_branch: usize) -> Pillar {
    // 寅月为正月
    let ordinal = (month_branch as i64 - 2).rem_euclid(12);
    let stem = Stem::from_index(year_stem.index() as i64 * 2 + 2 + ordinal);
    let branch = Branch::from_index(month_branch as i64);
    // 同阴阳，必然存在
    Pillar::from_parts(stem, branch).unwrap_or_else(|| Pillar::from_index(0))
}

/// 日柱：距参考日的天数 mod 60；23:00 及之后按下一天计
pub fn day_pillar(date: NaiveDate, hour: u32) -> Pillar {
    let effective = if hour >= DAY_BOUNDARY_HOUR {
        date + Duration::days(1)
    } else {
        date
    };
    let days = (effective - day_epoch()).num_days();
    Pillar::from_index(days + DAY_EPOCH_PILLAR)
}

/// 时柱：十二时辰，每个两小时；时干由（已按交界调整的）日干推出
pub fn hour_pillar(day: Pillar, hour: u32) -> Pillar {
    let branch = Branch::from_index(((hour as i64 + 1) / 2) % 12);
    let stem = Stem::from_index(day.stem().index() as i64 * 2 + branch.index() as i64);
    Pillar::from_parts(stem, branch).unwrap_or_else(|| Pillar::from_index(0))
}
