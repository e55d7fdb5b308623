//! 历法层
//!
//! - `lunar_table` - 版本化的阴阳历对照表
//! - `converter` - 阴历 ⇄ 阳历换算（含闰月判定）
//! - `solar_terms` - 二十四节气时刻（可替换的数据源）
//!
//! 本层全部是纯同步计算，不做任何 I/O。

pub mod converter;
pub mod lunar_table;
pub mod solar_terms;

pub use converter::{to_lunar, to_solar, CalendarSystem, CivilDate, LunarDate, ResolvedDate};
pub use lunar_table::LUNAR_TABLE_VERSION;
pub use solar_terms::{SolarTerm, SolarTermSource, TabulatedSolarTerms};

use crate::error::CalendarError;

/// 启动时加载并校验两张对照表，任何一张有问题整批不开始
pub fn load_tables(utc_offset_minutes: i32) -> Result<TabulatedSolarTerms, CalendarError> {
    lunar_table::validate()?;
    TabulatedSolarTerms::embedded(utc_offset_minutes)
}
