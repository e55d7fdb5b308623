//! 排盘层
//!
//! - `ganzhi` - 天干、地支、六十甲子
//! - `pillars` - 年月日时四柱
//! - `luck_cycle` - 大运
//! - `flow` - 岁运 / 月运 / 五行分布
//! - `relations` - 十神、藏干、十二运星、空亡

pub mod flow;
pub mod ganzhi;
pub mod luck_cycle;
pub mod pillars;
pub mod relations;

pub use flow::{annual_flow, AnnualFlow, ElementTally, MonthlyFlow};
pub use ganzhi::{Branch, Element, Pillar, Polarity, Stem};
pub use luck_cycle::{Direction, LuckCycle, LuckPillar, Sex};
pub use pillars::{FourPillars, SexagenaryEngine};
pub use relations::{ChartRelations, HiddenStem, LifeStage, PillarRelations, TenGod};
