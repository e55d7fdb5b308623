//! 岁运、月运与五行分布

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::ganzhi::{Element, Pillar};
use super::pillars::{month_pillar_for, FourPillars, SexagenaryEngine};
use crate::calendar::SolarTerm;
use crate::error::CalendarError;

/// 某一年的岁运（세운）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualFlow {
    pub year: i32,
    pub pillar: Pillar,
}

/// 干支纪年的年柱（按立春后的年份计）
pub fn annual_pillar(year: i32) -> Pillar {
    Pillar::from_index(year as i64 - 4)
}

/// 从 `start_year` 起连续 `span` 年的岁运
pub fn annual_flow(start_year: i32, span: u32) -> Vec<AnnualFlow> {
    (0..span as i32)
        .map(|i| AnnualFlow {
            year: start_year + i,
            pillar: annual_pillar(start_year + i),
        })
        .collect()
}

/// 节气月的月运（월운）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyFlow {
    /// 开月的节（韩文名）
    pub term: String,
    pub starts_at: NaiveDateTime,
    pub pillar: Pillar,
}

impl SexagenaryEngine {
    /// 某干支年的十二个节气月：从当年立春（寅月）到次年小寒（丑月）
    pub fn monthly_flow(&self, year: i32) -> Result<Vec<MonthlyFlow>, CalendarError> {
        let stem = annual_pillar(year).stem();
        let mut months = Vec::with_capacity(12);

        for term in SolarTerm::month_openings() {
            // 小寒开的丑月属于上一个干支年，这里取次年的小寒
            let (term_year, branch) = match term.month_branch() {
                Some(1) => (year + 1, 1),
                Some(branch) => (year, branch),
                None => continue,
            };
            months.push((
                branch,
                MonthlyFlow {
                    term: term.korean_name().to_string(),
                    starts_at: self.terms().term_instant(term_year, term)?,
                    pillar: month_pillar_for(stem, branch),
                },
            ));
        }

        months.sort_by_key(|(_, m)| m.starts_at);
        Ok(months.into_iter().map(|(_, m)| m).collect())
    }
}

/// 四柱八字的五行个数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementTally {
    pub wood: u8,
    pub fire: u8,
    pub earth: u8,
    pub metal: u8,
    pub water: u8,
}

impl ElementTally {
    pub fn from_pillars(pillars: &FourPillars) -> Self {
        let mut tally = Self::default();
        for pillar in pillars.as_array() {
            tally.add(pillar.stem().element());
            tally.add(pillar.branch().element());
        }
        tally
    }

    fn add(&mut self, element: Element) {
        *self.slot(element) += 1;
    }

    fn slot(&mut self, element: Element) -> &mut u8 {
        match element {
            Element::Wood => &mut self.wood,
            Element::Fire => &mut self.fire,
            Element::Earth => &mut self.earth,
            Element::Metal => &mut self.metal,
            Element::Water => &mut self.water,
        }
    }

    pub fn get(&self, element: Element) -> u8 {
        match element {
            Element::Wood => self.wood,
            Element::Fire => self.fire,
            Element::Earth => self.earth,
            Element::Metal => self.metal,
            Element::Water => self.water,
        }
    }

    pub fn total(&self) -> u8 {
        Element::ALL.iter().map(|e| self.get(*e)).sum()
    }

    /// 缺失的五行
    pub fn missing(&self) -> Vec<Element> {
        Element::ALL
            .into_iter()
            .filter(|e| self.get(*e) == 0)
            .collect()
    }
}
