//! 以日干为中心的派生关系：十神、藏干、十二运星、空亡
//!
//! 全部是查表，只依赖四柱本身。

use serde::{Deserialize, Serialize};

use super::ganzhi::{Branch, Pillar, Stem};
use super::pillars::FourPillars;

/// 十神
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenGod {
    Companion,
    RobWealth,
    EatingGod,
    HurtingOfficer,
    IndirectWealth,
    DirectWealth,
    SevenKillings,
    DirectOfficer,
    IndirectResource,
    DirectResource,
}

impl TenGod {
    /// 按 (五行生克关系, 阴阳是否相同) 排列
    const ORDER: [TenGod; 10] = [
        TenGod::Companion,
        TenGod::RobWealth,
        TenGod::EatingGod,
        TenGod::HurtingOfficer,
        TenGod::IndirectWealth,
        TenGod::DirectWealth,
        TenGod::SevenKillings,
        TenGod::DirectOfficer,
        TenGod::IndirectResource,
        TenGod::DirectResource,
    ];

    /// `other` 相对于日干 `day` 的十神
    pub fn of(day: Stem, other: Stem) -> Self {
        // 五行按 木火土金水 排列：差 1 为我生，差 2 为我克，差 3 为克我，差 4 为生我
        let relation = (other.element().index() + 5 - day.element().index()) % 5;
        let differs = usize::from(other.polarity() != day.polarity());
        Self::ORDER[relation * 2 + differs]
    }

    pub fn hanja(self) -> &'static str {
        match self {
            TenGod::Companion => "比肩",
            TenGod::RobWealth => "劫財",
            TenGod::EatingGod => "食神",
            TenGod::HurtingOfficer => "傷官",
            TenGod::IndirectWealth => "偏財",
            TenGod::DirectWealth => "正財",
            TenGod::SevenKillings => "偏官",
            TenGod::DirectOfficer => "正官",
            TenGod::IndirectResource => "偏印",
            TenGod::DirectResource => "正印",
        }
    }

    pub fn hangul(self) -> &'static str {
        match self {
            TenGod::Companion => "비견",
            TenGod::RobWealth => "겁재",
            TenGod::EatingGod => "식신",
            TenGod::HurtingOfficer => "상관",
            TenGod::IndirectWealth => "편재",
            TenGod::DirectWealth => "정재",
            TenGod::SevenKillings => "편관",
            TenGod::DirectOfficer => "정관",
            TenGod::IndirectResource => "편인",
            TenGod::DirectResource => "정인",
        }
    }
}

/// 地支藏干（余气 → 中气 → 正气），最后一个是正气
pub fn hidden_stems(branch: Branch) -> Vec<Stem> {
    const TABLE: [&[i64]; 12] = [
        &[8, 9],    // 子: 壬 癸
        &[9, 7, 5], // 丑: 癸 辛 己
        &[4, 2, 0], // 寅: 戊 丙 甲
        &[0, 1],    // 卯: 甲 乙
        &[1, 9, 4], // 辰: 乙 癸 戊
        &[4, 6, 2], // 巳: 戊 庚 丙
        &[2, 5, 3], // 午: 丙 己 丁
        &[3, 1, 5], // 未: 丁 乙 己
        &[4, 8, 6], // 申: 戊 壬 庚
        &[6, 7],    // 酉: 庚 辛
        &[7, 3, 4], // 戌: 辛 丁 戊
        &[4, 0, 8], // 亥: 戊 甲 壬
    ];
    TABLE[branch.index()].iter().map(|&i| Stem::from_index(i)).collect()
}

/// 地支正气
pub fn main_stem(branch: Branch) -> Stem {
    let stems = hidden_stems(branch);
    stems.last().copied().unwrap_or_else(|| Stem::from_index(0))
}

/// 十二运星
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeStage {
    Birth,
    Bath,
    Crown,
    Office,
    Peak,
    Decline,
    Sickness,
    Death,
    Tomb,
    Extinction,
    Conception,
    Nurture,
}

impl LifeStage {
    const CYCLE: [LifeStage; 12] = [
        LifeStage::Birth,
        LifeStage::Bath,
        LifeStage::Crown,
        LifeStage::Office,
        LifeStage::Peak,
        LifeStage::Decline,
        LifeStage::Sickness,
        LifeStage::Death,
        LifeStage::Tomb,
        LifeStage::Extinction,
        LifeStage::Conception,
        LifeStage::Nurture,
    ];

    /// 日干在某地支上的运星：阳干从长生地顺数，阴干逆数
    pub fn of(day: Stem, branch: Branch) -> Self {
        // 甲亥 乙午 丙寅 丁酉 戊寅 己酉 庚巳 辛子 壬申 癸卯
        const BIRTH_BRANCH: [usize; 10] = [11, 6, 2, 9, 2, 9, 5, 0, 8, 3];
        let birth = BIRTH_BRANCH[day.index()];
        let steps = if day.index() % 2 == 0 {
            (branch.index() + 12 - birth) % 12
        } else {
            (birth + 12 - branch.index()) % 12
        };
        Self::CYCLE[steps]
    }

    pub fn hanja(self) -> &'static str {
        match self {
            LifeStage::Birth => "長生",
            LifeStage::Bath => "沐浴",
            LifeStage::Crown => "冠帶",
            LifeStage::Office => "建祿",
            LifeStage::Peak => "帝旺",
            LifeStage::Decline => "衰",
            LifeStage::Sickness => "病",
            LifeStage::Death => "死",
            LifeStage::Tomb => "墓",
            LifeStage::Extinction => "絶",
            LifeStage::Conception => "胎",
            LifeStage::Nurture => "養",
        }
    }

    pub fn hangul(self) -> &'static str {
        match self {
            LifeStage::Birth => "장생",
            LifeStage::Bath => "목욕",
            LifeStage::Crown => "관대",
            LifeStage::Office => "건록",
            LifeStage::Peak => "제왕",
            LifeStage::Decline => "쇠",
            LifeStage::Sickness => "병",
            LifeStage::Death => "사",
            LifeStage::Tomb => "묘",
            LifeStage::Extinction => "절",
            LifeStage::Conception => "태",
            LifeStage::Nurture => "양",
        }
    }
}

/// 空亡：该柱所在旬缺的两个地支
pub fn void_branches(pillar: Pillar) -> [Branch; 2] {
    let xun_start = (pillar.index() - pillar.index() % 10) as i64;
    [Branch::from_index(xun_start + 10), Branch::from_index(xun_start + 11)]
}

/// 藏干及其十神
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenStem {
    pub stem: Stem,
    pub god: TenGod,
}

/// 单柱的派生关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PillarRelations {
    /// 天干十神；日柱天干就是日干本身，为 None
    pub stem_god: Option<TenGod>,
    /// 地支十神（按正气）
    pub branch_god: TenGod,
    pub hidden: Vec<HiddenStem>,
    pub stage: LifeStage,
    /// 地支落在日柱空亡里
    pub void: bool,
}

/// 整张命盘的派生关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRelations {
    pub year: PillarRelations,
    pub month: PillarRelations,
    pub day: PillarRelations,
    pub hour: PillarRelations,
    /// 日柱空亡
    pub day_void: [Branch; 2],
    /// 年柱空亡
    pub year_void: [Branch; 2],
}

impl ChartRelations {
    pub fn from_pillars(pillars: &FourPillars) -> Self {
        let day = pillars.day.stem();
        let day_void = void_branches(pillars.day);
        let of = |pillar: Pillar, is_day: bool| PillarRelations {
            stem_god: (!is_day).then(|| TenGod::of(day, pillar.stem())),
            branch_god: TenGod::of(day, main_stem(pillar.branch())),
            hidden: hidden_stems(pillar.branch())
                .into_iter()
                .map(|stem| HiddenStem {
                    stem,
                    god: TenGod::of(day, stem),
                })
                .collect(),
            stage: LifeStage::of(day, pillar.branch()),
            void: day_void.contains(&pillar.branch()),
        };
        Self {
            year: of(pillars.year, false),
            month: of(pillars.month, false),
            day: of(pillars.day, true),
            hour: of(pillars.hour, false),
            day_void,
            year_void: void_branches(pillars.year),
        }
    }

    /// 按传统从右到左的顺序：时 日 月 年
    pub fn right_to_left(&self) -> [&PillarRelations; 4] {
        [&self.hour, &self.day, &self.month, &self.year]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem(hanja: &str) -> Stem {
        (0..10)
            .map(Stem::from_index)
            .find(|s| s.hanja() == hanja)
            .unwrap()
    }

    fn branch(hanja: &str) -> Branch {
        (0..12)
            .map(Branch::from_index)
            .find(|b| b.hanja() == hanja)
            .unwrap()
    }

    fn pillar(hanja: &str) -> Pillar {
        (0..60)
            .map(Pillar::from_index)
            .find(|p| p.hanja() == hanja)
            .unwrap()
    }

    #[test]
    fn ten_gods_follow_the_generating_and_controlling_cycles() {
        let gap = stem("甲");
        let expected = [
            ("甲", TenGod::Companion),
            ("乙", TenGod::RobWealth),
            ("丙", TenGod::EatingGod),
            ("丁", TenGod::HurtingOfficer),
            ("戊", TenGod::IndirectWealth),
            ("己", TenGod::DirectWealth),
            ("庚", TenGod::SevenKillings),
            ("辛", TenGod::DirectOfficer),
            ("壬", TenGod::IndirectResource),
            ("癸", TenGod::DirectResource),
        ];
        for (other, god) in expected {
            assert_eq!(TenGod::of(gap, stem(other)), god, "甲 → {}", other);
        }
        // 阴干：同五行异阴阳
        assert_eq!(TenGod::of(stem("癸"), stem("壬")), TenGod::RobWealth);
        assert_eq!(TenGod::of(stem("癸"), stem("戊")), TenGod::DirectOfficer);
    }

    #[test]
    fn hidden_stems_end_with_the_main_qi() {
        let names = |b: &str| -> Vec<&'static str> {
            hidden_stems(branch(b)).iter().map(|s| s.hanja()).collect()
        };
        assert_eq!(names("寅"), ["戊", "丙", "甲"]);
        assert_eq!(names("酉"), ["庚", "辛"]);
        assert_eq!(names("亥"), ["戊", "甲", "壬"]);
        assert_eq!(main_stem(branch("子")).hanja(), "癸");
        assert_eq!(main_stem(branch("午")).hanja(), "丁");
        for i in 0..12 {
            assert!(!hidden_stems(Branch::from_index(i)).is_empty());
        }
    }

    #[test]
    fn life_stages_run_forward_for_yang_and_backward_for_yin() {
        assert_eq!(LifeStage::of(stem("甲"), branch("亥")), LifeStage::Birth);
        assert_eq!(LifeStage::of(stem("甲"), branch("寅")), LifeStage::Office);
        assert_eq!(LifeStage::of(stem("甲"), branch("卯")), LifeStage::Peak);
        assert_eq!(LifeStage::of(stem("甲"), branch("未")), LifeStage::Tomb);
        assert_eq!(LifeStage::of(stem("乙"), branch("午")), LifeStage::Birth);
        assert_eq!(LifeStage::of(stem("乙"), branch("卯")), LifeStage::Office);
        assert_eq!(LifeStage::of(stem("乙"), branch("寅")), LifeStage::Peak);
        assert_eq!(LifeStage::of(stem("辛"), branch("酉")), LifeStage::Office);
        assert_eq!(LifeStage::of(stem("壬"), branch("子")), LifeStage::Peak);
    }

    #[test]
    fn void_is_the_pair_left_over_by_the_decade() {
        let names = |p: &str| void_branches(pillar(p)).map(|b| b.hanja());
        assert_eq!(names("甲子"), ["戌", "亥"]);
        assert_eq!(names("癸酉"), ["戌", "亥"]);
        assert_eq!(names("甲戌"), ["申", "酉"]);
        assert_eq!(names("庚辰"), ["申", "酉"]);
        assert_eq!(names("甲寅"), ["子", "丑"]);
        assert_eq!(names("癸亥"), ["子", "丑"]);
    }

    #[test]
    fn chart_relations_for_a_geng_day_master() {
        // 庚午年 辛巳月 庚辰日 癸未时
        let pillars = FourPillars {
            year: pillar("庚午"),
            month: pillar("辛巳"),
            day: pillar("庚辰"),
            hour: pillar("癸未"),
        };
        let r = ChartRelations::from_pillars(&pillars);

        assert_eq!(r.year.stem_god, Some(TenGod::Companion));
        assert_eq!(r.month.stem_god, Some(TenGod::RobWealth));
        assert_eq!(r.day.stem_god, None);
        assert_eq!(r.hour.stem_god, Some(TenGod::HurtingOfficer));

        assert_eq!(r.year.branch_god, TenGod::DirectOfficer);
        assert_eq!(r.month.branch_god, TenGod::SevenKillings);
        assert_eq!(r.day.branch_god, TenGod::IndirectResource);
        assert_eq!(r.hour.branch_god, TenGod::DirectResource);

        let stages = r.right_to_left().map(|p| p.stage.hangul());
        assert_eq!(stages, ["관대", "양", "장생", "목욕"]);

        assert_eq!(r.day_void.map(|b| b.hanja()), ["申", "酉"]);
        assert_eq!(r.year_void.map(|b| b.hanja()), ["戌", "亥"]);
        assert!(r.right_to_left().iter().all(|p| !p.void));

        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(serde_json::from_str::<ChartRelations>(&json).unwrap(), r);
    }
}
