use crate::value_objects::bar::Bar;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use std::fmt;

const DOJI_BODY_SHARE: f64 = 0.1;
const SHADOW_TO_BODY: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandlePattern {
    Green,
    Red,
    Doji,
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    InsideBar,
    OutsideBar,
    GapUp,
    GapDown,
}

impl CandlePattern {
    pub const ALL: [CandlePattern; 11] = [
        CandlePattern::Green,
        CandlePattern::Red,
        CandlePattern::Doji,
        CandlePattern::Hammer,
        CandlePattern::ShootingStar,
        CandlePattern::BullishEngulfing,
        CandlePattern::BearishEngulfing,
        CandlePattern::InsideBar,
        CandlePattern::OutsideBar,
        CandlePattern::GapUp,
        CandlePattern::GapDown,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CandlePattern::Green => "green",
            CandlePattern::Red => "red",
            CandlePattern::Doji => "doji",
            CandlePattern::Hammer => "hammer",
            CandlePattern::ShootingStar => "shooting_star",
            CandlePattern::BullishEngulfing => "bullish_engulfing",
            CandlePattern::BearishEngulfing => "bearish_engulfing",
            CandlePattern::InsideBar => "inside_bar",
            CandlePattern::OutsideBar => "outside_bar",
            CandlePattern::GapUp => "gap_up",
            CandlePattern::GapDown => "gap_down",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for CandlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Patterns a bar exhibits, as a bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternSet(u16);

impl PatternSet {
    pub fn contains(&self, pattern: CandlePattern) -> bool {
        self.0 & pattern.bit() != 0
    }

    pub fn insert(&mut self, pattern: CandlePattern) {
        self.0 |= pattern.bit();
    }

    pub fn iter(&self) -> impl Iterator<Item = CandlePattern> + '_ {
        CandlePattern::ALL.into_iter().filter(|p| self.contains(*p))
    }

    pub fn detect(prev: Option<&Bar>, bar: &Bar) -> Self {
        let mut set = PatternSet::default();
        let body = bar.close - bar.open;
        let body_abs = body.abs();
        let range = bar.high - bar.low;
        let upper = bar.high - bar.open.max(bar.close);
        let lower = bar.open.min(bar.close) - bar.low;

        if body > 0.0 {
            set.insert(CandlePattern::Green);
        } else if body < 0.0 {
            set.insert(CandlePattern::Red);
        }
        if range > 0.0 && body_abs <= DOJI_BODY_SHARE * range {
            set.insert(CandlePattern::Doji);
        }
        if body_abs > 0.0 && lower >= SHADOW_TO_BODY * body_abs && upper <= body_abs {
            set.insert(CandlePattern::Hammer);
        }
        if body_abs > 0.0 && upper >= SHADOW_TO_BODY * body_abs && lower <= body_abs {
            set.insert(CandlePattern::ShootingStar);
        }

        let Some(prev) = prev else {
            return set;
        };
        let prev_body = prev.close - prev.open;
        if prev_body < 0.0 && body > 0.0 && bar.open <= prev.close && bar.close >= prev.open {
            set.insert(CandlePattern::BullishEngulfing);
        }
        if prev_body > 0.0 && body < 0.0 && bar.open >= prev.close && bar.close <= prev.open {
            set.insert(CandlePattern::BearishEngulfing);
        }
        if bar.high < prev.high && bar.low > prev.low {
            set.insert(CandlePattern::InsideBar);
        }
        if bar.high > prev.high && bar.low < prev.low {
            set.insert(CandlePattern::OutsideBar);
        }
        if bar.low > prev.high {
            set.insert(CandlePattern::GapUp);
        }
        if bar.high < prev.low {
            set.insert(CandlePattern::GapDown);
        }
        set
    }
}

impl Serialize for PatternSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for pattern in self.iter() {
            seq.serialize_element(pattern.name())?;
        }
        seq.end()
    }
}
