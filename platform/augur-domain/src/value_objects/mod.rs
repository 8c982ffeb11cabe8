pub mod bar;
pub mod clock;
pub mod group;
pub mod interval;
pub mod metric;
pub mod pattern;
pub mod predicate;
pub mod row;
pub mod tag;
pub mod timeframe;
