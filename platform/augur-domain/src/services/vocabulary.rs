//! Field resolver: the closed registry of names an intent may use.
//!
//! Sessions, events and aliases come from configuration and are resolved once
//! into a [`Vocabulary`]; afterwards every lookup yields a typed value
//! (`Metric`, `GroupKey`, `Predicate`) or a [`ResolveError`] carrying the
//! closest known name.

use crate::entities::operation::OperationKind;
use crate::entities::step::{FilterNode, FilterSpec};
use crate::errors::{ResolveError, TermKind, VocabularyError};
use crate::value_objects::group::GroupKey;
use crate::value_objects::metric::Metric;
use crate::value_objects::pattern::CandlePattern;
use crate::value_objects::predicate::{CmpOp, Predicate};
use crate::value_objects::tag::{Tag, TagKind};
use chrono::{NaiveDate, NaiveTime, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static INLINE_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_%]+)\s*(<=|>=|!=|<>|==|<|>|=)\s*([-+]?\d+(?:\.\d+)?)\s*$")
        .expect("hardcoded comparison regex must compile")
});

const WEEKDAYS: [(Weekday, &str, &str); 7] = [
    (Weekday::Mon, "monday", "mon"),
    (Weekday::Tue, "tuesday", "tue"),
    (Weekday::Wed, "wednesday", "wed"),
    (Weekday::Thu, "thursday", "thu"),
    (Weekday::Fri, "friday", "fri"),
    (Weekday::Sat, "saturday", "sat"),
    (Weekday::Sun, "sunday", "sun"),
];

const METRIC_ALIASES: [(&str, Metric); 15] = [
    ("return", Metric::ChangePct),
    ("pct_change", Metric::ChangePct),
    ("change_percent", Metric::ChangePct),
    ("daily_return", Metric::ChangePct),
    ("move", Metric::ChangePct),
    ("gap", Metric::GapPct),
    ("gap_percent", Metric::GapPct),
    ("price", Metric::Close),
    ("closing_price", Metric::Close),
    ("opening_price", Metric::Open),
    ("vol", Metric::Volume),
    ("range_percent", Metric::RangePct),
    ("volatility", Metric::RangePct),
    ("body_percent", Metric::BodyPct),
    ("points", Metric::Change),
];

const GROUP_ALIASES: [(&str, GroupKey); 10] = [
    ("day", GroupKey::Date),
    ("daily", GroupKey::Date),
    ("day_of_week", GroupKey::Weekday),
    ("dow", GroupKey::Weekday),
    ("monthly", GroupKey::Month),
    ("yearly", GroupKey::Year),
    ("annual", GroupKey::Year),
    ("hourly", GroupKey::Hour),
    ("hour_of_day", GroupKey::Hour),
    ("time_of_day", GroupKey::Time),
];

const PATTERN_ALIASES: [(&str, CandlePattern); 8] = [
    ("up_day", CandlePattern::Green),
    ("bullish", CandlePattern::Green),
    ("down_day", CandlePattern::Red),
    ("bearish", CandlePattern::Red),
    ("inside_day", CandlePattern::InsideBar),
    ("outside_day", CandlePattern::OutsideBar),
    ("engulfing_bullish", CandlePattern::BullishEngulfing),
    ("engulfing_bearish", CandlePattern::BearishEngulfing),
];

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionDef {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Local `HH:MM`; a session whose end precedes its start wraps midnight.
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventDef {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct VocabularyTables {
    pub sessions: Vec<SessionDef>,
    pub events: Vec<EventDef>,
    /// alias -> canonical pattern name
    pub pattern_aliases: BTreeMap<String, String>,
    /// alias -> canonical metric name
    pub metric_aliases: BTreeMap<String, String>,
}

/// Names an upstream generator may use, published alongside each request.
#[derive(Debug, Clone, Serialize)]
pub struct VocabularyHint {
    pub operations: Vec<String>,
    pub metrics: Vec<String>,
    pub groups: Vec<String>,
    pub weekdays: Vec<String>,
    pub sessions: Vec<String>,
    pub events: Vec<String>,
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    Weekday(Weekday),
    Session(usize),
    Pattern(CandlePattern),
    Event(usize),
}

impl Term {
    fn kind(self) -> TermKind {
        match self {
            Term::Weekday(_) => TermKind::Weekday,
            Term::Session(_) => TermKind::Session,
            Term::Pattern(_) => TermKind::Pattern,
            Term::Event(_) => TermKind::Event,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    tag: Tag,
    start: NaiveTime,
    end: NaiveTime,
}

impl Session {
    fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug, Clone)]
struct Event {
    tag: Tag,
    dates: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    sessions: Vec<Session>,
    events: Vec<Event>,
    terms: BTreeMap<String, Term>,
    metrics: BTreeMap<String, Metric>,
    groups: BTreeMap<String, GroupKey>,
}

impl Vocabulary {
    /// Built-in weekdays, patterns, metrics and groups; no sessions or events.
    pub fn standard() -> Self {
        let mut terms = BTreeMap::new();
        for (day, long, short) in WEEKDAYS {
            terms.insert(long.to_string(), Term::Weekday(day));
            terms.insert(short.to_string(), Term::Weekday(day));
        }
        for pattern in CandlePattern::ALL {
            terms.insert(pattern.name().to_string(), Term::Pattern(pattern));
        }
        for (alias, pattern) in PATTERN_ALIASES {
            terms.insert(alias.to_string(), Term::Pattern(pattern));
        }

        let mut metrics: BTreeMap<String, Metric> = Metric::ALL
            .into_iter()
            .map(|m| (m.name().to_string(), m))
            .collect();
        for (alias, metric) in METRIC_ALIASES {
            metrics.insert(alias.to_string(), metric);
        }

        let mut groups: BTreeMap<String, GroupKey> = GroupKey::ALL
            .into_iter()
            .map(|g| (g.name().to_string(), g))
            .collect();
        for (alias, group) in GROUP_ALIASES {
            groups.insert(alias.to_string(), group);
        }

        Self {
            sessions: Vec::new(),
            events: Vec::new(),
            terms,
            metrics,
            groups,
        }
    }

    pub fn new(tables: &VocabularyTables) -> Result<Self, VocabularyError> {
        let mut vocab = Self::standard();

        for (alias, target) in &tables.pattern_aliases {
            let pattern = CandlePattern::from_name(&normalize(target)).ok_or_else(|| {
                VocabularyError::UnknownAliasTarget {
                    alias: alias.clone(),
                    kind: TermKind::Pattern,
                    target: target.clone(),
                }
            })?;
            vocab.insert_term(alias, Term::Pattern(pattern))?;
        }
        for (alias, target) in &tables.metric_aliases {
            let metric = vocab.metrics.get(&normalize(target)).copied().ok_or_else(|| {
                VocabularyError::UnknownAliasTarget {
                    alias: alias.clone(),
                    kind: TermKind::Metric,
                    target: target.clone(),
                }
            })?;
            vocab.metrics.insert(normalize(alias), metric);
        }

        for (index, def) in tables.sessions.iter().enumerate() {
            let id = u16::try_from(index).map_err(|_| VocabularyError::TooMany("session"))?;
            let parse = |value: &str| {
                parse_clock_time(value).ok_or_else(|| VocabularyError::InvalidTime {
                    what: "session",
                    name: def.name.clone(),
                    value: value.to_string(),
                })
            };
            vocab.sessions.push(Session {
                tag: Tag::new(TagKind::Session, id, &def.name),
                start: parse(&def.start)?,
                end: parse(&def.end)?,
            });
            for name in std::iter::once(&def.name).chain(&def.aliases) {
                vocab.insert_term(name, Term::Session(index))?;
            }
        }

        for (index, def) in tables.events.iter().enumerate() {
            let id = u16::try_from(index).map_err(|_| VocabularyError::TooMany("event"))?;
            vocab.events.push(Event {
                tag: Tag::new(TagKind::Event, id, &def.name),
                dates: def.dates.iter().copied().collect(),
            });
            for name in std::iter::once(&def.name).chain(&def.aliases) {
                vocab.insert_term(name, Term::Event(index))?;
            }
        }

        Ok(vocab)
    }

    fn insert_term(&mut self, name: &str, term: Term) -> Result<(), VocabularyError> {
        let key = normalize(name);
        match self.terms.get(&key) {
            Some(existing) if *existing != term => Err(VocabularyError::DuplicateTerm {
                term: key,
                first: self.describe(*existing),
                second: self.describe(term),
            }),
            _ => {
                self.terms.insert(key, term);
                Ok(())
            }
        }
    }

    fn describe(&self, term: Term) -> String {
        match term {
            Term::Weekday(day) => format!("weekday {day}"),
            Term::Pattern(p) => format!("pattern {p}"),
            Term::Session(i) => format!("session #{i}"),
            Term::Event(i) => format!("event #{i}"),
        }
    }

    pub fn resolve_metric(&self, name: &str) -> Result<Metric, ResolveError> {
        lookup(&self.metrics, name)
            .ok_or_else(|| unknown(TermKind::Metric, name, self.metrics.keys()))
    }

    pub fn resolve_group(&self, name: &str) -> Result<GroupKey, ResolveError> {
        lookup(&self.groups, name)
            .ok_or_else(|| unknown(TermKind::Group, name, self.groups.keys()))
    }

    /// Any weekday, session, pattern or event name.
    pub fn resolve_term(&self, name: &str) -> Result<Predicate, ResolveError> {
        if let Some(term) = lookup(&self.terms, name) {
            return Ok(self.term_predicate(term));
        }
        if let Some(caps) = INLINE_COMPARISON.captures(name) {
            return self.inline_comparison(&caps[1], &caps[2], &caps[3]);
        }
        Err(unknown(TermKind::Term, name, self.terms.keys()))
    }

    fn resolve_kind(&self, kind: TermKind, name: &str) -> Result<Predicate, ResolveError> {
        match lookup(&self.terms, name) {
            Some(term) if term.kind() == kind => Ok(self.term_predicate(term)),
            _ => Err(unknown(
                kind,
                name,
                self.terms
                    .iter()
                    .filter(|(_, t)| t.kind() == kind)
                    .map(|(k, _)| k),
            )),
        }
    }

    fn inline_comparison(&self, metric: &str, op: &str, value: &str) -> Result<Predicate, ResolveError> {
        let metric = self.resolve_metric(metric)?;
        let op = CmpOp::parse(op).ok_or_else(|| ResolveError {
            kind: TermKind::Operator,
            term: op.to_string(),
            suggestion: None,
        })?;
        let value: f64 = value.parse().map_err(|_| ResolveError {
            kind: TermKind::Term,
            term: value.to_string(),
            suggestion: None,
        })?;
        Ok(Predicate::metric(metric).cmp(op, value))
    }

    fn term_predicate(&self, term: Term) -> Predicate {
        match term {
            Term::Weekday(day) => Predicate::Weekday(day),
            Term::Pattern(p) => Predicate::Pattern(p),
            Term::Session(i) => Predicate::Session(self.sessions[i].tag.clone()),
            Term::Event(i) => Predicate::Event(self.events[i].tag.clone()),
        }
    }

    pub fn resolve_filter(&self, spec: &FilterSpec) -> Result<Predicate, ResolveError> {
        let mut errors = Vec::new();
        let predicate = self.build_filter(spec, &mut errors);
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(predicate),
        }
    }

    /// Every unresolvable name in `spec`, not just the first.
    pub fn filter_errors(&self, spec: &FilterSpec) -> Vec<ResolveError> {
        let mut errors = Vec::new();
        self.build_filter(spec, &mut errors);
        errors
    }

    fn build_filter(&self, spec: &FilterSpec, errors: &mut Vec<ResolveError>) -> Predicate {
        let result = match spec {
            FilterSpec::Term(name) => self.resolve_term(name),
            FilterSpec::Node(node) => match node.as_ref() {
                FilterNode::All(children) => Ok(Predicate::All(
                    children.iter().map(|c| self.build_filter(c, errors)).collect(),
                )),
                FilterNode::Any(children) => Ok(Predicate::Any(
                    children.iter().map(|c| self.build_filter(c, errors)).collect(),
                )),
                FilterNode::Not(child) => Ok(self.build_filter(child, errors).negate()),
                FilterNode::Compare(cmp) => self.resolve_metric(&cmp.metric).and_then(|metric| {
                    CmpOp::parse(&cmp.op)
                        .map(|op| Predicate::metric(metric).cmp(op, cmp.value))
                        .ok_or_else(|| ResolveError {
                            kind: TermKind::Operator,
                            term: cmp.op.clone(),
                            suggestion: None,
                        })
                }),
                FilterNode::Weekday(name) => self.resolve_kind(TermKind::Weekday, name),
                FilterNode::Session(name) => self.resolve_kind(TermKind::Session, name),
                FilterNode::Pattern(name) => self.resolve_kind(TermKind::Pattern, name),
                FilterNode::Event(name) => self.resolve_kind(TermKind::Event, name),
                FilterNode::TimeBetween(span) => {
                    let parse = |value: &str| {
                        parse_clock_time(value).ok_or_else(|| ResolveError {
                            kind: TermKind::Time,
                            term: value.to_string(),
                            suggestion: None,
                        })
                    };
                    parse(&span.from)
                        .and_then(|from| parse(&span.to).map(|to| Predicate::TimeBetween { from, to }))
                }
            },
        };
        result.unwrap_or_else(|err| {
            errors.push(err);
            Predicate::always()
        })
    }

    /// First configured session containing the local time of day.
    pub fn session_at(&self, t: NaiveTime) -> Option<Tag> {
        self.sessions
            .iter()
            .find(|s| s.contains(t))
            .map(|s| s.tag.clone())
    }

    pub fn events_on(&self, date: NaiveDate) -> Vec<Tag> {
        self.events
            .iter()
            .filter(|e| e.dates.contains(&date))
            .map(|e| e.tag.clone())
            .collect()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn hint(&self) -> VocabularyHint {
        VocabularyHint {
            operations: OperationKind::ALL.iter().map(|k| k.name().to_string()).collect(),
            metrics: Metric::ALL.iter().map(|m| m.name().to_string()).collect(),
            groups: GroupKey::ALL.iter().map(|g| g.name().to_string()).collect(),
            weekdays: WEEKDAYS.iter().map(|(_, long, _)| long.to_string()).collect(),
            sessions: self.sessions.iter().map(|s| s.tag.name().to_string()).collect(),
            events: self.events.iter().map(|e| e.tag.name().to_string()).collect(),
            patterns: CandlePattern::ALL.iter().map(|p| p.name().to_string()).collect(),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::standard()
    }
}

pub fn normalize(term: &str) -> String {
    term.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect::<String>()
        .replace('%', "_percent")
        .replace("__", "_")
}

fn lookup<T: Copy>(map: &BTreeMap<String, T>, raw: &str) -> Option<T> {
    let key = normalize(raw);
    map.get(&key)
        .or_else(|| key.strip_suffix('s').and_then(|k| map.get(k)))
        .copied()
}

fn unknown<'a>(
    kind: TermKind,
    term: &str,
    candidates: impl IntoIterator<Item = &'a String>,
) -> ResolveError {
    ResolveError {
        kind,
        term: term.to_string(),
        suggestion: closest_match(&normalize(term), candidates.into_iter().map(String::as_str)),
    }
}

fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Closest candidate within an edit distance that scales with the needle.
pub fn closest_match<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let needle_chars: Vec<char> = needle.chars().collect();
    if needle_chars.is_empty() {
        return None;
    }
    let max_dist = needle_chars.len().div_ceil(3).clamp(1, 3);
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let dist = levenshtein_with_max(candidate, &needle_chars, max_dist);
        if dist <= max_dist && best.is_none_or(|(d, _)| dist < d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, c)| c.to_string())
}

fn levenshtein_with_max(value: &str, needle_chars: &[char], max_dist: usize) -> usize {
    let n = needle_chars.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];
        for j in 1..=n {
            let cost = usize::from(c != needle_chars[j - 1]);
            let d = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            curr[j] = d;
            row_min = row_min.min(d);
        }
        if row_min > max_dist {
            return max_dist + 1;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
