//! Road classification and the per-class free-flow model.
//!
//! Each road is assigned a [`RoadTier`] by an ordered rule table: the first
//! rule whose pattern matches the road's name or tag wins, and roads matching
//! nothing get the fallback tier. The segmenter evaluates the table once per
//! road and caches the result on every segment, so aggregation never looks at
//! road names again.
//!
//! When no sample in a bucket carries a free-flow reading, the aggregator
//! takes the free-flow speed from [`FreeFlowModel`] for the segment's tier.

/// Road importance tier, used to pick a modelled free-flow speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RoadTier {
    /// Major city-centre avenues
    Central,
    /// Primary/secondary/tertiary roads
    Medium,
    /// Everything else
    Peripheral,
}

impl RoadTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoadTier::Central => "central",
            RoadTier::Medium => "medium",
            RoadTier::Peripheral => "peripheral",
        }
    }
}

/// What a classification rule looks at.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RulePattern {
    /// Case-insensitive substring of the road name
    NameContains(String),
    /// Case-insensitive exact match on the road's classification tag
    TagEquals(String),
}

impl RulePattern {
    fn matches(&self, name_lower: &str, tag_lower: Option<&str>) -> bool {
        match self {
            RulePattern::NameContains(needle) => name_lower.contains(&needle.to_lowercase()),
            RulePattern::TagEquals(expected) => {
                tag_lower.map_or(false, |tag| tag == expected.to_lowercase())
            }
        }
    }
}

/// One row of the rule table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassRule {
    pub pattern: RulePattern,
    pub tier: RoadTier,
}

/// Ordered pattern → tier table.
///
/// # Example
/// ```
/// use traffic_timeline::{RoadClassifier, RoadTier, RulePattern};
///
/// let classifier = RoadClassifier::new(RoadTier::Peripheral)
///     .rule(RulePattern::NameContains("avenue".into()), RoadTier::Central)
///     .rule(RulePattern::TagEquals("primary".into()), RoadTier::Medium);
///
/// assert_eq!(classifier.classify("Park Avenue", Some("primary")), RoadTier::Central);
/// assert_eq!(classifier.classify("Elm Street", Some("primary")), RoadTier::Medium);
/// assert_eq!(classifier.classify("Elm Street", None), RoadTier::Peripheral);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadClassifier {
    /// Rules in priority order
    pub rules: Vec<ClassRule>,
    /// Tier for roads no rule matches
    pub fallback: RoadTier,
}

impl RoadClassifier {
    /// Empty table: every road gets `fallback`.
    pub fn new(fallback: RoadTier) -> Self {
        Self { rules: Vec::new(), fallback }
    }

    /// Append a rule (lower priority than those already present).
    pub fn rule(mut self, pattern: RulePattern, tier: RoadTier) -> Self {
        self.rules.push(ClassRule { pattern, tier });
        self
    }

    /// Resolve the tier for a road.
    pub fn classify(&self, name: &str, tag: Option<&str>) -> RoadTier {
        let name_lower = name.to_lowercase();
        let tag_lower = tag.map(|t| t.to_lowercase());

        self.rules
            .iter()
            .find(|r| r.pattern.matches(&name_lower, tag_lower.as_deref()))
            .map(|r| r.tier)
            .unwrap_or(self.fallback)
    }
}

impl Default for RoadClassifier {
    /// Almaty's central avenues by name, then OSM `highway` importance tags.
    fn default() -> Self {
        let central = ["абая", "райымбек", "толеби", "сейфуллин", "аль-фараби"];
        let medium = ["primary", "secondary", "tertiary"];

        let mut classifier = RoadClassifier::new(RoadTier::Peripheral);
        for keyword in central {
            classifier = classifier.rule(RulePattern::NameContains(keyword.to_string()), RoadTier::Central);
        }
        for tag in medium {
            classifier = classifier.rule(RulePattern::TagEquals(tag.to_string()), RoadTier::Medium);
        }
        classifier
    }
}

/// Free-flow speed range for one tier, km/h.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FreeFlowRange {
    pub min_kmh: f64,
    pub max_kmh: f64,
}

impl FreeFlowRange {
    pub fn new(min_kmh: f64, max_kmh: f64) -> Self {
        Self { min_kmh, max_kmh }
    }

    /// Deterministic representative value: the middle of the range.
    pub fn nominal(&self) -> f64 {
        (self.min_kmh + self.max_kmh) / 2.0
    }
}

/// Per-tier free-flow ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FreeFlowModel {
    /// Default: 30–50 km/h
    pub central: FreeFlowRange,
    /// Default: 40–60 km/h
    pub medium: FreeFlowRange,
    /// Default: 50–70 km/h
    pub peripheral: FreeFlowRange,
}

impl Default for FreeFlowModel {
    fn default() -> Self {
        Self {
            central: FreeFlowRange::new(30.0, 50.0),
            medium: FreeFlowRange::new(40.0, 60.0),
            peripheral: FreeFlowRange::new(50.0, 70.0),
        }
    }
}

impl FreeFlowModel {
    pub fn range(&self, tier: RoadTier) -> FreeFlowRange {
        match tier {
            RoadTier::Central => self.central,
            RoadTier::Medium => self.medium,
            RoadTier::Peripheral => self.peripheral,
        }
    }

    /// Modelled free-flow speed for a tier, km/h.
    pub fn free_flow(&self, tier: RoadTier) -> f64 {
        self.range(tier).nominal()
    }
}
