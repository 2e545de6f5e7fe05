//! Keyword / pattern tables used by the intent parser.
//!
//! ラベルはそのままカタログのタグとして使う（cooling, demand, cost, steiner ...）。
//! 単語境界つきの正規表現にまとめて、"cool" が "school" に当たらないようにしている。

use regex::Regex;

/// One labelled rule: any keyword (whole word / phrase) or extra pattern fires it.
pub(crate) struct KeywordRule {
    pub label: &'static str,
    matcher: Regex,
    patterns: Vec<Regex>,
}

impl KeywordRule {
    fn compile(
        label: &'static str,
        keywords: &[&str],
        patterns: &[&str],
    ) -> Result<Self, regex::Error> {
        let alternatives = keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            label,
            matcher: Regex::new(&format!(r"(?i)\b(?:{alternatives})\b"))?,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Byte offset of the first hit, used to keep labels in text order.
    pub fn first_hit(&self, text: &str) -> Option<usize> {
        let keyword = self.matcher.find(text).map(|m| m.start());
        let pattern = self.patterns.iter().filter_map(|p| p.find(text)).map(|m| m.start()).min();
        match (keyword, pattern) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

type RuleSpec = (&'static str, &'static [&'static str], &'static [&'static str]);

const DOMAINS: &[RuleSpec] = &[
    (
        "cooling",
        &["cooling", "cool", "chiller", "chillers", "air conditioning", "air-conditioning"],
        &[],
    ),
    (
        "heating",
        &["heating", "heat", "boiler", "boilers", "heat pump", "heat pumps"],
        &[],
    ),
    (
        "demand",
        &["demand", "demands", "load", "loads", "consumption", "energy use"],
        &[],
    ),
    (
        "network",
        &["network", "networks", "pipe", "pipes", "piping", "district heating", "district cooling"],
        &[],
    ),
    (
        "supply",
        &["supply", "technology", "technologies", "storage", "photovoltaic", "pv", "solar panels"],
        &[],
    ),
    (
        "emissions",
        &["ghg", "greenhouse gas", "greenhouse gases", "carbon footprint", "co2"],
        &[],
    ),
    (
        "validation",
        &["validate", "validation", "calibrate", "calibration", "measured"],
        &[],
    ),
    (
        "report",
        &["report", "reports", "reporting", "kpi", "kpis"],
        &[],
    ),
];

const OBJECTIVES: &[RuleSpec] = &[
    (
        "cost",
        &["cost", "costs", "cheap", "cheapest", "economic", "economical", "price", "capex", "opex", "affordable"],
        &[],
    ),
    (
        "emissions",
        &["emissions", "emission", "carbon", "co2", "ghg", "low-carbon", "decarbonize", "decarbonise"],
        &[],
    ),
    (
        "renewable",
        &["renewable", "renewables", "solar", "self-sufficiency"],
        &[],
    ),
];

const ALGORITHMS: &[RuleSpec] = &[
    ("genetic", &["genetic", "genetic algorithm", "evolutionary"], &[]),
    ("steiner", &["steiner", "steiner tree"], &[]),
    ("mst", &["mst", "minimum spanning tree"], &[]),
    ("nsga2", &["nsga2", "nsga-ii", "nsga ii"], &[]),
];

const ACTIONS: &[RuleSpec] = &[
    ("design", &["design", "size", "sizing", "build"], &[]),
    ("estimate", &["estimate", "estimation", "predict", "forecast"], &[]),
    (
        "optimize",
        &["optimize", "optimise", "optimization", "optimisation", "optimal", "minimize", "minimise"],
        &[r"(?i)\bbest\s+(?:option|system|configuration)\b"],
    ),
    ("calculate", &["calculate", "compute", "simulate", "simulation", "run"], &[]),
    ("evaluate", &["evaluate", "evaluation", "assess", "assessment", "compare"], &[]),
    ("validate", &["validate", "verify", "calibrate"], &[]),
    ("generate", &["generate", "create", "produce"], &[]),
    ("analyze", &["analyze", "analyse", "analysis"], &[]),
    ("plan", &["plan", "layout", "route"], &[]),
];

const DISTRICT_WORDS: &[&str] = &[
    "district", "neighbourhood", "neighborhood", "city", "urban", "campus", "zone", "area",
];
const BUILDING_WORDS: &[&str] = &["building", "house", "office", "apartment", "dwelling"];

/// Compiled rule set.
pub(crate) struct RuleTable {
    pub domains: Vec<KeywordRule>,
    pub objectives: Vec<KeywordRule>,
    pub algorithms: Vec<KeywordRule>,
    pub actions: Vec<KeywordRule>,
    pub district: KeywordRule,
    pub building: KeywordRule,
    pub file: Regex,
    pub question: Regex,
    pub timestep: Regex,
    pub temperature: Regex,
}

impl RuleTable {
    pub fn compile() -> Result<Self, regex::Error> {
        let compile_all = |specs: &[RuleSpec]| -> Result<Vec<KeywordRule>, regex::Error> {
            specs
                .iter()
                .map(|&(label, keywords, patterns)| KeywordRule::compile(label, keywords, patterns))
                .collect()
        };

        Ok(Self {
            domains: compile_all(DOMAINS)?,
            objectives: compile_all(OBJECTIVES)?,
            algorithms: compile_all(ALGORITHMS)?,
            actions: compile_all(ACTIONS)?,
            district: KeywordRule::compile("district", DISTRICT_WORDS, &[])?,
            building: KeywordRule::compile("building", BUILDING_WORDS, &[])?,
            file: Regex::new(
                r"(?i)[\w\-./]+\.(geojson|epw|csv|xlsx|xls|json|yaml|yml|shp|dbf)\b",
            )?,
            question: Regex::new(
                r"(?i)(?:^(?:what|how|which|where|when|why|who|is|are|can|does|do)\b|\?\s*$)",
            )?,
            timestep: Regex::new(r"(?i)\b(hourly|daily|monthly|annual|yearly)\b")?,
            temperature: Regex::new(
                r"(?i)(-?\d+(?:\.\d+)?)\s*(?:°\s*c|deg(?:rees?)?\s*c(?:elsius)?)\b",
            )?,
        })
    }
}

/// Labels of all rules that fire, ordered by first occurrence in `text`.
pub(crate) fn labels_in_order(rules: &[KeywordRule], text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, &'static str)> = rules
        .iter()
        .filter_map(|r| r.first_hit(text).map(|pos| (pos, r.label)))
        .collect();
    hits.sort();
    let mut labels: Vec<String> = Vec::with_capacity(hits.len());
    for (_, label) in hits {
        if !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
    labels
}
