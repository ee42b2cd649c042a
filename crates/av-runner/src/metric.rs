//! Metric sentinel parsing.
//!
//! Children report readings as `AUTOVRAM_METRIC <name>=<float>` lines on
//! stdout. Anything else on stdout is ignored.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static METRIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^AUTOVRAM_METRIC\s+(?P<key>[A-Za-z0-9_]+)=(?P<val>[-+0-9.eE]+)\s*$")
        .expect("metric pattern is a valid regex")
});

fn sentinels(stdout: &str) -> impl Iterator<Item = (&str, f64)> {
    stdout.lines().filter_map(|line| {
        let caps = METRIC_RE.captures(line.trim())?;
        let key = caps.name("key")?.as_str();
        let value = caps.name("val")?.as_str().parse::<f64>().ok()?;
        Some((key, value))
    })
}

/// Value of the last well-formed sentinel line for `metric_name`.
pub fn parse_metric(stdout: &str, metric_name: &str) -> Option<f64> {
    sentinels(stdout)
        .filter(|(key, _)| *key == metric_name)
        .last()
        .map(|(_, value)| value)
}

/// Every metric reported, each mapped to its last value.
pub fn parse_metrics(stdout: &str) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for (key, value) in sentinels(stdout) {
        metrics.insert(key.to_string(), value);
    }
    metrics
}
