//! Turns the model's free-text reply into an [`AnalysisResult`].
//!
//! The reply is untrusted. Extraction (finding the yaml block) and parsing
//! (yaml into typed records) are separate steps so each can be tested on its
//! own. A reply that does not parse is fatal; nothing is repaired or guessed.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};
use tracing::{info, warn};

use crate::{
    error::AnalyzeError,
    models::{lenient_text, AnalysisResult, Goals, MealItem, OilEstimate, Totals},
};

/// Reported with every result. Not derived from the model.
pub const CONFIDENCE_SCORE: f64 = 0.85;

/// What to do with a second item whose trimmed name was already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Keep the first occurrence, drop later ones entirely.
    KeepFirst,
    /// Add later occurrences' quantities onto the first one.
    Merge,
}

impl DuplicatePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "keep_first" | "first" => Some(Self::KeepFirst),
            "merge" | "sum" => Some(Self::Merge),
            _ => None,
        }
    }
}

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[\w-]*[ \t]*\r?\n?(.*?)```").unwrap();
    static ref FENCE_LINE: Regex = Regex::new(r"(?m)^[ \t]*```[\w-]*[ \t]*\r?$").unwrap();
}

/// First fenced block anywhere in the reply, or the whole reply.
/// Only surrounding blank lines and trailing whitespace are dropped; indentation is kept.
pub fn extract_block(reply: &str) -> &str {
    let block = match FENCED_BLOCK.captures(reply).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => reply,
    };
    trim_blank_lines(block)
}

/// Removes leftover fence markers, e.g. from an unclosed or doubled fence,
/// then the indentation shared by every line.
pub fn strip_fences(block: &str) -> String {
    dedent(&FENCE_LINE.replace_all(block, "").replace("```", ""))
}

fn trim_blank_lines(s: &str) -> &str {
    let start = s
        .char_indices()
        .take_while(|(_, c)| c.is_whitespace())
        .filter(|&(_, c)| c == '\n')
        .last()
        .map_or(0, |(idx, _)| idx + 1);
    s[start..].trim_end()
}

fn dedent(block: &str) -> String {
    let indent = block
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    let lines: Vec<&str> = block
        .lines()
        .map(|line| line.get(indent..).unwrap_or("").trim_end())
        .collect();
    lines.join("\n").trim_matches('\n').to_string()
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    name: Option<serde_yaml::Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    portion: Option<String>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    mass_g: f64,
    #[serde(default, alias = "calories")]
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    cals: f64,
    #[serde(default, alias = "protein")]
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    p: f64,
    #[serde(default, alias = "carbs")]
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    c: f64,
    #[serde(default, alias = "fat")]
    #[serde_as(as = "DefaultOnError<PickFirst<(_, DisplayFromStr)>>")]
    f: f64,
}

impl RawItem {
    /// Trimmed name, or `None` when absent, blank or not a scalar.
    fn key(&self) -> Option<String> {
        let name = match self.name.as_ref()? {
            serde_yaml::Value::String(s) => s.trim().to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!name.is_empty()).then_some(name)
    }

    // Fiber is never taken from the reply; the prompt does not ask for it.
    fn into_meal_item(self, name: String) -> MealItem {
        MealItem {
            name,
            portion: self.portion.unwrap_or_default(),
            mass_g: finite(self.mass_g),
            calories: finite(self.cals),
            protein: finite(self.p),
            carbs: finite(self.c),
            fat: finite(self.f),
            fiber: 0.0,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
pub struct RawAnalysis {
    #[serde(alias = "meal_analysis", alias = "ingredients")]
    items: Vec<RawItem>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError")]
    oil_estimate: Option<OilEstimate>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    health_score: Option<f64>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError")]
    goals: Option<Goals>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError")]
    verdict: Option<String>,
    #[serde(default)]
    #[serde_as(as = "DefaultOnError")]
    analysis: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDocument {
    Full(RawAnalysis),
    ItemsOnly(Vec<RawItem>),
}

/// Parses an extracted block. A mapping must carry an `items` list; a bare list is read as the items.
pub fn parse_document(block: &str) -> Result<RawAnalysis, AnalyzeError> {
    let doc: RawDocument = serde_yaml::from_str(block).map_err(|e| AnalyzeError::Parse(e.to_string()))?;
    Ok(match doc {
        RawDocument::Full(analysis) => analysis,
        RawDocument::ItemsOnly(items) => RawAnalysis {
            items,
            oil_estimate: None,
            health_score: None,
            goals: None,
            verdict: None,
            analysis: None,
        },
    })
}

/// Maps raw items to meal items keyed by trimmed name, in document order.
/// Items without a usable name are skipped.
pub fn dedupe(items: Vec<RawItem>, policy: DuplicatePolicy) -> Vec<MealItem> {
    let mut out: Vec<MealItem> = Vec::with_capacity(items.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for raw in items {
        let Some(name) = raw.key() else { continue };
        match seen.get(&name).copied() {
            None => {
                seen.insert(name.clone(), out.len());
                out.push(raw.into_meal_item(name));
            }
            Some(idx) => match policy {
                DuplicatePolicy::KeepFirst => {
                    info!("Dropping duplicate item '{}'", name);
                }
                DuplicatePolicy::Merge => {
                    let extra = raw.into_meal_item(name);
                    let kept = &mut out[idx];
                    kept.mass_g += extra.mass_g;
                    kept.calories += extra.calories;
                    kept.protein += extra.protein;
                    kept.carbs += extra.carbs;
                    kept.fat += extra.fat;
                    if !extra.portion.is_empty() && extra.portion != kept.portion {
                        kept.portion = if kept.portion.is_empty() {
                            extra.portion
                        } else {
                            format!("{} + {}", kept.portion, extra.portion)
                        };
                    }
                }
            },
        }
    }
    out
}

/// Full pipeline from reply text to result. Totals are always recomputed.
pub fn interpret(reply: &str, policy: DuplicatePolicy) -> Result<AnalysisResult, AnalyzeError> {
    let block = strip_fences(extract_block(reply));
    let doc = parse_document(&block).map_err(|e| {
        warn!("❌ Model reply did not parse ({}): {}", e, preview(reply, 200));
        e
    })?;

    let items = dedupe(doc.items, policy);
    let totals = Totals::from_items(&items);
    let reasoning_log = doc
        .analysis
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| format!("Identified {} unique items.", items.len()));

    info!("✅ Parsed {} unique items, {:.0} kcal total", items.len(), totals.calories);

    Ok(AnalysisResult {
        meal_analysis: items,
        totals,
        reasoning_log,
        confidence_score: CONFIDENCE_SCORE,
        oil_estimate: doc.oil_estimate,
        health_score: doc.health_score,
        goals: doc.goals,
        verdict: doc.verdict,
    })
}

fn finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[{} chars]", &s[..idx], s.len()),
        None => s.to_string(),
    }
}
