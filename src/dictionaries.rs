//! Matching dictionaries: stop-words, synonyms, compound phrases, brand
//! transliterations, abbreviations, negative patterns and
//! service-indicator phrases.
//!
//! All of these are data, not code: the tables live in
//! `assets/dictionaries.json` (compiled in as the default) and can be
//! replaced at startup via `SNIPER_DICTIONARIES` without a code change.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;

const EMBEDDED: &str = include_str!("../assets/dictionaries.json");

/// Raw dictionary tables as they appear on disk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DictionaryData {
    /// Generic procurement terms ignored during matching. Lower case.
    #[serde(default, alias = "stopWords")]
    pub stop_words: Vec<String>,
    /// Keyword -> interchangeable terms.
    #[serde(default)]
    pub synonyms: HashMap<String, Vec<String>>,
    /// Multi-word technical terms matched as a unit, each with its own
    /// synonym row.
    #[serde(default, alias = "compoundPhrases")]
    pub compound_phrases: HashMap<String, Vec<String>>,
    /// Brand names, Latin and Cyrillic spellings. Closed bidirectionally
    /// at load time.
    #[serde(default, alias = "brandSynonyms")]
    pub brand_synonyms: HashMap<String, Vec<String>>,
    /// Acronym <-> expansion rows.
    #[serde(default)]
    pub abbreviations: HashMap<String, Vec<String>>,
    /// Phrases that mark a tender as belonging to an unrelated domain
    /// keyword searches tend to false-positive into.
    #[serde(default, alias = "negativePatterns")]
    pub negative_patterns: Vec<String>,
    /// Phrases a goods-only tender name must not START with.
    #[serde(default, alias = "serviceStartPhrases")]
    pub service_start_phrases: Vec<String>,
    /// Phrases a goods-only tender name must not CONTAIN.
    #[serde(default, alias = "serviceIndicators")]
    pub service_indicators: Vec<String>,
}

/// Loaded dictionaries with precompiled automata for the hot paths.
pub struct Dictionaries {
    data: DictionaryData,
    stop_set: HashSet<String>,
    negative_ac: AhoCorasick,
    service_indicator_ac: AhoCorasick,
}

impl Dictionaries {
    /// Load the compiled-in default tables.
    pub fn embedded() -> Dictionaries {
        Self::from_json(EMBEDDED).expect("embedded dictionaries are valid")
    }

    /// Load tables from a JSON file, falling back to nothing: a broken
    /// override is a configuration error surfaced at startup.
    pub fn from_path(path: &str) -> anyhow::Result<Dictionaries> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionaries file '{}'", path))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse dictionaries file '{}'", path))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Dictionaries> {
        let mut data: DictionaryData =
            serde_json::from_str(json).context("invalid dictionary JSON")?;
        close_brand_table(&mut data.brand_synonyms);

        let stop_set = data.stop_words.iter().map(|w| w.to_lowercase()).collect();
        let negative_ac = build_ac(&data.negative_patterns)?;
        let service_indicator_ac = build_ac(&data.service_indicators)?;

        Ok(Dictionaries {
            data,
            stop_set,
            negative_ac,
            service_indicator_ac,
        })
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_set.contains(&word.trim().to_lowercase())
    }

    /// First negative pattern found in the (lowercased) text, if any.
    pub fn find_negative_pattern<'a>(&'a self, text: &str) -> Option<&'a str> {
        self.negative_ac
            .find(text)
            .map(|m| self.data.negative_patterns[m.pattern().as_usize()].as_str())
    }

    /// Whether the (lowercased) tender name reads as a service rather
    /// than a goods delivery.
    pub fn looks_like_service(&self, name: &str) -> bool {
        if self
            .data
            .service_start_phrases
            .iter()
            .any(|p| name.starts_with(p.as_str()))
        {
            return true;
        }
        self.service_indicator_ac.is_match(name)
    }

    pub fn synonyms_for(&self, keyword: &str) -> &[String] {
        self.data
            .synonyms
            .get(keyword)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn brands_for(&self, keyword: &str) -> &[String] {
        self.data
            .brand_synonyms
            .get(keyword)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn abbreviations_for(&self, keyword: &str) -> &[String] {
        self.data
            .abbreviations
            .get(keyword)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Synonym row of a compound phrase; empty when the phrase is not in
    /// the table.
    pub fn compound_synonyms(&self, phrase: &str) -> &[String] {
        self.data
            .compound_phrases
            .get(phrase)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_compound_phrase(&self, phrase: &str) -> bool {
        self.data.compound_phrases.contains_key(phrase)
    }

    /// Dictionary phrase contained in the given keyword, if any. Longer
    /// phrases win so "двухфакторная аутентификация" beats a shorter
    /// overlap.
    pub fn compound_phrase_within<'a>(&'a self, keyword: &str) -> Option<&'a str> {
        self.data
            .compound_phrases
            .keys()
            .filter(|phrase| keyword.contains(phrase.as_str()))
            .max_by_key(|phrase| phrase.len())
            .map(|s| s.as_str())
    }

    pub fn brand_pairs(&self) -> &HashMap<String, Vec<String>> {
        &self.data.brand_synonyms
    }
}

/// Make the brand table symmetric: for every `latin -> [cyrillic...]` row,
/// each variant maps back to the head term.
fn close_brand_table(table: &mut HashMap<String, Vec<String>>) {
    let snapshot: Vec<(String, Vec<String>)> = table
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for (head, variants) in snapshot {
        for variant in variants {
            let entry = table.entry(variant.clone()).or_default();
            if !entry.iter().any(|v| v == &head) {
                entry.push(head.clone());
            }
        }
    }
}

fn build_ac(patterns: &[String]) -> anyhow::Result<AhoCorasick> {
    AhoCorasickBuilder::new()
        .build(patterns)
        .context("failed to build pattern automaton")
}
