//! Read-only index over the field-trial report catalog (one CSV row per
//! trial). Loaded fully into memory once; all lookups are normalized
//! exact-match or token-overlap heuristics.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::CatalogError;
use crate::text::{contains_with_plural_support, normalize, token_roots, tokenize};

/// Tokens that appear in almost every trial query and carry no signal.
pub static TRIAL_STOPWORDS: &[&str] = &[
    "de", "del", "la", "el", "los", "las", "para", "con", "por", "sobre",
    "que", "ensayo", "ensayos", "informe", "informes", "trial", "trials",
    "report", "reports", "quiero", "necesito", "dame", "mostrar", "muestra",
    "todos", "todas",
];

#[derive(Debug, Default, Deserialize)]
struct RawTrialRow {
    #[serde(default)]
    season: String,
    #[serde(default)]
    client: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    species: String,
    #[serde(default)]
    variety: String,
    #[serde(default, alias = "file_name", alias = "pdf")]
    file: String,
    #[serde(default)]
    study_url: String,
    #[serde(default, alias = "pdf_url")]
    file_url: String,
}

#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub season: String,
    pub client: String,
    pub product: String,
    pub species: String,
    pub variety: String,
    pub file_name: String,
    pub study_url: String,
    pub file_url: String,
    pub search_text: String,
}

impl TrialRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        season: impl Into<String>,
        client: impl Into<String>,
        product: impl Into<String>,
        species: impl Into<String>,
        variety: impl Into<String>,
        file_name: impl Into<String>,
        study_url: impl Into<String>,
        file_url: impl Into<String>,
    ) -> Self {
        let mut record = Self {
            season: season.into(),
            client: client.into(),
            product: product.into(),
            species: species.into(),
            variety: variety.into(),
            file_name: file_name.into(),
            study_url: study_url.into(),
            file_url: file_url.into(),
            search_text: String::new(),
        };
        let parts = [
            &record.season,
            &record.client,
            &record.product,
            &record.species,
            &record.variety,
            &record.file_name,
            &record.study_url,
            &record.file_url,
        ];
        record.search_text = normalize(
            &parts
                .iter()
                .filter(|part| !part.is_empty())
                .map(|part| part.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
        );
        record
    }

    /// Normalized identity used to collapse duplicate rows.
    pub fn identity_key(&self) -> String {
        [
            &self.product,
            &self.client,
            &self.season,
            &self.species,
            &self.variety,
        ]
        .iter()
        .map(|part| normalize(part))
        .collect::<Vec<_>>()
        .join("|")
    }
}

#[derive(Debug, Default)]
pub struct TrialCatalog {
    records: Vec<TrialRecord>,
    species: BTreeSet<String>,
    products: BTreeSet<String>,
    varieties: BTreeSet<String>,
    clients: BTreeSet<String>,
    seasons: BTreeSet<String>,
}

impl TrialCatalog {
    /// Loads the catalog CSV. A missing file yields an empty catalog — the
    /// retrieval hot path must keep working without structured signals.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut records = Vec::new();
        for row in reader.deserialize::<RawTrialRow>() {
            let raw = row?;
            records.push(TrialRecord::new(
                raw.season,
                raw.client,
                raw.product,
                raw.species,
                raw.variety,
                raw.file,
                raw.study_url,
                raw.file_url,
            ));
        }

        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<TrialRecord>) -> Self {
        let mut catalog = Self {
            records,
            ..Self::default()
        };
        for record in &catalog.records {
            for (value, set) in [
                (&record.species, &mut catalog.species),
                (&record.product, &mut catalog.products),
                (&record.variety, &mut catalog.varieties),
                (&record.client, &mut catalog.clients),
                (&record.season, &mut catalog.seasons),
            ] {
                let normalized = normalize(value);
                if !normalized.is_empty() {
                    set.insert(normalized);
                }
            }
        }
        catalog
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn species(&self) -> &BTreeSet<String> {
        &self.species
    }

    pub fn products(&self) -> &BTreeSet<String> {
        &self.products
    }

    pub fn varieties(&self) -> &BTreeSet<String> {
        &self.varieties
    }

    pub fn clients(&self) -> &BTreeSet<String> {
        &self.clients
    }

    pub fn seasons(&self) -> &BTreeSet<String> {
        &self.seasons
    }

    /// Ranked lookup by free query text. Scoring favors exact field mentions
    /// over bare token overlap; output is deduplicated on the identity key.
    pub fn find_by_query(&self, query: &str, limit: usize) -> Vec<&TrialRecord> {
        let query_norm = normalize(query);
        if query_norm.is_empty() {
            return Vec::new();
        }
        let query_tokens: Vec<String> = tokenize(&query_norm, 3)
            .into_iter()
            .filter(|tok| !TRIAL_STOPWORDS.contains(&tok.as_str()))
            .collect();
        let query_roots = token_roots(&query_norm);
        if query_tokens.is_empty() && query_roots.is_empty() {
            return Vec::new();
        }

        let mut ranked: Vec<(i64, &TrialRecord)> = Vec::new();
        for record in &self.records {
            if record.search_text.is_empty() {
                continue;
            }

            let overlap = query_tokens
                .iter()
                .filter(|tok| record.search_text.contains(tok.as_str()))
                .count() as i64;
            let species_root_overlap = if record.species.is_empty() || query_roots.is_empty() {
                0
            } else {
                query_roots
                    .intersection(&token_roots(&record.species))
                    .count() as i64
            };
            if overlap <= 0 && species_root_overlap <= 0 {
                continue;
            }

            let mut score = overlap * 6;
            if species_root_overlap > 0 {
                score += (species_root_overlap * 10).min(20);
            }
            if !record.species.is_empty()
                && contains_with_plural_support(&query_norm, &record.species)
            {
                score += 14;
            }
            if !record.product.is_empty()
                && contains_with_plural_support(&query_norm, &record.product)
            {
                score += 16;
            }
            if !record.variety.is_empty()
                && contains_with_plural_support(&query_norm, &record.variety)
            {
                score += 8;
            }
            if !record.client.is_empty()
                && contains_with_plural_support(&query_norm, &record.client)
            {
                score += 6;
            }
            if !record.season.is_empty()
                && contains_with_plural_support(&query_norm, &record.season)
            {
                score += 5;
            }

            ranked.push((score, record));
        }

        ranked.sort_by(|a, b| {
            let ka = (
                a.0,
                a.1.season.as_str(),
                a.1.product.as_str(),
                a.1.species.as_str(),
                a.1.variety.as_str(),
            );
            let kb = (
                b.0,
                b.1.season.as_str(),
                b.1.product.as_str(),
                b.1.species.as_str(),
                b.1.variety.as_str(),
            );
            kb.cmp(&ka)
        });

        let mut out = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for (_, record) in ranked {
            if !seen.insert(record.identity_key()) {
                continue;
            }
            out.push(record);
            if out.len() >= limit.max(1) {
                break;
            }
        }
        out
    }

    /// Every record whose normalized species is in the given set, in catalog
    /// order, deduplicated on identity.
    pub fn find_by_species(
        &self,
        species_norm: &BTreeSet<String>,
        limit: usize,
    ) -> Vec<&TrialRecord> {
        if species_norm.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for record in &self.records {
            let normalized = normalize(&record.species);
            if normalized.is_empty() || !species_norm.contains(&normalized) {
                continue;
            }
            if !seen.insert(record.identity_key()) {
                continue;
            }
            out.push(record);
            if out.len() >= limit.max(1) {
                break;
            }
        }
        out
    }

    /// Rendered catalog signals for prompt embedding.
    pub fn query_hints_block(&self, query: &str, limit: usize) -> String {
        let records = self.find_by_query(query, limit.max(1));
        if records.is_empty() {
            return "- no trial catalog signals".to_string();
        }
        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                format!(
                    "{}. product={} | crop={} | variety={} | client={} | season={}",
                    i + 1,
                    display(&record.product),
                    display(&record.species),
                    display(&record.variety),
                    display(&record.client),
                    display(&record.season),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn display(value: &str) -> &str {
    if value.trim().is_empty() {
        "n/a"
    } else {
        value.trim()
    }
}
