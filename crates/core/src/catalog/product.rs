//! Read-only index over the registered-product label catalog. Each record
//! carries a precomputed normalized search blob so free-text lookups never
//! re-normalize the whole table per query.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::error::CatalogError;
use crate::text::{normalize, tokenize};

/// Generic nouns that would match most label rows.
pub static PRODUCT_STOPWORDS: &[&str] = &[
    "para", "con", "del", "los", "las", "una", "uno", "unos", "unas",
    "producto", "productos", "product", "products", "registro", "registros",
    "registration", "autorizacion", "autorizaciones", "authorization",
    "cultivo", "cultivos", "crop", "crops", "control", "tratar", "sirve",
    "label", "labels",
];

#[derive(Debug, Default, Deserialize)]
struct RawProductRow {
    #[serde(default)]
    product_id: String,
    #[serde(default, alias = "product_trade_name")]
    trade_name: String,
    #[serde(default, alias = "authorization")]
    authorizations: String,
    #[serde(default)]
    ingredients: String,
    #[serde(default, alias = "composition_text")]
    composition: String,
    #[serde(default)]
    chemical_group: String,
    #[serde(default, alias = "objective")]
    objectives: String,
    #[serde(default, alias = "objective_norm")]
    objectives_norm: String,
    #[serde(default, alias = "objective_category")]
    objective_categories: String,
}

#[derive(Debug, Clone)]
pub struct ProductRecord {
    pub product_id: String,
    pub trade_name: String,
    pub authorizations: BTreeSet<String>,
    pub objectives: BTreeSet<String>,
    pub ingredients: BTreeSet<String>,
    pub composition: String,
    pub chemical_group: String,
    pub search_text: String,
    pub objective_text: String,
}

impl ProductRecord {
    pub fn new(
        product_id: impl Into<String>,
        trade_name: impl Into<String>,
        authorizations: BTreeSet<String>,
        objectives: BTreeSet<String>,
        ingredients: BTreeSet<String>,
        composition: impl Into<String>,
        chemical_group: impl Into<String>,
    ) -> Self {
        let mut record = Self {
            product_id: normalize(&product_id.into()),
            trade_name: trade_name.into(),
            authorizations,
            objectives,
            ingredients,
            composition: composition.into(),
            chemical_group: chemical_group.into(),
            search_text: String::new(),
            objective_text: String::new(),
        };

        let mut parts: Vec<String> = Vec::new();
        if !record.chemical_group.trim().is_empty() {
            parts.push(record.chemical_group.trim().to_string());
        }
        parts.extend(record.objectives.iter().cloned());
        parts.extend(record.ingredients.iter().cloned());
        if !record.composition.trim().is_empty() {
            parts.push(record.composition.trim().to_string());
        }
        if !record.trade_name.trim().is_empty() {
            parts.push(record.trade_name.trim().to_string());
        }
        record.search_text = normalize(&parts.join(" | "));
        record.objective_text = normalize(
            &record
                .objectives
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" | "),
        );
        record
    }
}

/// Identifier sets produced by a catalog lookup, used as field filters for
/// the row-level enrichment fetch.
#[derive(Debug, Clone, Default)]
pub struct ProductMatches {
    pub product_ids: BTreeSet<String>,
    pub authorizations: BTreeSet<String>,
}

impl ProductMatches {
    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty() && self.authorizations.is_empty()
    }

    pub fn extend(&mut self, other: ProductMatches) {
        self.product_ids.extend(other.product_ids);
        self.authorizations.extend(other.authorizations);
    }
}

#[derive(Debug, Default)]
pub struct ProductCatalog {
    records: Vec<ProductRecord>,
    composition_by_id: HashMap<String, String>,
    name_by_id: HashMap<String, String>,
}

impl ProductCatalog {
    /// Loads the label catalog CSV; a missing file yields an empty catalog.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let mut records = Vec::new();
        for row in reader.deserialize::<RawProductRow>() {
            let raw = row?;
            let product_id = normalize(&raw.product_id);
            if product_id.is_empty() {
                continue;
            }
            let authorizations = split_multi_values(&raw.authorizations)
                .into_iter()
                .map(|value| normalize(&value))
                .filter(|value| !value.is_empty())
                .collect();
            let mut objectives: BTreeSet<String> = BTreeSet::new();
            for column in [
                &raw.objectives,
                &raw.objectives_norm,
                &raw.objective_categories,
            ] {
                objectives.extend(split_multi_values(column));
            }
            let ingredients = split_multi_values(&raw.ingredients).into_iter().collect();

            records.push(ProductRecord::new(
                product_id,
                raw.trade_name,
                authorizations,
                objectives,
                ingredients,
                raw.composition,
                raw.chemical_group,
            ));
        }

        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<ProductRecord>) -> Self {
        let mut composition_by_id = HashMap::new();
        let mut name_by_id = HashMap::new();
        for record in &records {
            if !record.composition.trim().is_empty() {
                composition_by_id
                    .insert(record.product_id.clone(), record.composition.trim().to_string());
            }
            if !record.trade_name.trim().is_empty() {
                name_by_id.insert(record.product_id.clone(), record.trade_name.trim().to_string());
            }
        }
        Self {
            records,
            composition_by_id,
            name_by_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn composition_of(&self, product_id: &str) -> &str {
        self.composition_by_id
            .get(&normalize(product_id))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn name_of(&self, product_id: &str) -> &str {
        self.name_by_id
            .get(&normalize(product_id))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Products whose searchable label text matches an ingredient hint.
    pub fn find_by_ingredient(&self, ingredient_hint: &str) -> ProductMatches {
        self.match_records(ingredient_hint, |record| &record.search_text)
    }

    /// Products whose declared objectives match a target/pest hint.
    pub fn find_by_objective(&self, objective_hint: &str) -> ProductMatches {
        self.match_records(objective_hint, |record| &record.objective_text)
    }

    fn match_records(
        &self,
        hint: &str,
        text_of: impl Fn(&ProductRecord) -> &str,
    ) -> ProductMatches {
        let needle = normalize(hint);
        if needle.is_empty() {
            return ProductMatches::default();
        }
        let needle_tokens = tokenize(&needle, 4);

        let mut matches = ProductMatches::default();
        for record in &self.records {
            let text = text_of(record);
            if text.is_empty() {
                continue;
            }
            let direct = text.contains(&needle) || needle.contains(text);
            let by_tokens = !needle_tokens.is_empty()
                && needle_tokens.iter().all(|tok| text.contains(tok.as_str()));
            if direct || by_tokens {
                matches.product_ids.insert(record.product_id.clone());
                matches
                    .authorizations
                    .extend(record.authorizations.iter().cloned());
            }
        }
        matches
    }

    /// Ranked lookup by free query text; returns the matched identifier sets
    /// together with the top records.
    pub fn find_by_query(&self, query: &str, limit: usize) -> (ProductMatches, Vec<&ProductRecord>) {
        let query_norm = normalize(query);
        if query_norm.is_empty() {
            return (ProductMatches::default(), Vec::new());
        }
        let query_tokens: Vec<String> = tokenize(&query_norm, 4)
            .into_iter()
            .filter(|tok| !PRODUCT_STOPWORDS.contains(&tok.as_str()))
            .collect();
        if query_tokens.is_empty() {
            return (ProductMatches::default(), Vec::new());
        }

        let mut ranked: Vec<(i64, &ProductRecord)> = Vec::new();
        for record in &self.records {
            if record.search_text.is_empty() {
                continue;
            }
            let overlap = query_tokens
                .iter()
                .filter(|tok| record.search_text.contains(tok.as_str()))
                .count() as i64;
            if overlap <= 0 {
                continue;
            }

            let mut score = overlap * 10;
            if !record.trade_name.is_empty() && query_norm.contains(&normalize(&record.trade_name))
            {
                score += 8;
            }
            if !record.composition.is_empty() {
                let composition_norm = normalize(&record.composition);
                if query_tokens
                    .iter()
                    .any(|tok| composition_norm.contains(tok.as_str()))
                {
                    score += 4;
                }
            }
            ranked.push((score, record));
        }

        ranked.sort_by(|a, b| {
            let ka = (a.0, a.1.trade_name.as_str());
            let kb = (b.0, b.1.trade_name.as_str());
            kb.cmp(&ka)
        });

        let top: Vec<&ProductRecord> = ranked
            .into_iter()
            .take(limit.max(1))
            .map(|(_, record)| record)
            .collect();

        let mut matches = ProductMatches::default();
        for record in &top {
            if !record.product_id.is_empty() {
                matches.product_ids.insert(record.product_id.clone());
            }
            matches
                .authorizations
                .extend(record.authorizations.iter().cloned());
        }

        (matches, top)
    }

    /// Rendered catalog signals for prompt embedding.
    pub fn query_hints_block(&self, query: &str, limit: usize) -> String {
        let (_, records) = self.find_by_query(query, limit.max(1));
        if records.is_empty() {
            return "- no additional catalog signals".to_string();
        }
        records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let auths = join_truncated(&record.authorizations, 80);
                let objectives = join_truncated(&record.objectives, 180);
                let ingredients = join_truncated(&record.ingredients, 180);
                let name = if record.trade_name.is_empty() {
                    &record.product_id
                } else {
                    &record.trade_name
                };
                format!(
                    "{}. {} | authorization: {} | objectives: {} | ingredients: {}",
                    i + 1,
                    name,
                    auths,
                    objectives,
                    ingredients
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn join_truncated(values: &BTreeSet<String>, max_len: usize) -> String {
    let joined = values
        .iter()
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        return "n/a".to_string();
    }
    crate::text::truncate_ellipsis(&joined, max_len)
}

fn split_multi_values(text: &str) -> Vec<String> {
    text.split(['|', ';', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(
        id: &str,
        name: &str,
        auth: &str,
        objectives: &[&str],
        ingredients: &[&str],
        composition: &str,
    ) -> ProductRecord {
        ProductRecord::new(
            id,
            name,
            [normalize(auth)].into_iter().filter(|a| !a.is_empty()).collect(),
            objectives.iter().map(|s| s.to_string()).collect(),
            ingredients.iter().map(|s| s.to_string()).collect(),
            composition,
            "",
        )
    }

    fn sample_catalog() -> ProductCatalog {
        ProductCatalog::from_records(vec![
            record(
                "p-001",
                "Fungex 50 WP",
                "1234",
                &["Oidio", "Botrytis"],
                &["Azufre"],
                "Azufre 50% p/p",
            ),
            record(
                "p-002",
                "Acarix",
                "5678",
                &["Arañita roja"],
                &["Abamectina"],
                "Abamectina 1,8% p/v",
            ),
        ])
    }

    #[test]
    fn missing_file_yields_empty_catalog() {
        let catalog = ProductCatalog::load(Path::new("/nonexistent/labels.csv")).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn load_parses_multi_value_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "product_id,trade_name,authorizations,ingredients,composition,chemical_group,objectives,objectives_norm,objective_categories"
        )
        .unwrap();
        writeln!(
            file,
            "p-009,Cuprex,111|222,Cobre;Oxicloruro,Cobre 30%,,Venturia|Tizon,,fungicida"
        )
        .unwrap();
        let catalog = ProductCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.records().len(), 1);
        let rec = &catalog.records()[0];
        assert_eq!(rec.authorizations.len(), 2);
        assert_eq!(rec.ingredients.len(), 2);
        assert_eq!(rec.objectives.len(), 3);
    }

    #[test]
    fn ingredient_lookup_matches_composition_tokens() {
        let catalog = sample_catalog();
        let matches = catalog.find_by_ingredient("abamectina");
        assert!(matches.product_ids.contains("p-002"));
        assert!(matches.authorizations.contains("5678"));
        assert!(!matches.product_ids.contains("p-001"));
    }

    #[test]
    fn objective_lookup_is_diacritic_insensitive() {
        let catalog = sample_catalog();
        let matches = catalog.find_by_objective("aranita roja");
        assert!(matches.product_ids.contains("p-002"));
    }

    #[test]
    fn query_lookup_returns_ids_and_records() {
        let catalog = sample_catalog();
        let (matches, records) = catalog.find_by_query("producto para oidio", 10);
        assert!(matches.product_ids.contains("p-001"));
        assert_eq!(records[0].trade_name, "Fungex 50 WP");
    }

    #[test]
    fn stopword_only_queries_match_nothing() {
        let catalog = sample_catalog();
        let (matches, records) = catalog.find_by_query("productos registrados", 10);
        assert!(matches.is_empty());
        assert!(records.is_empty());
    }

    #[test]
    fn composition_fallback_resolves_by_id() {
        let catalog = sample_catalog();
        assert_eq!(catalog.composition_of("P-001"), "Azufre 50% p/p");
        assert_eq!(catalog.composition_of("unknown"), "");
    }
}
