//! Multi-stage recall widening over the label collection: field filtering
//! with weak-filter fallback, identifier-based row enrichment, catalog
//! cross-referencing, and a best-effort confirmation pass. Every stage is
//! additive and order-sensitive; none may turn a non-empty evidence set into
//! an empty one.

use tracing::{debug, info};

use crate::catalog::{ProductCatalog, ProductMatches};
use crate::error::RetrievalError;
use crate::extract::{crop_hint, ingredient_hint, objective_hint};
use crate::models::{Filter, Hit, Payload};
use crate::query::merge_hits_by_id;
use crate::text::{meaningful_tokens, normalize};
use crate::traits::VectorSearch;

const ROW_SCROLL_PAGE: usize = 256;

/// Which per-record text a field filter compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductField {
    Ingredient,
    Objective,
    Crop,
}

/// Joined, normalized alias text for one filterable field of a label row.
pub fn field_text(payload: &Payload, field: ProductField) -> String {
    let combined = match field {
        ProductField::Ingredient => [
            payload.get_first(&["composition", "composition_text"]),
            payload.value_text("ingredients"),
            payload.get_str("chemical_group"),
            payload.get_first(&["trade_name", "product_trade_name"]),
            payload.get_str("product_id"),
        ]
        .join(" "),
        ProductField::Objective => [
            payload.get_str("objective"),
            payload.get_str("objective_norm"),
            payload.get_str("objective_category"),
        ]
        .join(" "),
        ProductField::Crop => payload.get_str("crop"),
    };
    normalize(&combined)
}

/// Keeps hits whose field text matches the needle by containment in either
/// direction or by any informative token. Rows with no text for the field
/// are dropped; callers apply the weak-filter fallback.
pub fn filter_hits_by_field(hits: &[Hit], needle: &str, field: ProductField) -> Vec<Hit> {
    let target = normalize(needle);
    if target.is_empty() {
        return hits.to_vec();
    }
    let tokens = meaningful_tokens(&target);

    hits.iter()
        .filter(|hit| {
            let haystack = field_text(&hit.payload, field);
            if haystack.is_empty() {
                return false;
            }
            haystack.contains(&target)
                || target.contains(&haystack)
                || tokens.iter().any(|tok| haystack.contains(tok.as_str()))
        })
        .cloned()
        .collect()
}

fn filter_by_product_name(hits: Vec<Hit>, product_hint: &str) -> Vec<Hit> {
    let hint = normalize(product_hint);
    if hint.is_empty() {
        return hits;
    }
    let filtered: Vec<Hit> = hits
        .iter()
        .filter(|hit| {
            let name = normalize(
                &hit.payload
                    .get_first(&["trade_name", "product_trade_name"]),
            );
            !name.is_empty() && (name.contains(&hint) || hint.contains(&name))
        })
        .cloned()
        .collect();
    if filtered.is_empty() {
        hits
    } else {
        filtered
    }
}

/// Progressive narrowing of the semantic seed set by every hint the query
/// carries. Each stage keeps the previous set when it would zero out, so a
/// weak filter never eliminates all evidence.
pub fn progressive_seed_filter(
    hits: &[Hit],
    query_text: &str,
    user_message: &str,
    product_hint: &str,
) -> Vec<Hit> {
    if hits.is_empty() {
        return Vec::new();
    }
    let combined = normalize(&format!("{query_text} {user_message}"));

    let ingredient = ingredient_hint(&combined);
    let objective = objective_hint(&combined);
    let crop = crop_hint(&combined);
    let product_norm = normalize(product_hint);

    let generic_token = if ingredient.is_none()
        && objective.is_none()
        && crop.is_none()
        && product_norm.is_empty()
    {
        meaningful_tokens(&combined)
            .into_iter()
            .max_by_key(String::len)
    } else {
        None
    };

    let mut filtered: Vec<Hit> = hits.to_vec();

    if let Some(hint) = &ingredient {
        let by_ingredient = filter_hits_by_field(&filtered, hint, ProductField::Ingredient);
        debug!(
            hint = %hint,
            before = filtered.len(),
            after = by_ingredient.len(),
            "ingredient seed filter"
        );
        if !by_ingredient.is_empty() {
            filtered = merge_hits_by_id(by_ingredient, filtered);
        }
    }
    if let Some(hint) = &objective {
        let by_objective = filter_hits_by_field(&filtered, hint, ProductField::Objective);
        if !by_objective.is_empty() {
            debug!(
                hint = %hint,
                before = filtered.len(),
                after = by_objective.len(),
                "objective seed filter"
            );
            filtered = by_objective;
        }
    }
    if let Some(hint) = &crop {
        let by_crop = filter_hits_by_field(&filtered, hint, ProductField::Crop);
        if !by_crop.is_empty() {
            debug!(
                hint = %hint,
                before = filtered.len(),
                after = by_crop.len(),
                "crop seed filter"
            );
            filtered = by_crop;
        }
    }
    if let Some(token) = &generic_token {
        let by_objective = filter_hits_by_field(&filtered, token, ProductField::Objective);
        let by_ingredient = filter_hits_by_field(&filtered, token, ProductField::Ingredient);
        let merged = merge_hits_by_id(by_objective, by_ingredient);
        if !merged.is_empty() {
            debug!(
                token = %token,
                before = filtered.len(),
                after = merged.len(),
                "generic token seed filter"
            );
            filtered = merged;
        }
    }
    if !product_norm.is_empty() {
        filtered = filter_by_product_name(filtered, product_hint);
    }

    filtered
}

/// Widens a label-row hit set through identifier cross-references against
/// the product catalog and the full label collection.
pub struct RecallBooster<'a, V: VectorSearch> {
    store: &'a V,
    collection: &'a str,
    catalog: &'a ProductCatalog,
}

impl<'a, V: VectorSearch + Send + Sync> RecallBooster<'a, V> {
    pub fn new(store: &'a V, collection: &'a str, catalog: &'a ProductCatalog) -> Self {
        Self {
            store,
            collection,
            catalog,
        }
    }

    /// Fetches every label row sharing a product id or authorization with
    /// the given identifier sets.
    pub async fn rows_by_identifiers(
        &self,
        matches: &ProductMatches,
        max_rows: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        if matches.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = Filter::default();
        if !matches.product_ids.is_empty() {
            filter = filter.with_should(Filter::any_of(
                "product_id",
                matches.product_ids.iter().cloned(),
            ));
        }
        if !matches.authorizations.is_empty() {
            filter = filter.with_should(Filter::any_of(
                "authorization",
                matches.authorizations.iter().cloned(),
            ));
        }
        self.store
            .scroll(self.collection, &filter, ROW_SCROLL_PAGE, max_rows.max(1))
            .await
    }

    /// Recovers rows a similarity cutoff would rank away: all rows sharing a
    /// product id or authorization with any seed hit, merged after the
    /// seeds, first-seen wins.
    pub async fn enrich_from_seeds(
        &self,
        seeds: &[Hit],
        max_rows: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let mut identifiers = ProductMatches::default();
        for hit in seeds {
            let product_id = normalize(&hit.payload.get_str("product_id"));
            if !product_id.is_empty() {
                identifiers.product_ids.insert(product_id);
            }
            let authorization = normalize(&hit.payload.get_str("authorization"));
            if !authorization.is_empty() {
                identifiers.authorizations.insert(authorization);
            }
        }
        if identifiers.is_empty() {
            return Ok(seeds.to_vec());
        }
        let rows = self.rows_by_identifiers(&identifiers, max_rows).await?;
        debug!(seeds = seeds.len(), rows = rows.len(), "identifier enrichment");
        Ok(merge_hits_by_id(seeds.to_vec(), rows))
    }

    /// Cross-references the catalog by objective hint and pulls in rows the
    /// vector search missed entirely.
    pub async fn boost_by_objective(
        &self,
        hits: Vec<Hit>,
        objective_hint: Option<&str>,
        max_rows: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let Some(hint) = objective_hint.filter(|hint| !hint.trim().is_empty()) else {
            return Ok(hits);
        };
        let matches = self.catalog.find_by_objective(hint);
        if matches.is_empty() {
            return Ok(hits);
        }
        let rows = self.rows_by_identifiers(&matches, max_rows).await?;
        if rows.is_empty() {
            return Ok(hits);
        }
        let merged = merge_hits_by_id(hits, rows);
        info!(
            hint = %hint,
            product_ids = matches.product_ids.len(),
            authorizations = matches.authorizations.len(),
            total = merged.len(),
            "objective recall boost"
        );
        Ok(merged)
    }

    /// Cross-references the catalog by ingredient hint.
    pub async fn boost_by_ingredient(
        &self,
        hits: Vec<Hit>,
        ingredient_hint: Option<&str>,
        max_rows: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let Some(hint) = ingredient_hint.filter(|hint| !hint.trim().is_empty()) else {
            return Ok(hits);
        };
        let matches = self.catalog.find_by_ingredient(hint);
        if matches.is_empty() {
            return Ok(hits);
        }
        let rows = self.rows_by_identifiers(&matches, max_rows).await?;
        if rows.is_empty() {
            return Ok(hits);
        }
        let merged = merge_hits_by_id(hits, rows);
        info!(
            hint = %hint,
            product_ids = matches.product_ids.len(),
            authorizations = matches.authorizations.len(),
            total = merged.len(),
            "ingredient recall boost"
        );
        Ok(merged)
    }

    /// Best-effort confirmation: re-derives the catalog match set from the
    /// query text plus metadata of the current top hits and keeps only hits
    /// whose identifiers intersect it. Applied only when the confirming
    /// lookup itself matched something; an empty confirmation never discards
    /// evidence.
    pub async fn confirm_with_catalog(
        &self,
        hits: Vec<Hit>,
        query: &str,
        user_message: &str,
        base_top_k: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        if hits.is_empty() {
            return Ok(hits);
        }

        let mut query_parts: Vec<String> = vec![query.to_string(), user_message.to_string()];
        for hit in hits.iter().take((base_top_k * 2).max(8)) {
            let payload = &hit.payload;
            query_parts.extend([
                payload.get_str("product_id"),
                payload.get_first(&["trade_name", "product_trade_name"]),
                payload.get_str("authorization"),
                payload.get_str("objective"),
                payload.get_str("objective_norm"),
                payload.value_text("ingredients"),
            ]);
        }
        let confirm_query = query_parts
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let (matches, _records) = self
            .catalog
            .find_by_query(&confirm_query, (base_top_k * 30).max(200));
        if matches.is_empty() {
            return Ok(hits);
        }

        let rows = self
            .rows_by_identifiers(&matches, (base_top_k * 220).max(4_500))
            .await?;
        if rows.is_empty() {
            return Ok(hits);
        }

        let before = hits.len();
        let merged = merge_hits_by_id(hits, rows);
        let confirmed: Vec<Hit> = merged
            .iter()
            .filter(|hit| hit_matches_identifiers(hit, &matches))
            .cloned()
            .collect();
        if confirmed.is_empty() {
            return Ok(merged);
        }
        info!(
            product_ids = matches.product_ids.len(),
            authorizations = matches.authorizations.len(),
            before,
            after = confirmed.len(),
            "catalog confirmation"
        );
        Ok(confirmed)
    }
}

/// Post-enrichment narrowing: the ingredient hint wins over the objective
/// hint, and either filter falls back to the unfiltered set when it would
/// discard everything.
pub fn post_enrich_filter(
    hits: Vec<Hit>,
    ingredient_hint: Option<&str>,
    objective_hint: Option<&str>,
) -> Vec<Hit> {
    if let Some(hint) = ingredient_hint.filter(|hint| !hint.trim().is_empty()) {
        let filtered = filter_hits_by_field(&hits, hint, ProductField::Ingredient);
        debug!(
            hint = %hint,
            before = hits.len(),
            after = filtered.len(),
            "post-enrich ingredient filter"
        );
        if !filtered.is_empty() {
            return filtered;
        }
    } else if let Some(hint) = objective_hint.filter(|hint| !hint.trim().is_empty()) {
        let filtered = filter_hits_by_field(&hits, hint, ProductField::Objective);
        debug!(
            hint = %hint,
            before = hits.len(),
            after = filtered.len(),
            "post-enrich objective filter"
        );
        if !filtered.is_empty() {
            return filtered;
        }
    }
    hits
}

fn hit_matches_identifiers(hit: &Hit, matches: &ProductMatches) -> bool {
    let product_id = normalize(&hit.payload.get_str("product_id"));
    let authorization = normalize(&hit.payload.get_str("authorization"));
    (!product_id.is_empty() && matches.product_ids.contains(&product_id))
        || (!authorization.is_empty() && matches.authorizations.contains(&authorization))
}
