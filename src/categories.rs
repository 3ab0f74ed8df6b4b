use crate::calc::{CalcError, CategoryRule};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

const MAX_TOTAL_WEIGHT: f64 = 100.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryInput {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub weight: f64,
    #[serde(default)]
    pub drop_lowest: i64,
}

/// A course's category set that passed validation. Order is the input order.
#[derive(Debug, Clone)]
pub struct CategoryConfig {
    rules: Vec<CategoryRule>,
}

impl CategoryConfig {
    pub fn new(inputs: Vec<CategoryInput>) -> Result<Self, CalcError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut total = 0.0_f64;
        let mut rules = Vec::with_capacity(inputs.len());

        for (i, c) in inputs.into_iter().enumerate() {
            let type_tag = c.type_tag.trim().to_string();
            if type_tag.is_empty() {
                return Err(CalcError::new("bad_params", "category type must not be empty")
                    .with_details(json!({ "index": i })));
            }
            if !seen.insert(type_tag.to_ascii_lowercase()) {
                return Err(CalcError::new("bad_params", "duplicate category type")
                    .with_details(json!({ "index": i, "type": type_tag })));
            }
            if !c.weight.is_finite() || !(0.0..=100.0).contains(&c.weight) {
                return Err(CalcError::new("bad_params", "category weight must be between 0 and 100")
                    .with_details(json!({ "index": i, "weight": c.weight })));
            }
            if c.drop_lowest < 0 || c.drop_lowest > u32::MAX as i64 {
                return Err(CalcError::new("bad_params", "dropLowest must be a non-negative count")
                    .with_details(json!({ "index": i, "dropLowest": c.drop_lowest })));
            }
            total += c.weight;

            let name = c.name.trim();
            rules.push(CategoryRule {
                name: if name.is_empty() { type_tag.clone() } else { name.to_string() },
                type_tag,
                weight: c.weight,
                drop_lowest: c.drop_lowest as u32,
                sort_order: i as i64,
            });
        }

        // Small tolerance for weights like 33.33 + 33.33 + 33.34.
        if total > MAX_TOTAL_WEIGHT + 1e-6 {
            return Err(CalcError::new("bad_params", "category weights sum to more than 100")
                .with_details(json!({ "totalWeight": total })));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn total_weight(&self) -> f64 {
        self.rules.iter().map(|r| r.weight).sum()
    }
}

/// Replaces the course's whole category set in one transaction.
pub fn replace_categories(
    conn: &Connection,
    course_id: &str,
    config: &CategoryConfig,
) -> Result<(), CalcError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM grade_categories WHERE course_id = ?", [course_id])
        .map_err(|e| CalcError::new("db_delete_failed", e.to_string()))?;
    for r in config.rules() {
        tx.execute(
            "INSERT INTO grade_categories(id, course_id, name, type_tag, weight, drop_lowest, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                course_id,
                &r.name,
                &r.type_tag,
                r.weight,
                r.drop_lowest as i64,
                r.sort_order,
            ),
        )
        .map_err(|e| {
            CalcError::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "grade_categories" }))
        })?;
    }
    tx.commit()
        .map_err(|e| CalcError::new("db_tx_failed", e.to_string()))
}
