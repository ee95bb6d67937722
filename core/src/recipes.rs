//! Recipes kept in the local store.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};
use crate::types::wire_date;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub cuisine: Option<String>,
    #[serde(with = "wire_date")]
    pub created_at: DateTime<Utc>,
}

/// A recipe that has not been saved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    #[serde(default)]
    pub cuisine: Option<String>,
}

impl NewRecipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cuisine: None,
        }
    }

    pub fn with_cuisine(mut self, cuisine: impl Into<String>) -> Self {
        self.cuisine = Some(cuisine.into());
        self
    }
}

const COLUMNS: &str = "id, name, cuisine, created_at";
const INSERT: &str = "INSERT INTO recipes (name, cuisine, created_at) VALUES (?1, ?2, ?3)";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Recipe> {
    Ok(Recipe {
        id: row.get(0)?,
        name: row.get(1)?,
        cuisine: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn now() -> DateTime<Utc> {
    // Microseconds, matching the wire date format.
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone)]
pub struct RecipeRepository {
    store: Arc<Store>,
}

impl RecipeRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn insert(&self, recipe: &NewRecipe) -> Result<Recipe, StoreError> {
        let created_at = now();
        let id = self.store.write(|conn| {
            conn.execute(INSERT, params![recipe.name, recipe.cuisine, created_at])?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(Recipe {
            id,
            name: recipe.name.clone(),
            cuisine: recipe.cuisine.clone(),
            created_at,
        })
    }

    /// Insert all of `recipes` or none of them.
    pub fn insert_all(&self, recipes: &[NewRecipe]) -> Result<Vec<Recipe>, StoreError> {
        let created_at = now();
        self.store.write_transaction(|tx| {
            let mut stmt = tx.prepare(INSERT)?;
            let mut saved = Vec::with_capacity(recipes.len());
            for recipe in recipes {
                let id = stmt.insert(params![recipe.name, recipe.cuisine, created_at])?;
                saved.push(Recipe {
                    id,
                    name: recipe.name.clone(),
                    cuisine: recipe.cuisine.clone(),
                    created_at,
                });
            }
            Ok(saved)
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<Recipe>, StoreError> {
        self.store.read(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM recipes WHERE id = ?1"),
                [id],
                from_row,
            )
            .optional()
        })
    }

    /// Every recipe, newest first.
    pub fn list(&self) -> Result<Vec<Recipe>, StoreError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM recipes ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map([], from_row)?;
            rows.collect()
        })
    }

    pub fn find_by_cuisine(&self, cuisine: &str) -> Result<Vec<Recipe>, StoreError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM recipes WHERE cuisine = ?1 ORDER BY name"
            ))?;
            let rows = stmt.query_map([cuisine], from_row)?;
            rows.collect()
        })
    }

    /// Overwrite name and cuisine. Returns false if no such recipe exists.
    pub fn update(&self, recipe: &Recipe) -> Result<bool, StoreError> {
        let changed = self.store.write(|conn| {
            conn.execute(
                "UPDATE recipes SET name = ?1, cuisine = ?2 WHERE id = ?3",
                params![recipe.name, recipe.cuisine, recipe.id],
            )
        })?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let changed = self
            .store
            .write(|conn| conn.execute("DELETE FROM recipes WHERE id = ?1", [id]))?;
        Ok(changed > 0)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM recipes", [], |row| row.get(0)))?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_DATABASE_FILE;

    fn repository() -> (tempfile::TempDir, RecipeRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        store.setup(DEFAULT_DATABASE_FILE).unwrap();
        (dir, RecipeRepository::new(Arc::new(store)))
    }

    #[test]
    fn insert_then_get() {
        let (_dir, repo) = repository();
        let saved = repo
            .insert(&NewRecipe::new("Pad Thai").with_cuisine("Thai"))
            .unwrap();
        assert!(saved.id > 0);
        assert_eq!(repo.get(saved.id).unwrap(), Some(saved));
    }

    #[test]
    fn get_missing_is_none() {
        let (_dir, repo) = repository();
        assert_eq!(repo.get(42).unwrap(), None);
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, repo) = repository();
        let first = repo.insert(&NewRecipe::new("Soup")).unwrap();
        let second = repo.insert(&NewRecipe::new("Bread")).unwrap();
        let ids: Vec<i64> = repo.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn update_and_delete() {
        let (_dir, repo) = repository();
        let mut recipe = repo.insert(&NewRecipe::new("Tacos")).unwrap();
        recipe.cuisine = Some("Mexican".into());
        assert!(repo.update(&recipe).unwrap());
        assert_eq!(
            repo.get(recipe.id).unwrap().unwrap().cuisine.as_deref(),
            Some("Mexican")
        );

        assert!(repo.delete(recipe.id).unwrap());
        assert!(!repo.delete(recipe.id).unwrap());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn update_missing_reports_false() {
        let (_dir, repo) = repository();
        let ghost = Recipe {
            id: 999,
            name: "Ghost".into(),
            cuisine: None,
            created_at: now(),
        };
        assert!(!repo.update(&ghost).unwrap());
    }

    #[test]
    fn insert_all_and_filter() {
        let (_dir, repo) = repository();
        let saved = repo
            .insert_all(&[
                NewRecipe::new("Ramen").with_cuisine("Japanese"),
                NewRecipe::new("Paella").with_cuisine("Spanish"),
                NewRecipe::new("Gyoza").with_cuisine("Japanese"),
            ])
            .unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(repo.count().unwrap(), 3);

        let names: Vec<String> = repo
            .find_by_cuisine("Japanese")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["Gyoza", "Ramen"]);
    }

    #[test]
    fn serializes_with_wire_dates() {
        let (_dir, repo) = repository();
        let saved = repo.insert(&NewRecipe::new("Curry")).unwrap();
        let json = serde_json::to_value(&saved).unwrap();
        assert!(json["created_at"].as_str().unwrap().ends_with('Z'));
        let back: Recipe = serde_json::from_value(json).unwrap();
        assert_eq!(back, saved);
    }
}
