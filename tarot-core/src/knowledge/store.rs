//! Loading, validating and atomically reloading the knowledge base.

use super::model::{AstrologyModality, Card, CourtCorrespondence, Element, Spread, Zodiac};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::fs;

/// Sentinel zodiac key meaning "every sign".
pub const ALL_ZODIACS: &str = "all";

/// Errors from loading or querying the knowledge base.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Key '{key}' not found in {table}")]
    KeyNotFound { table: TableKind, key: String },

    #[error("Invalid dataset: {0}")]
    Invalid(String),

    #[error("Store has no backing file to reload from")]
    NoSource,
}

/// The collections of the dataset document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Spreads,
    Cards,
    Elements,
    CourtCorrespondence,
    AstrologyModality,
    Zodiacs,
}

impl TableKind {
    /// Name of the collection in the dataset document.
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Spreads => "spreads",
            TableKind::Cards => "cards",
            TableKind::Elements => "elements",
            TableKind::CourtCorrespondence => "courtElementalCorrespondence",
            TableKind::AstrologyModality => "astrologyModality",
            TableKind::Zodiacs => "zodiacs",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A keyed collection that remembers document order.
#[derive(Debug, Clone)]
pub struct Table<T> {
    order: Vec<String>,
    rows: HashMap<String, T>,
}

impl<T> Table<T> {
    pub fn get(&self, key: &str) -> Option<&T> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.rows.contains_key(key)
    }

    /// Keys in document order.
    pub fn keys(&self) -> &[String] {
        &self.order
    }

    /// Entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order
            .iter()
            .filter_map(|k| self.rows.get(k).map(|v| (k.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            rows: HashMap::new(),
        }
    }
}

impl<T> FromIterator<(String, T)> for Table<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut table = Table::default();
        for (key, value) in iter {
            if table.rows.insert(key.clone(), value).is_none() {
                table.order.push(key);
            }
        }
        table
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Table<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for TableVisitor<T> {
            type Value = Table<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from string keys to records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut table = Table::default();
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    if table.rows.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    table.order.push(key.clone());
                    table.rows.insert(key, value);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor(PhantomData))
    }
}

/// A borrowed record from any table.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Spread(&'a Spread),
    Card(&'a Card),
    Element(&'a Element),
    CourtCorrespondence(&'a CourtCorrespondence),
    AstrologyModality(&'a AstrologyModality),
    Zodiac(&'a Zodiac),
}

/// A dataset document as parsed, before any reference is checked.
#[derive(Debug, Deserialize)]
struct RawDataset {
    spreads: Table<Spread>,
    cards: Table<Card>,
    elements: Table<Element>,
    #[serde(rename = "courtElementalCorrespondence", default)]
    court_correspondence: Table<CourtCorrespondence>,
    #[serde(rename = "astrologyModality", default)]
    astrology_modality: Table<AstrologyModality>,
    #[serde(default)]
    zodiacs: Table<Zodiac>,
}

/// One immutable, validated snapshot of the knowledge base.
///
/// Deserializing goes through [`Dataset::validate`], so every `Dataset`
/// has resolvable references whichever way it was parsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    pub spreads: Table<Spread>,
    pub cards: Table<Card>,
    pub elements: Table<Element>,
    pub court_correspondence: Table<CourtCorrespondence>,
    pub astrology_modality: Table<AstrologyModality>,
    pub zodiacs: Table<Zodiac>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = KnowledgeError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        let dataset = Dataset {
            spreads: raw.spreads,
            cards: raw.cards,
            elements: raw.elements,
            court_correspondence: raw.court_correspondence,
            astrology_modality: raw.astrology_modality,
            zodiacs: raw.zodiacs,
        };
        dataset.validate()?;
        Ok(dataset)
    }
}

impl Dataset {
    /// Parse and validate a dataset document.
    pub fn from_json_str(json: &str) -> Result<Self, KnowledgeError> {
        let raw: RawDataset = serde_json::from_str(json)?;
        Dataset::try_from(raw)
    }

    /// Build and validate a dataset from an already-parsed document.
    pub fn from_value(value: serde_json::Value) -> Result<Self, KnowledgeError> {
        let raw: RawDataset = serde_json::from_value(value)?;
        Dataset::try_from(raw)
    }

    /// Look up any record by table and key.
    pub fn lookup(&self, table: TableKind, key: &str) -> Result<Entity<'_>, KnowledgeError> {
        let entity = match table {
            TableKind::Spreads => self.spreads.get(key).map(Entity::Spread),
            TableKind::Cards => self.cards.get(key).map(Entity::Card),
            TableKind::Elements => self.elements.get(key).map(Entity::Element),
            TableKind::CourtCorrespondence => self
                .court_correspondence
                .get(key)
                .map(Entity::CourtCorrespondence),
            TableKind::AstrologyModality => self
                .astrology_modality
                .get(key)
                .map(Entity::AstrologyModality),
            TableKind::Zodiacs => self.zodiacs.get(key).map(Entity::Zodiac),
        };
        entity.ok_or_else(|| not_found(table, key))
    }

    pub fn spread(&self, key: &str) -> Result<&Spread, KnowledgeError> {
        self.spreads.get(key).ok_or_else(|| not_found(TableKind::Spreads, key))
    }

    pub fn card(&self, key: &str) -> Result<&Card, KnowledgeError> {
        self.cards.get(key).ok_or_else(|| not_found(TableKind::Cards, key))
    }

    pub fn element(&self, key: &str) -> Result<&Element, KnowledgeError> {
        self.elements.get(key).ok_or_else(|| not_found(TableKind::Elements, key))
    }

    pub fn court(&self, key: &str) -> Result<&CourtCorrespondence, KnowledgeError> {
        self.court_correspondence
            .get(key)
            .ok_or_else(|| not_found(TableKind::CourtCorrespondence, key))
    }

    pub fn modality(&self, key: &str) -> Result<&AstrologyModality, KnowledgeError> {
        self.astrology_modality
            .get(key)
            .ok_or_else(|| not_found(TableKind::AstrologyModality, key))
    }

    pub fn zodiac(&self, key: &str) -> Result<&Zodiac, KnowledgeError> {
        self.zodiacs.get(key).ok_or_else(|| not_found(TableKind::Zodiacs, key))
    }

    /// Court correspondence whose key prefixes the card key, case-insensitively.
    ///
    /// Scans in document order; the first matching prefix wins.
    pub fn court_for_card(&self, card_key: &str) -> Option<(&str, &CourtCorrespondence)> {
        let card_key = card_key.to_lowercase();
        self.court_correspondence
            .iter()
            .find(|(prefix, _)| card_key.starts_with(&prefix.to_lowercase()))
    }

    /// Check that every cross-table reference resolves.
    pub fn validate(&self) -> Result<(), KnowledgeError> {
        if self.spreads.is_empty() {
            return Err(KnowledgeError::Invalid("no spreads defined".to_string()));
        }
        if self.cards.is_empty() {
            return Err(KnowledgeError::Invalid("no cards defined".to_string()));
        }

        for (key, card) in self.cards.iter() {
            for element in card.elements() {
                self.require_element(&element.key, || format!("card '{key}'"))?;
            }
        }

        for (key, spread) in self.spreads.iter() {
            for element in &spread.elements {
                self.require_element(element, || format!("spread '{key}'"))?;
            }
        }

        for (key, court) in self.court_correspondence.iter() {
            self.require_element(&court.element, || {
                format!("court correspondence '{key}'")
            })?;
        }

        for (key, element) in self.elements.iter() {
            for zodiac in &element.zodiacs {
                if zodiac != ALL_ZODIACS && !self.zodiacs.contains(zodiac) {
                    return Err(KnowledgeError::Invalid(format!(
                        "element '{key}' references unknown zodiac '{zodiac}'"
                    )));
                }
            }
        }

        for (key, zodiac) in self.zodiacs.iter() {
            if !self.astrology_modality.contains(&zodiac.modality) {
                return Err(KnowledgeError::Invalid(format!(
                    "zodiac '{key}' references unknown modality '{}'",
                    zodiac.modality
                )));
            }
            self.require_element(&zodiac.element, || format!("zodiac '{key}'"))?;
        }

        Ok(())
    }

    fn require_element(
        &self,
        element: &str,
        owner: impl FnOnce() -> String,
    ) -> Result<(), KnowledgeError> {
        if self.elements.contains(element) {
            Ok(())
        } else {
            Err(KnowledgeError::Invalid(format!(
                "{} references unknown element '{element}'",
                owner()
            )))
        }
    }
}

fn not_found(table: TableKind, key: &str) -> KnowledgeError {
    KnowledgeError::KeyNotFound {
        table,
        key: key.to_string(),
    }
}

/// Shared, reloadable view over the knowledge base.
///
/// Readers take an `Arc` snapshot and keep using it for the whole request;
/// a reload swaps the pointer, so no reader ever sees a half-loaded dataset.
#[derive(Debug)]
pub struct KnowledgeStore {
    source: Option<PathBuf>,
    current: RwLock<Arc<Dataset>>,
}

impl KnowledgeStore {
    /// Load and validate the dataset at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref().to_path_buf();
        let dataset = read_dataset(&path).await?;
        tracing::info!(
            path = %path.display(),
            cards = dataset.cards.len(),
            spreads = dataset.spreads.len(),
            "Loaded tarot knowledge base"
        );
        Ok(Self {
            source: Some(path),
            current: RwLock::new(Arc::new(dataset)),
        })
    }

    /// Wrap an in-memory dataset. Such a store cannot `reload()`.
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            source: None,
            current: RwLock::new(Arc::new(dataset)),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-read the backing file and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<(), KnowledgeError> {
        let path = self.source.as_ref().ok_or(KnowledgeError::NoSource)?;
        let dataset = read_dataset(path).await?;
        self.replace(dataset);
        tracing::info!(path = %path.display(), "Reloaded tarot knowledge base");
        Ok(())
    }

    /// Swap in a new dataset.
    pub fn replace(&self, dataset: Dataset) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(dataset);
    }

    /// Path the store was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

async fn read_dataset(path: &Path) -> Result<Dataset, KnowledgeError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| KnowledgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Dataset::from_json_str(&content)
}
