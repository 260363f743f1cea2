//! Typed records of the tarot knowledge base.
//!
//! Field names on the wire follow the dataset document (`name_cn`,
//! `genderCN`, ...). Records are converted into tidier Rust shapes on
//! deserialization, so nothing downstream touches raw JSON.

use serde::{Deserialize, Deserializer, Serialize};

/// A reference from a card to one of its elemental affiliations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementRef {
    /// Key into the elements table.
    pub key: String,
    /// Display label carried by the card itself.
    pub label: String,
}

/// A single tarot card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawCard")]
pub struct Card {
    /// Identifier used to address the card image.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Meaning when drawn upright.
    pub upright: String,
    /// Meaning when drawn reversed.
    pub reversed: String,
    pub first_element: Option<ElementRef>,
    pub second_element: Option<ElementRef>,
}

impl Card {
    /// Display name qualified by orientation (`正`/`逆` prefix).
    pub fn oriented_name(&self, reversed: bool) -> String {
        format!("{}{}", Orientation::from_reversed(reversed).prefix(), self.name)
    }

    /// Description text for the given orientation.
    pub fn description(&self, reversed: bool) -> &str {
        if reversed {
            &self.reversed
        } else {
            &self.upright
        }
    }

    /// Elemental affiliations in order (first, then second).
    pub fn elements(&self) -> impl Iterator<Item = &ElementRef> {
        self.first_element.iter().chain(self.second_element.iter())
    }
}

#[derive(Deserialize)]
struct RawCard {
    id: String,
    card_name_cn: String,
    #[serde(default)]
    upright_cn: String,
    #[serde(default)]
    reversed_cn: String,
    #[serde(default)]
    first_element: Option<String>,
    #[serde(default)]
    first_element_cn: Option<String>,
    #[serde(default)]
    second_element: Option<String>,
    #[serde(default)]
    second_element_cn: Option<String>,
}

impl From<RawCard> for Card {
    fn from(raw: RawCard) -> Self {
        Self {
            id: raw.id,
            name: raw.card_name_cn,
            upright: raw.upright_cn,
            reversed: raw.reversed_cn,
            first_element: element_ref(raw.first_element, raw.first_element_cn),
            second_element: element_ref(raw.second_element, raw.second_element_cn),
        }
    }
}

fn element_ref(key: Option<String>, label: Option<String>) -> Option<ElementRef> {
    let key = key.filter(|k| !k.trim().is_empty())?;
    let label = label.unwrap_or_else(|| key.clone());
    Some(ElementRef { key, label })
}

/// Whether a card was drawn upright or reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Upright,
    Reversed,
}

impl Orientation {
    pub fn from_reversed(reversed: bool) -> Self {
        if reversed {
            Orientation::Reversed
        } else {
            Orientation::Upright
        }
    }

    /// Display prefix for card names.
    pub fn prefix(&self) -> &'static str {
        match self {
            Orientation::Upright => "正",
            Orientation::Reversed => "逆",
        }
    }
}

/// Where and how a card is placed on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawInstruction {
    /// Anchor point in pixels; the card's center lands here.
    #[serde(rename = "position")]
    pub anchor: [f64; 2],
    /// Counter-clockwise rotation in degrees.
    #[serde(rename = "rotate", default)]
    pub rotation: f64,
    /// Scale multiplier, 1.0 leaves the card unchanged.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

/// A slot in a spread.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub name: String,
    pub description: String,
    pub draw: DrawInstruction,
}

/// A named layout of card positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawSpread")]
pub struct Spread {
    pub name: String,
    pub description: String,
    pub positions: Vec<Position>,
    /// Element keys the spread itself is affiliated with.
    pub elements: Vec<String>,
}

impl Spread {
    pub fn card_count(&self) -> usize {
        self.positions.len()
    }

    pub fn draw_instructions(&self) -> Vec<DrawInstruction> {
        self.positions.iter().map(|p| p.draw).collect()
    }
}

#[derive(Deserialize)]
struct RawSpread {
    name_cn: String,
    #[serde(default)]
    description_cn: String,
    positions: Vec<RawPosition>,
    draw: Vec<DrawInstruction>,
    #[serde(default)]
    elements: Vec<String>,
}

#[derive(Deserialize)]
struct RawPosition {
    name_cn: String,
    #[serde(default)]
    description_cn: String,
}

impl TryFrom<RawSpread> for Spread {
    type Error = String;

    fn try_from(raw: RawSpread) -> Result<Self, Self::Error> {
        if raw.positions.len() != raw.draw.len() {
            return Err(format!(
                "spread '{}' has {} positions but {} draw instructions",
                raw.name_cn,
                raw.positions.len(),
                raw.draw.len()
            ));
        }
        if raw.positions.is_empty() {
            return Err(format!("spread '{}' has no positions", raw.name_cn));
        }

        let positions = raw
            .positions
            .into_iter()
            .zip(raw.draw)
            .map(|(p, draw)| Position {
                name: p.name_cn,
                description: p.description_cn,
                draw,
            })
            .collect();

        Ok(Self {
            name: raw.name_cn,
            description: raw.description_cn,
            positions,
            elements: raw.elements,
        })
    }
}

/// One of the classical elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    #[serde(rename = "name_cn")]
    pub name: String,
    #[serde(rename = "genderCN", default)]
    pub polarity: String,
    #[serde(rename = "colorsCN", default)]
    pub colors: Vec<String>,
    #[serde(rename = "animals", default, deserialize_with = "flexible_text")]
    pub creatures: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub expression: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub attribute: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub meaning: String,
    /// Zodiac keys, possibly the `all` sentinel.
    #[serde(rename = "zodiac", default)]
    pub zodiacs: Vec<String>,
    #[serde(rename = "zodiacCN", default)]
    pub zodiac_names: Vec<String>,
}

/// Elemental association of court-rank cards, matched by key prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtCorrespondence {
    #[serde(rename = "nameCN")]
    pub name: String,
    pub element: String,
    #[serde(rename = "elementCN", default)]
    pub element_name: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub meaning: String,
}

/// A zodiac sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zodiac {
    #[serde(rename = "zodiacCN")]
    pub name: String,
    #[serde(rename = "astrologyModality")]
    pub modality: String,
    #[serde(rename = "astrologyModalityCN", default)]
    pub modality_name: String,
    pub element: String,
    #[serde(rename = "elementCN", default)]
    pub element_name: String,
    #[serde(rename = "seasonCN", default)]
    pub season: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub nature: String,
    #[serde(rename = "rulingBodyModern", default)]
    pub ruling_body_modern: String,
    #[serde(rename = "rulingBodyTraditional", default, deserialize_with = "optional_text")]
    pub ruling_body_traditional: Option<String>,
}

/// Cardinal, fixed or mutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstrologyModality {
    #[serde(rename = "name_cn")]
    pub name: String,
    #[serde(rename = "cardCN", default)]
    pub court_card: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub attribute: String,
    #[serde(default, deserialize_with = "flexible_text")]
    pub meaning: String,
}

/// Accepts either a string or a list of strings (joined with ", ").
fn flexible_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<Text>::deserialize(deserializer)? {
        Some(Text::One(s)) => s,
        Some(Text::Many(v)) => v.join(", "),
        None => String::new(),
    })
}

/// Null, missing and blank strings all become `None`.
fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
