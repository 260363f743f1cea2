//! Tarot knowledge base.
//!
//! Typed records for spreads, cards, elements, court correspondences,
//! zodiac signs and astrology modalities, plus the reloadable store that
//! holds them.

pub mod model;
mod store;

pub use model::{
    AstrologyModality, Card, CourtCorrespondence, DrawInstruction, Element, ElementRef,
    Orientation, Position, Spread, Zodiac,
};
pub use store::{Dataset, Entity, KnowledgeError, KnowledgeStore, Table, TableKind, ALL_ZODIACS};
