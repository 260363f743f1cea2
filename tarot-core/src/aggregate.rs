//! Knowledge aggregation.
//!
//! Walks a draw in position order, collects every element, court
//! correspondence, zodiac and modality the draw touches, and renders the
//! three text buffers used downstream: the full context handed to the
//! generator, the short summary shown to the user, and the astrology block.

use crate::knowledge::{
    AstrologyModality, Card, CourtCorrespondence, Dataset, Element, KnowledgeError, Spread,
    Zodiac, ALL_ZODIACS,
};
use crate::sampler::Draw;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Every zodiac sign, used when an element is tied to all of them.
pub const ZODIAC_KEYS: [&str; 12] = [
    "Aries",
    "Leo",
    "Sagittarius",
    "Taurus",
    "Virgo",
    "Capricorn",
    "Gemini",
    "Libra",
    "Aquarius",
    "Cancer",
    "Scorpio",
    "Pisces",
];

/// What a draw resolves to in the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub elements: BTreeSet<String>,
    pub court_correspondences: BTreeSet<String>,
    pub zodiacs: BTreeSet<String>,
    pub modalities: BTreeSet<String>,
    /// Full context for the generator.
    pub context: String,
    /// Positions and oriented card names only.
    pub summary: String,
    /// Modality and zodiac blocks; empty outside astrology mode.
    pub astrology: String,
}

/// The resolved records of one reading.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBundle {
    pub spread_key: String,
    pub spread: Spread,
    /// Drawn cards in position order.
    pub cards: Vec<Card>,
    pub reversed: Vec<bool>,
    pub elements: BTreeMap<String, Element>,
    pub court_correspondences: BTreeMap<String, CourtCorrespondence>,
    pub zodiacs: BTreeMap<String, Zodiac>,
    pub modalities: BTreeMap<String, AstrologyModality>,
}

/// Resolves draws against one dataset snapshot.
pub struct KnowledgeAggregator<'a> {
    dataset: &'a Dataset,
    astrology: bool,
}

impl<'a> KnowledgeAggregator<'a> {
    pub fn new(dataset: &'a Dataset, astrology: bool) -> Self {
        Self { dataset, astrology }
    }

    /// Aggregate a draw laid out on the given spread.
    pub fn aggregate(&self, spread_key: &str, draw: &Draw) -> Result<Aggregation, KnowledgeError> {
        let spread = self.dataset.spread(spread_key)?;
        if draw.len() != spread.card_count() || draw.reversed.len() != draw.cards.len() {
            return Err(KnowledgeError::Invalid(format!(
                "spread '{spread_key}' has {} positions but {} cards were drawn",
                spread.card_count(),
                draw.len()
            )));
        }

        let mut out = Aggregation {
            summary: format!("{}: {}", spread.name, spread.description),
            context: format!("塔罗牌阵讯息:\n{}: {}\n", spread.name, spread.description),
            ..Default::default()
        };

        for (index, ((card_key, reversed), position)) in
            draw.iter().zip(spread.positions.iter()).enumerate()
        {
            let n = index + 1;
            let card = self.dataset.card(card_key)?;
            let oriented = card.oriented_name(reversed);

            out.context
                .push_str(&format!("\n{n}. {}: {}", position.name, position.description));
            out.summary.push_str(&format!(
                "\n#{n} {}: {}\n{oriented}",
                position.name, position.description
            ));
            out.context
                .push_str(&format!("\n{oriented}: {}", card.description(reversed)));

            if let Some(first) = &card.first_element {
                let text = self.element_text(&first.key, &mut out)?;
                out.context.push_str(&format!("\n第一元素:{},{text}", first.label));
            }
            if let Some(second) = &card.second_element {
                let text = self.element_text(&second.key, &mut out)?;
                out.context.push_str(&format!("\n第二元素:{},{text}", second.label));
            }
            if let Some((court_key, court)) = self.dataset.court_for_card(card_key) {
                out.court_correspondences.insert(court_key.to_string());
                let text = self.element_text(&court.element, &mut out)?;
                out.context.push_str(&format!(
                    "\n宫廷元素:{},{}含义:{},{text}",
                    court.element_name, court.name, court.meaning
                ));
            }
        }

        out.context.push_str("\n阵型元素:");
        for element_key in &spread.elements {
            let text = self.element_text(element_key, &mut out)?;
            out.context.push('\n');
            out.context.push_str(&text);
        }

        if self.astrology {
            if out.zodiacs.contains(ALL_ZODIACS) {
                out.zodiacs = ZODIAC_KEYS.iter().map(|k| k.to_string()).collect();
            }
            out.astrology = self.astrology_text(&mut out)?;
        }

        tracing::debug!(
            spread = spread_key,
            elements = out.elements.len(),
            courts = out.court_correspondences.len(),
            zodiacs = out.zodiacs.len(),
            modalities = out.modalities.len(),
            "Aggregated draw"
        );

        Ok(out)
    }

    /// Render an element, recording it (and, in astrology mode, its zodiacs).
    fn element_text(&self, key: &str, out: &mut Aggregation) -> Result<String, KnowledgeError> {
        let element = self.dataset.element(key)?;
        out.elements.insert(key.to_string());

        let mut text = format!(
            "元素:{},能量属性:{},颜色:{},生物:{},表达:{},属性:{},含义:{}",
            element.name,
            element.polarity,
            element.colors.join(", "),
            element.creatures,
            element.expression,
            element.attribute,
            element.meaning
        );
        if self.astrology {
            out.zodiacs.extend(element.zodiacs.iter().cloned());
            text.push_str(&format!(",元素对应星座:{}", element.zodiac_names.join(", ")));
        }
        Ok(text)
    }

    /// Modality blocks followed by zodiac blocks. Fills in the modality set.
    fn astrology_text(&self, out: &mut Aggregation) -> Result<String, KnowledgeError> {
        let mut zodiac_lines = String::new();
        for key in &out.zodiacs {
            let zodiac = self.dataset.zodiac(key)?;
            out.modalities.insert(zodiac.modality.clone());

            zodiac_lines.push_str(&format!(
                "\n{}: {}\n元素:{},季节:{},本质:{}",
                zodiac.name, zodiac.modality_name, zodiac.element_name, zodiac.season, zodiac.nature
            ));
            let rulers = match &zodiac.ruling_body_traditional {
                Some(traditional) => format!(
                    ",现代守护星: {}, 古典守护星: {traditional}",
                    zodiac.ruling_body_modern
                ),
                None => format!(",守护星: {}", zodiac.ruling_body_modern),
            };
            zodiac_lines.push_str(&rulers);
        }

        let mut text = String::from("占星讯息:");
        for key in &out.modalities {
            let modality = self.dataset.modality(key)?;
            text.push_str(&format!(
                "\n{},对应宫廷牌:{},属性:{},含义:{}",
                modality.name, modality.court_card, modality.attribute, modality.meaning
            ));
        }
        text.push_str(&zodiac_lines);
        Ok(text)
    }
}

impl Aggregation {
    /// Resolve the aggregated keys into the records of a reading.
    pub fn bundle(
        &self,
        dataset: &Dataset,
        spread_key: &str,
        draw: &Draw,
    ) -> Result<KnowledgeBundle, KnowledgeError> {
        let cards = draw
            .cards
            .iter()
            .map(|key| dataset.card(key).cloned())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KnowledgeBundle {
            spread_key: spread_key.to_string(),
            spread: dataset.spread(spread_key)?.clone(),
            cards,
            reversed: draw.reversed.clone(),
            elements: resolve(&self.elements, |k| dataset.element(k))?,
            court_correspondences: resolve(&self.court_correspondences, |k| dataset.court(k))?,
            zodiacs: resolve(&self.zodiacs, |k| dataset.zodiac(k))?,
            modalities: resolve(&self.modalities, |k| dataset.modality(k))?,
        })
    }
}

fn resolve<'d, T: Clone + 'd>(
    keys: &BTreeSet<String>,
    lookup: impl Fn(&str) -> Result<&'d T, KnowledgeError>,
) -> Result<BTreeMap<String, T>, KnowledgeError> {
    keys.iter()
        .map(|key| Ok((key.clone(), lookup(key)?.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_dataset;

    fn draw(cards: &[&str], reversed: &[bool]) -> Draw {
        Draw {
            cards: cards.iter().map(|c| c.to_string()).collect(),
            reversed: reversed.to_vec(),
        }
    }

    fn first_cards(dataset: &Dataset, n: usize) -> Vec<&str> {
        dataset.cards.keys()[..n].iter().map(String::as_str).collect()
    }

    #[test]
    fn test_summary_lists_positions_with_oriented_names() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, false)
            .aggregate(
                "ThreeCard",
                &draw(&["TheFool", "TheMagician", "TheWorld"], &[false, true, false]),
            )
            .unwrap();

        let spread = dataset.spread("ThreeCard").unwrap();
        let fool = dataset.card("TheFool").unwrap();
        let magician = dataset.card("TheMagician").unwrap();

        assert!(aggregation
            .summary
            .starts_with(&format!("{}: {}", spread.name, spread.description)));
        assert!(aggregation.summary.contains(&format!(
            "\n#1 {}: {}\n正{}",
            spread.positions[0].name, spread.positions[0].description, fool.name
        )));
        assert!(aggregation.summary.contains(&format!("\n逆{}", magician.name)));
        assert!(aggregation.summary.contains("\n#3 "));
        assert!(!aggregation.summary.contains("元素:"));
    }

    #[test]
    fn test_context_carries_descriptions_and_elements() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, false)
            .aggregate(
                "ThreeCard",
                &draw(&["TheFool", "TheMagician", "TheWorld"], &[true, false, false]),
            )
            .unwrap();

        let fool = dataset.card("TheFool").unwrap();
        assert!(aggregation.context.starts_with("塔罗牌阵讯息:\n"));
        assert!(aggregation
            .context
            .contains(&format!("\n逆{}: {}", fool.name, fool.reversed)));
        assert!(aggregation.context.contains("\n第一元素:"));
        assert!(aggregation.context.contains("\n阵型元素:\n元素:"));
        assert!(!aggregation.context.contains("元素对应星座"));
        assert!(aggregation.astrology.is_empty());
        assert!(aggregation.zodiacs.is_empty());
        assert!(aggregation.modalities.is_empty());
    }

    #[test]
    fn test_second_element_uses_its_own_record() {
        let dataset = sample_dataset();
        let (key, card) = dataset
            .cards
            .iter()
            .find(|(_, c)| {
                matches!((&c.first_element, &c.second_element), (Some(a), Some(b)) if a.key != b.key)
            })
            .unwrap();
        let second = card.second_element.as_ref().unwrap();
        let second_name = &dataset.element(&second.key).unwrap().name;

        let aggregation = KnowledgeAggregator::new(&dataset, false)
            .aggregate("SingleCard", &draw(&[key], &[false]))
            .unwrap();

        assert!(aggregation.elements.contains(&second.key));
        assert!(aggregation.context.contains(&format!(
            "\n第二元素:{},元素:{second_name},",
            second.label
        )));
    }

    #[test]
    fn test_court_card_adds_only_its_correspondence() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, false)
            .aggregate("SingleCard", &draw(&["KingOfCups"], &[false]))
            .unwrap();

        let king = dataset.court("king").unwrap();
        assert_eq!(
            aggregation.court_correspondences,
            BTreeSet::from(["king".to_string()])
        );
        assert!(aggregation.elements.contains(&king.element));
        assert!(aggregation.context.contains(&format!(
            "\n宫廷元素:{},{}含义:{},",
            king.element_name, king.name, king.meaning
        )));
    }

    #[test]
    fn test_sets_hold_only_reachable_keys() {
        let dataset = sample_dataset();
        let cards = ["TheFool", "AceOfCups", "QueenOfSwords"];
        let aggregation = KnowledgeAggregator::new(&dataset, true)
            .aggregate("ThreeCard", &draw(&cards, &[false, false, true]))
            .unwrap();

        let spread = dataset.spread("ThreeCard").unwrap();
        let mut reachable_elements: BTreeSet<String> = spread.elements.iter().cloned().collect();
        let mut reachable_courts = BTreeSet::new();
        for key in cards {
            let card = dataset.card(key).unwrap();
            reachable_elements.extend(card.elements().map(|e| e.key.clone()));
            if let Some((court_key, court)) = dataset.court_for_card(key) {
                reachable_courts.insert(court_key.to_string());
                reachable_elements.insert(court.element.clone());
            }
        }
        assert_eq!(aggregation.elements, reachable_elements);
        assert_eq!(aggregation.court_correspondences, reachable_courts);

        let reachable_zodiacs: BTreeSet<String> = reachable_elements
            .iter()
            .flat_map(|e| dataset.element(e).unwrap().zodiacs.iter().cloned())
            .collect();
        assert!(!reachable_zodiacs.contains(ALL_ZODIACS));
        assert_eq!(aggregation.zodiacs, reachable_zodiacs);

        let reachable_modalities: BTreeSet<String> = reachable_zodiacs
            .iter()
            .map(|z| dataset.zodiac(z).unwrap().modality.clone())
            .collect();
        assert_eq!(aggregation.modalities, reachable_modalities);
    }

    #[test]
    fn test_all_zodiacs_expands_to_the_twelve_signs() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, true)
            .aggregate("Celtic", &draw(&first_cards(&dataset, 10), &[false; 10]))
            .unwrap();

        let expected: BTreeSet<String> = ZODIAC_KEYS.iter().map(|k| k.to_string()).collect();
        assert_eq!(aggregation.zodiacs, expected);
        assert!(!aggregation.zodiacs.contains(ALL_ZODIACS));
        assert_eq!(aggregation.modalities.len(), 3);
    }

    #[test]
    fn test_astrology_block_puts_modalities_first() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, true)
            .aggregate("SingleCard", &draw(&["KingOfWands"], &[false]))
            .unwrap();

        let text = &aggregation.astrology;
        assert!(text.starts_with("占星讯息:\n"));
        let first_zodiac = aggregation.zodiacs.iter().next().unwrap();
        let zodiac = dataset.zodiac(first_zodiac).unwrap();
        let modality = dataset.modality(&zodiac.modality).unwrap();

        let modality_at = text.find(&format!("\n{},对应宫廷牌:", modality.name)).unwrap();
        let zodiac_at = text.find(&format!("\n{}: ", zodiac.name)).unwrap();
        assert!(modality_at < zodiac_at);
        assert!(aggregation.context.contains("元素对应星座:"));
    }

    #[test]
    fn test_ruling_body_lines() {
        let dataset = sample_dataset();
        let aggregation = KnowledgeAggregator::new(&dataset, true)
            .aggregate("Celtic", &draw(&first_cards(&dataset, 10), &[true; 10]))
            .unwrap();

        let scorpio = dataset.zodiac("Scorpio").unwrap();
        let traditional = scorpio.ruling_body_traditional.as_ref().unwrap();
        assert!(aggregation.astrology.contains(&format!(
            ",现代守护星: {}, 古典守护星: {traditional}",
            scorpio.ruling_body_modern
        )));

        let aries = dataset.zodiac("Aries").unwrap();
        assert!(aries.ruling_body_traditional.is_none());
        assert!(aggregation
            .astrology
            .contains(&format!(",守护星: {}", aries.ruling_body_modern)));
    }

    #[test]
    fn test_mismatched_draw_is_rejected() {
        let dataset = sample_dataset();
        let result = KnowledgeAggregator::new(&dataset, false)
            .aggregate("ThreeCard", &draw(&["TheFool"], &[false]));
        assert!(matches!(result, Err(KnowledgeError::Invalid(_))));
    }

    #[test]
    fn test_unknown_keys_surface_as_not_found() {
        let dataset = sample_dataset();
        let aggregator = KnowledgeAggregator::new(&dataset, false);
        assert!(matches!(
            aggregator.aggregate("Nope", &draw(&[], &[])),
            Err(KnowledgeError::KeyNotFound { .. })
        ));
        assert!(matches!(
            aggregator.aggregate("SingleCard", &draw(&["Nope"], &[false])),
            Err(KnowledgeError::KeyNotFound { .. })
        ));
    }

    #[test]
    fn test_bundle_resolves_every_key() {
        let dataset = sample_dataset();
        let draw = draw(&["TheFool", "KnightOfPentacles", "TheStar"], &[false, true, false]);
        let aggregation = KnowledgeAggregator::new(&dataset, true)
            .aggregate("ThreeCard", &draw)
            .unwrap();
        let bundle = aggregation.bundle(&dataset, "ThreeCard", &draw).unwrap();

        assert_eq!(bundle.spread_key, "ThreeCard");
        assert_eq!(bundle.cards.len(), 3);
        assert_eq!(bundle.cards[1].id, dataset.card("KnightOfPentacles").unwrap().id);
        assert_eq!(bundle.reversed, vec![false, true, false]);
        assert_eq!(
            bundle.elements.keys().cloned().collect::<BTreeSet<_>>(),
            aggregation.elements
        );
        assert_eq!(bundle.court_correspondences.len(), 1);
        assert_eq!(bundle.zodiacs.len(), aggregation.zodiacs.len());
        assert_eq!(bundle.modalities.len(), aggregation.modalities.len());
    }
}
