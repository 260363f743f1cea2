//! Testing utilities for the tarot engine.
//!
//! This module provides tools for tests that must not reach a real
//! generation service:
//! - `sample_dataset()` and friends: a complete, valid 78-card knowledge base
//! - `ScriptedGenerator` for deterministic replies with request capture
//! - `GatedGenerator` for holding a reading in flight
//! - `FailingGenerator` for transport failures

use crate::generator::TextGenerator;
use crate::knowledge::{Dataset, KnowledgeStore};
use async_trait::async_trait;
use ollama::Message;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{Notify, Semaphore};

/// Major arcana keys in deck order.
pub const MAJOR_KEYS: [&str; 22] = [
    "TheFool",
    "TheMagician",
    "TheHighPriestess",
    "TheEmpress",
    "TheEmperor",
    "TheHierophant",
    "TheLovers",
    "TheChariot",
    "Strength",
    "TheHermit",
    "WheelOfFortune",
    "Justice",
    "TheHangedMan",
    "Death",
    "Temperance",
    "TheDevil",
    "TheTower",
    "TheStar",
    "TheMoon",
    "TheSun",
    "Judgement",
    "TheWorld",
];

const MAJOR_NAMES: [&str; 22] = [
    "愚者", "魔术师", "女祭司", "皇后", "皇帝", "教皇", "恋人", "战车", "力量", "隐士", "命运之轮",
    "正义", "倒吊人", "死神", "节制", "恶魔", "高塔", "星星", "月亮", "太阳", "审判", "世界",
];

/// (first, second) element of each major arcanum.
const MAJOR_ELEMENTS: [(&str, &str); 22] = [
    ("Air", ""),
    ("Air", ""),
    ("Water", ""),
    ("Earth", ""),
    ("Fire", ""),
    ("Earth", ""),
    ("Air", ""),
    ("Water", ""),
    ("Fire", ""),
    ("Earth", ""),
    ("Fire", "Water"),
    ("Air", ""),
    ("Water", ""),
    ("Water", ""),
    ("Fire", ""),
    ("Earth", ""),
    ("Fire", ""),
    ("Air", ""),
    ("Water", "Earth"),
    ("Fire", "Air"),
    ("Fire", "Water"),
    ("Earth", "Air"),
];

const SUITS: [(&str, &str, &str); 4] = [
    ("Wands", "权杖", "Fire"),
    ("Cups", "圣杯", "Water"),
    ("Swords", "宝剑", "Air"),
    ("Pentacles", "星币", "Earth"),
];

const RANKS: [(&str, &str); 14] = [
    ("Ace", "王牌"),
    ("Two", "二"),
    ("Three", "三"),
    ("Four", "四"),
    ("Five", "五"),
    ("Six", "六"),
    ("Seven", "七"),
    ("Eight", "八"),
    ("Nine", "九"),
    ("Ten", "十"),
    ("Page", "侍从"),
    ("Knight", "骑士"),
    ("Queen", "皇后"),
    ("King", "国王"),
];

fn element_label(key: &str) -> &'static str {
    match key {
        "Fire" => "火",
        "Water" => "水",
        "Air" => "风",
        "Earth" => "土",
        _ => "灵",
    }
}

/// Render `(key, value)` pairs as a JSON object, keeping their order.
fn ordered_object(entries: Vec<(String, Value)>) -> String {
    let body: Vec<String> = entries
        .into_iter()
        .map(|(key, value)| format!("{}:{}", Value::String(key), value))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn cards() -> Vec<(String, Value)> {
    let mut cards = Vec::with_capacity(78);

    for (i, key) in MAJOR_KEYS.iter().enumerate() {
        let (first, second) = MAJOR_ELEMENTS[i];
        let second_label = if second.is_empty() { "" } else { element_label(second) };
        cards.push((
            key.to_string(),
            json!({
                "id": format!("m{i:02}"),
                "card_name_cn": MAJOR_NAMES[i],
                "upright_cn": format!("{}正位的含义", MAJOR_NAMES[i]),
                "reversed_cn": format!("{}逆位的含义", MAJOR_NAMES[i]),
                "first_element": first,
                "first_element_cn": element_label(first),
                "second_element": second,
                "second_element_cn": second_label,
            }),
        ));
    }

    for (suit, suit_cn, element) in SUITS {
        for (n, (rank, rank_cn)) in RANKS.iter().enumerate() {
            let name = format!("{suit_cn}{rank_cn}");
            cards.push((
                format!("{rank}Of{suit}"),
                json!({
                    "id": format!("{}{:02}", suit.to_lowercase(), n + 1),
                    "card_name_cn": name,
                    "upright_cn": format!("{name}正位的含义"),
                    "reversed_cn": format!("{name}逆位的含义"),
                    "first_element": element,
                    "first_element_cn": element_label(element),
                    "second_element": "",
                    "second_element_cn": "",
                }),
            ));
        }
    }

    cards
}

fn elements() -> Vec<(String, Value)> {
    vec![
        (
            "Fire".to_string(),
            json!({
                "name_cn": "火", "genderCN": "阳性", "colorsCN": ["红", "橙"],
                "animals": ["狮子", "蝾螈"], "expression": "行动", "attribute": "热而干",
                "meaning": "意志与激情",
                "zodiac": ["Aries", "Leo", "Sagittarius"],
                "zodiacCN": ["白羊座", "狮子座", "射手座"],
            }),
        ),
        (
            "Water".to_string(),
            json!({
                "name_cn": "水", "genderCN": "阴性", "colorsCN": ["蓝", "银"],
                "animals": ["鱼", "海豚"], "expression": "感受", "attribute": "冷而湿",
                "meaning": "情感与直觉",
                "zodiac": ["Cancer", "Scorpio", "Pisces"],
                "zodiacCN": ["巨蟹座", "天蝎座", "双鱼座"],
            }),
        ),
        (
            "Air".to_string(),
            json!({
                "name_cn": "风", "genderCN": "阳性", "colorsCN": ["黄", "白"],
                "animals": ["鹰"], "expression": "思考", "attribute": "热而湿",
                "meaning": "思想与沟通",
                "zodiac": ["Gemini", "Libra", "Aquarius"],
                "zodiacCN": ["双子座", "天秤座", "水瓶座"],
            }),
        ),
        (
            "Earth".to_string(),
            json!({
                "name_cn": "土", "genderCN": "阴性", "colorsCN": ["绿", "棕"],
                "animals": "公牛", "expression": "建造", "attribute": "冷而干",
                "meaning": "物质与稳定",
                "zodiac": ["Taurus", "Virgo", "Capricorn"],
                "zodiacCN": ["金牛座", "处女座", "摩羯座"],
            }),
        ),
        (
            "Spirit".to_string(),
            json!({
                "name_cn": "灵", "genderCN": "中性", "colorsCN": ["紫"],
                "animals": [], "expression": "统合", "attribute": "超越",
                "meaning": "四元素的合一",
                "zodiac": ["all"],
                "zodiacCN": ["全部星座"],
            }),
        ),
    ]
}

fn court_correspondence() -> Vec<(String, Value)> {
    [
        ("page", "侍从", "Earth", "学习与消息"),
        ("knight", "骑士", "Air", "行动与追寻"),
        ("queen", "皇后", "Water", "滋养与内省"),
        ("king", "国王", "Fire", "掌控与权威"),
    ]
    .into_iter()
    .map(|(key, name, element, meaning)| {
        (
            key.to_string(),
            json!({
                "nameCN": name,
                "element": element,
                "elementCN": element_label(element),
                "meaning": meaning,
            }),
        )
    })
    .collect()
}

fn astrology_modality() -> Vec<(String, Value)> {
    vec![
        (
            "Cardinal".to_string(),
            json!({"name_cn": "基本宫", "cardCN": "皇后", "attribute": "开创", "meaning": "开启新的循环"}),
        ),
        (
            "Fixed".to_string(),
            json!({"name_cn": "固定宫", "cardCN": "国王", "attribute": "稳固", "meaning": "维持与坚持"}),
        ),
        (
            "Mutable".to_string(),
            json!({"name_cn": "变动宫", "cardCN": "骑士", "attribute": "变化", "meaning": "适应与转化"}),
        ),
    ]
}

fn zodiacs() -> Vec<(String, Value)> {
    [
        ("Aries", "白羊座", "Cardinal", "Fire", "春", "火星", ""),
        ("Taurus", "金牛座", "Fixed", "Earth", "春", "金星", ""),
        ("Gemini", "双子座", "Mutable", "Air", "春", "水星", ""),
        ("Cancer", "巨蟹座", "Cardinal", "Water", "夏", "月亮", ""),
        ("Leo", "狮子座", "Fixed", "Fire", "夏", "太阳", ""),
        ("Virgo", "处女座", "Mutable", "Earth", "夏", "水星", ""),
        ("Libra", "天秤座", "Cardinal", "Air", "秋", "金星", ""),
        ("Scorpio", "天蝎座", "Fixed", "Water", "秋", "冥王星", "火星"),
        ("Sagittarius", "射手座", "Mutable", "Fire", "秋", "木星", ""),
        ("Capricorn", "摩羯座", "Cardinal", "Earth", "冬", "土星", ""),
        ("Aquarius", "水瓶座", "Fixed", "Air", "冬", "天王星", "土星"),
        ("Pisces", "双鱼座", "Mutable", "Water", "冬", "海王星", "木星"),
    ]
    .into_iter()
    .map(|(key, name, modality, element, season, modern, traditional)| {
        let modality_cn = match modality {
            "Cardinal" => "基本宫",
            "Fixed" => "固定宫",
            _ => "变动宫",
        };
        (
            key.to_string(),
            json!({
                "zodiacCN": name,
                "astrologyModality": modality,
                "astrologyModalityCN": modality_cn,
                "element": element,
                "elementCN": element_label(element),
                "seasonCN": season,
                "nature": format!("{name}的本质"),
                "rulingBodyModern": modern,
                "rulingBodyTraditional": traditional,
            }),
        )
    })
    .collect()
}

fn spread(name: &str, description: &str, anchors: &[(f64, f64, f64)], elements: &[&str]) -> Value {
    let positions: Vec<Value> = (1..=anchors.len())
        .map(|n| json!({"name_cn": format!("位置{n}"), "description_cn": format!("第{n}张牌的意义")}))
        .collect();
    let draw: Vec<Value> = anchors
        .iter()
        .map(|(x, y, rotate)| json!({"position": [x, y], "rotate": rotate, "scale": 0.5}))
        .collect();
    json!({
        "name_cn": name,
        "description_cn": description,
        "positions": positions,
        "draw": draw,
        "elements": elements,
    })
}

fn spreads() -> Vec<(String, Value)> {
    let celtic = [
        (600.0, 400.0, 0.0),
        (600.0, 400.0, 90.0),
        (600.0, 650.0, 0.0),
        (350.0, 400.0, 0.0),
        (600.0, 150.0, 0.0),
        (850.0, 400.0, 0.0),
        (1100.0, 700.0, 0.0),
        (1100.0, 500.0, 0.0),
        (1100.0, 300.0, 0.0),
        (1100.0, 100.0, 0.0),
    ];
    vec![
        (
            "ThreeCard".to_string(),
            spread(
                "三张牌阵",
                "过去、现在与未来",
                &[(300.0, 400.0, 0.0), (600.0, 400.0, 0.0), (900.0, 400.0, 0.0)],
                &["Air"],
            ),
        ),
        (
            "Celtic".to_string(),
            spread("凯尔特十字", "全面审视一个复杂的处境", &celtic, &["Spirit"]),
        ),
        (
            "SingleCard".to_string(),
            spread("单张牌", "对当下的简短指引", &[(600.0, 400.0, 0.0)], &[]),
        ),
    ]
}

/// The sample knowledge base as a JSON document, collections in deck order.
pub fn sample_dataset_document() -> String {
    let tables = [
        ("spreads", ordered_object(spreads())),
        ("cards", ordered_object(cards())),
        ("elements", ordered_object(elements())),
        ("courtElementalCorrespondence", ordered_object(court_correspondence())),
        ("astrologyModality", ordered_object(astrology_modality())),
        ("zodiacs", ordered_object(zodiacs())),
    ];
    let body: Vec<String> = tables
        .iter()
        .map(|(name, table)| format!("\"{name}\":{table}"))
        .collect();
    format!("{{{}}}", body.join(","))
}

/// The sample knowledge base as a mutable JSON value.
///
/// `serde_json::Value` sorts object keys, so a dataset built from this value
/// does not keep deck order. Use it for validation tests, and
/// `sample_dataset()` wherever pool modes matter.
pub fn sample_dataset_json() -> Value {
    serde_json::from_str(&sample_dataset_document()).expect("sample dataset is valid JSON")
}

/// A parsed, validated sample knowledge base.
pub fn sample_dataset() -> Dataset {
    Dataset::from_json_str(&sample_dataset_document()).expect("sample dataset is valid")
}

/// A store over the sample dataset.
pub fn sample_store() -> KnowledgeStore {
    KnowledgeStore::from_dataset(sample_dataset())
}

/// A generator that returns scripted replies in order.
///
/// Every request is recorded. When the script runs out, calls fail.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, ollama::Error>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedGenerator {
    /// Create a generator with the given replies.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    /// Queue a failure.
    pub fn push_error(&self, error: ollama::Error) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: Vec<Message>) -> Result<String, ollama::Error> {
        lock(&self.requests).push(messages);
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Err(ollama::Error::Parse("no scripted reply left".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// A generator whose calls block until released.
///
/// Lets a test hold a reading in flight while it pokes at the engine.
pub struct GatedGenerator {
    reply: String,
    entered: Notify,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedGenerator {
    /// Every released call returns `reply`.
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Let `n` calls through.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Wait until some call has reached the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for GatedGenerator {
    async fn generate(&self, _messages: Vec<Message>) -> Result<String, ollama::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ollama::Error::Network(e.to_string()))?;
        permit.forget();
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// A generator that always fails as if the service were down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _messages: Vec<Message>) -> Result<String, ollama::Error> {
        Err(ollama::Error::Network("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
