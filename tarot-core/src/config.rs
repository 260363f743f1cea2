//! Reader configuration.
//!
//! Every section has complete defaults, so a TOML file only needs to name
//! what it changes.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TarotConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Substrings deleted from every generated reply.
    #[serde(default = "default_filler_phrases")]
    pub filler_phrases: Vec<String>,
    /// Spread used when the classifier names no known spread.
    #[serde(default = "default_spread")]
    pub default_spread: String,
}

impl Default for TarotConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            paths: PathsConfig::default(),
            limits: LimitsConfig::default(),
            messages: MessagesConfig::default(),
            prompts: PromptsConfig::default(),
            filler_phrases: default_filler_phrases(),
            default_spread: default_spread(),
        }
    }
}

impl TarotConfig {
    /// Load a configuration from a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Text-generation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
        }
    }
}

fn default_host() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    "llama3.2-vision:latest".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Knowledge dataset document.
    #[serde(default = "default_data_path")]
    pub data: PathBuf,
    /// Directory holding the canvas and the `cards/` directory.
    #[serde(default = "default_resources")]
    pub resources: PathBuf,
    #[serde(default = "default_canvas")]
    pub canvas: String,
    #[serde(default = "default_card_extension")]
    pub card_extension: String,
}

impl PathsConfig {
    pub fn canvas_path(&self) -> PathBuf {
        self.resources.join(&self.canvas)
    }

    pub fn cards_dir(&self) -> PathBuf {
        self.resources.join("cards")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data: default_data_path(),
            resources: default_resources(),
            canvas: default_canvas(),
            card_extension: default_card_extension(),
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("resources/tarot.json")
}

fn default_resources() -> PathBuf {
    PathBuf::from("resources")
}

fn default_canvas() -> String {
    "wallpaper.png".to_string()
}

fn default_card_extension() -> String {
    "jpg".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Longest accepted question, in characters.
    #[serde(default = "default_max_question_length")]
    pub max_question_length: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_question_length: default_max_question_length(),
        }
    }
}

fn default_max_question_length() -> usize {
    200
}

/// User-facing message pools. One entry is picked at random per use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_busy")]
    pub busy: Vec<String>,
    #[serde(default = "default_empty")]
    pub empty: Vec<String>,
    #[serde(default = "default_too_long")]
    pub too_long: Vec<String>,
    #[serde(default = "default_failure")]
    pub failure: Vec<String>,
    #[serde(default = "default_complete")]
    pub complete: Vec<String>,
}

impl MessagesConfig {
    pub fn busy(&self) -> String {
        pick(&self.busy)
    }

    pub fn empty(&self) -> String {
        pick(&self.empty)
    }

    pub fn too_long(&self) -> String {
        pick(&self.too_long)
    }

    pub fn failure(&self) -> String {
        pick(&self.failure)
    }

    pub fn complete(&self) -> String {
        pick(&self.complete)
    }
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            busy: default_busy(),
            empty: default_empty(),
            too_long: default_too_long(),
            failure: default_failure(),
            complete: default_complete(),
        }
    }
}

fn pick(pool: &[String]) -> String {
    pool.choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_busy() -> Vec<String> {
    strings(&[
        "塔罗师正在为另一位求问者占卜，请稍候再来。",
        "牌还在桌上，等这一轮结束再问吧。",
        "星辰正忙，请稍后再试。",
    ])
}

fn default_empty() -> Vec<String> {
    strings(&["你还没有说出你的问题。", "请把想问的事情告诉我。"])
}

fn default_too_long() -> Vec<String> {
    strings(&["问题太长了，请说得简短一些。"])
}

fn default_failure() -> Vec<String> {
    strings(&["占卜被打断了，请稍后再试。"])
}

fn default_complete() -> Vec<String> {
    strings(&[
        "占卜结束，愿你找到答案。",
        "牌面已经说完了它想说的。",
        "以上就是这次的解读。",
    ])
}

/// Fixed instructions for the two generation requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// System turn of the spread-selection request; the spread list follows it.
    #[serde(default = "default_spread_instruction")]
    pub spread_instruction: String,
    #[serde(default = "default_classic_master")]
    pub classic_master: String,
    #[serde(default = "default_astrology_master")]
    pub astrology_master: String,
    /// Prefix of the first user turn.
    #[serde(default = "default_question_preamble")]
    pub question_preamble: String,
    /// Prefix of the closing user turn.
    #[serde(default = "default_reading_preamble")]
    pub reading_preamble: String,
}

impl PromptsConfig {
    /// Master instruction for the given mode.
    pub fn master(&self, astrology: bool) -> &str {
        if astrology {
            &self.astrology_master
        } else {
            &self.classic_master
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            spread_instruction: default_spread_instruction(),
            classic_master: default_classic_master(),
            astrology_master: default_astrology_master(),
            question_preamble: default_question_preamble(),
            reading_preamble: default_reading_preamble(),
        }
    }
}

fn default_spread_instruction() -> String {
    "你是一位塔罗牌阵选择器。根据求问者的问题，从下面的牌阵中选出最合适的一个，\
     只回复牌阵的英文标识，不要输出任何其他内容。\n"
        .to_string()
}

fn default_classic_master() -> String {
    "你是一位经验丰富的塔罗师。根据给出的牌阵、牌面正逆位和元素信息，\
     用温和、具体的语言为求问者解读，每句话简短，不使用表情符号。"
        .to_string()
}

fn default_astrology_master() -> String {
    "你是一位精通塔罗与占星的解读师。结合给出的牌阵、牌面正逆位、元素、\
     星座与占星模式信息，用温和、具体的语言为求问者解读，每句话简短，不使用表情符号。"
        .to_string()
}

fn default_question_preamble() -> String {
    "我想占卜的问题是: ".to_string()
}

fn default_reading_preamble() -> String {
    "请根据以上牌面信息为我解读这个问题: ".to_string()
}

fn default_filler_phrases() -> Vec<String> {
    strings(&["*", "#", "塔罗师:", "塔罗师：", "解读:", "解读："])
}

fn default_spread() -> String {
    "ThreeCard".to_string()
}
