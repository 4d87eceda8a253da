use crate::types::GroupKey;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_heading_chars() -> usize {
    80
}

fn default_size_tolerance_pt() -> f32 {
    0.5
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_batch_size() -> usize {
    20
}

fn default_max_upload_mb() -> u64 {
    50
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatterConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub applier: ApplierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Reference DOCX for reset-to-default; the built-in reference when unset
    #[serde(default)]
    pub default_reference: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Resolver chain - which resolvers run and in what order
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Style names (or style ids) that map straight to a group, case-insensitive
    #[serde(default = "default_style_names")]
    pub style_names: Vec<StyleNameRule>,
    /// Text patterns per group, tried in list order
    #[serde(default = "default_patterns")]
    pub patterns: Vec<PatternRule>,
    /// Longer paragraphs are never headings
    #[serde(default = "default_max_heading_chars")]
    pub max_heading_chars: usize,
    /// Minimum size difference from the body median that counts as larger
    #[serde(default = "default_size_tolerance_pt")]
    pub size_tolerance_pt: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Resolvers to run in priority order; body is the implicit last resort
    pub resolvers: Vec<ResolverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Name of the resolver: style_name, pattern, position or typography
    pub name: String,
    /// Whether this resolver is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleNameRule {
    pub group: GroupKey,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub group: GroupKey,
    pub patterns: Vec<String>,
    /// Only paragraphs up to `max_heading_chars` may match
    #[serde(default = "default_true")]
    pub short_only: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolvers: ["style_name", "pattern", "position", "typography"]
                .iter()
                .map(|name| ResolverConfig {
                    name: name.to_string(),
                    enabled: true,
                })
                .collect(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            style_names: default_style_names(),
            patterns: default_patterns(),
            max_heading_chars: default_max_heading_chars(),
            size_tolerance_pt: default_size_tolerance_pt(),
        }
    }
}

fn style_rule(group: GroupKey, names: &[&str]) -> StyleNameRule {
    StyleNameRule {
        group,
        names: names.iter().map(|n| n.to_string()).collect(),
    }
}

fn default_style_names() -> Vec<StyleNameRule> {
    vec![
        style_rule(GroupKey::Toc, &["toc heading", "tocheading", "table of figures"]),
        style_rule(GroupKey::Cover, &["title", "subtitle"]),
        style_rule(GroupKey::ChapterTitle, &["heading 1", "heading1", "標題 1", "标题 1"]),
        style_rule(GroupKey::SectionTitle, &["heading 2", "heading2", "標題 2", "标题 2"]),
        style_rule(
            GroupKey::SubsectionTitle,
            &["heading 3", "heading3", "heading 4", "heading4", "標題 3", "标题 3"],
        ),
        style_rule(GroupKey::FrontMatter, &["abstract", "abstract heading"]),
        style_rule(GroupKey::FigureCaption, &["caption", "figure caption"]),
        style_rule(GroupKey::TableCaption, &["table caption"]),
    ]
}

fn pattern_rule(group: GroupKey, patterns: &[&str]) -> PatternRule {
    PatternRule {
        group,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        short_only: true,
    }
}

fn default_patterns() -> Vec<PatternRule> {
    vec![
        pattern_rule(
            GroupKey::Toc,
            &[
                r"(?i)^(目錄|目录|目次|圖目錄|表目錄|table of contents|contents|list of figures|list of tables)$",
                // dot-leader entries ending in a page number
                r"(?:\.{4,}|…{2,}|\t)\s*[0-9ivxlcIVXLC]+$",
            ],
        ),
        pattern_rule(GroupKey::FigureCaption, &[r"(?i)^(圖|图|figure|fig\.)\s*[0-9]+([.\-][0-9]+)*"]),
        pattern_rule(GroupKey::TableCaption, &[r"(?i)^(表|table)\s*[0-9]+([.\-][0-9]+)*"]),
        pattern_rule(
            GroupKey::ChapterTitle,
            &[
                r"^第[一二三四五六七八九十百零〇0-9]+章",
                r"(?i)^chapter\s+([0-9]+|[ivxlc]+)\b",
            ],
        ),
        pattern_rule(
            GroupKey::SectionTitle,
            &[r"^第[一二三四五六七八九十百零〇0-9]+節", r"^[0-9]+\.[0-9]+\.?\s+\S"],
        ),
        pattern_rule(GroupKey::SubsectionTitle, &[r"^[0-9]+\.[0-9]+\.[0-9]+(\.[0-9]+)*\.?\s+\S"]),
        pattern_rule(
            GroupKey::FrontMatter,
            &[
                r"(?i)^(摘要|abstract|acknowledge?ments?|致謝|致谢|誌謝|preface|序言)$",
                r"(?i)^(關鍵詞|關鍵字|关键词|keywords?)\s*[:：]",
            ],
        ),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Off,
    Auto,
    OpenAi,
    Gemini,
}

impl std::str::FromStr for AiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "" => Ok(AiProvider::Off),
            "auto" => Ok(AiProvider::Auto),
            "openai" => Ok(AiProvider::OpenAi),
            "gemini" => Ok(AiProvider::Gemini),
            other => Err(format!("unknown AI provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProvider,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_url: String,
    #[serde(skip_serializing)]
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    /// Base URL; the model name and `:generateContent` are appended
    pub gemini_url: String,
    /// Bounds each provider request, applied by the HTTP agent
    pub timeout_secs: u64,
    /// Paragraphs sent per provider request
    pub batch_size: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProvider::Off,
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            gemini_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != AiProvider::Off
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplierConfig {
    /// One font for every group, written after the per-group rules
    #[serde(default)]
    pub forced_font: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub max_upload_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

impl StorageConfig {
    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("templates")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.data_dir.join("outputs")
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

impl FormatterConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FormatterConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback to default
    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                warn!(path = p, error = %e, "failed to load config, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Environment wins over file values
    pub fn apply_env_overrides(mut self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = present("THESISFMT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(provider) = present("THESISFMT_AI_PROVIDER") {
            match provider.parse::<AiProvider>() {
                Ok(provider) => self.ai.provider = provider,
                Err(e) => warn!(error = %e, "ignoring THESISFMT_AI_PROVIDER"),
            }
        }
        if let Some(font) = present("THESISFMT_FORCED_FONT") {
            self.applier.forced_font = Some(font);
        }
        if let Some(key) = present("OPENAI_API_KEY") {
            self.ai.openai_api_key = Some(key);
        }
        if let Some(key) = present("GEMINI_API_KEY") {
            self.ai.gemini_api_key = Some(key);
        }
    }
}
