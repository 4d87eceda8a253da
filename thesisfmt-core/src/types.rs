use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ===== RULE MODEL =====
// A RuleSet is page geometry plus exactly one GroupRule per GroupKey.
// All lengths are in points; conversion to twips/half-points happens in docx.

/// Semantic paragraph role. The set is closed: nine keys, no more, no fewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Cover,
    FrontMatter,
    ChapterTitle,
    SectionTitle,
    SubsectionTitle,
    Body,
    FigureCaption,
    TableCaption,
    Toc,
}

impl GroupKey {
    pub const ALL: [GroupKey; 9] = [
        GroupKey::Cover,
        GroupKey::FrontMatter,
        GroupKey::ChapterTitle,
        GroupKey::SectionTitle,
        GroupKey::SubsectionTitle,
        GroupKey::Body,
        GroupKey::FigureCaption,
        GroupKey::TableCaption,
        GroupKey::Toc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKey::Cover => "cover",
            GroupKey::FrontMatter => "front_matter",
            GroupKey::ChapterTitle => "chapter_title",
            GroupKey::SectionTitle => "section_title",
            GroupKey::SubsectionTitle => "subsection_title",
            GroupKey::Body => "body",
            GroupKey::FigureCaption => "figure_caption",
            GroupKey::TableCaption => "table_caption",
            GroupKey::Toc => "toc",
        }
    }

    /// Heading groups, outermost first
    pub fn is_heading(&self) -> bool {
        matches!(
            self,
            GroupKey::ChapterTitle | GroupKey::SectionTitle | GroupKey::SubsectionTitle
        )
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        GroupKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| format!("unknown group key '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

impl Alignment {
    /// WordprocessingML `w:jc` value
    pub fn to_ooxml(&self) -> &'static str {
        match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Justify => "both",
        }
    }

    pub fn from_ooxml(value: &str) -> Self {
        match value {
            "center" => Alignment::Center,
            "right" | "end" => Alignment::Right,
            "both" | "distribute" | "lowKashida" | "mediumKashida" | "highKashida"
            | "thaiDistribute" => Alignment::Justify,
            _ => Alignment::Left,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageNumberFormat {
    #[serde(rename = "decimal")]
    Decimal,
    #[serde(rename = "upperRoman")]
    UpperRoman,
    #[serde(rename = "lowerRoman")]
    LowerRoman,
    #[serde(rename = "none")]
    None,
}

impl PageNumberFormat {
    /// WordprocessingML `w:pgNumType/@w:fmt` value; `None` has no rendering
    pub fn to_ooxml(&self) -> Option<&'static str> {
        match self {
            PageNumberFormat::Decimal => Some("decimal"),
            PageNumberFormat::UpperRoman => Some("upperRoman"),
            PageNumberFormat::LowerRoman => Some("lowerRoman"),
            PageNumberFormat::None => None,
        }
    }
}

impl fmt::Display for PageNumberFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_ooxml().unwrap_or("none"))
    }
}

impl FromStr for PageNumberFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "decimal" => Ok(PageNumberFormat::Decimal),
            "upperRoman" => Ok(PageNumberFormat::UpperRoman),
            "lowerRoman" => Ok(PageNumberFormat::LowerRoman),
            "none" => Ok(PageNumberFormat::None),
            other => Err(format!("unknown page number format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRule {
    pub page_width_pt: f32,
    pub page_height_pt: f32,
    pub margin_top_pt: f32,
    pub margin_bottom_pt: f32,
    pub margin_left_pt: f32,
    pub margin_right_pt: f32,
    pub header_distance_pt: f32,
    pub footer_distance_pt: f32,
    pub gutter_pt: f32,
    pub page_number_start: u32,
    pub page_number_format: PageNumberFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRule {
    pub font_name: String,
    pub font_size_pt: f32,
    pub alignment: Alignment,
    pub line_spacing: f32,
    pub space_before_pt: f32,
    pub space_after_pt: f32,
    /// Negative values render as a hanging indent
    pub first_line_indent_pt: f32,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub page: PageRule,
    pub groups: BTreeMap<GroupKey, GroupRule>,
}

impl RuleSet {
    pub fn group(&self, key: GroupKey) -> Option<&GroupRule> {
        self.groups.get(&key)
    }
}

// ===== TEMPLATES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    /// File name of the reference document the rules were detected from
    pub source_filename: Option<String>,
    pub rules: RuleSet,
    #[serde(default)]
    pub detection_notes: Vec<String>,
}

// ===== JOBS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Docx,
    Pdf,
}

impl TargetKind {
    /// Target kind from a file name's extension, case-insensitive
    pub fn from_file_name(name: &str) -> Option<Self> {
        let extension = std::path::Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())?;
        match extension.as_str() {
            "docx" => Some(TargetKind::Docx),
            "pdf" => Some(TargetKind::Pdf),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            TargetKind::Docx => "docx",
            TargetKind::Pdf => "pdf",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub template_id: String,
    pub target_filename: String,
    pub target_kind: TargetKind,
    pub input_path: PathBuf,
    /// SHA-256 of the submitted bytes
    pub input_sha256: String,
    /// Effective rules snapshotted at submission
    pub rules: RuleSet,
    pub state: JobState,
    pub progress: u8,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    pub conversion_confidence: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
