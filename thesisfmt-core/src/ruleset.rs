// Rule Model operations
//
// validate() checks a RuleSet before use, RuleSet::default() is the built-in
// fallback, and apply_overrides() layers a partial edit over a base set.

use crate::error::{RuleSetIssue, ValidationError};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mandated font used by every group of the built-in rule set
pub const DEFAULT_FONT_NAME: &str = "Times New Roman";

/// A4 portrait in points
pub const A4_WIDTH_PT: f32 = 595.3;
pub const A4_HEIGHT_PT: f32 = 841.9;

impl Default for PageRule {
    fn default() -> Self {
        Self {
            page_width_pt: A4_WIDTH_PT,
            page_height_pt: A4_HEIGHT_PT,
            margin_top_pt: 72.0,
            margin_bottom_pt: 72.0,
            margin_left_pt: 72.0,
            margin_right_pt: 72.0,
            header_distance_pt: 36.0,
            footer_distance_pt: 36.0,
            gutter_pt: 0.0,
            page_number_start: 1,
            page_number_format: PageNumberFormat::Decimal,
        }
    }
}

impl Default for GroupRule {
    fn default() -> Self {
        Self {
            font_name: DEFAULT_FONT_NAME.to_string(),
            font_size_pt: 12.0,
            alignment: Alignment::Justify,
            line_spacing: 1.5,
            space_before_pt: 0.0,
            space_after_pt: 0.0,
            first_line_indent_pt: 0.0,
            bold: false,
            italic: false,
        }
    }
}

/// Built-in typography for one group
pub fn default_group_rule(key: GroupKey) -> GroupRule {
    let base = GroupRule::default();
    match key {
        GroupKey::Cover => GroupRule {
            font_size_pt: 16.0,
            alignment: Alignment::Center,
            line_spacing: 1.0,
            bold: true,
            ..base
        },
        GroupKey::FrontMatter | GroupKey::Body => GroupRule {
            first_line_indent_pt: 24.0,
            ..base
        },
        GroupKey::ChapterTitle => GroupRule {
            font_size_pt: 16.0,
            alignment: Alignment::Center,
            space_before_pt: 12.0,
            space_after_pt: 12.0,
            bold: true,
            ..base
        },
        GroupKey::SectionTitle => GroupRule {
            font_size_pt: 14.0,
            alignment: Alignment::Center,
            space_before_pt: 6.0,
            space_after_pt: 6.0,
            bold: true,
            ..base
        },
        GroupKey::SubsectionTitle => GroupRule {
            alignment: Alignment::Left,
            bold: true,
            ..base
        },
        GroupKey::FigureCaption | GroupKey::TableCaption => GroupRule {
            font_size_pt: 11.0,
            alignment: Alignment::Center,
            line_spacing: 1.2,
            ..base
        },
        GroupKey::Toc => GroupRule {
            alignment: Alignment::Left,
            ..base
        },
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            page: PageRule::default(),
            groups: GroupKey::ALL
                .iter()
                .map(|key| (*key, default_group_rule(*key)))
                .collect(),
        }
    }
}

impl RuleSet {
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let rules: RuleSet = serde_yaml::from_str(text)?;
        validate(&rules)?;
        Ok(rules)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Check a rule set before it is used or stored
pub fn validate(rules: &RuleSet) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    let page = &rules.page;
    for (field, value) in [
        ("page.page_width_pt", page.page_width_pt),
        ("page.page_height_pt", page.page_height_pt),
    ] {
        check_positive(&mut issues, field, value);
    }
    for (field, value) in [
        ("page.margin_top_pt", page.margin_top_pt),
        ("page.margin_bottom_pt", page.margin_bottom_pt),
        ("page.margin_left_pt", page.margin_left_pt),
        ("page.margin_right_pt", page.margin_right_pt),
        ("page.header_distance_pt", page.header_distance_pt),
        ("page.footer_distance_pt", page.footer_distance_pt),
        ("page.gutter_pt", page.gutter_pt),
    ] {
        check_non_negative(&mut issues, field, value);
    }

    for key in GroupKey::ALL {
        let Some(group) = rules.groups.get(&key) else {
            issues.push(RuleSetIssue::MissingGroup { group: key });
            continue;
        };
        if group.font_name.trim().is_empty() {
            issues.push(RuleSetIssue::EmptyFontName { group: key });
        }
        check_positive(&mut issues, &format!("groups.{}.font_size_pt", key), group.font_size_pt);
        check_positive(&mut issues, &format!("groups.{}.line_spacing", key), group.line_spacing);
        check_non_negative(
            &mut issues,
            &format!("groups.{}.space_before_pt", key),
            group.space_before_pt,
        );
        check_non_negative(
            &mut issues,
            &format!("groups.{}.space_after_pt", key),
            group.space_after_pt,
        );
        if !group.first_line_indent_pt.is_finite() {
            issues.push(RuleSetIssue::NotFinite {
                field: format!("groups.{}.first_line_indent_pt", key),
            });
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { issues })
    }
}

fn check_non_negative(issues: &mut Vec<RuleSetIssue>, field: &str, value: f32) {
    if !value.is_finite() {
        issues.push(RuleSetIssue::NotFinite {
            field: field.to_string(),
        });
    } else if value < 0.0 {
        issues.push(RuleSetIssue::Negative {
            field: field.to_string(),
            value,
        });
    }
}

fn check_positive(issues: &mut Vec<RuleSetIssue>, field: &str, value: f32) {
    if !value.is_finite() {
        issues.push(RuleSetIssue::NotFinite {
            field: field.to_string(),
        });
    } else if value <= 0.0 {
        issues.push(RuleSetIssue::NotPositive {
            field: field.to_string(),
            value,
        });
    }
}

// ===== PARTIAL EDITS =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageRulePatch {
    pub page_width_pt: Option<f32>,
    pub page_height_pt: Option<f32>,
    pub margin_top_pt: Option<f32>,
    pub margin_bottom_pt: Option<f32>,
    pub margin_left_pt: Option<f32>,
    pub margin_right_pt: Option<f32>,
    pub header_distance_pt: Option<f32>,
    pub footer_distance_pt: Option<f32>,
    pub gutter_pt: Option<f32>,
    pub page_number_start: Option<u32>,
    pub page_number_format: Option<PageNumberFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupRulePatch {
    pub font_name: Option<String>,
    pub font_size_pt: Option<f32>,
    pub alignment: Option<Alignment>,
    pub line_spacing: Option<f32>,
    pub space_before_pt: Option<f32>,
    pub space_after_pt: Option<f32>,
    pub first_line_indent_pt: Option<f32>,
    pub bold: Option<bool>,
    pub italic: Option<bool>,
}

/// User edits layered over a template's rules at submission time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSetPatch {
    #[serde(default)]
    pub page: Option<PageRulePatch>,
    #[serde(default)]
    pub groups: BTreeMap<GroupKey, GroupRulePatch>,
}

impl RuleSetPatch {
    pub fn is_empty(&self) -> bool {
        self.page.is_none() && self.groups.is_empty()
    }

    /// Build a patch from dotted assignments such as
    /// `page.page_number_format=upperRoman` or `groups.body.font_name=Times New Roman`.
    ///
    /// Text fields take the value verbatim (surrounding JSON quotes are
    /// dropped). Other values are read as JSON when they parse, otherwise as
    /// plain strings.
    pub fn from_assignments<S: AsRef<str>>(assignments: &[S]) -> Result<Self, ValidationError> {
        let mut root = serde_json::Map::new();

        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (path, raw_value) = assignment.split_once('=').ok_or_else(|| {
                ValidationError::single(RuleSetIssue::UnknownValue {
                    field: "assignment".to_string(),
                    value: assignment.to_string(),
                })
            })?;
            let segments: Vec<&str> = path.trim().split('.').collect();
            let value = parse_value(segments.last().copied(), raw_value.trim());
            insert_path(&mut root, &segments, value).map_err(|field| {
                ValidationError::single(RuleSetIssue::UnknownValue {
                    field,
                    value: raw_value.trim().to_string(),
                })
            })?;
        }

        serde_json::from_value(serde_json::Value::Object(root)).map_err(|e| {
            ValidationError::single(RuleSetIssue::UnknownValue {
                field: "override".to_string(),
                value: e.to_string(),
            })
        })
    }
}

/// Patch fields whose values are always text, whatever they look like
const TEXT_FIELDS: [&str; 1] = ["font_name"];

fn parse_value(field: Option<&str>, raw: &str) -> serde_json::Value {
    let parsed = serde_json::from_str::<serde_json::Value>(raw);
    if field.map_or(false, |f| TEXT_FIELDS.contains(&f)) {
        return match parsed {
            Ok(serde_json::Value::String(text)) => serde_json::Value::String(text),
            _ => serde_json::Value::String(raw.to_string()),
        };
    }
    parsed.unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn insert_path(
    map: &mut serde_json::Map<String, serde_json::Value>,
    segments: &[&str],
    value: serde_json::Value,
) -> Result<(), String> {
    match segments {
        [] => Err("empty path".to_string()),
        [last] if !last.is_empty() => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        [head, rest @ ..] if !head.is_empty() => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            match entry {
                serde_json::Value::Object(child) => insert_path(child, rest, value),
                _ => Err(segments.join(".")),
            }
        }
        _ => Err(segments.join(".")),
    }
}

/// Layer `edits` over `base`. Only touched fields change; the groups map is
/// edited key by key.
pub fn apply_overrides(base: &RuleSet, edits: &RuleSetPatch) -> RuleSet {
    let mut result = base.clone();

    if let Some(page) = &edits.page {
        let target = &mut result.page;
        replace(&mut target.page_width_pt, page.page_width_pt);
        replace(&mut target.page_height_pt, page.page_height_pt);
        replace(&mut target.margin_top_pt, page.margin_top_pt);
        replace(&mut target.margin_bottom_pt, page.margin_bottom_pt);
        replace(&mut target.margin_left_pt, page.margin_left_pt);
        replace(&mut target.margin_right_pt, page.margin_right_pt);
        replace(&mut target.header_distance_pt, page.header_distance_pt);
        replace(&mut target.footer_distance_pt, page.footer_distance_pt);
        replace(&mut target.gutter_pt, page.gutter_pt);
        replace(&mut target.page_number_start, page.page_number_start);
        replace(&mut target.page_number_format, page.page_number_format);
    }

    for (key, patch) in &edits.groups {
        let target = result
            .groups
            .entry(*key)
            .or_insert_with(|| default_group_rule(*key));
        replace(&mut target.font_name, patch.font_name.clone());
        replace(&mut target.font_size_pt, patch.font_size_pt);
        replace(&mut target.alignment, patch.alignment);
        replace(&mut target.line_spacing, patch.line_spacing);
        replace(&mut target.space_before_pt, patch.space_before_pt);
        replace(&mut target.space_after_pt, patch.space_after_pt);
        replace(&mut target.first_line_indent_pt, patch.first_line_indent_pt);
        replace(&mut target.bold, patch.bold);
        replace(&mut target.italic, patch.italic);
    }

    result
}

fn replace<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rule_set_is_valid() {
        let rules = RuleSet::default();
        assert_eq!(rules.groups.len(), 9);
        assert!(validate(&rules).is_ok());
        assert_eq!(rules.groups[&GroupKey::Body].font_name, DEFAULT_FONT_NAME);
    }

    #[test]
    fn test_validate_reports_every_issue() {
        let mut rules = RuleSet::default();
        rules.groups.remove(&GroupKey::Toc);
        rules.page.margin_left_pt = -3.0;
        rules.groups.get_mut(&GroupKey::Body).unwrap().font_size_pt = f32::NAN;

        let err = validate(&rules).unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert!(err
            .issues
            .contains(&RuleSetIssue::MissingGroup { group: GroupKey::Toc }));
        assert!(err.to_string().contains("page.margin_left_pt"));
    }

    #[test]
    fn test_empty_override_is_identity() {
        let base = RuleSet::default();
        let result = apply_overrides(&base, &RuleSetPatch::default());
        assert_eq!(result, base);
    }

    #[test]
    fn test_override_replaces_only_touched_fields() {
        let base = RuleSet::default();
        let patch = RuleSetPatch::from_assignments(&[
            "page.page_number_format=upperRoman",
            "groups.body.font_name=Arial",
            "groups.body.font_size_pt=11",
        ])
        .unwrap();

        let result = apply_overrides(&base, &patch);

        assert_eq!(result.page.page_number_format, PageNumberFormat::UpperRoman);
        assert_eq!(result.page.margin_top_pt, base.page.margin_top_pt);
        let body = &result.groups[&GroupKey::Body];
        assert_eq!(body.font_name, "Arial");
        assert_eq!(body.font_size_pt, 11.0);
        assert_eq!(body.alignment, base.groups[&GroupKey::Body].alignment);
        assert_eq!(result.groups[&GroupKey::Cover], base.groups[&GroupKey::Cover]);
        // base untouched
        assert_eq!(base.groups[&GroupKey::Body].font_name, DEFAULT_FONT_NAME);
    }

    #[test]
    fn test_font_names_stay_text() {
        let patch = RuleSetPatch::from_assignments(&[
            "groups.body.font_name=123",
            "groups.cover.font_name=true",
            "groups.toc.font_name=\"Times New Roman\"",
            "groups.body.bold=true",
        ])
        .unwrap();

        let result = apply_overrides(&RuleSet::default(), &patch);
        assert_eq!(result.groups[&GroupKey::Body].font_name, "123");
        assert_eq!(result.groups[&GroupKey::Cover].font_name, "true");
        assert_eq!(result.groups[&GroupKey::Toc].font_name, "Times New Roman");
        assert!(result.groups[&GroupKey::Body].bold);
    }

    #[test]
    fn test_unknown_page_number_format_is_rejected() {
        assert!(RuleSetPatch::from_assignments(&["page.page_number_format=arabic"]).is_err());
        assert!(RuleSetPatch::from_assignments(&["groups.appendix.bold=true"]).is_err());
        assert!(RuleSetPatch::from_assignments(&["groups.body.colour=red"]).is_err());
    }

    #[test]
    fn test_yaml_import_rejects_missing_group() {
        let mut rules = RuleSet::default();
        rules.groups.remove(&GroupKey::Cover);
        let yaml = serde_yaml::to_string(&rules).unwrap();
        assert!(RuleSet::from_yaml(&yaml).is_err());

        let yaml = RuleSet::default().to_yaml().unwrap();
        assert_eq!(RuleSet::from_yaml(&yaml).unwrap(), RuleSet::default());
    }
}
