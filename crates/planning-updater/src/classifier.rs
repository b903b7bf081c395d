//! Description field classification.
//!
//! A description is a delimiter-separated list of items. Each branch picks
//! one strategy through its parser mode: ordered regex patterns for ENT
//! feeds, or the "Par X, Y et Z" teacher list heuristic for Nextcloud feeds.

use regex::Regex;

use crate::config::{ConfigError, ParserParams};

/// Wrap a configured pattern so it only matches at the start of an item.
pub fn anchored(pattern: &str) -> String {
    format!("^(?:{})", pattern)
}

/// Items sorted out of a description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedFields {
    pub teachers: Vec<String>,
    pub groups: Vec<String>,
    pub undetermined: Vec<String>,
}

/// Ordered pattern lists applied to every description item.
#[derive(Debug, Clone)]
pub struct PatternRules {
    blacklist: Vec<Regex>,
    teachers: Vec<Regex>,
    groups: Vec<Regex>,
}

impl PatternRules {
    pub fn new(
        teachers_patterns: &[String],
        groups_patterns: &[String],
        blacklist: &[String],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            blacklist: compile_all(blacklist)?,
            teachers: compile_all(teachers_patterns)?,
            groups: compile_all(groups_patterns)?,
        })
    }

    /// Blacklist first, then teachers, then groups. Whatever is left is kept
    /// as undetermined. Items are not trimmed.
    pub fn classify(&self, description: &str, delimiter: &str) -> ClassifiedFields {
        let mut fields = ClassifiedFields::default();

        for item in description.split(delimiter).filter(|item| !item.is_empty()) {
            if first_match(&self.blacklist, item) {
                continue;
            }
            if first_match(&self.teachers, item) {
                fields.teachers.push(item.to_string());
            } else if first_match(&self.groups, item) {
                fields.groups.push(item.to_string());
            } else {
                fields.undetermined.push(item.to_string());
            }
        }

        fields
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(&anchored(p))).collect()
}

fn first_match(patterns: &[Regex], item: &str) -> bool {
    patterns.iter().any(|re| re.is_match(item))
}

/// Split a free text teacher list such as "Par Mme Durand, M. Petit et M. Roux".
pub fn split_teacher_list(text: &str) -> Vec<String> {
    let text = text.trim();
    let text = ["Par ", "De "]
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .unwrap_or(text);

    let mut pieces: Vec<&str> = text.split(',').collect();
    let last = pieces.pop().unwrap_or_default();

    pieces
        .into_iter()
        .chain(last.split(" et "))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classification strategy of a branch
#[derive(Debug, Clone)]
pub enum Classifier {
    Patterns(PatternRules),
    TeacherList,
}

impl Classifier {
    pub fn from_params(params: &ParserParams) -> Result<Self, ConfigError> {
        match params {
            ParserParams::Ent {
                teachers_patterns,
                groups_patterns,
                blacklist,
                ..
            } => PatternRules::new(teachers_patterns, groups_patterns, blacklist)
                .map(Classifier::Patterns)
                .map_err(|e| ConfigError::Invalid {
                    location: "parser".to_string(),
                    message: e.to_string(),
                }),
            ParserParams::Nextcloud { .. } => Ok(Classifier::TeacherList),
        }
    }

    pub fn classify(&self, description: &str, delimiter: &str) -> ClassifiedFields {
        match self {
            Classifier::Patterns(rules) => rules.classify(description, delimiter),
            Classifier::TeacherList => ClassifiedFields {
                teachers: split_teacher_list(description),
                ..Default::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn rules(teachers: &[&str], groups: &[&str], blacklist: &[&str]) -> PatternRules {
        PatternRules::new(&strings(teachers), &strings(groups), &strings(blacklist))
            .expect("patterns should compile")
    }

    #[test]
    fn test_classify_items() {
        let fields = rules(&[r"Prof\."], &["TD"], &[]).classify("Prof. Smith\nTD1\nrandom note", "\n");

        assert_eq!(fields.teachers, strings(&["Prof. Smith"]));
        assert_eq!(fields.groups, strings(&["TD1"]));
        assert_eq!(fields.undetermined, strings(&["random note"]));
    }

    #[test]
    fn test_no_match_keeps_every_item_undetermined() {
        let fields = rules(&["Prof"], &["TD"], &[]).classify("a\n\nb c\n  \nd", "\n");

        assert!(fields.teachers.is_empty());
        assert!(fields.groups.is_empty());
        assert_eq!(fields.undetermined, strings(&["a", "b c", "  ", "d"]));
    }

    #[test]
    fn test_blacklist_wins_over_teachers() {
        let fields = rules(&["M"], &[], &[r"Modifié le"]).classify(
            "Modifié le 12/01\nM. Martin",
            "\n",
        );

        assert_eq!(fields.teachers, strings(&["M. Martin"]));
        assert!(fields.undetermined.is_empty());
    }

    #[test]
    fn test_teacher_wins_over_group() {
        let fields = rules(&["T"], &["TD"], &[]).classify("TD2", "\n");
        assert_eq!(fields.teachers, strings(&["TD2"]));
        assert!(fields.groups.is_empty());
    }

    #[test]
    fn test_patterns_are_anchored() {
        let fields = rules(&["Prof"], &[], &[]).classify("Le Prof", "\n");
        assert!(fields.teachers.is_empty());
        assert_eq!(fields.undetermined, strings(&["Le Prof"]));
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let fields = rules(&["Mme|M\\."], &[], &[]).classify("Mme Durand;Dr M. Petit", ";");
        assert_eq!(fields.teachers, strings(&["Mme Durand"]));
        assert_eq!(fields.undetermined, strings(&["Dr M. Petit"]));
    }

    #[test]
    fn test_split_teacher_list() {
        assert_eq!(
            split_teacher_list("Par Mme Durand, M. Petit et M. Roux"),
            strings(&["Mme Durand", "M. Petit", "M. Roux"])
        );
        assert_eq!(split_teacher_list("De M. Petit"), strings(&["M. Petit"]));
        assert_eq!(split_teacher_list("Par Alice et Bob"), strings(&["Alice", "Bob"]));
        assert!(split_teacher_list("").is_empty());
    }

    #[test]
    fn test_teacher_list_classifier() {
        let fields = Classifier::TeacherList.classify("Par Alice, Bob", "\n");
        assert_eq!(fields.teachers, strings(&["Alice", "Bob"]));
        assert!(fields.groups.is_empty());
        assert!(fields.undetermined.is_empty());
    }
}
