//! # Procedure definitions
//!
//! A [`Procedure`] is a curated how-to guide: a title, a description, a
//! keyword list, and an ordered body of steps. The body is either a flat
//! step list ("simple") or a list of named sections ("complex") — exactly
//! one of the two. Optional fields (`prerequisites`, `troubleshooting`,
//! `tips`, `notes`) may appear in source JSON as a single string or as a
//! list of strings; both shapes are normalized to `Vec<String>` at load
//! time so downstream rendering never has to care.
//!
//! The procedure id is the definition file's stem and is the sole join key
//! between the store, the embedding index, the relationship table and the
//! analytics records.
//!
//! ## Definition format
//!
//! ```json
//! {
//!   "title": "Upload an Asset",
//!   "description": "How to add new files to the platform.",
//!   "keywords": ["upload", "add file", "import"],
//!   "steps": ["Open the upload panel.", "Drag your files in."],
//!   "prerequisites": ["Contributor role or above"],
//!   "notes": "Large files may take a while."
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// A named group of steps inside a "complex" procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section heading, rendered before its steps.
    pub name: String,
    /// Ordered step strings, reproduced verbatim.
    pub steps: Vec<String>,
    /// Optional per-section notes, normalized to a list.
    #[serde(default, deserialize_with = "string_or_list")]
    pub notes: Vec<String>,
}

/// The ordered body of a procedure. Exactly one shape per definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Steps(Vec<String>),
    Sections(Vec<Section>),
}

impl Body {
    /// Total number of steps across the whole body.
    pub fn step_count(&self) -> usize {
        match self {
            Body::Steps(steps) => steps.len(),
            Body::Sections(sections) => sections.iter().map(|s| s.steps.len()).sum(),
        }
    }
}

/// A fully loaded, normalized process guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    /// File stem of the source definition; stable join key.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Lowercased at load; matching is case-insensitive.
    pub keywords: Vec<String>,
    pub body: Body,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub troubleshooting: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    /// Name of the parent directory the definition was loaded from.
    #[serde(default)]
    pub category: String,
}

impl Procedure {
    /// Parse and validate a definition, normalizing duck-typed fields.
    ///
    /// `path` is only used to report which file was bad.
    pub fn from_json(id: &str, category: &str, raw: &JsonValue, path: &str) -> Result<Self> {
        let errors = validate_definition(raw);
        if let Some(message) = errors.first() {
            return Err(Error::Definition {
                path: path.to_string(),
                message: message.clone(),
            });
        }

        let raw: RawProcedure =
            serde_json::from_value(raw.clone()).map_err(|e| Error::Definition {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let body = match (raw.steps, raw.sections) {
            (Some(steps), None) => Body::Steps(steps),
            (None, Some(sections)) => Body::Sections(sections),
            // validate_definition has already rejected the other combinations
            _ => {
                return Err(Error::Definition {
                    path: path.to_string(),
                    message: "exactly one of 'steps' or 'sections' must be present".to_string(),
                });
            }
        };

        Ok(Procedure {
            id: id.to_string(),
            title: raw.title,
            description: raw.description,
            keywords: raw.keywords.iter().map(|k| k.to_lowercase()).collect(),
            body,
            prerequisites: raw.prerequisites,
            troubleshooting: raw.troubleshooting,
            tips: raw.tips,
            notes: raw.notes,
            category: category.to_string(),
        })
    }

    /// Human-friendly form of the id, e.g. `upload_asset` → `upload asset`.
    pub fn friendly_name(&self) -> String {
        self.id.replace('_', " ")
    }

    /// The text the embedding index derives this procedure's vector from.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {}",
            self.title,
            self.description,
            self.keywords.join(" ")
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawProcedure {
    title: String,
    description: String,
    keywords: Vec<String>,
    steps: Option<Vec<String>>,
    sections: Option<Vec<Section>>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    troubleshooting: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    tips: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    notes: Vec<String>,
}

/// Accept either `"a note"` or `["a note", "another"]`.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => vec![s],
        StringOrList::Many(v) => v,
    })
}

/// Validate a raw definition, returning every problem found.
///
/// An empty result means the definition is acceptable. Mirrors the checks the
/// `validate` subcommand runs across a whole directory.
pub fn validate_definition(raw: &JsonValue) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(obj) = raw.as_object() else {
        return vec!["definition must be a JSON object".to_string()];
    };

    for field in ["title", "description"] {
        match obj.get(field) {
            None => errors.push(format!("missing required field '{field}'")),
            Some(v) if !v.is_string() => errors.push(format!("'{field}' must be a string")),
            _ => {}
        }
    }

    match obj.get("keywords") {
        None => errors.push("missing required field 'keywords'".to_string()),
        Some(v) => match v.as_array() {
            None => errors.push("'keywords' must be a list".to_string()),
            Some(list) if !list.iter().all(|v| v.is_string()) => {
                errors.push("all keywords must be strings".to_string());
            }
            Some(list) if list.len() < 3 => {
                errors.push("at least 3 keywords are required".to_string());
            }
            _ => {}
        },
    }

    let has_steps = obj.contains_key("steps");
    let has_sections = obj.contains_key("sections");
    match (has_steps, has_sections) {
        (false, false) => errors.push("one of 'steps' or 'sections' is required".to_string()),
        (true, true) => {
            errors.push("'steps' and 'sections' are mutually exclusive".to_string());
        }
        (true, false) => match obj["steps"].as_array() {
            None => errors.push("'steps' must be a list".to_string()),
            Some(list) if !list.iter().all(|v| v.is_string()) => {
                errors.push("all steps must be strings".to_string());
            }
            Some(list) if list.len() < 2 => {
                errors.push("at least 2 steps are required".to_string());
            }
            _ => {}
        },
        (false, true) => match obj["sections"].as_array() {
            None => errors.push("'sections' must be a list".to_string()),
            Some(sections) => {
                for (i, section) in sections.iter().enumerate() {
                    let Some(section) = section.as_object() else {
                        errors.push(format!("section {} must be an object", i + 1));
                        continue;
                    };
                    if !section.get("name").is_some_and(JsonValue::is_string) {
                        errors.push(format!("missing 'name' in section {}", i + 1));
                    }
                    match section.get("steps").and_then(JsonValue::as_array) {
                        None => errors.push(format!("missing 'steps' in section {}", i + 1)),
                        Some(steps) if !steps.iter().all(|v| v.is_string()) => {
                            errors.push(format!("all steps must be strings in section {}", i + 1));
                        }
                        Some(steps) if steps.is_empty() => {
                            errors.push(format!("section {} has no steps", i + 1));
                        }
                        _ => {}
                    }
                }
            }
        },
    }

    if let Some(v) = obj.get("prerequisites") {
        match v.as_array() {
            None => errors.push("'prerequisites' must be a list".to_string()),
            Some(list) if !list.iter().all(|v| v.is_string()) => {
                errors.push("all prerequisites must be strings".to_string());
            }
            _ => {}
        }
    }

    errors
}
