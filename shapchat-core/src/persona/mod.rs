//! Explanation personas
//!
//! A persona bundles the system prompt and sampling parameters that select the
//! backend's response style. The registry is built once at startup, either from the
//! built-in table or from configuration, and is immutable afterwards. Callers pass it
//! around explicitly; there is no global lookup.
//!
//! # Example
//!
//! ```rust
//! use shapchat_core::persona::{PersonaKind, PersonaRegistry};
//!
//! let registry = PersonaRegistry::builtin();
//! let persona = registry.resolve("student").unwrap();
//! assert_eq!(persona.kind, PersonaKind::Student);
//! assert_eq!(persona.response_token_cap, 200);
//! ```

mod selector;

pub use selector::{Selection, select_interactive};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShapchatError};
use crate::llm::SamplingParams;

/// Valid temperature range accepted by the backend
pub const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.0..=2.0;

const BASE_PROMPT: &str = "You are an assistant that interprets SHAP values and helps the user \
understand why a model made a particular prediction for a specific instance. Do not repeat the \
SHAP values unless asked; explain how the features influenced the prediction.";

/// Closed set of persona kinds. Each built-in kind carries its own prompt and sampling
/// defaults; `Custom` covers personas added through configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaKind {
    Beginner,
    Student,
    Analyst,
    Researcher,
    ExecutiveSummary,
    Pirate,
    Custom(String),
}

impl PersonaKind {
    /// Built-in kinds, in menu order
    pub const BUILTIN: [PersonaKind; 6] = [
        PersonaKind::Beginner,
        PersonaKind::Student,
        PersonaKind::Analyst,
        PersonaKind::Researcher,
        PersonaKind::ExecutiveSummary,
        PersonaKind::Pirate,
    ];

    /// Kind for a role key; unknown keys become `Custom`
    pub fn from_key(key: &str) -> Self {
        match key {
            "beginner" => PersonaKind::Beginner,
            "student" => PersonaKind::Student,
            "analyst" => PersonaKind::Analyst,
            "researcher" => PersonaKind::Researcher,
            "executive_summary" => PersonaKind::ExecutiveSummary,
            "pirate" => PersonaKind::Pirate,
            other => PersonaKind::Custom(other.to_string()),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            PersonaKind::Beginner => "beginner",
            PersonaKind::Student => "student",
            PersonaKind::Analyst => "analyst",
            PersonaKind::Researcher => "researcher",
            PersonaKind::ExecutiveSummary => "executive_summary",
            PersonaKind::Pirate => "pirate",
            PersonaKind::Custom(key) => key,
        }
    }

    /// Built-in definition, `None` for custom kinds
    pub fn default_persona(&self) -> Option<Persona> {
        let (selection_key, label, style, temperature, cap, disclosed) = match self {
            PersonaKind::Beginner => (
                "1",
                "Explain it to me like I'm a beginner",
                "The user is a complete beginner. Use everyday language and analogies, focus only \
                 on the most important features and avoid numbers.",
                1.0,
                300,
                true,
            ),
            PersonaKind::Student => (
                "2",
                "Explain it to me like I'm a student",
                "The user is a student learning machine learning. Introduce the idea behind SHAP \
                 briefly, then walk through the main positive and negative contributions.",
                0.8,
                200,
                true,
            ),
            PersonaKind::Analyst => (
                "3",
                "Explain it to me like I'm an analyst",
                "The user is a data analyst. Be precise, reference feature values and the size of \
                 their contributions, and point out anything counterintuitive.",
                0.8,
                150,
                true,
            ),
            PersonaKind::Researcher => (
                "4",
                "Explain it to me like I'm a researcher",
                "The user is a machine-learning researcher. Discuss attributions rigorously, \
                 including interactions, baseline effects and the limits of the explanation.",
                0.8,
                150,
                true,
            ),
            PersonaKind::ExecutiveSummary => (
                "5",
                "Explain it to me like an executive summary",
                "The user is an executive. Give a concise summary of what drove the prediction \
                 and what it means, without technical details.",
                0.8,
                150,
                true,
            ),
            PersonaKind::Pirate => (
                "0",
                "Explain it to me like I'm a pirate",
                "Answer in the voice of a pirate, but keep the explanation accurate.",
                0.8,
                200,
                false,
            ),
            PersonaKind::Custom(_) => return None,
        };

        Some(Persona {
            role_key: self.key().to_string(),
            kind: self.clone(),
            label: label.to_string(),
            selection_key: selection_key.to_string(),
            disclosed,
            system_prompt: format!("{} {}", BASE_PROMPT, style),
            temperature,
            response_token_cap: cap,
        })
    }
}

/// Named bundle of system prompt and sampling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role_key: String,
    pub kind: PersonaKind,
    /// Human-readable description shown in the selection menu
    pub label: String,
    /// Menu key used for interactive selection
    pub selection_key: String,
    /// Hidden personas are resolvable but not listed
    pub disclosed: bool,
    pub system_prompt: String,
    pub temperature: f32,
    pub response_token_cap: usize,
}

impl Persona {
    /// Sampling parameters for requests made under this persona
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.response_token_cap,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.role_key.trim().is_empty() {
            return Err(ShapchatError::InvalidPersona(
                "role key must not be empty".to_string(),
            ));
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(ShapchatError::InvalidPersona(format!(
                "temperature {} for '{}' is outside {:?}",
                self.temperature, self.role_key, TEMPERATURE_RANGE
            )));
        }
        if self.response_token_cap == 0 {
            return Err(ShapchatError::InvalidPersona(format!(
                "response token cap for '{}' must be positive",
                self.role_key
            )));
        }
        Ok(())
    }
}

/// Persona entry as written in configuration.
///
/// Fields left out fall back to the built-in persona with the same key; a key with
/// no built-in counterpart must provide a system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub role_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclosed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_token_cap: Option<usize>,
}

impl PersonaConfig {
    fn into_persona(self) -> Result<Persona> {
        let kind = PersonaKind::from_key(&self.role_key);
        let base = kind.default_persona();

        let system_prompt = match (self.system_prompt, &base) {
            (Some(prompt), _) => prompt,
            (None, Some(base)) => base.system_prompt.clone(),
            (None, None) => {
                return Err(ShapchatError::InvalidPersona(format!(
                    "custom persona '{}' needs a system_prompt",
                    self.role_key
                )));
            }
        };

        let persona = Persona {
            label: self
                .label
                .or_else(|| base.as_ref().map(|b| b.label.clone()))
                .unwrap_or_else(|| self.role_key.clone()),
            selection_key: self
                .selection_key
                .or_else(|| base.as_ref().map(|b| b.selection_key.clone()))
                .unwrap_or_default(),
            disclosed: self
                .disclosed
                .or_else(|| base.as_ref().map(|b| b.disclosed))
                .unwrap_or(true),
            temperature: self
                .temperature
                .or_else(|| base.as_ref().map(|b| b.temperature))
                .unwrap_or(0.8),
            response_token_cap: self
                .response_token_cap
                .or_else(|| base.as_ref().map(|b| b.response_token_cap))
                .unwrap_or(200),
            system_prompt,
            role_key: self.role_key,
            kind,
        };
        persona.validate()?;
        Ok(persona)
    }
}

/// Immutable table of personas
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl PersonaRegistry {
    /// The six built-in personas
    pub fn builtin() -> Self {
        Self {
            personas: PersonaKind::BUILTIN
                .iter()
                .filter_map(PersonaKind::default_persona)
                .collect(),
        }
    }

    /// Built-ins overlaid with configured entries. Entries whose key matches a built-in
    /// replace it; others are appended in order.
    pub fn from_config(entries: &[PersonaConfig]) -> Result<Self> {
        let mut registry = Self::builtin();

        for mut entry in entries.iter().cloned() {
            entry.role_key = entry.role_key.trim().to_lowercase();
            let persona = entry.into_persona()?;
            match registry
                .personas
                .iter_mut()
                .find(|p| p.role_key == persona.role_key)
            {
                Some(existing) => *existing = persona,
                None => registry.personas.push(persona),
            }
        }

        let mut seen = std::collections::HashSet::new();
        for persona in &registry.personas {
            if !persona.selection_key.is_empty() && !seen.insert(persona.selection_key.as_str()) {
                return Err(ShapchatError::InvalidPersona(format!(
                    "selection key '{}' is used by more than one persona",
                    persona.selection_key
                )));
            }
        }

        tracing::debug!(count = registry.personas.len(), "Loaded persona registry");
        Ok(registry)
    }

    /// Look up a persona by role key
    pub fn resolve(&self, role_key: &str) -> Result<Persona> {
        let key = role_key.trim().to_lowercase();
        self.personas
            .iter()
            .find(|p| p.role_key == key)
            .cloned()
            .ok_or_else(|| self.unknown(role_key))
    }

    /// Look up a persona by its menu key
    pub fn resolve_selection(&self, selection_key: &str) -> Result<Persona> {
        let key = selection_key.trim();
        self.personas
            .iter()
            .find(|p| !p.selection_key.is_empty() && p.selection_key == key)
            .cloned()
            .ok_or_else(|| self.unknown(selection_key))
    }

    /// Personas listed in the selection menu
    pub fn disclosed(&self) -> impl Iterator<Item = &Persona> {
        self.personas.iter().filter(|p| p.disclosed)
    }

    /// All personas, including undisclosed ones
    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    pub fn role_keys(&self) -> Vec<String> {
        self.disclosed().map(|p| p.role_key.clone()).collect()
    }

    fn unknown(&self, role: &str) -> ShapchatError {
        ShapchatError::UnknownRole {
            role: role.to_string(),
            available: self.role_keys(),
        }
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
