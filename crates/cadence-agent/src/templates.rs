//! Specialization templates for sub-agents
//!
//! Each delegation sub-task is handled by a worker instantiated from a
//! specialization template: a persona plus the tools and focus areas it
//! brings to the task.

use serde::{Deserialize, Serialize};

/// Worker specializations inferable from operation keywords
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialization {
    Security,
    Performance,
    #[default]
    Quality,
    Architecture,
}

impl std::fmt::Display for Specialization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Security => write!(f, "security"),
            Self::Performance => write!(f, "performance"),
            Self::Quality => write!(f, "quality"),
            Self::Architecture => write!(f, "architecture"),
        }
    }
}

impl std::str::FromStr for Specialization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "quality" => Ok(Self::Quality),
            "architecture" => Ok(Self::Architecture),
            _ => Err(format!("Invalid specialization: {}", s)),
        }
    }
}

/// Infer a specialization from operation keywords, defaulting to quality
pub fn infer_specialization(operation: &str) -> Specialization {
    let op = operation.to_lowercase();
    if op.contains("security") || op.contains("vulnerab") || op.contains("audit") {
        Specialization::Security
    } else if op.contains("performance") || op.contains("optimi") || op.contains("latency") {
        Specialization::Performance
    } else if op.contains("architecture") || op.contains("design") || op.contains("structure") {
        Specialization::Architecture
    } else {
        Specialization::Quality
    }
}

/// Template a sub-agent is instantiated from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecializationTemplate {
    pub specialization: Specialization,
    /// Persona the worker adopts
    pub persona: String,
    /// Tools available to the worker
    pub tools: Vec<String>,
    /// Focus areas the worker prioritizes
    pub focus: Vec<String>,
}

impl SpecializationTemplate {
    /// Built-in template for a specialization
    pub fn builtin(specialization: Specialization) -> Self {
        match specialization {
            Specialization::Security => Self {
                specialization,
                persona: "security".to_string(),
                tools: vec!["grep".to_string(), "ast-scan".to_string()],
                focus: vec![
                    "injection".to_string(),
                    "auth".to_string(),
                    "secrets".to_string(),
                ],
            },
            Specialization::Performance => Self {
                specialization,
                persona: "performance".to_string(),
                tools: vec!["profile".to_string(), "benchmark".to_string()],
                focus: vec!["hot-paths".to_string(), "allocations".to_string()],
            },
            Specialization::Quality => Self {
                specialization,
                persona: "refactorer".to_string(),
                tools: vec!["lint".to_string(), "complexity".to_string()],
                focus: vec!["readability".to_string(), "duplication".to_string()],
            },
            Specialization::Architecture => Self {
                specialization,
                persona: "architect".to_string(),
                tools: vec!["dependency-graph".to_string(), "module-map".to_string()],
                focus: vec!["coupling".to_string(), "boundaries".to_string()],
            },
        }
    }
}

/// Registry of available specialization templates
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: Vec<SpecializationTemplate>,
}

impl TemplateRegistry {
    /// Registry preloaded with the built-in templates
    pub fn with_builtins() -> Self {
        Self {
            templates: vec![
                SpecializationTemplate::builtin(Specialization::Security),
                SpecializationTemplate::builtin(Specialization::Performance),
                SpecializationTemplate::builtin(Specialization::Quality),
                SpecializationTemplate::builtin(Specialization::Architecture),
            ],
        }
    }

    /// Register a custom template, replacing any existing one for the
    /// same specialization
    pub fn register(&mut self, template: SpecializationTemplate) {
        self.templates
            .retain(|t| t.specialization != template.specialization);
        self.templates.push(template);
    }

    pub fn get(&self, specialization: Specialization) -> Option<&SpecializationTemplate> {
        self.templates
            .iter()
            .find(|t| t.specialization == specialization)
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_specialization() {
        assert_eq!(
            infer_specialization("audit security posture"),
            Specialization::Security
        );
        assert_eq!(
            infer_specialization("optimize query latency"),
            Specialization::Performance
        );
        assert_eq!(
            infer_specialization("review module design"),
            Specialization::Architecture
        );
        assert_eq!(infer_specialization("cleanup"), Specialization::Quality);
    }

    #[test]
    fn test_builtin_registry_covers_all_specializations() {
        let registry = TemplateRegistry::with_builtins();
        for spec in [
            Specialization::Security,
            Specialization::Performance,
            Specialization::Quality,
            Specialization::Architecture,
        ] {
            assert!(registry.get(spec).is_some());
        }
    }

    #[test]
    fn test_register_replaces_template() {
        let mut registry = TemplateRegistry::with_builtins();
        registry.register(SpecializationTemplate {
            specialization: Specialization::Quality,
            persona: "custom".to_string(),
            tools: vec![],
            focus: vec![],
        });

        assert_eq!(
            registry.get(Specialization::Quality).unwrap().persona,
            "custom"
        );
    }
}
