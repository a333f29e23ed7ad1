//! Wizard definitions.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::id::FormType;
use crate::step::StepRange;

/// Static description of one wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Tag used as part of the progress key
    pub form_type: FormType,

    /// Human-readable title
    #[serde(default)]
    pub title: String,

    /// Number of steps, validated on load
    pub total_steps: StepRange,
}

impl FormDefinition {
    /// Define a wizard.
    pub fn new(form_type: impl Into<FormType>, title: impl Into<String>, total_steps: u32) -> Result<Self> {
        Ok(Self {
            form_type: form_type.into(),
            title: title.into(),
            total_steps: StepRange::new(total_steps)?,
        })
    }
}

/// The set of wizards an installation knows about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormCatalog {
    /// Known wizards
    pub forms: Vec<FormDefinition>,
}

impl FormCatalog {
    /// Wizards shipped with the product.
    pub fn builtin() -> Self {
        Self {
            forms: vec![
                FormDefinition {
                    form_type: FormType::from("structuring"),
                    title: "Project structuring".to_string(),
                    total_steps: StepRange::fixed(4),
                },
                FormDefinition {
                    form_type: FormType::from("enterprise"),
                    title: "Enterprise application".to_string(),
                    total_steps: StepRange::fixed(5),
                },
            ],
        }
    }

    /// Parse a catalog from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Look up a wizard by tag.
    pub fn get(&self, form_type: &FormType) -> Result<&FormDefinition> {
        self.forms
            .iter()
            .find(|f| &f.form_type == form_type)
            .ok_or_else(|| CoreError::UnknownForm(form_type.to_string()))
    }
}
