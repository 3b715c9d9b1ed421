use serde::{Deserialize, Serialize};

use crate::shape::{Prompt, Shape};
use crate::types::{FieldDef, TypeDef, ValidationError};

pub const ID: &str = "symptom-analysis";

pub const GENDERS: &[&str] = &["male", "female", "other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomAnalysisInput {
    pub symptoms: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomAnalysisOutput {
    pub potential_causes: String,
    pub recommended_next_steps: String,
}

pub struct SymptomAnalysis;

impl Shape for SymptomAnalysis {
    const ID: &'static str = ID;
    const DESCRIPTION: &'static str =
        "Analyze described symptoms and suggest potential causes and next steps.";

    type Input = SymptomAnalysisInput;
    type Output = SymptomAnalysisOutput;

    fn input_typedef() -> TypeDef {
        TypeDef::Object(vec![
            FieldDef::required(
                "symptoms",
                TypeDef::Text,
                "A detailed description of the patient's symptoms.",
            ),
            FieldDef::optional(
                "age",
                TypeDef::number(),
                "The age of the patient in years.",
            ),
            FieldDef::optional("gender", TypeDef::Enum(GENDERS), "The gender of the patient."),
        ])
    }

    fn output_typedef() -> TypeDef {
        TypeDef::Object(vec![
            FieldDef::required(
                "potentialCauses",
                TypeDef::Text,
                "A list of potential causes for the symptoms.",
            ),
            FieldDef::required(
                "recommendedNextSteps",
                TypeDef::Text,
                "Recommended next steps for the patient.",
            ),
        ])
    }

    fn render_prompt(input: &Self::Input) -> Result<Prompt, ValidationError> {
        let mut prompt = Prompt::new().text(format!(
            "You are an AI medical assistant. Analyze the following symptoms and provide \
             potential causes and recommended next steps.\n\nSymptoms: {}\n",
            input.symptoms
        ));
        if let Some(age) = input.age {
            prompt.push_text(format!("\nAge: {age}"));
        }
        if let Some(gender) = input.gender {
            prompt.push_text(format!("\nGender: {}", gender.as_str()));
        }
        prompt.push_text("\n\nPotential Causes:\nRecommended Next Steps:");
        Ok(prompt)
    }
}
