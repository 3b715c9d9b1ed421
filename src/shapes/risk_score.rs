use serde::{Deserialize, Serialize};

use crate::shape::{Prompt, Shape};
use crate::types::{FieldDef, TypeDef, ValidationError};

pub const ID: &str = "risk-score";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub age: f64,
    pub gender: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalData {
    pub previous_conditions: Vec<String>,
    pub hospital_admissions: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentHealthConditions {
    pub symptoms: Vec<String>,
    pub diagnosis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScoreInput {
    pub demographics: Demographics,
    pub historical_data: HistoricalData,
    pub current_health_conditions: CurrentHealthConditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScoreOutput {
    pub risk_score: f64,
    pub risk_level: String,
    pub rationale: String,
}

pub struct RiskScore;

impl Shape for RiskScore {
    const ID: &'static str = ID;
    const DESCRIPTION: &'static str =
        "Calculate a patient risk score from demographics, history and current conditions.";

    type Input = RiskScoreInput;
    type Output = RiskScoreOutput;

    fn input_typedef() -> TypeDef {
        TypeDef::Object(vec![
            FieldDef::required(
                "demographics",
                TypeDef::Object(vec![
                    FieldDef::required("age", TypeDef::number(), "The age of the patient."),
                    FieldDef::required("gender", TypeDef::Text, "The gender of the patient."),
                    FieldDef::required("location", TypeDef::Text, "The location of the patient."),
                ]),
                "Demographic information of the patient.",
            ),
            FieldDef::required(
                "historicalData",
                TypeDef::Object(vec![
                    FieldDef::required(
                        "previousConditions",
                        TypeDef::list(TypeDef::Text),
                        "List of previous health conditions of the patient.",
                    ),
                    FieldDef::required(
                        "hospitalAdmissions",
                        TypeDef::number(),
                        "Number of past hospital admissions.",
                    ),
                ]),
                "Historical health data of the patient.",
            ),
            FieldDef::required(
                "currentHealthConditions",
                TypeDef::Object(vec![
                    FieldDef::required(
                        "symptoms",
                        TypeDef::list(TypeDef::Text),
                        "List of current symptoms reported by the patient.",
                    ),
                    FieldDef::required(
                        "diagnosis",
                        TypeDef::Text,
                        "Current diagnosis of the patient.",
                    ),
                ]),
                "Current health conditions of the patient.",
            ),
        ])
    }

    fn output_typedef() -> TypeDef {
        TypeDef::Object(vec![
            FieldDef::required(
                "riskScore",
                TypeDef::number(),
                "The calculated risk score for the patient.",
            ),
            FieldDef::required(
                "riskLevel",
                TypeDef::Text,
                "The level of risk associated with the calculated score (e.g., Low, Medium, High).",
            ),
            FieldDef::required(
                "rationale",
                TypeDef::Text,
                "The rationale behind the calculated risk score, explaining the contributing factors.",
            ),
        ])
    }

    fn render_prompt(input: &Self::Input) -> Result<Prompt, ValidationError> {
        Ok(Prompt::new().text(format!(
            "You are an AI assistant that calculates a patient's risk score based on their \
             demographics, historical data, and current health conditions.\n\n\
             Calculate the risk score based on the following information:\n\n\
             Demographics: {}\n\
             Historical Data: {}\n\
             Current Health Conditions: {}\n\n\
             Provide a riskScore (numerical value), riskLevel (Low, Medium, or High), and a \
             rationale explaining the contributing factors to the risk score.\n",
            pretty(&input.demographics),
            pretty(&input.historical_data),
            pretty(&input.current_health_conditions),
        )))
    }
}

// Nested sections are interpolated as pretty JSON.
fn pretty<T: Serialize>(section: &T) -> String {
    serde_json::to_string_pretty(section).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::validate;
    use serde_json::json;

    fn scenario() -> serde_json::Value {
        json!({
            "demographics": { "age": 58, "gender": "Male", "location": "NY" },
            "historicalData": { "previousConditions": ["Hypertension"], "hospitalAdmissions": 2 },
            "currentHealthConditions": { "symptoms": ["Chest pain"], "diagnosis": "Acute Coronary Syndrome" }
        })
    }

    #[test]
    fn scenario_input_is_valid() {
        assert!(validate(&RiskScore::input_typedef(), &scenario()).is_ok());
        let input: RiskScoreInput = serde_json::from_value(scenario()).unwrap();
        assert_eq!(input.historical_data.previous_conditions, vec!["Hypertension"]);
    }

    #[test]
    fn nested_missing_field_is_reported_with_path() {
        let mut value = scenario();
        value["historicalData"]
            .as_object_mut()
            .unwrap()
            .remove("hospitalAdmissions");
        let errors = validate(&RiskScore::input_typedef(), &value).unwrap_err();
        assert_eq!(errors[0].path(), "$.historicalData.hospitalAdmissions");
    }

    #[test]
    fn sections_are_rendered_as_json() {
        let input: RiskScoreInput = serde_json::from_value(scenario()).unwrap();
        let text = RiskScore::render_prompt(&input).unwrap().render_text();
        assert!(text.contains("\"location\": \"NY\""));
        assert!(text.contains("\"previousConditions\": [\n    \"Hypertension\"\n  ]"));
    }
}
