//! Form adapters: the looser shapes the browser forms submit, checked and
//! turned into flow requests.

use serde::Deserialize;
use thiserror::Error;

use crate::shapes::risk_score::{
    CurrentHealthConditions, Demographics, HistoricalData, RiskScoreInput,
};
use crate::shapes::symptom_analysis::{Gender, SymptomAnalysisInput};

pub const MIN_SYMPTOM_CHARS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymptomForm {
    pub symptoms: String,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub gender: Option<Gender>,
}

impl SymptomForm {
    pub fn into_input(self) -> Result<SymptomAnalysisInput, Vec<FieldError>> {
        if self.symptoms.chars().count() < MIN_SYMPTOM_CHARS {
            return Err(vec![FieldError::new(
                "symptoms",
                "Please describe your symptoms in more detail.",
            )]);
        }
        Ok(SymptomAnalysisInput {
            symptoms: self.symptoms,
            age: self.age,
            gender: self.gender,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskDemographicsForm {
    pub age: f64,
    pub gender: String,
    pub location: String,
}

/// Lists arrive as one comma-separated string each.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskHistoryForm {
    pub previous_conditions: String,
    pub hospital_admissions: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConditionsForm {
    pub symptoms: String,
    pub diagnosis: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskForm {
    pub demographics: RiskDemographicsForm,
    pub historical_data: RiskHistoryForm,
    pub current_health_conditions: RiskConditionsForm,
}

impl RiskForm {
    pub fn into_input(self) -> Result<RiskScoreInput, Vec<FieldError>> {
        let RiskForm {
            demographics,
            historical_data,
            current_health_conditions,
        } = self;
        let previous_conditions = split_list(&historical_data.previous_conditions);
        let symptoms = split_list(&current_health_conditions.symptoms);

        let mut errors = Vec::new();
        if !(demographics.age >= 0.0 && demographics.age.is_finite()) {
            errors.push(FieldError::new("demographics.age", "Age must be a positive number."));
        }
        if demographics.gender.trim().is_empty() {
            errors.push(FieldError::new("demographics.gender", "Gender is required."));
        }
        if demographics.location.trim().is_empty() {
            errors.push(FieldError::new("demographics.location", "Location is required."));
        }
        if previous_conditions.is_empty() {
            errors.push(FieldError::new(
                "historicalData.previousConditions",
                "Please list at least one condition, or 'None'.",
            ));
        }
        if !(historical_data.hospital_admissions >= 0.0
            && historical_data.hospital_admissions.is_finite())
        {
            errors.push(FieldError::new(
                "historicalData.hospitalAdmissions",
                "Admissions cannot be negative.",
            ));
        }
        if symptoms.is_empty() {
            errors.push(FieldError::new(
                "currentHealthConditions.symptoms",
                "Please list at least one symptom, or 'None'.",
            ));
        }
        if current_health_conditions.diagnosis.trim().is_empty() {
            errors.push(FieldError::new(
                "currentHealthConditions.diagnosis",
                "Diagnosis is required.",
            ));
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(RiskScoreInput {
            demographics: Demographics {
                age: demographics.age,
                gender: demographics.gender,
                location: demographics.location,
            },
            historical_data: HistoricalData {
                previous_conditions,
                hospital_admissions: historical_data.hospital_admissions,
            },
            current_health_conditions: CurrentHealthConditions {
                symptoms,
                diagnosis: current_health_conditions.diagnosis,
            },
        })
    }
}

/// `"Hypertension, Diabetes,"` becomes `["Hypertension", "Diabetes"]`.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
