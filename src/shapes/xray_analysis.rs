use serde::{Deserialize, Serialize};

use crate::shape::{Prompt, Shape};
use crate::types::{FieldDef, TypeDef, ValidationError};

pub const ID: &str = "xray-analysis";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayAnalysisInput {
    /// The X-ray image as a data URL.
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub condition: String,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayAnalysisOutput {
    pub analysis: Vec<Finding>,
    pub summary: String,
}

pub struct XrayAnalysis;

impl Shape for XrayAnalysis {
    const ID: &'static str = ID;
    const DESCRIPTION: &'static str =
        "Identify potential conditions in an X-ray image with probabilities.";

    type Input = XrayAnalysisInput;
    type Output = XrayAnalysisOutput;

    fn input_typedef() -> TypeDef {
        TypeDef::Object(vec![FieldDef::required(
            "image",
            TypeDef::DataUri,
            "The X-ray image to be analyzed, as a data URL.",
        )])
    }

    fn output_typedef() -> TypeDef {
        TypeDef::Object(vec![
            FieldDef::required(
                "analysis",
                TypeDef::list(TypeDef::Object(vec![
                    FieldDef::required(
                        "condition",
                        TypeDef::Text,
                        "The potential condition identified in the X-ray.",
                    ),
                    FieldDef::required(
                        "probability",
                        TypeDef::number_in(0.0, 1.0),
                        "The probability of the condition being present.",
                    ),
                ])),
                "The analysis of the X-ray image.",
            ),
            FieldDef::required("summary", TypeDef::Text, "A summary of the findings."),
        ])
    }

    fn render_prompt(input: &Self::Input) -> Result<Prompt, ValidationError> {
        Ok(Prompt::new()
            .text(
                "You are a world-class radiologist. Analyze the provided X-ray image and identify \
                 potential medical conditions. Provide a list of possible conditions with their \
                 corresponding probabilities, and a summary of your findings.\n\nImage: ",
            )
            .media("$.image", &input.image)?
            .text("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::validate;
    use serde_json::json;

    #[test]
    fn probability_outside_unit_interval_is_invalid() {
        let out = json!({
            "analysis": [{ "condition": "Pneumonia", "probability": 82 }],
            "summary": "stub"
        });
        let errors = validate(&XrayAnalysis::output_typedef(), &out).unwrap_err();
        assert_eq!(errors[0].path(), "$.analysis[0].probability");
    }

    #[test]
    fn image_is_not_inlined_into_text() {
        let input = XrayAnalysisInput {
            image: "data:image/png;base64,AAA=".into(),
        };
        let prompt = XrayAnalysis::render_prompt(&input).unwrap();
        assert!(!prompt.render_text().contains("AAA="));
        assert_eq!(prompt.media_parts().next().unwrap().data(), "AAA=");
    }
}
