//! The four feature flows' contracts.

pub mod clinical_transcription;
pub mod risk_score;
pub mod symptom_analysis;
pub mod xray_analysis;

pub use clinical_transcription::{
    ClinicalTranscription, ClinicalTranscriptionInput, ClinicalTranscriptionOutput,
};
pub use risk_score::{
    CurrentHealthConditions, Demographics, HistoricalData, RiskScore, RiskScoreInput,
    RiskScoreOutput,
};
pub use symptom_analysis::{Gender, SymptomAnalysis, SymptomAnalysisInput, SymptomAnalysisOutput};
pub use xray_analysis::{Finding, XrayAnalysis, XrayAnalysisInput, XrayAnalysisOutput};
