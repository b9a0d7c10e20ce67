//! Prompt construction for the summary stage.
//!
//! One self-contained prompt: clinical context, the expected output schema
//! (with the specialty-relevance field substituted in), and a single fixed
//! few-shot example so the model anchors on shape rather than content.

use crate::pipeline::context::PromptContext;

/// Fixed few-shot example embedded in every summary prompt.
const FEW_SHOT_EXAMPLE: &str = r#"{
  "short_clinical_synopsis": "58-year-old male with 2 weeks of progressive exertional dyspnea and ankle swelling on a background of hypertension.",
  "chief_complaint": "shortness of breath on exertion",
  "history_of_present_illness": "Symptoms began approximately two weeks ago, worsening when climbing stairs. Reports sleeping on two pillows. No chest pain, no fever.",
  "symptoms": ["exertional dyspnea", "ankle swelling", "orthopnea"],
  "current_medications": ["Amlodipine 5mg daily"],
  "allergies": [],
  "relevant_history": ["hypertension diagnosed 2019"],
  "document_findings": [
    {"source": "bnp_result.pdf", "finding": "NT-proBNP 1850 pg/mL (reference < 300)"}
  ],
  "recommended_followups": ["echocardiogram", "renal function panel"],
  "urgency": "soon",
  "relevance_to_cardiology": "Presentation and NT-proBNP strongly suggest new heart failure; prioritize volume status assessment."
}"#;

/// Render the full prompt for one appointment.
pub fn build_summary_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str(
        "You are preparing a pre-visit clinical summary for the treating clinician. \
         Work strictly from the intake information below. Do not invent findings; \
         when information is absent, leave the field empty. Respond with a single \
         JSON object and nothing else.\n\n",
    );

    prompt.push_str("## Patient\n");
    prompt.push_str(&format!("Name: {}\n", ctx.patient_name));
    if let Some(age) = ctx.age_years {
        prompt.push_str(&format!("Age: {age}\n"));
    }
    if let Some(sex) = &ctx.sex {
        prompt.push_str(&format!("Sex: {sex}\n"));
    }
    if let Some(smoking) = &ctx.smoking_status {
        prompt.push_str(&format!("Smoking: {smoking}\n"));
    }
    if let Some(alcohol) = &ctx.alcohol_use {
        prompt.push_str(&format!("Alcohol: {alcohol}\n"));
    }
    if let Some(occupation) = &ctx.occupation {
        prompt.push_str(&format!("Occupation: {occupation}\n"));
    }
    if let Some(allergies) = &ctx.allergies {
        prompt.push_str(&format!("Known allergies: {allergies}\n"));
    }

    if let Some(reason) = &ctx.consultation_reason {
        prompt.push_str(&format!("\n## Consultation reason\n{reason}\n"));
    }
    if let Some(specialty) = &ctx.clinician_specialty {
        prompt.push_str(&format!("Treating clinician's specialty: {specialty}\n"));
    }

    if let Some(form) = &ctx.intake_form {
        prompt.push_str("\n## Intake form (patient-submitted)\n");
        prompt.push_str(&serde_json::to_string_pretty(form).unwrap_or_default());
        prompt.push('\n');
    }

    if !ctx.documents.is_empty() {
        prompt.push_str("\n## Uploaded documents (extracted text)\n");
        for (name, text) in &ctx.documents {
            prompt.push_str(&format!("\n### {name}\n{text}\n"));
        }
    }

    if let Some(prior) = &ctx.prior_summary {
        prompt.push_str("\n## Previous summary for this consultation (re-run)\n");
        prompt.push_str(&serde_json::to_string_pretty(prior).unwrap_or_default());
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "\n## Output schema\n\
         Return exactly this JSON structure. \"{field}\" must relate the case \
         to the treating clinician's specialty. \"urgency\" must be one of \
         \"routine\", \"soon\", or \"urgent\".\n\n\
         {{\n\
         \x20 \"short_clinical_synopsis\": \"one or two sentences\",\n\
         \x20 \"chief_complaint\": \"the presenting problem in the patient's words\",\n\
         \x20 \"history_of_present_illness\": \"narrative of onset and course\",\n\
         \x20 \"symptoms\": [\"...\"],\n\
         \x20 \"current_medications\": [\"...\"],\n\
         \x20 \"allergies\": [\"...\"],\n\
         \x20 \"relevant_history\": [\"...\"],\n\
         \x20 \"document_findings\": [{{\"source\": \"file name\", \"finding\": \"...\"}}],\n\
         \x20 \"recommended_followups\": [\"...\"],\n\
         \x20 \"urgency\": \"routine\",\n\
         \x20 \"{field}\": \"...\"\n\
         }}\n",
        field = ctx.specialty_field
    ));

    prompt.push_str("\n## Example of a completed summary (different patient)\n");
    prompt.push_str(FEW_SHOT_EXAMPLE);
    prompt.push('\n');

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> PromptContext {
        PromptContext {
            appointment_id: "apt-1".into(),
            consultation_id: "cons-1".into(),
            patient_id: "pat-1".into(),
            patient_name: "Marie Dubois".into(),
            age_years: Some(64),
            sex: Some("female".into()),
            smoking_status: Some("former smoker".into()),
            alcohol_use: None,
            occupation: Some("teacher".into()),
            allergies: Some("penicillin".into()),
            consultation_reason: Some("chest pain on exertion".into()),
            clinician_specialty: Some("Cardiology".into()),
            specialty_field: "relevance_to_cardiology".into(),
            intake_form: Some(serde_json::json!({"symptom_duration": "3 weeks"})),
            prior_summary: None,
            documents: vec![("labs.pdf".into(), "HbA1c 7.2%".into())],
        }
    }

    #[test]
    fn prompt_carries_all_context_sections() {
        let prompt = build_summary_prompt(&context());
        assert!(prompt.contains("Marie Dubois"));
        assert!(prompt.contains("Age: 64"));
        assert!(prompt.contains("penicillin"));
        assert!(prompt.contains("chest pain on exertion"));
        assert!(prompt.contains("### labs.pdf"));
        assert!(prompt.contains("HbA1c 7.2%"));
        assert!(prompt.contains("symptom_duration"));
    }

    #[test]
    fn prompt_embeds_dynamic_specialty_field() {
        let prompt = build_summary_prompt(&context());
        assert!(prompt.contains("\"relevance_to_cardiology\""));
    }

    #[test]
    fn prompt_embeds_schema_and_few_shot() {
        let prompt = build_summary_prompt(&context());
        assert!(prompt.contains("## Output schema"));
        assert!(prompt.contains("\"urgency\""));
        assert!(prompt.contains("NT-proBNP 1850"), "few-shot example present");
        // The example itself must be valid JSON.
        let parsed: serde_json::Value = serde_json::from_str(FEW_SHOT_EXAMPLE).unwrap();
        assert_eq!(parsed["urgency"], "soon");
    }

    #[test]
    fn absent_sections_are_omitted() {
        let mut ctx = context();
        ctx.intake_form = None;
        ctx.documents.clear();
        ctx.prior_summary = None;
        let prompt = build_summary_prompt(&ctx);
        assert!(!prompt.contains("## Intake form"));
        assert!(!prompt.contains("## Uploaded documents"));
        assert!(!prompt.contains("## Previous summary"));
    }

    #[test]
    fn rerun_includes_prior_summary() {
        let mut ctx = context();
        ctx.prior_summary = Some(serde_json::json!({"chief_complaint": "old complaint"}));
        let prompt = build_summary_prompt(&ctx);
        assert!(prompt.contains("## Previous summary"));
        assert!(prompt.contains("old complaint"));
    }
}
