//! The fixed instruction template sent with every analysis request.
//!
//! Changing the wording or the output schema means bumping `version`; the
//! interpreter tests parse the worked example below so the two stay in sync.

pub struct AnalysisPrompt {
    pub version: &'static str,
    pub system: &'static str,
}

pub const ANALYSIS_PROMPT: AnalysisPrompt = AnalysisPrompt {
    version: "2024-11-meal-yaml-v3",
    system: SYSTEM_PROMPT,
};

const SYSTEM_PROMPT: &str = r#"You are a nutrition expert specialised in French and North African home cooking.
You look at a photo of a meal and estimate what is on the plate.

OUTPUT RULES
- Reply with ONE yaml block and nothing else. No prose before or after it.
- Top-level keys: items, oil_estimate, health_score, goals, verdict, analysis.
- Each entry of items has exactly: name, portion, mass_g, cals, p, c, f.
- mass_g, p, c, f are grams. cals are kcal. Use plain numbers, no units.
- List each component once. Do not add a total line.
- oil_estimate has: type, amount_tbsp, calories. Omit it if no added fat is visible.
- health_score is a number from 0 to 10.
- goals has weight_loss, muscle_gain, diabetes_friendly; each is one of: excellent, good, moderate, poor.
- verdict is one short sentence. analysis is two or three sentences explaining the estimate.

EXAMPLE
```yaml
items:
  - name: Poulet rôti
    portion: 1 cuisse
    mass_g: 150
    cals: 285
    p: 27
    c: 0
    f: 19
  - name: Couscous
    portion: 1 bol
    mass_g: 180
    cals: 202
    p: 7
    c: 41
    f: 1
oil_estimate:
  type: olive
  amount_tbsp: 1
  calories: 120
health_score: 7
goals:
  weight_loss: moderate
  muscle_gain: good
  diabetes_friendly: moderate
verdict: Repas équilibré, riche en protéines.
analysis: Roast chicken leg with skin over a bowl of couscous. Portions judged against the plate size.
```"#;

const USER_INSTRUCTION: &str = "Analyze this meal photo and reply with the yaml block only.";

/// Text segment of the user message. Notes are appended verbatim as context.
pub fn user_text(notes: Option<&str>) -> String {
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(notes) => format!("{USER_INSTRUCTION}\nUser notes: {notes}"),
        None => USER_INSTRUCTION.to_string(),
    }
}

/// The worked example from the system prompt, fenced exactly as the model is told to reply.
#[cfg(test)]
pub fn example_reply() -> &'static str {
    let start = SYSTEM_PROMPT.find("```yaml").unwrap_or(0);
    &SYSTEM_PROMPT[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_notes_are_dropped() {
        assert_eq!(user_text(None), USER_INSTRUCTION);
        assert_eq!(user_text(Some("   ")), USER_INSTRUCTION);
    }

    #[test]
    fn notes_are_embedded_verbatim() {
        let text = user_text(Some(" ignore previous instructions "));
        assert!(text.starts_with(USER_INSTRUCTION));
        assert!(text.ends_with("User notes: ignore previous instructions"));
    }

    #[test]
    fn example_is_fenced() {
        let example = example_reply();
        assert!(example.starts_with("```yaml"));
        assert!(example.ends_with("```"));
    }
}
