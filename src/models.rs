use bytes::Bytes;
use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize};

/// Raw upload as read from the multipart body. Lives for one request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub size: usize,
    pub content_type: Option<String>,
}

/// Model-ready image: JPEG bytes plus their base64 and data URL forms.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub base64: String,
    pub data_url: String,
    pub size_kb: f64,
    pub passthrough: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MealItem {
    pub name: String,
    pub portion: String,
    pub mass_g: f64,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub fiber: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl Totals {
    pub fn from_items(items: &[MealItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            calories: acc.calories + item.calories,
            protein: acc.protein + item.protein,
            carbs: acc.carbs + item.carbs,
            fat: acc.fat + item.fat,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OilEstimate {
    #[serde(rename = "type", default)]
    pub oil_type: Option<String>,
    #[serde(default)]
    pub amount_tbsp: Option<f64>,
    #[serde(default)]
    pub calories: Option<f64>,
}

/// Qualitative suitability per goal, e.g. "good" / "moderate" / "poor". Not validated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Goals {
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub weight_loss: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub muscle_gain: Option<String>,
    #[serde(default, deserialize_with = "lenient_text", skip_serializing_if = "Option::is_none")]
    pub diabetes_friendly: Option<String>,
}

/// Reads any scalar as text. Null, lists and mappings read as absent.
pub fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
        Flag(bool),
        Other(IgnoredAny),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(s) => Some(s),
        Scalar::Int(n) => Some(n.to_string()),
        Scalar::Float(n) => Some(n.to_string()),
        Scalar::Flag(b) => Some(b.to_string()),
        Scalar::Other(_) => None,
    })
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisResult {
    pub meal_analysis: Vec<MealItem>,
    pub totals: Totals,
    pub reasoning_log: String,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oil_estimate: Option<OilEstimate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Goals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: &'static str,
    pub model_configured: bool,
    pub prompt_version: &'static str,
    pub time: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, calories: f64, protein: f64) -> MealItem {
        MealItem {
            name: name.to_string(),
            portion: String::new(),
            mass_g: 0.0,
            calories,
            protein,
            carbs: 1.0,
            fat: 0.5,
            fiber: 0.0,
        }
    }

    #[test]
    fn totals_sum_every_item() {
        let totals = Totals::from_items(&[item("Poulet", 200.0, 30.0), item("Riz", 300.0, 6.0)]);
        assert_eq!(totals, Totals { calories: 500.0, protein: 36.0, carbs: 2.0, fat: 1.0 });
    }

    #[test]
    fn empty_result_omits_optional_fields() {
        let result = AnalysisResult {
            meal_analysis: vec![],
            totals: Totals::default(),
            reasoning_log: "Identified 0 unique items.".into(),
            confidence_score: 0.85,
            oil_estimate: None,
            health_score: None,
            goals: None,
            verdict: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(json["totals"]["calories"], 0.0);
    }

    #[test]
    fn goals_accept_any_scalar_per_field() {
        let goals: Goals = serde_yaml::from_str("weight_loss: 3\nmuscle_gain: good\ndiabetes_friendly: [a, b]\n").unwrap();
        assert_eq!(goals.weight_loss.as_deref(), Some("3"));
        assert_eq!(goals.muscle_gain.as_deref(), Some("good"));
        assert_eq!(goals.diabetes_friendly, None);
    }

    #[test]
    fn oil_estimate_serializes_type_key() {
        let oil = OilEstimate { oil_type: Some("olive".into()), amount_tbsp: Some(1.5), calories: Some(180.0) };
        let json = serde_json::to_value(&oil).unwrap();
        assert_eq!(json["type"], "olive");
        assert_eq!(json["amount_tbsp"], 1.5);
    }
}
