//! Prompt templates and the Firefly prompt builder.

use serde::Serialize;
use serde_json::Value;

pub const PRESET_SYSTEM: &str = include_str!("../data/prompts/preset_system.txt");
pub const TRANSLATE_SYSTEM: &str = include_str!("../data/prompts/translate_system.txt");
pub const FIREFLY_SYSTEM: &str = include_str!("../data/prompts/firefly_system.txt");
pub const VISION_SYSTEM: &str = include_str!("../data/prompts/vision_system.txt");
pub const VISION_USER: &str = include_str!("../data/prompts/vision_user.txt");

/// Appended to every generated Firefly prompt.
pub const QUALITY_SUFFIX: &str = "ultra detailed, cinematic lighting, 8k resolution";

const PLACEHOLDERS: [&str; 4] = ["", "n/a", "na", "none"];

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.trim().to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}

/// System instruction for translating into `language`.
pub fn translate_system(language: &str) -> String {
    render(TRANSLATE_SYSTEM, &[("language", language)])
}

/// Structured scene description the Firefly prompt is assembled from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FireflyAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lighting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl FireflyAttributes {
    /// Reads attributes from a JSON object, tolerating the key spellings and
    /// value shapes models tend to produce (lists are joined with ", ").
    pub fn from_json(value: &Value) -> Self {
        let field = |keys: &[&str]| keys.iter().find_map(|key| value.get(*key).and_then(as_phrase));

        Self {
            subject: field(&["subject", "main_subject"]),
            place: field(&["place", "location", "setting"]),
            time: field(&["time", "time_weather", "weather"]),
            style: field(&["style", "art_style"]),
            color: field(&["color", "colors", "palette"]),
            composition: field(&["composition"]),
            camera: field(&["camera", "camera_angle"]),
            lighting: field(&["lighting", "light"]),
            details: field(&["details", "extra_details"]),
        }
    }

    /// Default used when no JSON object could be recovered: the whole text
    /// becomes the subject.
    pub fn from_text(text: &str) -> Self {
        let subject = text.split_whitespace().collect::<Vec<_>>().join(" ");
        Self {
            subject: (!subject.is_empty()).then_some(subject),
            ..Self::default()
        }
    }

    fn ordered(&self) -> [(&'static str, Option<&str>); 9] {
        [
            ("subject", self.subject.as_deref()),
            ("place", self.place.as_deref()),
            ("time", self.time.as_deref()),
            ("style", self.style.as_deref()),
            ("color", self.color.as_deref()),
            ("composition", self.composition.as_deref()),
            ("camera", self.camera.as_deref()),
            ("lighting", self.lighting.as_deref()),
            ("details", self.details.as_deref()),
        ]
    }
}

fn as_phrase(value: &Value) -> Option<String> {
    let phrase = match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(as_phrase)
                .filter(|s| !is_placeholder(s))
                .collect::<Vec<_>>()
                .join(", ");
            Some(joined)
        }
        _ => None,
    };
    phrase.filter(|s| !is_placeholder(s))
}

fn is_placeholder(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    PLACEHOLDERS.contains(&value.as_str())
}

/// Builds the single-line Firefly prompt.
///
/// Placeholder values are dropped, `place` is prefixed with "in ", parts are
/// joined with ", " and [`QUALITY_SUFFIX`] closes the prompt.
pub fn firefly_prompt(attributes: &FireflyAttributes) -> String {
    let mut parts: Vec<String> = Vec::new();

    for (key, value) in attributes.ordered() {
        let Some(value) = value.map(str::trim).filter(|v| !is_placeholder(v)) else {
            continue;
        };
        if key == "place" && !value.to_ascii_lowercase().starts_with("in ") {
            parts.push(format!("in {}", value));
        } else {
            parts.push(value.to_string());
        }
    }
    parts.push(QUALITY_SUFFIX.to_string());

    // Re-split so empty segments inside values ("a, , b") leave no stray commas.
    parts
        .join(", ")
        .split(',')
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
