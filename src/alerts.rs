//! Emergency keyword watch over the conversation text.
//!
//! When the model's text mentions that the person feels unwell (pain,
//! dizziness, shortness of breath, a call for help), an alert is raised in the
//! store so the dashboard shows it even if the model never calls `alertFamily`.

use crate::defaults;
use crate::error::Result;
use crate::store::{Alert, CareStore};

/// Keywords matched against lower-cased, accent-folded text.
const EMERGENCY_KEYWORDS: &[&str] = &[
    "dor",
    "mal estar",
    "passando mal",
    "passa mal",
    "tontura",
    "tonto",
    "tonta",
    "zonzo",
    "zonza",
    "peito",
    "coracao",
    "falta de ar",
    "respirar",
    "cabeca",
    "ajuda",
    "socorro",
    "fraco",
    "fraca",
    "cansado",
    "cansada",
    "desmaio",
    "queda",
    "caiu",
];

/// Replace common Portuguese accented letters with their base letter.
fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            '-' => ' ',
            other => other,
        })
        .collect()
}

/// Returns the first emergency keyword found in `text`, matching whole words.
pub fn find_emergency_keyword(text: &str) -> Option<&'static str> {
    let folded = fold_accents(&text.to_lowercase());
    let words: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    EMERGENCY_KEYWORDS.iter().copied().find(|keyword| {
        let needle: Vec<&str> = keyword.split(' ').collect();
        words.windows(needle.len()).any(|window| window == needle.as_slice())
    })
}

/// Raises one alert per text that mentions an emergency.
pub struct EmergencyWatch {
    kind: String,
}

impl EmergencyWatch {
    pub fn new() -> Self {
        Self {
            kind: defaults::EMERGENCY_ALERT_KIND.to_string(),
        }
    }

    /// Scan `text`; push an alert into `store` on the first keyword hit.
    pub fn scan(&self, text: &str, store: &dyn CareStore) -> Result<Option<Alert>> {
        let Some(keyword) = find_emergency_keyword(text) else {
            return Ok(None);
        };
        tracing::warn!(keyword, "emergency keyword in conversation");
        let alert = store.push_alert(&self.kind, text.trim(), None)?;
        Ok(Some(alert))
    }
}

impl Default for EmergencyWatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn finds_keywords_with_accents_and_case() {
        assert_eq!(find_emergency_keyword("Estou com DOR no peito"), Some("dor"));
        assert_eq!(find_emergency_keyword("sinto uma tontura"), Some("tontura"));
        assert_eq!(find_emergency_keyword("meu coração dispara"), Some("coracao"));
        assert_eq!(find_emergency_keyword("Socorro!"), Some("socorro"));
    }

    #[test]
    fn matches_multi_word_keywords() {
        assert_eq!(
            find_emergency_keyword("ela está com falta de ar"),
            Some("falta de ar")
        );
        assert_eq!(find_emergency_keyword("ele está passando mal"), Some("passando mal"));
    }

    #[test]
    fn ignores_substrings_of_other_words() {
        // "dor" inside "cuidador", "ajuda" inside "ajudante"
        assert_eq!(find_emergency_keyword("o cuidador chegou"), None);
        assert_eq!(find_emergency_keyword("a ajudante saiu"), None);
        assert_eq!(find_emergency_keyword("Bom dia, tudo bem?"), None);
    }

    #[test]
    fn scan_pushes_one_alert_per_text() {
        let store = MemoryStore::new();
        let watch = EmergencyWatch::new();

        let alert = watch
            .scan("Ela disse que sente dor e tontura", &store)
            .unwrap()
            .unwrap();
        assert_eq!(alert.kind, "PASSA_MAL");

        assert!(watch.scan("Tudo certo por aqui", &store).unwrap().is_none());
        assert_eq!(store.snapshot().unwrap().alerts.len(), 1);
    }
}
