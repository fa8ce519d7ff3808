//! **Voice resolution**: language code → synthesis voice, and voice → engine tier.
//!
//! The table is immutable once loaded. User overrides live in [`VariantChoices`], one per
//! session, and always win over automatic resolution. Engine capabilities are fetched once
//! from the synthesis backend and cached in an [`EngineCatalog`].

use crate::error::{VoiceError, VoiceResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Engine tiers in preference order.
pub const ENGINE_PRIORITY: [&str; 2] = ["neural", "standard"];

/// Tier used when a voice advertises no engines at all.
pub const FALLBACK_ENGINE: &str = "neural";

const BUILTIN_VOICES: &[(&str, &str)] = &[
    ("arb", "Zeina"),
    ("ar-AE", "Hala"),
    ("nl-BE", "Lisa"),
    ("ca-ES", "Arlet"),
    ("cs-CZ", "Jitka"),
    ("yue-CN", "Hiujin"),
    ("cmn-CN", "Zhiyu"),
    ("da-DK", "Naja"),
    ("nl-NL", "Laura"),
    ("en-AU", "Nicole"),
    ("en-GB", "Amy"),
    ("en-IN", "Aditi"),
    ("en-IE", "Niamh"),
    ("en-NZ", "Aria"),
    ("en-SG", "Jasmine"),
    ("en-ZA", "Ayanda"),
    ("en-US", "Danielle"),
    ("en-GB-WLS", "Geraint"),
    ("fi-FI", "Suvi"),
    ("fr-FR", "Celine"),
    ("fr-BE", "Isabelle"),
    ("fr-CA", "Chantal"),
    ("de-DE", "Marlene"),
    ("de-AT", "Hannah"),
    ("de-CH", "Sabrina"),
    ("hi-IN", "Kajal"),
    ("is-IS", "Dora"),
    ("it-IT", "Carla"),
    ("ja-JP", "Mizuki"),
    ("ko-KR", "Seoyeon"),
    ("nb-NO", "Liv"),
    ("pl-PL", "Ewa"),
    ("pt-BR", "Camila"),
    ("pt-PT", "Ines"),
    ("ro-RO", "Carmen"),
    ("ru-RU", "Tatyana"),
    ("es-ES", "Conchita"),
    ("es-MX", "Mia"),
    ("es-US", "Lupe"),
    ("sv-SE", "Astrid"),
    ("tr-TR", "Filiz"),
    ("cy-GB", "Gwyneth"),
];

const BUILTIN_GROUPS: &[(&str, &[&str])] = &[
    ("عربي", &["arb", "ar"]),
    ("Nederlands", &["nl"]),
    ("English", &["en"]),
    ("Català", &["ca"]),
    ("Čeština", &["cs"]),
    ("中文", &["yue", "cmn"]),
    ("Dansk", &["da"]),
    ("Suomi", &["fi"]),
    ("Français", &["fr"]),
    ("Deutsch", &["de"]),
    ("हिन्दी", &["hi"]),
    ("Íslenska", &["is"]),
    ("Italiano", &["it"]),
    ("日本語", &["ja"]),
    ("한국어", &["ko"]),
    ("Norsk", &["nb"]),
    ("Polski", &["pl"]),
    ("Português", &["pt"]),
    ("Română", &["ro"]),
    ("Русский", &["ru"]),
    ("Español", &["es"]),
    ("Svenska", &["sv"]),
    ("Türkçe", &["tr"]),
    ("Cymraeg", &["cy"]),
];

/// Primary subtag of a locale code, lowercased ("en" for "en-US", "yue" for "yue_CN").
pub fn base_language(code: &str) -> String {
    code.trim()
        .split(|c: char| c == '-' || c == '_')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// A named group of base languages offered by the language picker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LanguageGroup {
    pub name: String,
    pub bases: Vec<String>,
}

/// Locale → voice table plus picker groups.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceTable {
    /// Locale used when nothing else matches.
    pub default_locale: String,
    voices: BTreeMap<String, String>,
    #[serde(default)]
    groups: Vec<LanguageGroup>,
}

/// A concrete voice choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVoice {
    pub locale: String,
    pub voice_id: String,
}

/// Outcome of [`VoiceTable::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Voice(ResolvedVoice),
    /// Several locales share the base language and no override exists.
    Ambiguous { base: String, candidates: Vec<String> },
}

impl VoiceTable {
    /// The table shipped with the crate.
    pub fn builtin() -> Self {
        Self {
            default_locale: "en-US".to_string(),
            voices: BUILTIN_VOICES
                .iter()
                .map(|(locale, voice)| (locale.to_string(), voice.to_string()))
                .collect(),
            groups: BUILTIN_GROUPS
                .iter()
                .map(|(name, bases)| LanguageGroup {
                    name: name.to_string(),
                    bases: bases.iter().map(|b| b.to_string()).collect(),
                })
                .collect(),
        }
    }

    /// Parse a TOML table. Groups default to the built-in list when omitted.
    pub fn from_toml_str(raw: &str) -> VoiceResult<Self> {
        let mut table: VoiceTable =
            toml::from_str(raw).map_err(|e| VoiceError::VoiceTable(e.to_string()))?;
        if table.groups.is_empty() {
            table.groups = Self::builtin().groups;
        }
        table.validate()?;
        Ok(table)
    }

    /// Load a TOML table from disk.
    pub fn load(path: &Path) -> VoiceResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let table = Self::from_toml_str(&raw)?;
        info!(path = %path.display(), voices = table.voices.len(), "voice table loaded");
        Ok(table)
    }

    fn validate(&self) -> VoiceResult<()> {
        if self.voices.is_empty() {
            return Err(VoiceError::VoiceTable("voice table is empty".to_string()));
        }
        if !self.voices.contains_key(&self.default_locale) {
            return Err(VoiceError::VoiceTable(format!(
                "default locale '{}' has no voice",
                self.default_locale
            )));
        }
        Ok(())
    }

    pub fn groups(&self) -> &[LanguageGroup] {
        &self.groups
    }

    pub fn voice_for(&self, locale: &str) -> Option<&str> {
        self.voices.get(locale).map(String::as_str)
    }

    /// Locales sharing `base`, in sorted order.
    pub fn candidates(&self, base: &str) -> Vec<String> {
        let base = base.to_ascii_lowercase();
        self.voices
            .keys()
            .filter(|locale| base_language(locale) == base)
            .cloned()
            .collect()
    }

    /// Every distinct voice id in the table.
    pub fn voice_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.voices.values().cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn default_voice(&self) -> ResolvedVoice {
        // validate() guarantees the default locale exists; builtin() satisfies it too.
        let voice_id = self
            .voices
            .get(&self.default_locale)
            .cloned()
            .unwrap_or_default();
        ResolvedVoice {
            locale: self.default_locale.clone(),
            voice_id,
        }
    }

    fn resolved(&self, locale: &str) -> Option<ResolvedVoice> {
        self.voices.get(locale).map(|voice_id| ResolvedVoice {
            locale: locale.to_string(),
            voice_id: voice_id.clone(),
        })
    }

    /// Resolve a language code. Order: override, exact entry, single base match, ambiguity, default.
    pub fn resolve(&self, code: &str, choices: &VariantChoices) -> Resolution {
        let code = code.trim();
        let base = base_language(code);

        if let Some(voice) = choices.get(&base).and_then(|locale| self.resolved(locale)) {
            return Resolution::Voice(voice);
        }

        if let Some(voice) = self.resolved(code) {
            return Resolution::Voice(voice);
        }

        let candidates = self.candidates(&base);
        match candidates.len() {
            0 => {
                debug!(code, "no voice for language, using default");
                Resolution::Voice(self.default_voice())
            }
            1 => match self.resolved(&candidates[0]) {
                Some(voice) => Resolution::Voice(voice),
                None => Resolution::Voice(self.default_voice()),
            },
            _ => Resolution::Ambiguous { base, candidates },
        }
    }

    /// Resolve without asking anyone: ambiguity picks the first candidate in sorted order
    /// and records nothing.
    pub fn resolve_unattended(&self, code: &str, choices: &VariantChoices) -> ResolvedVoice {
        match self.resolve(code, choices) {
            Resolution::Voice(voice) => voice,
            Resolution::Ambiguous { candidates, .. } => candidates
                .first()
                .and_then(|locale| self.resolved(locale))
                .unwrap_or_else(|| self.default_voice()),
        }
    }
}

/// Confirmed base-language → locale overrides for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantChoices {
    by_base: HashMap<String, String>,
}

impl VariantChoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, base: &str) -> Option<&str> {
        self.by_base.get(&base.to_ascii_lowercase()).map(String::as_str)
    }

    /// Record a confirmed choice. Only call after explicit user confirmation.
    pub fn confirm(&mut self, locale: &str) {
        let base = base_language(locale);
        info!(target: "recap::voice", base = %base, locale, "voice variant confirmed");
        self.by_base.insert(base, locale.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

/// One entry of a voice listing, in the shape of Polly's `DescribeVoices`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceDescription {
    #[serde(rename = "Id", alias = "id")]
    pub id: String,
    #[serde(rename = "SupportedEngines", alias = "supported_engines", default)]
    pub supported_engines: Vec<String>,
}

/// Per-voice engine capabilities, fetched once at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineCatalog {
    engines: HashMap<String, Vec<String>>,
}

impl EngineCatalog {
    pub fn from_descriptions(descriptions: Vec<VoiceDescription>) -> Self {
        let engines = descriptions
            .into_iter()
            .map(|d| (d.id, d.supported_engines))
            .collect();
        Self { engines }
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Best advertised tier: neural, then standard, then any other (alphabetically).
    pub fn select_engine(&self, voice_id: &str) -> String {
        let advertised = match self.engines.get(voice_id) {
            Some(list) if !list.is_empty() => list,
            _ => return FALLBACK_ENGINE.to_string(),
        };
        for tier in ENGINE_PRIORITY {
            if advertised.iter().any(|e| e.eq_ignore_ascii_case(tier)) {
                return tier.to_string();
            }
        }
        let mut others = advertised.clone();
        others.sort();
        others
            .into_iter()
            .next()
            .unwrap_or_else(|| FALLBACK_ENGINE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(locale: &str, id: &str) -> Resolution {
        Resolution::Voice(ResolvedVoice {
            locale: locale.to_string(),
            voice_id: id.to_string(),
        })
    }

    #[test]
    fn base_language_handles_separators_and_case() {
        assert_eq!(base_language("en-US"), "en");
        assert_eq!(base_language("EN_gb"), "en");
        assert_eq!(base_language("yue-CN"), "yue");
        assert_eq!(base_language("fr"), "fr");
    }

    #[test]
    fn exact_match_wins_over_ambiguity() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        assert_eq!(table.resolve("en-GB", &choices), voice("en-GB", "Amy"));
    }

    #[test]
    fn single_base_match_resolves() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        assert_eq!(table.resolve("it", &choices), voice("it-IT", "Carla"));
        assert_eq!(table.resolve("ja", &choices), voice("ja-JP", "Mizuki"));
    }

    #[test]
    fn bare_base_with_many_variants_is_ambiguous() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        match table.resolve("fr", &choices) {
            Resolution::Ambiguous { base, candidates } => {
                assert_eq!(base, "fr");
                assert_eq!(candidates, vec!["fr-BE", "fr-CA", "fr-FR"]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn unknown_language_falls_back_to_default() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        assert_eq!(table.resolve("xx", &choices), voice("en-US", "Danielle"));
    }

    #[test]
    fn confirmed_override_wins_for_every_code_of_that_base() {
        let table = VoiceTable::builtin();
        let mut choices = VariantChoices::new();
        choices.confirm("en-IE");

        for code in ["en", "en-US", "EN-gb", "en_AU"] {
            assert_eq!(table.resolve(code, &choices), voice("en-IE", "Niamh"), "code {}", code);
        }
        assert_eq!(table.resolve("de", &choices), table.resolve("de", &VariantChoices::new()));
    }

    #[test]
    fn resolution_is_idempotent() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        for code in ["en", "es-MX", "pt", "zz", "cmn"] {
            assert_eq!(table.resolve(code, &choices), table.resolve(code, &choices));
            assert_eq!(
                table.resolve_unattended(code, &choices),
                table.resolve_unattended(code, &choices)
            );
        }
    }

    #[test]
    fn unattended_resolution_takes_first_sorted_candidate() {
        let table = VoiceTable::builtin();
        let choices = VariantChoices::new();
        let voice = table.resolve_unattended("es", &choices);
        assert_eq!(voice.locale, "es-ES");
        assert!(choices.is_empty());
    }

    #[test]
    fn engine_priority_prefers_neural_then_standard() {
        let catalog = EngineCatalog::from_descriptions(vec![
            VoiceDescription { id: "A".into(), supported_engines: vec!["standard".into(), "neural".into()] },
            VoiceDescription { id: "B".into(), supported_engines: vec!["long-form".into(), "standard".into()] },
            VoiceDescription { id: "C".into(), supported_engines: vec!["long-form".into(), "generative".into()] },
            VoiceDescription { id: "D".into(), supported_engines: vec![] },
        ]);
        assert_eq!(catalog.select_engine("A"), "neural");
        assert_eq!(catalog.select_engine("B"), "standard");
        assert_eq!(catalog.select_engine("C"), "generative");
        assert_eq!(catalog.select_engine("D"), "neural");
        assert_eq!(catalog.select_engine("unknown"), "neural");
    }

    #[test]
    fn toml_table_parses_and_validates() {
        let raw = r#"
            default_locale = "en-US"
            [voices]
            "en-US" = "Joanna"
            "en-GB" = "Brian"
        "#;
        let table = VoiceTable::from_toml_str(raw).unwrap();
        assert_eq!(table.voice_for("en-GB"), Some("Brian"));
        assert!(!table.groups().is_empty());

        let missing_default = r#"
            default_locale = "fr-FR"
            [voices]
            "en-US" = "Joanna"
        "#;
        assert!(VoiceTable::from_toml_str(missing_default).is_err());
    }

    #[test]
    fn descriptions_parse_polly_shape() {
        let raw = r#"[{"Id":"Danielle","SupportedEngines":["neural","long-form"]}]"#;
        let parsed: Vec<VoiceDescription> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0].id, "Danielle");
        assert_eq!(parsed[0].supported_engines.len(), 2);
    }
}
