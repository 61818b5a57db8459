//! Voice configuration: the store boundary and the selection state a
//! synthesizer reads on every request.
//!
//! Store state is observed through `watch` subscriptions. Reads never
//! block: [`VoiceSelector`] keeps the last value it has seen and folds in
//! newer store values on access.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::VoiceError;

/// Languages the synthesis service can voice.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "af", "am", "ar", "az", "bg", "bn", "bs", "ca", "cs", "cy", "da", "de", "el", "en", "es", "et",
    "eu", "fa", "fi", "fil", "fr", "ga", "gl", "gu", "he", "hi", "hr", "hu", "hy", "id", "is", "it",
    "ja", "jv", "ka", "kk", "km", "kn", "ko", "lo", "lt", "lv", "mk", "ml", "mn", "mr", "ms", "mt",
    "my", "nb", "ne", "nl", "pl", "ps", "pt", "ro", "ru", "si", "sk", "sl", "so", "sq", "sr", "su",
    "sv", "sw", "ta", "te", "th", "tr", "uk", "ur", "uz", "vi", "zh", "zu",
];

/// Locales advertised when no voice has been configured yet.
pub const DEFAULT_LOCALES: &[&str] = &[
    "en-US", "en-GB", "en-AU", "en-IN", "de-DE", "de-AT", "de-CH", "es-ES", "es-MX", "es-AR",
    "fr-FR", "fr-CA", "fr-BE", "it-IT", "pt-BR", "pt-PT", "zh-CN", "zh-TW", "zh-HK", "ja-JP",
    "ko-KR", "ru-RU", "ar-SA", "ar-EG", "hi-IN", "nl-NL", "nl-BE", "pl-PL", "tr-TR", "vi-VN",
    "th-TH", "id-ID", "sv-SE", "da-DK", "fi-FI", "nb-NO", "cs-CZ", "el-GR", "he-IL", "hu-HU",
    "ro-RO", "sk-SK", "uk-UA", "bg-BG", "hr-HR", "ms-MY", "ta-IN", "te-IN", "bn-IN", "gu-IN",
    "kn-IN", "ml-IN", "mr-IN", "af-ZA", "ca-ES", "fil-PH", "sw-KE",
];

/// The voice a request is synthesized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveVoice {
    pub locale: String,
    pub name: String,
    pub suggested_codec: String,
}

/// A configured voice as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub locale: String,
    pub short_name: String,
    pub name: String,
    pub display_name: String,
    pub suggested_codec: String,
}

impl VoiceProfile {
    pub fn to_active(&self) -> ActiveVoice {
        ActiveVoice {
            locale: self.locale.clone(),
            name: self.name.clone(),
            suggested_codec: self.suggested_codec.clone(),
        }
    }
}

pub trait VoiceStore: Send + Sync {
    fn subscribe_active(&self) -> watch::Receiver<Option<ActiveVoice>>;

    fn subscribe_voices(&self) -> watch::Receiver<Vec<VoiceProfile>>;
}

/// In-process voice store.
#[derive(Debug)]
pub struct MemoryVoiceStore {
    active: watch::Sender<Option<ActiveVoice>>,
    voices: watch::Sender<Vec<VoiceProfile>>,
}

impl MemoryVoiceStore {
    pub fn new() -> Self {
        Self::with_voices(Vec::new())
    }

    pub fn with_voices(voices: Vec<VoiceProfile>) -> Self {
        Self {
            active: watch::channel(None).0,
            voices: watch::channel(voices).0,
        }
    }

    pub fn set_active(&self, voice: Option<ActiveVoice>) {
        self.active.send_replace(voice);
    }

    pub fn set_voices(&self, voices: Vec<VoiceProfile>) {
        self.voices.send_replace(voices);
    }
}

impl Default for MemoryVoiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceStore for MemoryVoiceStore {
    fn subscribe_active(&self) -> watch::Receiver<Option<ActiveVoice>> {
        self.active.subscribe()
    }

    fn subscribe_voices(&self) -> watch::Receiver<Vec<VoiceProfile>> {
        self.voices.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageAvailability {
    NotSupported,
    Available,
    CountryAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
    pub variant: Option<String>,
}

impl Locale {
    /// Split a `lang[-COUNTRY[-variant...]]` tag.
    pub fn parse(tag: &str) -> Self {
        let mut parts = tag.splitn(3, '-');
        let language = parts.next().unwrap_or_default().to_string();
        let country = parts.next().map(str::to_string);
        let variant = parts.next().map(str::to_string);
        Self {
            language,
            country,
            variant,
        }
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::parse("en-US")
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.language)?;
        if let Some(country) = &self.country {
            write!(f, "-{country}")?;
        }
        if let Some(variant) = &self.variant {
            write!(f, "-{variant}")?;
        }
        Ok(())
    }
}

pub fn is_supported_language(lang: &str) -> bool {
    let lang = lang.to_lowercase();
    SUPPORTED_LANGUAGES.contains(&lang.as_str())
}

fn target_locale(lang: &str, country: Option<&str>) -> String {
    match country {
        Some(country) if !country.is_empty() => format!("{lang}-{country}"),
        _ => lang.to_string(),
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

struct Selection {
    active: watch::Receiver<Option<ActiveVoice>>,
    current: Option<ActiveVoice>,
}

impl Selection {
    /// Fold a newer store value into the cached selection. Store updates
    /// to "no voice" leave the current selection in place.
    fn refresh(&mut self) {
        if !self.active.has_changed().unwrap_or(false) {
            return;
        }
        let latest = self.active.borrow_and_update().clone();
        if let Some(voice) = latest {
            info!("use speaker: {} - {}", voice.name, voice.locale);
            self.current = Some(voice);
        }
    }
}

/// Voice state shared by all requests of one synthesizer.
pub struct VoiceSelector {
    selection: Mutex<Selection>,
    voices: watch::Receiver<Vec<VoiceProfile>>,
}

impl VoiceSelector {
    pub fn new(store: &dyn VoiceStore) -> Self {
        let mut active = store.subscribe_active();
        let current = active.borrow_and_update().clone();
        if let Some(voice) = &current {
            info!("use speaker: {} - {}", voice.name, voice.locale);
        }
        Self {
            selection: Mutex::new(Selection { active, current }),
            voices: store.subscribe_voices(),
        }
    }

    /// The voice the next request will use.
    pub fn current(&self) -> Option<ActiveVoice> {
        let mut selection = self.selection.lock();
        selection.refresh();
        selection.current.clone()
    }

    pub fn is_prepared(&self) -> bool {
        self.current().is_some()
    }

    /// Point-in-time list of configured voices.
    pub fn voices(&self) -> Vec<VoiceProfile> {
        self.voices.borrow().clone()
    }

    fn select(&self, voice: ActiveVoice) {
        let mut selection = self.selection.lock();
        // Consume any pending store update first so it cannot override
        // this newer explicit choice.
        selection.refresh();
        selection.current = Some(voice);
    }

    pub fn language_availability(&self, lang: &str, country: Option<&str>) -> LanguageAvailability {
        if !is_supported_language(lang) {
            return LanguageAvailability::NotSupported;
        }
        let target = target_locale(lang, country);
        let voices = self.voices.borrow();
        if voices.iter().any(|v| v.locale.eq_ignore_ascii_case(&target)) {
            LanguageAvailability::CountryAvailable
        } else {
            // Any supported language can be voiced, matched or not.
            LanguageAvailability::Available
        }
    }

    /// Select the best configured voice for a language: exact locale, then
    /// language prefix, then the first configured voice.
    pub fn load_language(&self, lang: &str, country: Option<&str>) -> LanguageAvailability {
        if !is_supported_language(lang) {
            return LanguageAvailability::NotSupported;
        }
        let target = target_locale(lang, country);
        let chosen = {
            let voices = self.voices.borrow();
            voices
                .iter()
                .find(|v| v.locale.eq_ignore_ascii_case(&target))
                .or_else(|| voices.iter().find(|v| starts_with_ignore_case(&v.locale, lang)))
                .or_else(|| voices.first())
                .map(VoiceProfile::to_active)
        };
        match chosen {
            Some(voice) => {
                debug!(locale = %voice.locale, "loaded voice for language {target}");
                self.select(voice);
            }
            None => warn!("no configured voice for language {target}"),
        }
        LanguageAvailability::Available
    }

    pub fn is_valid_voice_name(&self, short_name: &str) -> bool {
        self.voices.borrow().iter().any(|v| v.short_name == short_name)
    }

    pub fn default_voice_name(&self, lang: &str, country: Option<&str>) -> Option<String> {
        let target = target_locale(lang, country);
        let voices = self.voices.borrow();
        voices
            .iter()
            .find(|v| starts_with_ignore_case(&v.locale, &target))
            .or_else(|| voices.first())
            .map(|v| v.short_name.clone())
    }

    pub fn load_voice(&self, short_name: &str) -> Result<(), VoiceError> {
        let voice = self
            .voices
            .borrow()
            .iter()
            .find(|v| v.short_name == short_name)
            .map(VoiceProfile::to_active)
            .ok_or_else(|| VoiceError::UnknownVoice(short_name.to_string()))?;
        info!("loaded voice: {short_name}");
        self.select(voice);
        Ok(())
    }

    /// Locales to advertise: every configured voice's locale, or the
    /// default list when nothing is configured.
    pub fn available_locales(&self) -> Vec<String> {
        let voices = self.voices.borrow();
        if voices.is_empty() {
            DEFAULT_LOCALES.iter().map(|l| l.to_string()).collect()
        } else {
            voices.iter().map(|v| v.locale.clone()).collect()
        }
    }

    pub fn language(&self) -> Locale {
        self.current()
            .map(|voice| Locale::parse(&voice.locale))
            .unwrap_or_default()
    }
}
