//! Extraction profiles and service settings.
//!
//! Profiles are loaded from JSON files in the `configs/` directory. The
//! built-in `default` profile is always present, so the tool works without
//! any config files. Service settings (model backend, model name, bind
//! address) come from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::normalize::NumericFields;
use crate::vision::{ollama, VisionProviderKind};

pub const DEFAULT_PROFILE: &str = "default";
const DEFAULT_OLLAMA_MODEL: &str = "llava";
const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.0-flash-001";

/// Placeholder replaced with extracted PDF text in `Prompts::text`.
pub const TEXT_PLACEHOLDER: &str = "{text}";

/// Configuration for one kind of document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompts: Prompts,
    /// Field names whose values are coerced to numbers.
    #[serde(default)]
    pub numeric_fields: Vec<String>,
    #[serde(default)]
    pub output: OutputMode,
    /// Pages sent to the model when a PDF has no text layer.
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
}

fn default_max_pdf_pages() -> usize {
    1
}

impl ExtractionProfile {
    pub fn numeric_fields(&self) -> NumericFields {
        NumericFields::new(&self.numeric_fields)
    }

    /// Prompt for restructuring text pulled directly out of a PDF.
    pub fn text_prompt(&self, text: &str) -> String {
        if self.prompts.text.contains(TEXT_PLACEHOLDER) {
            self.prompts.text.replace(TEXT_PLACEHOLDER, text)
        } else {
            format!("{}\n\n{}", self.prompts.text, text)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    /// Prompt sent alongside image payloads.
    pub image: String,
    /// Prompt wrapping directly extracted PDF text.
    pub text: String,
}

/// Shape of the extraction result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Structured, coerced key/value mapping.
    #[default]
    Fields,
    /// Raw text as returned by the model or by PDF extraction.
    Text,
}

/// In-memory store for all loaded profiles.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: HashMap<String, ExtractionProfile>,
}

impl ProfileStore {
    /// Load all profiles from the specified directory.
    ///
    /// A missing directory is not an error: only the built-in profile is
    /// available then. Unreadable or malformed files are.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let mut profiles = Vec::new();

        if !dir.exists() {
            warn!("Profile directory {:?} does not exist, using built-in profile", dir);
            return Ok(Self::from_profiles(profiles));
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read profile: {:?}", path))?;

                let profile: ExtractionProfile = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse profile: {:?}", path))?;

                info!("Loaded profile: {} from {:?}", profile.name, path);
                profiles.push(profile);
            }
        }

        Ok(Self::from_profiles(profiles))
    }

    /// Build a store from explicit profiles. The built-in `default` is added
    /// unless one of them already uses that name.
    pub fn from_profiles(profiles: Vec<ExtractionProfile>) -> Self {
        let mut map: HashMap<String, ExtractionProfile> = profiles
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        map.entry(DEFAULT_PROFILE.to_string())
            .or_insert_with(create_default_profile);

        Self { profiles: map }
    }

    pub fn get(&self, name: &str) -> Option<&ExtractionProfile> {
        self.profiles.get(name)
    }

    pub fn default_profile(&self) -> &ExtractionProfile {
        self.profiles
            .get(DEFAULT_PROFILE)
            .expect("default profile must exist")
    }

    /// Resolve an optional profile name, `None` meaning the default.
    pub fn resolve(&self, name: Option<&str>) -> Option<&ExtractionProfile> {
        match name {
            Some(name) => self.get(name),
            None => Some(self.default_profile()),
        }
    }

    /// List all available profile names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub provider: VisionProviderKind,
    pub model: String,
    pub ollama_url: String,
    pub openrouter_api_key: Option<String>,
    pub timeout_secs: u64,
    pub config_dir: PathBuf,
    pub bind_addr: String,
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match lookup("VISION_PROVIDER") {
            Some(raw) => VisionProviderKind::parse(&raw)
                .with_context(|| format!("Unknown VISION_PROVIDER: {}", raw))?,
            None => VisionProviderKind::Ollama,
        };

        let model = lookup("VISION_MODEL").unwrap_or_else(|| {
            match provider {
                VisionProviderKind::Ollama => DEFAULT_OLLAMA_MODEL,
                VisionProviderKind::OpenRouter => DEFAULT_OPENROUTER_MODEL,
            }
            .to_string()
        });

        let timeout_secs = match lookup("VISION_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("Invalid VISION_TIMEOUT_SECS: {}", raw))?,
            None => 300,
        };

        Ok(Self {
            provider,
            model,
            ollama_url: lookup("OLLAMA_URL").unwrap_or_else(|| ollama::DEFAULT_URL.to_string()),
            openrouter_api_key: lookup("OPENROUTER_API_KEY"),
            timeout_secs,
            config_dir: lookup("FIELD_EXTRACTOR_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("configs")),
            bind_addr: lookup("FIELD_EXTRACTOR_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
        })
    }
}

/// Built-in profile tuned for payslips and bank documents.
pub fn create_default_profile() -> ExtractionProfile {
    ExtractionProfile {
        name: DEFAULT_PROFILE.to_string(),
        description: "Key-value extraction for payslips and bank documents".to_string(),
        prompts: Prompts {
            image: r#"Extract every labelled field visible in this document image.
Return ONLY a flat JSON object mapping each field label exactly as printed (e.g. "NAME", "ACCOUNT NO.") to its value as printed.
Do not add explanations. If JSON is not possible, output one "LABEL: value" pair per line."#
                .to_string(),
            text: r#"The following text was extracted from a document.
Return ONLY a flat JSON object mapping each field label exactly as printed to its value as printed.
If JSON is not possible, output one "LABEL: value" pair per line.

--- DOCUMENT START ---
{text}
--- DOCUMENT END ---"#
                .to_string(),
        },
        numeric_fields: [
            "BASIC PAY",
            "BASIC",
            "HRA",
            "HOUSE RENT ALLOWANCE",
            "CONVEYANCE ALLOWANCE",
            "SPECIAL ALLOWANCE",
            "MEDICAL ALLOWANCE",
            "GROSS PAY",
            "GROSS EARNINGS",
            "TOTAL EARNINGS",
            "PROVIDENT FUND",
            "PROFESSIONAL TAX",
            "INCOME TAX",
            "TOTAL DEDUCTIONS",
            "NET PAY",
            "NET SALARY",
            "PAID DAYS",
            "LOP DAYS",
            "WORKING DAYS",
            "AMOUNT",
            "BALANCE",
            "OPENING BALANCE",
            "CLOSING BALANCE",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        output: OutputMode::Fields,
        max_pdf_pages: default_max_pdf_pages(),
    }
}
