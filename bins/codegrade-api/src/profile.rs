// Run profile management
// Loads the per-language build/run recipes from run_profiles.json

use anyhow::{bail, Context, Result};
use codegrade_common::types::{student_file_id, FileRef, ResourceLimits};
use codegrade_common::{GradeError, GradeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// A file each student stages under `{student_id}{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentFile {
    pub suffix: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProfile {
    pub language_id: String,
    pub source_filename: String,
    #[serde(default)]
    pub student_files: Vec<StudentFile>,
    #[serde(default)]
    pub system_files: Vec<FileRef>,
    pub config_filename: String,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub debug: bool,
}

impl RunProfile {
    /// The C++ recipe used when no profile file is deployed.
    pub fn builtin_cpp() -> Self {
        Self {
            language_id: "cpp".to_string(),
            source_filename: "main.cpp".to_string(),
            student_files: vec![
                StudentFile {
                    suffix: "cpp".to_string(),
                    filename: "hcmcampaign.cpp".to_string(),
                },
                StudentFile {
                    suffix: "h".to_string(),
                    filename: "hcmcampaign.h".to_string(),
                },
            ],
            system_files: vec![FileRef::new("systemmainh", "main.h")],
            config_filename: "config.txt".to_string(),
            limits: ResourceLimits {
                max_execution_time: Some(5),
                max_memory_usage: Some(1_000_000),
                compile_args: vec!["-I .".to_string(), "-std=c++11".to_string()],
                link_args: vec!["hcmcampaign.cpp".to_string()],
                run_args: vec!["config.txt".to_string()],
            },
            debug: true,
        }
    }

    /// Staged files for one run, in the order the sandbox must see them:
    /// student files, system files, then the testcase config file.
    pub fn aux_files(&self, student_id: &str, config_file_id: Option<&str>) -> Vec<FileRef> {
        let student = self
            .student_files
            .iter()
            .map(|f| FileRef::new(student_file_id(student_id, &f.suffix), f.filename.clone()));
        let config = config_file_id
            .into_iter()
            .map(|id| FileRef::new(id, self.config_filename.clone()));

        student
            .chain(self.system_files.iter().cloned())
            .chain(config)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    default: Option<String>,
    profiles: Vec<RunProfile>,
}

/// Registry of configured run profiles.
/// This is the authoritative source for which languages can be graded.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: HashMap<String, RunProfile>,
    default_language: String,
}

impl ProfileRegistry {
    pub fn builtin() -> Self {
        let profile = RunProfile::builtin_cpp();
        let default_language = profile.language_id.clone();
        Self {
            profiles: HashMap::from([(default_language.clone(), profile)]),
            default_language,
        }
    }

    pub fn from_profiles(profiles: Vec<RunProfile>, default: Option<String>) -> Result<Self> {
        let Some(first) = profiles.first() else {
            bail!("No run profiles configured");
        };
        let default_language = default.unwrap_or_else(|| first.language_id.clone());

        let mut by_language = HashMap::new();
        for profile in profiles {
            if profile.language_id.trim().is_empty() {
                bail!("Run profile with empty language_id");
            }
            let language = profile.language_id.clone();
            if by_language.insert(language.clone(), profile).is_some() {
                bail!("Duplicate run profile for language '{}'", language);
            }
        }

        if !by_language.contains_key(&default_language) {
            bail!("Default language '{}' has no run profile", default_language);
        }

        Ok(Self {
            profiles: by_language,
            default_language,
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file: ProfilesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Self::from_profiles(file.profiles, file.default)
    }

    /// Load `path` if it exists, otherwise fall back to the built-in profile.
    pub fn load_or_builtin<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            warn!(path = %path.display(), "Run profile file not found, using built-in cpp profile");
            Ok(Self::builtin())
        }
    }

    pub fn get(&self, language_id: &str) -> Option<&RunProfile> {
        self.profiles.get(language_id)
    }

    pub fn default_profile(&self) -> &RunProfile {
        &self.profiles[&self.default_language]
    }

    /// Profile for an explicit language, or the default when none was given.
    pub fn resolve(&self, language_id: Option<&str>) -> GradeResult<&RunProfile> {
        match language_id.map(str::trim).filter(|l| !l.is_empty()) {
            None => Ok(self.default_profile()),
            Some(language) => self
                .get(language)
                .ok_or_else(|| GradeError::UnknownLanguage(language.to_string())),
        }
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.profiles.keys().cloned().collect();
        languages.sort();
        languages
    }
}
