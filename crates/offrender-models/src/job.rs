//! Job configuration document.
//!
//! A job config is a small YAML document naming the cloud project, the
//! placement of the render node, its machine type, the service account key
//! and the render quality. Every field may be overridden from the
//! environment with an `OFFRENDER_JOB_<FIELD>` variable.
//!
//! The document is loaded loosely ([`JobDocument`]) and then validated once
//! into [`RenderJobConfig`]. Validation reports every missing field in one
//! error; nothing is defaulted field by field.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ConfigError, ConfigResult};
use crate::node::NodeName;
use crate::quality::Quality;

/// Environment prefix for job config overrides.
pub const ENV_PREFIX: &str = "OFFRENDER_JOB";

/// Template written by `offrender init`.
pub const CONFIG_TEMPLATE: &str = r#"# project is the Google Cloud project id.
# It can be created from the Google Cloud Console or with the gcloud command.
project:

# region is the Google Cloud region to launch the render node in.
region:

# zone must belong to the region above,
# e.g. region 'us-central1' and zone 'us-central1-a'.
zone:

# machine_type is the machine configuration used to render.
# See https://cloud.google.com/compute/all-pricing for types and costs.
# If renders are slow, pick a bigger (preferably highcpu) machine.
# Bigger machines may need a quota increase.
machine_type: e2-highcpu-16

# credentials_file is a service account key from https://console.cloud.google.com.
# It must be placed in the offrender working directory.
credentials_file:

# quality selects the render engine.
# high renders with CYCLES, low renders with EEVEE.
quality: low
"#;

/// Job config as read from disk, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct JobDocument {
    #[validate(required)]
    pub project: Option<String>,
    #[validate(required)]
    pub region: Option<String>,
    #[validate(required)]
    pub zone: Option<String>,
    #[validate(required)]
    pub machine_type: Option<String>,
    #[validate(required)]
    pub credentials_file: Option<String>,
    #[validate(required)]
    pub quality: Option<String>,
    /// Node recorded by `prep`; absent until then
    pub name: Option<String>,
}

impl JobDocument {
    /// Load a job config file with environment overrides applied.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Yaml).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Parse a job config from YAML text, without environment overrides.
    pub fn from_yaml_str(raw: &str) -> ConfigResult<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Yaml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Trim every value and treat blank values as absent.
    fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            project: clean(self.project),
            region: clean(self.region),
            zone: clean(self.zone),
            machine_type: clean(self.machine_type),
            credentials_file: clean(self.credentials_file),
            quality: clean(self.quality),
            name: clean(self.name),
        }
    }

    /// Validate the document into a typed config.
    pub fn into_config(self) -> ConfigResult<RenderJobConfig> {
        let doc = self.normalized();

        if let Err(errors) = doc.validate() {
            let mut missing: Vec<String> = errors
                .field_errors()
                .keys()
                .map(|field| field.to_string())
                .collect();
            missing.sort();
            return Err(ConfigError::MissingFields(missing));
        }

        let raw_quality = doc.quality.unwrap_or_default();
        let quality = raw_quality
            .parse::<Quality>()
            .map_err(|_| ConfigError::invalid_value("quality", raw_quality.clone()))?;

        let name = doc.name.as_deref().map(NodeName::parse).transpose()?;

        Ok(RenderJobConfig {
            project: doc.project.unwrap_or_default(),
            region: doc.region.unwrap_or_default(),
            zone: doc.zone.unwrap_or_default(),
            machine_type: doc.machine_type.unwrap_or_default(),
            credentials_file: PathBuf::from(doc.credentials_file.unwrap_or_default()),
            quality,
            name,
        })
    }
}

/// Validated job configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJobConfig {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub machine_type: String,
    /// Service account key, relative to the working directory
    pub credentials_file: PathBuf,
    pub quality: Quality,
    pub name: Option<NodeName>,
}

impl RenderJobConfig {
    /// Load and validate a job config file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        JobDocument::load(path)?.into_config()
    }

    /// Resolve the credentials file and check it exists.
    pub fn credentials_path(&self, root: &Path) -> ConfigResult<PathBuf> {
        let path = root.join(&self.credentials_file);
        if path.is_file() {
            Ok(path)
        } else {
            Err(ConfigError::MissingFile(path))
        }
    }

    /// Node recorded by a previous `prep`.
    pub fn prepared_node(&self) -> ConfigResult<&NodeName> {
        self.name.as_ref().ok_or(ConfigError::NotPrepared)
    }
}

/// Record a prepared node in an existing job config file.
///
/// The name is appended so comments and layout of the file survive.
pub fn append_node_name(path: impl AsRef<Path>, name: &NodeName) -> ConfigResult<()> {
    let path = path.as_ref();
    let mut raw = std::fs::read_to_string(path)?;

    if let Some(existing) = JobDocument::from_yaml_str(&raw)?.normalized().name {
        return Err(ConfigError::AlreadyPrepared(existing));
    }

    if !raw.ends_with('\n') {
        raw.push('\n');
    }
    raw.push_str(&format!("\nname: {}\n", name));
    std::fs::write(path, raw)?;
    Ok(())
}

/// Write a fresh config template into `dir` and return its path.
pub fn write_template(dir: impl AsRef<Path>, now: DateTime<Utc>) -> ConfigResult<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("s{}.yaml", now.format("%Y%m%dT%H%M%S")));
    std::fs::write(&path, CONFIG_TEMPLATE)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COMPLETE: &str = r#"
project: render-farm
region: us-central1
zone: us-central1-a
machine_type: e2-highcpu-16
credentials_file: key.json
quality: high
"#;

    #[test]
    fn test_complete_document_validates() {
        let config = JobDocument::from_yaml_str(COMPLETE)
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config.project, "render-farm");
        assert_eq!(config.zone, "us-central1-a");
        assert_eq!(config.quality, Quality::High);
        assert_eq!(config.credentials_file, PathBuf::from("key.json"));
        assert!(config.name.is_none());
    }

    #[test]
    fn test_template_reports_every_missing_field() {
        let err = JobDocument::from_yaml_str(CONFIG_TEMPLATE)
            .unwrap()
            .into_config()
            .unwrap_err();
        match err {
            ConfigError::MissingFields(fields) => {
                assert_eq!(fields, vec!["credentials_file", "project", "region", "zone"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let doc = JobDocument {
            project: Some("  ".into()),
            region: Some("us-central1".into()),
            zone: Some("us-central1-a".into()),
            machine_type: Some("e2-small".into()),
            credentials_file: Some("key.json".into()),
            quality: Some("low".into()),
            name: None,
        };
        let err = doc.into_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingFields(ref f) if f == &["project"]));
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let raw = COMPLETE.replace("quality: high", "quality: ultra");
        let err = JobDocument::from_yaml_str(&raw).unwrap().into_config().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "quality"));
    }

    #[test]
    fn test_append_node_name_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(&path, COMPLETE).unwrap();

        let name = NodeName::parse("offrender-abcd").unwrap();
        append_node_name(&path, &name).unwrap();

        let config = RenderJobConfig::load(&path).unwrap();
        assert_eq!(config.prepared_node().unwrap(), &name);

        let err = append_node_name(&path, &name).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyPrepared(_)));
    }

    #[test]
    fn test_prepared_node_required() {
        let config = JobDocument::from_yaml_str(COMPLETE)
            .unwrap()
            .into_config()
            .unwrap();
        assert!(matches!(config.prepared_node(), Err(ConfigError::NotPrepared)));
    }

    #[test]
    fn test_credentials_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let config = JobDocument::from_yaml_str(COMPLETE)
            .unwrap()
            .into_config()
            .unwrap();

        assert!(matches!(
            config.credentials_path(dir.path()),
            Err(ConfigError::MissingFile(_))
        ));

        std::fs::write(dir.path().join("key.json"), "{}").unwrap();
        assert_eq!(
            config.credentials_path(dir.path()).unwrap(),
            dir.path().join("key.json")
        );
    }

    #[test]
    fn test_write_template() {
        let dir = TempDir::new().unwrap();
        let now = DateTime::parse_from_rfc3339("2024-03-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let path = write_template(dir.path(), now).unwrap();
        assert_eq!(path.file_name().unwrap(), "s20240301T102030.yaml");
        assert_eq!(std::fs::read_to_string(path).unwrap(), CONFIG_TEMPLATE);
    }

    #[test]
    fn test_load_missing_file() {
        let err = JobDocument::load("/nonexistent/job.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile(_)));
    }
}
