//! 模型文件读写：JSON 与 RON。
use std::fs;
use std::path::Path;

use ron::ser::PrettyConfig;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::net::model::{Model, ModelDocument, ModelError};

#[derive(Debug, Error)]
pub enum IoError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ron error: {0}")]
    Ron(#[from] ron::Error),
    #[error("ron syntax error: {0}")]
    RonSpanned(#[from] ron::error::SpannedError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid model: {0}")]
    Model(#[from] ModelError),
    #[error("unsupported model format `{0}` (expected .json or .ron)")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Ron,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("ron") => Ok(Format::Ron),
            other => Err(IoError::UnsupportedFormat(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

pub fn to_json_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn from_json_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_str(s)?)
}

pub fn to_ron_string<T>(value: &T) -> Result<String, IoError>
where
    T: Serialize,
{
    let mut pretty = PrettyConfig::default();
    pretty.new_line = "\n".into();
    Ok(ron::ser::to_string_pretty(value, pretty)?)
}

pub fn from_ron_str<T>(s: &str) -> Result<T, IoError>
where
    T: DeserializeOwned,
{
    Ok(ron::from_str(s)?)
}

/// Parses a model document and validates it; structural errors surface as [`IoError::Model`].
pub fn parse_model(content: &str, format: Format) -> Result<Model, IoError> {
    let document: ModelDocument = match format {
        Format::Json => from_json_str(content)?,
        Format::Ron => from_ron_str(content)?,
    };
    Ok(Model::new(document)?)
}

pub fn read_model<P: AsRef<Path>>(path: P) -> Result<Model, IoError> {
    let path = path.as_ref();
    let format = Format::from_path(path)?;
    let content = fs::read_to_string(path)?;
    let model = parse_model(&content, format)?;
    log::debug!("loaded model `{}` from {}", model.name(), path.display());
    Ok(model)
}

pub fn write_model<P: AsRef<Path>>(path: P, model: &Model) -> Result<(), IoError> {
    let path = path.as_ref();
    let document = model.to_document();
    let content = match Format::from_path(path)? {
        Format::Json => to_json_string(&document)?,
        Format::Ron => to_ron_string(&document)?,
    };
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};

    fn sample() -> Model {
        ModelBuilder::new("cycle")
            .version("1")
            .place(Place::token("P1", 5))
            .place(Place::token("P2", 0))
            .transition(Transition::new("forward").with_rate(0.5))
            .flow("P1", "forward")
            .flow("forward", "P2")
            .invariant("conservation", "P1 + P2 == 5")
            .build()
            .unwrap()
    }

    #[test]
    fn ron_round_trip() {
        let model = sample();
        let text = to_ron_string(&model.to_document()).unwrap();
        let back = parse_model(&text, Format::Ron).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn json_structural_errors_are_reported() {
        let text = r#"{"name": "m", "places": [{"id": "a"}, {"id": "a"}]}"#;
        match parse_model(text, Format::Json) {
            Err(IoError::Model(ModelError::DuplicatePlace(id))) => assert_eq!(id, "a"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_path(Path::new("m.json")).unwrap(), Format::Json);
        assert_eq!(Format::from_path(Path::new("m.ron")).unwrap(), Format::Ron);
        assert!(Format::from_path(Path::new("m.yaml")).is_err());
    }

    #[test]
    fn file_round_trip() {
        let path = std::env::temp_dir().join(format!("tokennet-io-{}.json", std::process::id()));
        let model = sample();
        write_model(&path, &model).unwrap();
        let back = read_model(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(back, model);
    }
}
