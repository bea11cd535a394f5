//! The deployment values document of a configuration repository.
//!
//! Only the image tag is interpreted. Every other key is carried through
//! untouched, though the serializer may normalize formatting.
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name of the values document at the configuration repository root.
pub const FILE_NAME: &str = "values.yaml";

#[derive(Error, Debug)]
pub enum Error {
    #[error("values document has no image.tag or container.tag field")]
    MalformedValuesDocument,

    #[error("read {path}: {err}")]
    ReadFile {
        err: std::io::Error,
        path: String,
    },

    #[error("values document: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    #[serde(flatten)]
    pub rest: serde_yaml::Mapping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Values {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSection>,

    /// Older charts keep the tag under `container`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ImageSection>,

    #[serde(flatten)]
    pub rest: serde_yaml::Mapping,
}

impl Values {
    pub fn parse(yaml_string: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str::<Values>(yaml_string)?)
    }

    pub fn parse_file(path: &Path) -> Result<Self, Error> {
        Self::parse(&std::fs::read_to_string(path).map_err(|err| Error::ReadFile {
            err,
            path: path.display().to_string(),
        })?)
    }

    /// `image` wins over `container` when both carry a tag.
    fn section_mut(&mut self) -> Option<&mut ImageSection> {
        let image_has_tag = self.image.as_ref().is_some_and(|s| s.tag.is_some());
        if image_has_tag {
            return self.image.as_mut();
        }
        match self.container.as_mut() {
            Some(section) if section.tag.is_some() => Some(section),
            _ => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.image
            .as_ref()
            .and_then(|s| s.tag.as_deref())
            .or_else(|| self.container.as_ref().and_then(|s| s.tag.as_deref()))
    }

    /// Replace the image tag. Returns whether the value changed.
    pub fn set_tag(&mut self, tag: &str) -> Result<bool, Error> {
        let section = self.section_mut().ok_or(Error::MalformedValuesDocument)?;
        let previous = section.tag.replace(tag.to_string());
        debug!("Image tag {:?} -> {tag}", previous);
        Ok(previous.as_deref() != Some(tag))
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Read `path`, set its tag and write it back.
///
/// The document is rewritten even when the tag was already current, so that
/// a second application produces the same bytes as the first.
pub fn update_file(path: &Path, tag: &str) -> Result<bool, Error> {
    let mut values = Values::parse_file(path)?;
    let changed = values.set_tag(tag)?;
    std::fs::write(path, values.to_yaml()?).map_err(|err| Error::ReadFile {
        err,
        path: path.display().to_string(),
    })?;
    Ok(changed)
}
