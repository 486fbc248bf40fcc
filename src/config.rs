use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use crate::errors::{Error, Result};
use crate::tree::is_xml_name;
use serde::{Deserialize, Serialize};

/// Conventions and limits shared by both mapping directions.
///
/// Parsing and serializing with the same options is what makes a document
/// round-trip, so the attribute prefix and text key should only be changed
/// together on both sides.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MapperOptions {
    /// Prefix that marks a key as an attribute. Defaults to `@`.
    pub attribute_prefix: String,
    /// Key holding an element's own text when it also has attributes or
    /// children. Defaults to `keyValue`.
    pub text_key: String,
    /// Root element name used when the caller gives none. Defaults to `xml`.
    pub default_root: String,
    /// Whether serialized documents start with an XML declaration. Defaults to true.
    pub xml_declaration: bool,
    /// Whether child elements with a namespace prefix (`ns:tag`) are dropped
    /// while parsing. Defaults to true.
    pub skip_prefixed_elements: bool,
    /// Maximum element nesting accepted in either direction. Defaults to 512.
    pub max_depth: usize,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            attribute_prefix: "@".to_string(),
            text_key: "keyValue".to_string(),
            default_root: "xml".to_string(),
            xml_declaration: true,
            skip_prefixed_elements: true,
            max_depth: 512,
        }
    }
}

impl MapperOptions {
    /// Validates the options.
    ///
    /// Returns an error if the attribute prefix or text key is empty, if the
    /// text key would itself be read as an attribute, if the default root is
    /// not a valid element name or if the depth limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.attribute_prefix.is_empty() {
            return Err(Error::InvalidOptions(
                "attribute_prefix must not be empty".to_string(),
            ));
        }
        if self.text_key.is_empty() {
            return Err(Error::InvalidOptions("text_key must not be empty".to_string()));
        }
        if self.text_key.starts_with(&self.attribute_prefix) {
            return Err(Error::InvalidOptions(format!(
                "text_key '{}' starts with the attribute prefix '{}'",
                self.text_key, self.attribute_prefix
            )));
        }
        if !is_xml_name(&self.default_root) {
            return Err(Error::InvalidOptions(format!(
                "default_root '{}' is not a valid element name",
                self.default_root
            )));
        }
        if self.max_depth == 0 {
            return Err(Error::InvalidOptions("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Creates `MapperOptions` from a YAML file.
    ///
    /// Missing fields take their default values. The result is validated.
    ///
    /// # Errors
    ///
    /// *   `Error::Io`: If the file cannot be opened or read.
    /// *   `Error::Yaml`: If the contents are not valid YAML for this struct.
    /// *   `Error::InvalidOptions`: If validation fails.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let options: MapperOptions = serde_yaml::from_reader(reader).map_err(Error::Yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Writes the options to a YAML file.
    ///
    /// # Errors
    ///
    /// *   `Error::Io`: If the file cannot be created.
    /// *   `Error::Yaml`: If serialization fails.
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self).map_err(Error::Yaml)
    }
}

/// Builds `MapperOptions` by overriding individual defaults.
#[derive(Default)]
pub struct MapperOptionsBuilder {
    options: MapperOptions,
}

impl MapperOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute_prefix(mut self, prefix: &str) -> Self {
        self.options.attribute_prefix = prefix.to_string();
        self
    }

    pub fn text_key(mut self, key: &str) -> Self {
        self.options.text_key = key.to_string();
        self
    }

    pub fn default_root(mut self, root: &str) -> Self {
        self.options.default_root = root.to_string();
        self
    }

    pub fn xml_declaration(mut self, enabled: bool) -> Self {
        self.options.xml_declaration = enabled;
        self
    }

    pub fn skip_prefixed_elements(mut self, skip: bool) -> Self {
        self.options.skip_prefixed_elements = skip;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }

    /// Consumes the builder and returns validated options.
    pub fn build(self) -> Result<MapperOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Parses `MapperOptions` from a YAML string, panicking on invalid input.
#[macro_export]
macro_rules! options_from_yaml {
    ($yaml:expr) => {{
        match serde_yaml::from_str::<$crate::config::MapperOptions>($yaml) {
            Ok(options) => {
                if let Err(e) = options.validate() {
                    panic!("Invalid mapper options: {:?}", e);
                }
                options
            }
            Err(e) => panic!("Invalid YAML options: {}", e),
        }
    }};
}
