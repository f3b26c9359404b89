use crate::config::OutputFormat;
use crate::core::association::{CropAssociation, FoundClasses};
use crate::core::dedup::UniqueCrops;
use crate::core::scanner::display_name;
use crate::error::{CropMatchError, Result};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeTuple, Serializer};
use std::fs;
use std::path::Path;

/// Report key of the bucket holding crops no image matched.
pub const NOT_FOUND_KEY: &str = "na";

impl Serialize for CropAssociation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.crop_name)?;
        match &self.bbox {
            Some(bbox) => tuple.serialize_element(&bbox.as_array())?,
            None => tuple.serialize_element(&[0u32; 0])?,
        }
        tuple.end()
    }
}

/// Final image → crops mapping, with the not-found bucket last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    entries: IndexMap<String, Vec<CropAssociation>>,
}

impl Report {
    /// Combine per-image results with every class that was never found.
    pub fn assemble(
        per_image: Vec<(String, Vec<CropAssociation>)>,
        crops: &UniqueCrops,
        found: &FoundClasses,
    ) -> Self {
        let mut entries: IndexMap<String, Vec<CropAssociation>> = IndexMap::new();
        for (image_name, associations) in per_image {
            if image_name == NOT_FOUND_KEY {
                log::warn!(
                    "Image named {:?} collides with the not-found key; its entry is dropped",
                    image_name
                );
                continue;
            }
            entries.insert(image_name, associations);
        }

        let not_found: Vec<CropAssociation> = crops
            .iter()
            .filter(|(hash, _)| !found.contains(hash))
            .flat_map(|(_, members)| members.iter())
            .map(|path| CropAssociation::not_found(display_name(path)))
            .collect();
        entries.insert(NOT_FOUND_KEY.to_string(), not_found);

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&[CropAssociation]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn not_found(&self) -> &[CropAssociation] {
        self.get(NOT_FOUND_KEY).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[CropAssociation])> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_slice()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    /// The original tool's text layout: single-quoted keys and Python
    /// list/tuple literals, one key per line, trailing comma included.
    pub fn to_legacy(&self) -> String {
        let mut out = String::from("{");
        for (key, associations) in &self.entries {
            out.push('\'');
            out.push_str(key);
            out.push_str("':[");
            for (i, association) in associations.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                out.push_str(&python_repr(&association.crop_name));
                out.push_str(", [");
                if let Some(bbox) = &association.bbox {
                    let coords: Vec<String> =
                        bbox.as_array().iter().map(u32::to_string).collect();
                    out.push_str(&coords.join(", "));
                }
                out.push_str("])");
            }
            out.push_str("],\n");
        }
        out.push('}');
        out
    }

    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Legacy => Ok(self.to_legacy()),
        }
    }

    pub fn write(&self, path: &Path, format: OutputFormat) -> Result<()> {
        let contents = self.render(format)?;
        fs::write(path, contents).map_err(|e| CropMatchError::io(path, e))
    }
}

/// Python `repr` of a str: single quotes unless the text contains a single
/// quote and no double quote.
fn python_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}
