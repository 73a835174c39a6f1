//! Reading name/version/build from a produced IPA.
//!
//! The pipeline depends only on [`ArtifactInspector`]. [`IpaInspector`] is the
//! stock implementation: it opens the IPA as a zip, finds
//! `Payload/<App>.app/Info.plist` and reads the bundle keys from it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use tracing::debug;

use crate::types::{ArtifactMetadata, BuildError, CollaboratorError};

/// Extracts [`ArtifactMetadata`] from an installable archive.
pub trait ArtifactInspector {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactMetadata, CollaboratorError>;
}

impl<F> ArtifactInspector for F
where
    F: Fn(&Path) -> Result<ArtifactMetadata, CollaboratorError>,
{
    fn inspect(&self, artifact: &Path) -> Result<ArtifactMetadata, CollaboratorError> {
        self(artifact)
    }
}

/// Reads `Info.plist` straight out of the IPA. Both the XML and the binary
/// plist encodings are understood.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpaInspector;

impl IpaInspector {
    pub fn new() -> Self {
        Self
    }

    fn read(&self, artifact: &Path) -> Result<ArtifactMetadata, BuildError> {
        let (bundle, raw) = read_info_plist(artifact)?;
        debug!(
            "Read {} bytes of Info.plist for {}.app",
            raw.len(),
            bundle
        );
        let keys = plist_strings(&raw)?;
        metadata_from_keys(&keys, &bundle)
    }
}

impl ArtifactInspector for IpaInspector {
    fn inspect(&self, artifact: &Path) -> Result<ArtifactMetadata, CollaboratorError> {
        self.read(artifact).map_err(Into::into)
    }
}

/// Returns the `.app` directory stem and the raw bytes of its `Info.plist`.
fn read_info_plist(artifact: &Path) -> Result<(String, Vec<u8>), BuildError> {
    let file = File::open(artifact)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        BuildError::Inspect(format!("{} is not a zip archive: {}", artifact.display(), e))
    })?;

    let entry_name = archive
        .file_names()
        .find(|name| is_app_info_plist(name))
        .map(str::to_owned)
        .ok_or_else(|| {
            BuildError::Inspect(format!(
                "no Payload/<App>.app/Info.plist in {}",
                artifact.display()
            ))
        })?;

    let bundle = entry_name
        .trim_start_matches("Payload/")
        .split('/')
        .next()
        .unwrap_or_default()
        .trim_end_matches(".app")
        .to_string();

    let mut entry = archive
        .by_name(&entry_name)
        .map_err(|e| BuildError::Inspect(format!("failed to read {}: {}", entry_name, e)))?;
    let mut raw = Vec::new();
    entry.read_to_end(&mut raw)?;
    Ok((bundle, raw))
}

fn is_app_info_plist(name: &str) -> bool {
    let parts: Vec<&str> = name.split('/').collect();
    matches!(parts.as_slice(), ["Payload", app, "Info.plist"] if app.ends_with(".app"))
}

/// Collects the top-level string and integer values of a plist dictionary.
///
/// Accepts XML (with or without a DOCTYPE) and binary plists.
pub fn plist_strings(raw: &[u8]) -> Result<HashMap<String, String>, BuildError> {
    let value = plist::Value::from_reader(Cursor::new(raw))
        .map_err(|e| BuildError::Inspect(format!("malformed Info.plist: {}", e)))?;
    let dict = value
        .as_dictionary()
        .ok_or_else(|| BuildError::Inspect("Info.plist has no top-level dict".to_string()))?;

    let mut keys = HashMap::new();
    for (key, value) in dict {
        let text = match value {
            plist::Value::String(s) => s.clone(),
            plist::Value::Integer(i) => i.to_string(),
            _ => continue,
        };
        keys.insert(key.clone(), text);
    }
    Ok(keys)
}

fn metadata_from_keys(
    keys: &HashMap<String, String>,
    bundle: &str,
) -> Result<ArtifactMetadata, BuildError> {
    let lookup = |key: &str| keys.get(key).filter(|v| !v.is_empty()).cloned();

    let name = lookup("CFBundleName")
        .or_else(|| lookup("CFBundleDisplayName"))
        .unwrap_or_else(|| bundle.to_string());
    let version = lookup("CFBundleShortVersionString").ok_or_else(|| {
        BuildError::Inspect("Info.plist has no CFBundleShortVersionString".to_string())
    })?;
    let build = lookup("CFBundleVersion")
        .ok_or_else(|| BuildError::Inspect("Info.plist has no CFBundleVersion".to_string()))?;

    Ok(ArtifactMetadata {
        name,
        version,
        build,
    })
}
