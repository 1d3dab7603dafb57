//! Reading input documents and writing results.

use std::{fs, io::Write, path::Path};

use log::debug;
use serde::Serialize;

use diskplan_api::{
    config::ImageProfile,
    customizations::Customizations,
    disk::PartitionTable,
    error::{
        ConfigError, DiskPlanError, DiskPlanResultExt, InternalError, ReportError,
    },
};

use crate::cli::OutputFormat;

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Loads and checks an image profile.
pub fn load_profile(path: &Path) -> Result<ImageProfile, DiskPlanError> {
    debug!("Loading image profile from '{}'", path.display());
    let contents = fs::read_to_string(path)
        .structured(ConfigError::LoadProfile {
            path: path_string(path),
        })
        .message("Failed to read image profile")?;

    let profile: ImageProfile = serde_yaml::from_str(&contents)
        .structured(ConfigError::ParseProfile)
        .message(format!("Failed to parse image profile '{}'", path.display()))?;

    profile
        .validate()
        .map_err(DiskPlanError::from)
        .message(format!("Image profile '{}' is invalid", path.display()))?;

    Ok(profile)
}

/// Loads blueprint customizations. Files ending in `.json` are read as
/// JSON, anything else as YAML.
pub fn load_customizations(path: &Path) -> Result<Customizations, DiskPlanError> {
    debug!("Loading customizations from '{}'", path.display());
    let contents = fs::read_to_string(path)
        .structured(ConfigError::LoadCustomizations {
            path: path_string(path),
        })
        .message("Failed to read customizations")?;

    if is_json(path) {
        serde_json::from_str(&contents)
            .structured(ConfigError::ParseCustomizations)
            .message(format!("Failed to parse JSON customizations '{}'", path.display()))
    } else {
        serde_yaml::from_str(&contents)
            .structured(ConfigError::ParseCustomizations)
            .message(format!("Failed to parse YAML customizations '{}'", path.display()))
    }
}

/// Loads a partition table, as YAML or, for `.json` files, JSON.
pub fn load_partition_table(path: &Path) -> Result<PartitionTable, DiskPlanError> {
    debug!("Loading partition table from '{}'", path.display());
    let contents = fs::read_to_string(path)
        .structured(ConfigError::LoadPartitionTable {
            path: path_string(path),
        })
        .message("Failed to read partition table")?;

    if is_json(path) {
        serde_json::from_str(&contents)
            .structured(ConfigError::ParsePartitionTable)
            .message(format!("Failed to parse partition table '{}'", path.display()))
    } else {
        serde_yaml::from_str(&contents)
            .structured(ConfigError::ParsePartitionTable)
            .message(format!("Failed to parse partition table '{}'", path.display()))
    }
}

/// Serializes `value` in `format`.
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, DiskPlanError> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(value).structured(InternalError::SerializeOutput),
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .structured(InternalError::SerializeOutput),
    }
}

/// Writes `value` to `output`, or to stdout when no path is given.
pub fn write_output<T: Serialize>(
    value: &T,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<(), DiskPlanError> {
    let rendered = render(value, format)?;
    match output {
        Some(path) => {
            fs::write(path, rendered)
                .structured(InternalError::WriteOutput {
                    path: path_string(path),
                })
                .message("Failed to write output file")?;
            debug!("Wrote output to '{}'", path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(rendered.as_bytes())
            .structured(InternalError::WriteOutput {
                path: "<stdout>".into(),
            })?,
    }
    Ok(())
}
