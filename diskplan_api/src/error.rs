use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// A disk layout could not be built, checked or flattened.
#[derive(Debug, Clone, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutError {
    /// A mountpoint is empty, relative, non-canonical or placed on a
    /// container that cannot hold it.
    #[error("{0}")]
    InvalidMountpoint(String),

    /// A mountpoint, logical volume or subvolume name is repeated.
    #[error("{0}")]
    DuplicateName(String),

    /// The requested partitioning modes or container counts cannot be
    /// combined.
    #[error("{0}")]
    UnsupportedCombination(String),

    /// A mountpoint is not allowed by the distribution policy.
    #[error("{0}")]
    PolicyViolation(String),

    /// Mounts required to boot the platform are absent.
    #[error("required mounts for boot configuration [{}] missing", .missing.join(" "))]
    MissingRequiredMount { missing: Vec<String> },

    /// A payload kind cannot be handled at this position.
    #[error("{0}")]
    UnsupportedPayload(String),

    /// The table itself is malformed, for example partitions overflow it.
    #[error("{0}")]
    InvalidTable(String),

    /// Several independent problems, reported together.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<LayoutError>),
}

fn join_errors(errors: &[LayoutError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl LayoutError {
    /// Collapses a list of accumulated errors: `None` when empty, the error
    /// itself when there is exactly one.
    pub fn collect(mut errors: Vec<LayoutError>) -> Option<LayoutError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(LayoutError::Multiple(errors)),
        }
    }

    /// Returns this error and every error nested in it, flattened.
    pub fn flatten(&self) -> Vec<&LayoutError> {
        match self {
            LayoutError::Multiple(errors) => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

/// Input documents could not be loaded.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigError {
    #[error("Failed to load image profile from '{path}'")]
    LoadProfile { path: String },
    #[error("Failed to parse image profile")]
    ParseProfile,
    #[error("Invalid image profile: {0}")]
    InvalidProfile(String),
    #[error("Failed to load customizations from '{path}'")]
    LoadCustomizations { path: String },
    #[error("Failed to parse customizations")]
    ParseCustomizations,
    #[error("Customizations have no partitioning section")]
    MissingPartitioning,
    #[error("Failed to load partition table from '{path}'")]
    LoadPartitionTable { path: String },
    #[error("Failed to parse partition table")]
    ParsePartitionTable,
    #[error("Invalid random seed '{value}'")]
    InvalidSeed { value: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Failed to serialize output")]
    SerializeOutput,
    #[error("Failed to write output to '{path}'")]
    WriteOutput { path: String },
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    /// The requested layout is impossible or violates policy.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// An input document was missing or malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A bug or an environment problem unrelated to the input.
    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct DiskPlanErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct DiskPlanError(Box<DiskPlanErrorInner>);
impl DiskPlanError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        DiskPlanError(Box::new(DiskPlanErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

impl From<LayoutError> for DiskPlanError {
    #[track_caller]
    fn from(e: LayoutError) -> Self {
        DiskPlanError::new(e)
    }
}

impl From<ConfigError> for DiskPlanError {
    #[track_caller]
    fn from(e: ConfigError) -> Self {
        DiskPlanError::new(e)
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured DiskPlanError.
    fn structured(self, kind: K) -> Result<T, DiskPlanError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DiskPlanError> {
        match self {
            Some(t) => Ok(t),
            None => Err(DiskPlanError::new(kind)),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DiskPlanError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(DiskPlanError(Box::new(DiskPlanErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait DiskPlanResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, DiskPlanError>;
}

impl<T> DiskPlanResultExt<T> for Result<T, DiskPlanError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, DiskPlanError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }
}

impl<T> DiskPlanResultExt<T> for Result<T, LayoutError> {
    #[track_caller]
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, DiskPlanError> {
        self.map_err(DiskPlanError::new).message(context)
    }
}

impl Serialize for DiskPlanError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("diskplan-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Layout(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Config(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for DiskPlanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}
