//! Allow-lists of paths and the mountpoint policy checks built on them.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use maplit::btreemap;
use serde::{Deserialize, Serialize};

use crate::{
    customizations::{FilesystemCustomization, PartitioningCustomization},
    error::LayoutError,
    primitives::path::{clean_path, is_absolute},
};

/// Rule attached to a path and, unless `exact`, to everything below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathPolicy {
    /// Only the path itself is allowed, not its subdirectories.
    #[serde(default)]
    pub exact: bool,

    /// The path and everything below it is forbidden.
    #[serde(default)]
    pub deny: bool,
}

/// A set of path rules resolved by longest prefix. A path that no rule covers
/// falls back to the rule for `/`, and is allowed when there is none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPolicies {
    rules: BTreeMap<String, PathPolicy>,
}

lazy_static! {
    /// Default mountpoint allow-list of a distribution.
    pub static ref MOUNTPOINT_POLICIES: PathPolicies = PathPolicies::new(btreemap! {
        "/".into() => PathPolicy::default(),
        // /etc must be on the root filesystem
        "/etc".into() => PathPolicy { deny: true, ..Default::default() },
        // API filesystems
        "/dev".into() => PathPolicy { deny: true, ..Default::default() },
        "/proc".into() => PathPolicy { deny: true, ..Default::default() },
        "/run".into() => PathPolicy { deny: true, ..Default::default() },
        "/sys".into() => PathPolicy { deny: true, ..Default::default() },
        "/var/run".into() => PathPolicy { deny: true, ..Default::default() },
        "/var/lock".into() => PathPolicy { deny: true, ..Default::default() },
        // merged /usr
        "/bin".into() => PathPolicy { deny: true, ..Default::default() },
        "/sbin".into() => PathPolicy { deny: true, ..Default::default() },
        "/lib".into() => PathPolicy { deny: true, ..Default::default() },
        "/lib32".into() => PathPolicy { deny: true, ..Default::default() },
        "/lib64".into() => PathPolicy { deny: true, ..Default::default() },
        "/usr".into() => PathPolicy { exact: true, ..Default::default() },
        "/lost+found".into() => PathPolicy { deny: true, ..Default::default() },
        "/boot/efi".into() => PathPolicy { exact: true, ..Default::default() },
        // ostree deployments
        "/ostree".into() => PathPolicy { deny: true, ..Default::default() },
        "/sysroot".into() => PathPolicy { deny: true, ..Default::default() },
    });
}

impl PathPolicies {
    pub fn new(rules: BTreeMap<String, PathPolicy>) -> Self {
        PathPolicies { rules }
    }

    /// Finds the rule for the longest prefix of `path` and whether the match
    /// was exact.
    fn lookup(&self, path: &str) -> (PathPolicy, bool) {
        let mut candidate = path;
        loop {
            if let Some(policy) = self.rules.get(candidate) {
                return (*policy, candidate == path);
            }
            match candidate.rfind('/') {
                Some(0) if candidate != "/" => candidate = "/",
                Some(0) | None => return (PathPolicy::default(), false),
                Some(index) => candidate = &candidate[..index],
            }
        }
    }

    /// Checks a single path against the rules.
    pub fn check(&self, path: &str) -> Result<(), String> {
        if !is_absolute(path) {
            return Err(format!("path {path:?} must be absolute"));
        }

        if clean_path(path) != path {
            return Err(format!("path {path:?} must be canonical"));
        }

        let (policy, exact_match) = self.lookup(path);
        if policy.deny || (policy.exact && !exact_match) {
            return Err(format!("path {path:?} is not allowed"));
        }

        Ok(())
    }

    fn check_all<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Result<(), LayoutError> {
        let violations: Vec<String> = paths
            .into_iter()
            .filter_map(|path| self.check(path).err())
            .collect();

        if violations.is_empty() {
            return Ok(());
        }

        Err(LayoutError::PolicyViolation(format!(
            "The following errors occurred while setting up custom mountpoints:\n{}",
            violations.join("\n")
        )))
    }
}

/// Checks every requested mountpoint against the allow-list, reporting all
/// violations at once.
pub fn check_mountpoints_policy(
    mountpoints: &[FilesystemCustomization],
    allow_list: &PathPolicies,
) -> Result<(), LayoutError> {
    allow_list.check_all(mountpoints.iter().map(|fs| fs.mountpoint.as_str()))
}

/// Checks every mountpoint of a partitioning customization (plain
/// filesystems, logical volumes and btrfs subvolumes) against the
/// allow-list, reporting all violations at once.
pub fn check_partitioning_policy(
    partitioning: &PartitioningCustomization,
    allow_list: &PathPolicies,
) -> Result<(), LayoutError> {
    allow_list.check_all(partitioning.mountpoints())
}
