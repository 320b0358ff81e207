// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Proteus-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use std::borrow::Borrow;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Canonical identifier of a file backing a model.
///
/// Resources are path-like strings. Two models never share a resource, so the value doubles as
/// the key of the model manager and the backup store. Only non-emptiness and the absence of NUL
/// bytes are enforced; canonicalization is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resource {
    value: SmolStr,
}

impl Resource {
    pub fn new(value: impl AsRef<str>) -> Result<Self, ResourceError> {
        let value = value.as_ref();
        validate_resource(value)?;
        Ok(Self {
            value: SmolStr::new(value),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ResourceError> {
        let Some(value) = path.to_str() else {
            return Err(ResourceError::NotUnicode);
        };
        Self::new(value)
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_path(&self) -> &Path {
        Path::new(self.value.as_str())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for Resource {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for Resource {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Resource {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Resource {
    type Error = ResourceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Resource> for String {
    fn from(resource: Resource) -> Self {
        resource.value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("resource must not be empty")]
    Empty,
    #[error("resource must not contain NUL bytes")]
    ContainsNul,
    #[error("resource path is not valid unicode")]
    NotUnicode,
}

fn validate_resource(value: &str) -> Result<(), ResourceError> {
    if value.is_empty() {
        return Err(ResourceError::Empty);
    }
    if value.contains('\0') {
        return Err(ResourceError::ContainsNul);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Resource, ResourceError};

    #[test]
    fn resource_rejects_empty() {
        assert_eq!(Resource::new(""), Err(ResourceError::Empty));
    }

    #[test]
    fn resource_rejects_nul() {
        assert_eq!(Resource::new("a\0b"), Err(ResourceError::ContainsNul));
    }

    #[test]
    fn resource_round_trips_through_json_as_plain_string() {
        let resource = Resource::new("/work/foo.txt").unwrap();
        let json = serde_json::to_string(&resource).unwrap();
        assert_eq!(json, "\"/work/foo.txt\"");

        let back: Resource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resource);
        assert!(serde_json::from_str::<Resource>("\"\"").is_err());
    }
}
