use crate::error::TorError;
use std::{fmt, str::FromStr};

/// A Tor version of the form `major.minor.revision.build[-tag]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TorVersion {
    components: [u32; 4],
    tag: Option<String>,
}

impl TorVersion {
    pub fn components(&self) -> [u32; 4] {
        self.components
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Every component must be at least the corresponding component of `minimum`.
    ///
    /// Components are compared independently rather than in precedence order, so `1.0.0.0` does
    /// not meet a minimum of `0.3.3.6`.
    pub fn meets_minimum(&self, minimum: &TorVersion) -> bool {
        self.components
            .iter()
            .zip(minimum.components.iter())
            .all(|(component, required)| component >= required)
    }
}

impl FromStr for TorVersion {
    type Err = TorError;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        let malformed = || TorError::MalformedVersion(version.to_string());

        // Git builds report e.g. "0.4.8.10 (git-2f5f4c7a)"
        let dotted = version.split_whitespace().next().unwrap_or("");
        let parts: Vec<&str> = dotted.split('.').collect();
        if parts.len() != 4 {
            return Err(malformed());
        }

        let (build, tag) = match parts[3].split_once('-') {
            Some((build, tag)) => (build, Some(tag.to_string())),
            None => (parts[3], None),
        };

        let mut components = [0u32; 4];
        for (component, part) in components
            .iter_mut()
            .zip([parts[0], parts[1], parts[2], build])
        {
            *component = part.parse().map_err(|_| malformed())?;
        }

        Ok(Self {
            components,
            tag: tag.filter(|tag| !tag.is_empty()),
        })
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [major, minor, revision, build] = self.components;
        write!(f, "{}.{}.{}.{}", major, minor, revision, build)?;
        if let Some(tag) = &self.tag {
            write!(f, "-{}", tag)?;
        }
        Ok(())
    }
}

/// Check `version` against `minimum`, both given as dotted version strings.
pub fn meets_minimum(version: &str, minimum: &str) -> Result<bool, TorError> {
    let version: TorVersion = version.parse()?;
    let minimum: TorVersion = minimum.parse()?;
    Ok(version.meets_minimum(&minimum))
}
