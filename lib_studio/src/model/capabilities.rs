//! # Capabilities
//!
//! Optional features advertised by the active data source. Consumers only read
//! them, typically to enable or disable a piece of UI.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named optional feature of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// The source can forward service calls to the robot.
    CallServices,
    /// The source can publish messages back to the robot.
    Publish,
    /// The source supports play / pause / seek.
    PlaybackControl,
    /// The source supports changing the playback speed.
    SetSpeed,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::CallServices => "callServices",
            Capability::Publish => "publish",
            Capability::PlaybackControl => "playbackControl",
            Capability::SetSpeed => "setSpeed",
        };
        f.write_str(name)
    }
}

/// The capability set of the active source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) {
        self.0.insert(capability);
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for Capabilities {
    fn from(value: [Capability; N]) -> Self {
        value.into_iter().collect()
    }
}
