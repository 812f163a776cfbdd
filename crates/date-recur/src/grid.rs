//! The part grid: which rule parts a field permits for each frequency.
//!
//! A grid is built once from configuration and then only read. It gates which parts
//! can be offered to a user and strips disallowed parts from a rule before it is
//! stored (see [`crate::rule::Rule::filtered`]).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DateRecurError, Result};
use crate::rule::{Frequency, Part};

/// Configuration entry meaning "every part".
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Allowed {
    All,
    Parts(BTreeSet<Part>),
}

/// Allowed parts per frequency. Frequencies missing from the grid are disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartGrid {
    frequencies: BTreeMap<Frequency, Allowed>,
}

impl Default for PartGrid {
    fn default() -> Self {
        Self::allow_everything()
    }
}

impl PartGrid {
    /// A grid with every frequency disabled.
    pub fn empty() -> Self {
        Self {
            frequencies: BTreeMap::new(),
        }
    }

    /// A grid allowing every part for every frequency.
    pub fn allow_everything() -> Self {
        Frequency::ALL
            .into_iter()
            .fold(Self::empty(), |grid, f| grid.allow_frequency(f))
    }

    /// Allow every part for `frequency`.
    pub fn allow_frequency(mut self, frequency: Frequency) -> Self {
        self.frequencies.insert(frequency, Allowed::All);
        self
    }

    /// Allow the given parts for `frequency`, in addition to any already allowed.
    ///
    /// A frequency that already allows everything is left unchanged. Passing no parts
    /// registers the frequency as disabled.
    pub fn allow_parts(mut self, frequency: Frequency, parts: impl IntoIterator<Item = Part>) -> Self {
        let entry = self
            .frequencies
            .entry(frequency)
            .or_insert_with(|| Allowed::Parts(BTreeSet::new()));
        if let Allowed::Parts(set) = entry {
            set.extend(parts);
        }
        self
    }

    pub fn is_allow_everything(&self) -> bool {
        Frequency::ALL
            .iter()
            .all(|f| matches!(self.frequencies.get(f), Some(Allowed::All)))
    }

    /// Whether the frequency can be used at all.
    pub fn is_frequency_allowed(&self, frequency: Frequency) -> bool {
        match self.frequencies.get(&frequency) {
            Some(Allowed::All) => true,
            Some(Allowed::Parts(set)) => !set.is_empty(),
            None => false,
        }
    }

    /// Whether `part` may be used with `frequency`.
    pub fn is_part_allowed(&self, frequency: Frequency, part: Part) -> bool {
        match self.frequencies.get(&frequency) {
            Some(Allowed::All) => true,
            Some(Allowed::Parts(set)) => set.contains(&part),
            None => false,
        }
    }

    /// Every part allowed for `frequency`, in canonical order.
    pub fn parts_for_frequency(&self, frequency: Frequency) -> Vec<Part> {
        Part::ALL
            .into_iter()
            .filter(|p| self.is_part_allowed(frequency, *p))
            .collect()
    }
}

/// Serialized form of a [`PartGrid`].
///
/// ```toml
/// [part_grid]
/// all = false
///
/// [part_grid.frequencies]
/// WEEKLY = ["*"]
/// DAILY = ["COUNT", "UNTIL", "INTERVAL"]
/// HOURLY = []
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartGridConfig {
    /// Allow every part for every frequency; `frequencies` is ignored.
    #[serde(default)]
    pub all: bool,

    #[serde(default)]
    pub frequencies: BTreeMap<String, Vec<String>>,
}

impl TryFrom<&PartGridConfig> for PartGrid {
    type Error = DateRecurError;

    fn try_from(config: &PartGridConfig) -> Result<Self> {
        if config.all {
            return Ok(PartGrid::allow_everything());
        }

        let mut grid = PartGrid::empty();
        for (name, parts) in &config.frequencies {
            let frequency: Frequency = name
                .parse()
                .map_err(|_| DateRecurError::Config(format!("unknown frequency '{name}' in part grid")))?;

            if parts.iter().any(|p| p.trim() == WILDCARD) {
                grid = grid.allow_frequency(frequency);
                continue;
            }

            let parsed = parts
                .iter()
                .map(|p| {
                    p.parse::<Part>().map_err(|_| {
                        DateRecurError::Config(format!("unknown part '{p}' for {frequency} in part grid"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            grid = grid.allow_parts(frequency, parsed);
        }
        Ok(grid)
    }
}
