//! Commission split model: broker lines with their finders, and management tiers.
//!
//! Lines store whatever the user last typed. Caps are applied by
//! [`CommissionValidator`] when a field is committed, not while it is being edited.

mod caps;
mod percentage;
mod validator;

use std::fmt;

use serde::{Deserialize, Serialize};

use super::domain::TaxId;

pub use caps::{ManagementCapTable, BROKER_LINE_CAP, MAX_FINDERS_PER_LINE};
pub use percentage::Percentage;
pub use validator::{CommissionValidator, CommittedField};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BrokerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FinderId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ManagerId(pub String);

/// Share credited to a finder attached to a broker line. An unset percentage counts as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinderAllocation {
    pub finder_id: FinderId,
    #[serde(default)]
    pub percentage: Option<Percentage>,
}

impl FinderAllocation {
    pub fn new(finder_id: FinderId, percentage: Option<Percentage>) -> Self {
        Self {
            finder_id,
            percentage,
        }
    }

    pub fn effective(&self) -> Percentage {
        self.percentage.unwrap_or(Percentage::ZERO)
    }
}

/// One broker's share plus up to three finder allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BrokerLineWire")]
pub struct BrokerLine {
    pub broker_id: BrokerId,
    pub percentage: Percentage,
    finders: Vec<FinderAllocation>,
}

impl BrokerLine {
    pub fn new(broker_id: BrokerId, percentage: Percentage) -> Self {
        Self {
            broker_id,
            percentage,
            finders: Vec::new(),
        }
    }

    pub fn finders(&self) -> &[FinderAllocation] {
        &self.finders
    }

    /// Appends a finder slot. A fourth slot is refused and reported as `false`.
    pub fn add_finder(&mut self, finder: FinderAllocation) -> bool {
        if self.finders.len() >= MAX_FINDERS_PER_LINE {
            return false;
        }
        self.finders.push(finder);
        true
    }

    pub fn remove_finder(&mut self, index: usize) -> Option<FinderAllocation> {
        if index < self.finders.len() {
            Some(self.finders.remove(index))
        } else {
            None
        }
    }

    /// Keystroke-level update; no cap is applied here.
    pub fn set_finder_percentage(&mut self, index: usize, percentage: Option<Percentage>) -> bool {
        match self.finders.get_mut(index) {
            Some(finder) => {
                finder.percentage = percentage;
                true
            }
            None => false,
        }
    }

    pub fn finder_sum(&self) -> Percentage {
        self.finders.iter().map(FinderAllocation::effective).sum()
    }

    pub(crate) fn finder_sum_excluding(&self, index: usize) -> Percentage {
        self.finders
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != index)
            .map(|(_, finder)| finder.effective())
            .sum()
    }

    pub(crate) fn finders_mut(&mut self) -> &mut [FinderAllocation] {
        &mut self.finders
    }

    pub fn total(&self) -> Percentage {
        self.percentage.saturating_add(self.finder_sum())
    }
}

/// Shape written by older clients: a single optional finder next to the broker share.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct LegacyBrokerLine {
    pub broker_id: BrokerId,
    #[serde(default)]
    pub percentage: Percentage,
    #[serde(default)]
    pub finder_id: Option<FinderId>,
    #[serde(default)]
    pub finder_percentage: Option<Percentage>,
}

/// Lift a legacy single-finder line into the canonical finder list.
pub fn migrate_legacy_line(legacy: LegacyBrokerLine) -> BrokerLine {
    let LegacyBrokerLine {
        broker_id,
        percentage,
        finder_id,
        finder_percentage,
    } = legacy;

    let mut line = BrokerLine::new(broker_id, percentage);
    if finder_id.is_some() || finder_percentage.is_some() {
        line.finders.push(FinderAllocation::new(
            finder_id.unwrap_or_default(),
            finder_percentage,
        ));
    }
    line
}

#[derive(Deserialize)]
struct BrokerLineWire {
    broker_id: BrokerId,
    #[serde(default)]
    percentage: Percentage,
    #[serde(default)]
    finders: Option<Vec<FinderAllocation>>,
    #[serde(default)]
    finder_id: Option<FinderId>,
    #[serde(default)]
    finder_percentage: Option<Percentage>,
}

impl TryFrom<BrokerLineWire> for BrokerLine {
    type Error = CommissionShapeError;

    fn try_from(wire: BrokerLineWire) -> Result<Self, Self::Error> {
        match wire.finders {
            Some(finders) => {
                if finders.len() > MAX_FINDERS_PER_LINE {
                    return Err(CommissionShapeError::TooManyFinders(finders.len()));
                }
                Ok(Self {
                    broker_id: wire.broker_id,
                    percentage: wire.percentage,
                    finders,
                })
            }
            None => Ok(migrate_legacy_line(LegacyBrokerLine {
                broker_id: wire.broker_id,
                percentage: wire.percentage,
                finder_id: wire.finder_id,
                finder_percentage: wire.finder_percentage,
            })),
        }
    }
}

/// Structural problems rejected while deserializing a distribution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommissionShapeError {
    #[error("a broker line carries {0} finders; at most 3 are allowed")]
    TooManyFinders(usize),
    #[error("management tier {0} appears more than once")]
    DuplicateTier(u8),
    #[error("management tier must be between 1 and 4, found {0}")]
    InvalidTier(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ManagementTier {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl ManagementTier {
    pub const fn ordered() -> [Self; 4] {
        [Self::One, Self::Two, Self::Three, Self::Four]
    }

    pub const fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ManagementTier {
    type Error = CommissionShapeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(CommissionShapeError::InvalidTier(other)),
        }
    }
}

impl From<ManagementTier> for u8 {
    fn from(value: ManagementTier) -> Self {
        value.number()
    }
}

impl fmt::Display for ManagementTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementLine {
    pub tier: ManagementTier,
    pub manager_id: ManagerId,
    pub percentage: Percentage,
    #[serde(default)]
    pub manager_tax_id: TaxId,
}

/// Management lines keyed by tier, kept in tier order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<ManagementLine>", into = "Vec<ManagementLine>")]
pub struct ManagementLines(Vec<ManagementLine>);

impl ManagementLines {
    /// Insert or replace the line for `line.tier`.
    pub fn upsert(&mut self, line: ManagementLine) {
        match self.0.iter_mut().find(|existing| existing.tier == line.tier) {
            Some(existing) => *existing = line,
            None => {
                self.0.push(line);
                self.0.sort_by_key(|entry| entry.tier);
            }
        }
    }

    pub fn remove(&mut self, tier: ManagementTier) -> Option<ManagementLine> {
        let position = self.0.iter().position(|line| line.tier == tier)?;
        Some(self.0.remove(position))
    }

    pub fn get(&self, tier: ManagementTier) -> Option<&ManagementLine> {
        self.0.iter().find(|line| line.tier == tier)
    }

    pub fn get_mut(&mut self, tier: ManagementTier) -> Option<&mut ManagementLine> {
        self.0.iter_mut().find(|line| line.tier == tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManagementLine> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<ManagementLine>> for ManagementLines {
    type Error = CommissionShapeError;

    fn try_from(mut lines: Vec<ManagementLine>) -> Result<Self, Self::Error> {
        lines.sort_by_key(|line| line.tier);
        if let Some(pair) = lines.windows(2).find(|pair| pair[0].tier == pair[1].tier) {
            return Err(CommissionShapeError::DuplicateTier(pair[0].tier.number()));
        }
        Ok(Self(lines))
    }
}

impl From<ManagementLines> for Vec<ManagementLine> {
    fn from(value: ManagementLines) -> Self {
        value.0
    }
}

/// Full commission split of a sale.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommissionDistribution {
    #[serde(default)]
    pub broker_lines: Vec<BrokerLine>,
    #[serde(default)]
    pub management_lines: ManagementLines,
}

impl CommissionDistribution {
    pub fn has_lines(&self) -> bool {
        !self.broker_lines.is_empty() || !self.management_lines.is_empty()
    }

    pub fn broker_line_mut(&mut self, index: usize) -> Option<&mut BrokerLine> {
        self.broker_lines.get_mut(index)
    }
}
