use std::collections::HashMap;

use crate::config::SaleDeskConfig;
use crate::workflows::sale::domain::TaxId;

use super::Percentage;

/// Combined ceiling for a broker's own share plus every finder on the line.
pub const BROKER_LINE_CAP: Percentage = Percentage::whole(55);

pub const MAX_FINDERS_PER_LINE: usize = 3;

const DEFAULT_MANAGEMENT_CAP: Percentage = Percentage::whole(5);

/// Per-manager ceiling lookup. Managers without an override get the default cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementCapTable {
    default_cap: Percentage,
    overrides: HashMap<TaxId, Percentage>,
}

impl ManagementCapTable {
    pub fn new(default_cap: Percentage) -> Self {
        Self {
            default_cap,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, tax_id: TaxId, cap: Percentage) -> Self {
        self.overrides.insert(tax_id, cap);
        self
    }

    pub fn default_cap(&self) -> Percentage {
        self.default_cap
    }

    pub fn cap_for(&self, tax_id: &TaxId) -> Percentage {
        self.overrides
            .get(tax_id)
            .copied()
            .unwrap_or(self.default_cap)
    }
}

impl Default for ManagementCapTable {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGEMENT_CAP)
    }
}

impl From<&SaleDeskConfig> for ManagementCapTable {
    fn from(config: &SaleDeskConfig) -> Self {
        let reduced = Percentage::from_f64(config.reduced_management_cap);
        config
            .reduced_cap_tax_ids
            .iter()
            .map(|raw| TaxId::new(raw))
            .filter(|tax_id| !tax_id.is_empty())
            .fold(
                Self::new(Percentage::from_f64(config.default_management_cap)),
                |table, tax_id| table.with_override(tax_id, reduced),
            )
    }
}
