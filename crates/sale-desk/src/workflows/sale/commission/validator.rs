use tracing::debug;

use crate::workflows::sale::domain::{TaxId, ValidationError};

use super::{
    BrokerLine, CommissionDistribution, FinderAllocation, ManagementCapTable, ManagementLine,
    Percentage, BROKER_LINE_CAP,
};

/// Field of a broker line that just lost focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommittedField {
    Broker,
    Finder(usize),
}

/// Keeps commission lines inside their role caps. Never fails: out-of-range values are
/// clamped and refused additions are no-ops.
#[derive(Debug, Clone, Default)]
pub struct CommissionValidator {
    caps: ManagementCapTable,
}

impl CommissionValidator {
    pub fn new(caps: ManagementCapTable) -> Self {
        Self { caps }
    }

    pub fn caps(&self) -> &ManagementCapTable {
        &self.caps
    }

    pub fn cap_for_management(&self, manager_tax_id: &TaxId) -> Percentage {
        self.caps.cap_for(manager_tax_id)
    }

    pub fn max_broker_allowance(existing_finder_sum: Percentage) -> Percentage {
        BROKER_LINE_CAP.saturating_sub(existing_finder_sum)
    }

    pub fn max_finder_allowance(
        broker_percentage: Percentage,
        other_finders_sum: Percentage,
    ) -> Percentage {
        BROKER_LINE_CAP
            .saturating_sub(broker_percentage)
            .saturating_sub(other_finders_sum)
    }

    /// Clamp the committed field of `line` to what the rest of the line leaves available.
    pub fn clamp_on_commit(&self, line: &BrokerLine, field: CommittedField) -> BrokerLine {
        let mut clamped = line.clone();
        match field {
            CommittedField::Broker => {
                let allowance = Self::max_broker_allowance(clamped.finder_sum());
                if clamped.percentage > allowance {
                    debug!(
                        broker = %clamped.broker_id.0,
                        requested = %clamped.percentage,
                        %allowance,
                        "broker share clamped on commit"
                    );
                    clamped.percentage = allowance;
                }
            }
            CommittedField::Finder(index) => {
                let broker = clamped.percentage;
                let others = clamped.finder_sum_excluding(index);
                if let Some(finder) = clamped.finders_mut().get_mut(index) {
                    let allowance = Self::max_finder_allowance(broker, others);
                    if let Some(requested) = finder.percentage.filter(|value| *value > allowance)
                    {
                        debug!(
                            finder = %finder.finder_id.0,
                            %requested,
                            %allowance,
                            "finder share clamped on commit"
                        );
                        finder.percentage = Some(allowance);
                    }
                }
            }
        }
        clamped
    }

    /// Commit every field in display order: the broker share, then each finder.
    pub fn clamp_line_on_commit(&self, line: &BrokerLine) -> BrokerLine {
        let mut clamped = self.clamp_on_commit(line, CommittedField::Broker);
        for index in 0..clamped.finders().len() {
            clamped = self.clamp_on_commit(&clamped, CommittedField::Finder(index));
        }
        clamped
    }

    pub fn clamp_management_on_commit(&self, line: &ManagementLine) -> ManagementLine {
        let cap = self.cap_for_management(&line.manager_tax_id);
        let mut clamped = line.clone();
        if clamped.percentage > cap {
            debug!(
                tier = %clamped.tier,
                requested = %clamped.percentage,
                %cap,
                "management share clamped on commit"
            );
            clamped.percentage = cap;
        }
        clamped
    }

    /// Append a finder slot to `line`; a fourth request is silently refused.
    pub fn add_finder(&self, line: &mut BrokerLine, finder: FinderAllocation) -> bool {
        let added = line.add_finder(finder);
        if !added {
            debug!(broker = %line.broker_id.0, "finder slot refused, line already full");
        }
        added
    }

    /// Commit every line of a distribution.
    pub fn clamp_distribution(
        &self,
        distribution: &CommissionDistribution,
    ) -> CommissionDistribution {
        let mut clamped = distribution.clone();
        clamped.broker_lines = distribution
            .broker_lines
            .iter()
            .map(|line| self.clamp_line_on_commit(line))
            .collect();
        let management: Vec<ManagementLine> = distribution
            .management_lines
            .iter()
            .map(|line| self.clamp_management_on_commit(line))
            .collect();
        for line in management {
            clamped.management_lines.upsert(line);
        }
        clamped
    }

    pub fn aggregate(distribution: &CommissionDistribution) -> Percentage {
        let brokers: Percentage = distribution.broker_lines.iter().map(BrokerLine::total).sum();
        let management: Percentage = distribution
            .management_lines
            .iter()
            .map(|line| line.percentage)
            .sum();
        brokers.saturating_add(management)
    }

    /// True when there is nothing to split, or something has been allocated. The total is
    /// deliberately not required to reach 100.
    pub fn is_submittable(distribution: &CommissionDistribution) -> bool {
        !distribution.has_lines() || !Self::aggregate(distribution).is_zero()
    }

    /// Full check used before finalizing. Reports the first offending field.
    pub fn validate(&self, distribution: &CommissionDistribution) -> Result<(), ValidationError> {
        for (index, line) in distribution.broker_lines.iter().enumerate() {
            if line.total() > BROKER_LINE_CAP {
                return Err(ValidationError::BrokerCapExceeded {
                    field: format!("commission.broker_lines[{index}]"),
                    cap: BROKER_LINE_CAP.to_string(),
                    found: line.total().to_string(),
                });
            }
        }

        for line in distribution.management_lines.iter() {
            let cap = self.cap_for_management(&line.manager_tax_id);
            if line.percentage > cap {
                return Err(ValidationError::ManagementCapExceeded {
                    field: format!("commission.management_lines[tier {}]", line.tier),
                    cap: cap.to_string(),
                    found: line.percentage.to_string(),
                });
            }
        }

        if !Self::is_submittable(distribution) {
            return Err(ValidationError::NothingAllocated);
        }

        Ok(())
    }
}
