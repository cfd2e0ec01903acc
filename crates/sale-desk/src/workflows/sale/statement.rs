//! CSV commission statement: one row per allocation and a closing total.

use std::io::Write;

use serde::Serialize;

use super::commission::{CommissionDistribution, CommissionValidator};

#[derive(Debug)]
pub enum StatementError {
    Csv(csv::Error),
    Io(std::io::Error),
    Encoding(std::string::FromUtf8Error),
}

impl std::fmt::Display for StatementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatementError::Csv(err) => write!(f, "failed to write statement row: {}", err),
            StatementError::Io(err) => write!(f, "failed to flush statement: {}", err),
            StatementError::Encoding(err) => write!(f, "statement is not valid UTF-8: {}", err),
        }
    }
}

impl std::error::Error for StatementError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatementError::Csv(err) => Some(err),
            StatementError::Io(err) => Some(err),
            StatementError::Encoding(err) => Some(err),
        }
    }
}

impl From<csv::Error> for StatementError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<std::io::Error> for StatementError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

#[derive(Debug, Serialize)]
struct StatementRow<'a> {
    role: &'static str,
    party_id: &'a str,
    broker_id: &'a str,
    tier: String,
    percentage: String,
}

/// Write the statement for `distribution` to `writer`.
pub fn write_statement<W: Write>(
    distribution: &CommissionDistribution,
    writer: W,
) -> Result<(), StatementError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for line in &distribution.broker_lines {
        csv_writer.serialize(StatementRow {
            role: "broker",
            party_id: &line.broker_id.0,
            broker_id: &line.broker_id.0,
            tier: String::new(),
            percentage: line.percentage.to_string(),
        })?;
        for finder in line.finders() {
            csv_writer.serialize(StatementRow {
                role: "finder",
                party_id: &finder.finder_id.0,
                broker_id: &line.broker_id.0,
                tier: String::new(),
                percentage: finder.effective().to_string(),
            })?;
        }
    }

    for line in distribution.management_lines.iter() {
        csv_writer.serialize(StatementRow {
            role: "management",
            party_id: &line.manager_id.0,
            broker_id: "",
            tier: line.tier.to_string(),
            percentage: line.percentage.to_string(),
        })?;
    }

    csv_writer.serialize(StatementRow {
        role: "total",
        party_id: "",
        broker_id: "",
        tier: String::new(),
        percentage: CommissionValidator::aggregate(distribution).to_string(),
    })?;
    csv_writer.flush()?;
    Ok(())
}

pub fn statement_csv(distribution: &CommissionDistribution) -> Result<String, StatementError> {
    let mut buffer = Vec::new();
    write_statement(distribution, &mut buffer)?;
    String::from_utf8(buffer).map_err(StatementError::Encoding)
}
