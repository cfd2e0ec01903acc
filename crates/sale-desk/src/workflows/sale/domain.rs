use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::commission::CommissionDistribution;

/// Identifier assigned by the persistence service on first save.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Brazilian tax id (CPF/CNPJ). Formatting punctuation is stripped on construction so
/// "123.456.789-09" and "12345678909" compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TaxId(String);

impl TaxId {
    pub fn new(raw: &str) -> Self {
        Self(
            raw.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for TaxId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<TaxId> for String {
    fn from(value: TaxId) -> Self {
        value.0
    }
}

impl fmt::Display for TaxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Draft,
    Final,
}

impl RecordStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Final => "final",
        }
    }
}

/// Free-form structured section of a record (parties, property, financials).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// JSON merge patch: objects merge key by key, `null` removes a key, anything else
    /// replaces.
    pub fn merge(&mut self, patch: &Payload) {
        merge_object(&mut self.0, &patch.0);
    }
}

fn merge_object(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    merge_object(existing, nested);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Viewed,
    Signed,
    Rejected,
}

/// Signer progress reported back by the signature workflow. Display-only: record status
/// is never derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerTracking {
    pub signer_id: String,
    pub status: SignatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

/// Timestamps maintained by the workflow itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

/// The central sale document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SaleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_cpf: Option<TaxId>,
    #[serde(default)]
    pub parties: Payload,
    #[serde(default)]
    pub property: Payload,
    #[serde(default)]
    pub financials: Payload,
    #[serde(default)]
    pub commission: CommissionDistribution,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<SignerTracking>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl SaleRecord {
    pub fn is_final(&self) -> bool {
        self.status == RecordStatus::Final
    }
}

/// Partial update applied by `edit`. Absent fields are left untouched. Ownership is not
/// patchable; the first save stamps it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SalePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parties: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financials: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission: Option<CommissionDistribution>,
}

impl SalePatch {
    pub fn is_empty(&self) -> bool {
        self.parties.is_none()
            && self.property.is_none()
            && self.financials.is_none()
            && self.commission.is_none()
    }

    pub(crate) fn apply_to(self, record: &mut SaleRecord) {
        if let Some(parties) = self.parties {
            record.parties.merge(&parties);
        }
        if let Some(property) = self.property {
            record.property.merge(&property);
        }
        if let Some(financials) = self.financials {
            record.financials.merge(&financials);
        }
        if let Some(commission) = self.commission {
            record.commission = commission;
        }
    }
}

/// Locally recoverable validation failures. Never sent to the persistence service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("required field {field} is missing")]
    MissingField { field: String },
    #[error("{field} allocates {found}% but a broker line may not exceed {cap}%")]
    BrokerCapExceeded {
        field: String,
        cap: String,
        found: String,
    },
    #[error("{field} allocates {found}% but its manager is capped at {cap}%")]
    ManagementCapExceeded {
        field: String,
        cap: String,
        found: String,
    },
    #[error("commission lines are present but every percentage is zero")]
    NothingAllocated,
}

impl ValidationError {
    pub fn field(&self) -> Option<&str> {
        match self {
            ValidationError::MissingField { field }
            | ValidationError::BrokerCapExceeded { field, .. }
            | ValidationError::ManagementCapExceeded { field, .. } => Some(field),
            ValidationError::NothingAllocated => None,
        }
    }
}
