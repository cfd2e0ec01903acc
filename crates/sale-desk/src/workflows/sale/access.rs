use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{RecordId, RecordStatus, SaleRecord, TaxId};

/// Who is acting in the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub cpf: TaxId,
}

impl CallerIdentity {
    pub fn new(cpf: TaxId) -> Self {
        Self { cpf }
    }
}

/// How a record was reached: by its owner, or through a shared link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Owner,
    SharedLink,
}

impl AccessMode {
    pub const fn from_link_flag(link: bool) -> Self {
        if link {
            Self::SharedLink
        } else {
            Self::Owner
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            AccessMode::Owner => "owner",
            AccessMode::SharedLink => "shared_link",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessGrant {
    pub mode: AccessMode,
    pub can_read: bool,
    pub can_write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("caller is not the owner of record {record_id}")]
    Denied { record_id: RecordId },
    #[error("record {record_id} does not exist")]
    NotFound { record_id: RecordId },
}

/// Decides read/write access to a record.
///
/// Shared-link holders skip the identity check entirely and may edit any draft they
/// can reach. Owner access requires the caller's tax id to match the record owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordAccessPolicy;

impl RecordAccessPolicy {
    /// A record created in this session belongs to the caller.
    pub fn for_new_record(&self) -> AccessGrant {
        AccessGrant {
            mode: AccessMode::Owner,
            can_read: true,
            can_write: true,
        }
    }

    pub fn authorize(
        &self,
        caller: &CallerIdentity,
        record: &SaleRecord,
        mode: AccessMode,
    ) -> Result<AccessGrant, AccessError> {
        if mode == AccessMode::Owner && record.owner_cpf.as_ref() != Some(&caller.cpf) {
            let record_id = record
                .id
                .clone()
                .unwrap_or_else(|| RecordId("unsaved".to_string()));
            info!(%record_id, mode = mode.label(), "record access denied");
            return Err(AccessError::Denied { record_id });
        }

        Ok(AccessGrant {
            mode,
            can_read: true,
            can_write: record.status == RecordStatus::Draft,
        })
    }

    /// Combine a persistence lookup with the access decision, keeping "missing" and
    /// "not yours" apart.
    pub fn resolve(
        &self,
        caller: &CallerIdentity,
        record_id: &RecordId,
        fetched: Option<SaleRecord>,
        mode: AccessMode,
    ) -> Result<(SaleRecord, AccessGrant), AccessError> {
        let record = fetched.ok_or_else(|| AccessError::NotFound {
            record_id: record_id.clone(),
        })?;
        let grant = self.authorize(caller, &record, mode)?;
        Ok((record, grant))
    }
}
