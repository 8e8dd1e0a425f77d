use serde::{Deserialize, Serialize};

use fabline_core::{Entity, InstallationId, ProductId};

/// Field status of an installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub enum InstallationStatus {
    Operational,
    Damaged,
}

impl core::fmt::Display for InstallationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InstallationStatus::Operational => f.write_str("Operational"),
            InstallationStatus::Damaged => f.write_str("Damaged"),
        }
    }
}

/// A deployed unit of a product at some location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    id: InstallationId,
    product_id: ProductId,
    location: String,
    status: InstallationStatus,
}

impl Installation {
    pub fn new(id: InstallationId, product_id: ProductId, location: impl Into<String>) -> Self {
        Self {
            id,
            product_id,
            location: location.into(),
            status: InstallationStatus::Operational,
        }
    }

    pub fn with_status(mut self, status: InstallationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn status(&self) -> InstallationStatus {
        self.status
    }

    pub fn is_operational(&self) -> bool {
        self.status == InstallationStatus::Operational
    }

    pub fn mark_operational(&mut self) {
        self.status = InstallationStatus::Operational;
    }

    pub fn mark_damaged(&mut self) {
        self.status = InstallationStatus::Damaged;
    }
}

impl Entity for Installation {
    type Id = InstallationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
