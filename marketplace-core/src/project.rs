//! Project context passed to every marketplace operation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider handle required by the profile and rule type services to link
/// created records to a provider. Forwarded verbatim, never inspected here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub name: String,
}

impl Provider {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The project an operation acts on, plus its provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub id: Uuid,
    pub provider: Provider,
}

impl ProjectContext {
    pub fn new(id: Uuid, provider: Provider) -> Self {
        Self { id, provider }
    }
}
