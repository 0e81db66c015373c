//! Project stage of the running application.

use serde::{Deserialize, Serialize};

/// Deployment stage; only `Development` changes engine behavior (the
/// diagnostic error fragment is included only there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    Development,
    #[default]
    Production,
    SystemTest,
    UnitTest,
}

impl ProjectStage {
    #[inline]
    pub const fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::SystemTest => "system_test",
            Self::UnitTest => "unit_test",
        }
    }
}
