use crate::classifier::Category;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much operator confirmation a permitted termination needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentLevel {
    Automatic = 0,
    NotifySystem = 1,
    ConfirmAll = 2,
    MonitorOnly = 3,
}

impl ConsentLevel {
    /// Map any integer into 0..=3.
    pub fn clamped(level: i64) -> Self {
        match level {
            i64::MIN..=0 => ConsentLevel::Automatic,
            1 => ConsentLevel::NotifySystem,
            2 => ConsentLevel::ConfirmAll,
            _ => ConsentLevel::MonitorOnly,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            ConsentLevel::Automatic => "Fully Automatic",
            ConsentLevel::NotifySystem => "Notify for System",
            ConsentLevel::ConfirmAll => "Confirm All",
            ConsentLevel::MonitorOnly => "Monitor Only",
        }
    }

    pub fn needs_confirmation(self, category: Category) -> bool {
        match self {
            ConsentLevel::Automatic => false,
            ConsentLevel::NotifySystem => {
                matches!(category, Category::System | Category::Essential)
            }
            ConsentLevel::ConfirmAll | ConsentLevel::MonitorOnly => true,
        }
    }
}

impl fmt::Display for ConsentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_u8(), self.description())
    }
}
