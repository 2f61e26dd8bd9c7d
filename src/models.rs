use chrono::{DateTime, Utc};

use crate::error::ReportError;
use crate::table::SortSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub image_alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRecord {
    pub issue_id: i64,
    pub user: UserIdentity,
    pub code: String,
    pub emailed: bool,
    pub time_created: DateTime<Utc>,
}

/// Group visibility of a course module. Handed to the store untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupMode {
    #[default]
    NoGroups,
    SeparateGroups,
    VisibleGroups,
}

impl GroupMode {
    pub fn as_i16(self) -> i16 {
        match self {
            GroupMode::NoGroups => 0,
            GroupMode::SeparateGroups => 1,
            GroupMode::VisibleGroups => 2,
        }
    }
}

impl TryFrom<i16> for GroupMode {
    type Error = ReportError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GroupMode::NoGroups),
            1 => Ok(GroupMode::SeparateGroups),
            2 => Ok(GroupMode::VisibleGroups),
            other => Err(ReportError::InvalidGroupMode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleContext {
    pub cm_id: i64,
    pub course_id: i64,
    pub certificate_id: i64,
    pub group_mode: GroupMode,
    /// Group picked by the viewer; `None` means all participants.
    pub active_group: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub certificate_id: i64,
    pub module: ModuleContext,
    pub group_mode: GroupMode,
    pub page_size: u64,
    pub current_page: u64,
    pub sort: SortSpec,
    pub use_initials_bar: bool,
}

impl ReportConfig {
    pub fn for_module(module: ModuleContext, page_size: u64) -> Self {
        Self {
            certificate_id: module.certificate_id,
            group_mode: module.group_mode,
            module,
            page_size,
            current_page: 0,
            sort: SortSpec::default(),
            use_initials_bar: true,
        }
    }
}
