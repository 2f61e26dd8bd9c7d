//! Read access to certificate issues.

use std::future::Future;

use crate::models::{GroupMode, IssuanceRecord, ModuleContext};
use crate::table::SortSpec;

pub trait IssuanceStore {
    /// Number of issues of `certificate_id` visible in `module` under `group_mode`.
    fn count_issues(
        &self,
        certificate_id: i64,
        module: &ModuleContext,
        group_mode: GroupMode,
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;

    /// One window of issues. `limit` of `None` returns everything from `offset` on.
    fn fetch_issues(
        &self,
        certificate_id: i64,
        group_mode: GroupMode,
        module: &ModuleContext,
        offset: u64,
        limit: Option<u64>,
        sort: &SortSpec,
    ) -> impl Future<Output = anyhow::Result<Vec<IssuanceRecord>>> + Send;
}

#[cfg(test)]
pub mod mock {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum StoreCall {
        Count {
            certificate_id: i64,
            module: ModuleContext,
            group_mode: GroupMode,
        },
        Fetch {
            certificate_id: i64,
            group_mode: GroupMode,
            module: ModuleContext,
            offset: u64,
            limit: Option<u64>,
            sort: SortSpec,
        },
    }

    /// In-memory store that slices a fixed row list and records every call.
    #[derive(Clone, Default)]
    pub struct RecordingStore {
        records: Arc<Vec<IssuanceRecord>>,
        calls: Arc<Mutex<Vec<StoreCall>>>,
        fail_with: Option<&'static str>,
    }

    impl RecordingStore {
        pub fn with_records(records: Vec<IssuanceRecord>) -> Self {
            Self {
                records: Arc::new(records),
                ..Self::default()
            }
        }

        pub fn failing(message: &'static str) -> Self {
            Self {
                fail_with: Some(message),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<StoreCall> {
            self.calls.lock().expect("lock poisoned").clone()
        }

        fn record(&self, call: StoreCall) {
            self.calls.lock().expect("lock poisoned").push(call);
        }
    }

    impl IssuanceStore for RecordingStore {
        async fn count_issues(
            &self,
            certificate_id: i64,
            module: &ModuleContext,
            group_mode: GroupMode,
        ) -> anyhow::Result<u64> {
            self.record(StoreCall::Count {
                certificate_id,
                module: module.clone(),
                group_mode,
            });
            if let Some(message) = self.fail_with {
                anyhow::bail!(message);
            }
            Ok(self.records.len() as u64)
        }

        async fn fetch_issues(
            &self,
            certificate_id: i64,
            group_mode: GroupMode,
            module: &ModuleContext,
            offset: u64,
            limit: Option<u64>,
            sort: &SortSpec,
        ) -> anyhow::Result<Vec<IssuanceRecord>> {
            self.record(StoreCall::Fetch {
                certificate_id,
                group_mode,
                module: module.clone(),
                offset,
                limit,
                sort: sort.clone(),
            });
            if let Some(message) = self.fail_with {
                anyhow::bail!(message);
            }
            let rows = self
                .records
                .iter()
                .skip(offset as usize)
                .take(limit.map_or(usize::MAX, |limit| limit as usize))
                .cloned()
                .collect();
            Ok(rows)
        }
    }
}
