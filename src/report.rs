use std::io::Write;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ReportError;
use crate::format::{escape_html, DateFormatter};
use crate::identity::IdentityFormatter;
use crate::models::{GroupMode, IssuanceRecord, ModuleContext, ReportConfig};
use crate::session::SessionLock;
use crate::store::IssuanceStore;
use crate::table::export::write_export;
use crate::table::{ExportFormat, Table, TabularReport};

pub const REPORT_ID: &str = "certificate_issue_report";

pub const COLUMN_FULLNAME: &str = "fullname";
pub const COLUMN_TIMECREATED: &str = "timecreated";
pub const COLUMN_CODE: &str = "code";

#[derive(Debug, Clone)]
pub struct Labels {
    pub caption: String,
    pub full_name: String,
    pub date_received: String,
    pub code: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            caption: "Issued certificates".to_string(),
            full_name: "Full name".to_string(),
            date_received: "Date received".to_string(),
            code: "Code".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub total: u64,
    pub rows: usize,
}

/// Issued certificates of one certificate module, one page or one export at
/// a time.
pub struct IssuanceReportTable<S, I> {
    table: Table,
    certificate_id: i64,
    module: ModuleContext,
    group_mode: GroupMode,
    store: S,
    identity: I,
    dates: DateFormatter,
    rows: Vec<IssuanceRecord>,
}

impl<S, I> IssuanceReportTable<S, I>
where
    S: IssuanceStore,
    I: IdentityFormatter,
{
    pub fn new(
        certificate_id: i64,
        module: ModuleContext,
        group_mode: GroupMode,
        store: S,
        identity: I,
        dates: DateFormatter,
        labels: &Labels,
    ) -> Result<Self, ReportError> {
        let mut table = Table::new(REPORT_ID);
        table.set_caption(labels.caption.as_str());
        table.define_columns([COLUMN_FULLNAME, COLUMN_TIMECREATED, COLUMN_CODE]);
        table.define_headers([
            labels.full_name.as_str(),
            labels.date_received.as_str(),
            labels.code.as_str(),
        ])?;
        table.collapsible(false);
        table.sortable(true);
        table.no_sorting(COLUMN_CODE);
        table.is_downloadable(true);

        Ok(Self {
            table,
            certificate_id,
            module,
            group_mode,
            store,
            identity,
            dates,
            rows: Vec::new(),
        })
    }

    /// Builds the report and applies the requested page and sort.
    pub fn from_config(
        config: &ReportConfig,
        store: S,
        identity: I,
        dates: DateFormatter,
        labels: &Labels,
    ) -> Result<Self, ReportError> {
        let mut report = Self::new(
            config.certificate_id,
            config.module.clone(),
            config.group_mode,
            store,
            identity,
            dates,
            labels,
        )?;
        report.table.set_current_page(config.current_page);
        report.table.set_sort_request(config.sort.clone());
        Ok(report)
    }

    /// Avatar markup followed by the escaped display name.
    pub fn format_full_name(&self, record: &IssuanceRecord) -> String {
        format!(
            "{} {}",
            self.identity.user_picture(&record.user),
            escape_html(&self.identity.full_name(&record.user))
        )
    }

    pub fn format_time_created(&self, record: &IssuanceRecord) -> String {
        self.dates.userdate(record.time_created)
    }

    pub fn format_code(&self, record: &IssuanceRecord) -> String {
        record.code.clone()
    }

    /// Loads one page of issues and decides whether the initials bar is worth
    /// showing.
    pub async fn query_page(&mut self, page_size: u64, use_initials_bar: bool) -> anyhow::Result<()> {
        if page_size == 0 {
            return Err(ReportError::ZeroPageSize.into());
        }

        let total = self
            .store
            .count_issues(self.certificate_id, &self.module, self.group_mode)
            .await?;

        self.table.pagesize(page_size, total);

        let sort = self.table.sql_sort();
        self.rows = self
            .store
            .fetch_issues(
                self.certificate_id,
                self.group_mode,
                &self.module,
                self.table.page_start(),
                self.table.page_limit(),
                &sort,
            )
            .await?;

        if use_initials_bar {
            self.table.initials_bar(total > page_size);
        }

        debug!(
            certificate_id = self.certificate_id,
            total,
            page = self.table.current_page(),
            rows = self.rows.len(),
            "loaded report page"
        );
        Ok(())
    }

    /// Streams every issue to `writer` in `format`. The session lock is
    /// released before any data is read.
    pub async fn download<L, W>(
        &mut self,
        session: &mut L,
        format: ExportFormat,
        writer: W,
    ) -> anyhow::Result<ExportSummary>
    where
        L: SessionLock,
        W: Write,
    {
        if !self.table.downloadable() {
            return Err(ReportError::NotDownloadable(self.table.unique_id().to_string()).into());
        }

        session
            .write_close()
            .await
            .context("failed to release the session lock")?;

        self.table.set_downloading(format);
        let total = self
            .store
            .count_issues(self.certificate_id, &self.module, self.group_mode)
            .await?;
        self.table.pagesize(total, total);

        let sort = self.table.sql_sort();
        self.rows = self
            .store
            .fetch_issues(
                self.certificate_id,
                self.group_mode,
                &self.module,
                self.table.page_start(),
                self.table.page_limit(),
                &sort,
            )
            .await?;

        let rows = write_export(&*self, format, writer)
            .with_context(|| format!("failed to write {} export", format.extension()))?;

        info!(
            certificate_id = self.certificate_id,
            total,
            rows,
            format = format.extension(),
            "export complete"
        );
        Ok(ExportSummary {
            format,
            total,
            rows,
        })
    }
}

impl<S, I> TabularReport for IssuanceReportTable<S, I>
where
    S: IssuanceStore,
    I: IdentityFormatter,
{
    type Row = IssuanceRecord;

    fn table(&self) -> &Table {
        &self.table
    }

    fn rows(&self) -> &[IssuanceRecord] {
        &self.rows
    }

    fn format_cell(&self, row: &IssuanceRecord, column: &str) -> String {
        match column {
            COLUMN_FULLNAME => self.format_full_name(row),
            COLUMN_TIMECREATED => escape_html(&self.format_time_created(row)),
            COLUMN_CODE => escape_html(&self.format_code(row)),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::identity::{HtmlIdentityFormatter, NameFormat};
    use crate::models::UserIdentity;
    use crate::session::mock::RecordingSession;
    use crate::store::mock::{RecordingStore, StoreCall};
    use crate::table::html::render_page;
    use crate::table::SortSpec;

    const NAMES: [(&str, &str); 6] = [
        ("Ana", "Silva"),
        ("Bram", "de Vries"),
        ("Chidi", "Okafor"),
        ("Dana", "Levi"),
        ("Eun-ji", "Park"),
        ("Farah", "Haddad"),
    ];

    fn module() -> ModuleContext {
        ModuleContext {
            cm_id: 31,
            course_id: 4,
            certificate_id: 7,
            group_mode: GroupMode::SeparateGroups,
            active_group: Some(12),
        }
    }

    fn records(count: usize) -> Vec<IssuanceRecord> {
        let base = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 0).unwrap();
        (0..count)
            .map(|index| {
                let (first, last) = NAMES[index % NAMES.len()];
                IssuanceRecord {
                    issue_id: index as i64 + 1,
                    user: UserIdentity {
                        id: 100 + index as i64,
                        firstname: first.to_string(),
                        lastname: last.to_string(),
                        email: format!("{}{}@example.edu", first.to_lowercase(), index),
                        image_alt: None,
                    },
                    code: format!("CODE{:06}", index),
                    emailed: index % 2 == 0,
                    time_created: base + Duration::hours(index as i64),
                }
            })
            .collect()
    }

    fn report(
        store: RecordingStore,
    ) -> IssuanceReportTable<RecordingStore, HtmlIdentityFormatter> {
        let module = module();
        IssuanceReportTable::new(
            module.certificate_id,
            module.clone(),
            module.group_mode,
            store,
            HtmlIdentityFormatter::new("https://lms.example.edu", NameFormat::FirstLast),
            DateFormatter::default(),
            &Labels::default(),
        )
        .unwrap()
    }

    fn fetch_window(call: &StoreCall) -> (u64, Option<u64>) {
        match call {
            StoreCall::Fetch { offset, limit, .. } => (*offset, *limit),
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[test]
    fn construction_registers_fixed_columns_without_io() {
        let store = RecordingStore::with_records(records(3));
        let report = report(store.clone());

        let columns = report.table().columns();
        let keys: Vec<&str> = columns.iter().map(|c| c.key.as_str()).collect();
        let headers: Vec<&str> = columns.iter().map(|c| c.header.as_str()).collect();
        let sortable: Vec<bool> = columns.iter().map(|c| c.sortable).collect();

        assert_eq!(keys, vec!["fullname", "timecreated", "code"]);
        assert_eq!(headers, vec!["Full name", "Date received", "Code"]);
        assert_eq!(sortable, vec![true, true, false]);
        assert_eq!(report.table().unique_id(), REPORT_ID);
        assert!(!report.table().is_collapsible());
        assert!(report.table().downloadable());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn query_page_counts_once_and_fetches_one_page() {
        let store = RecordingStore::with_records(records(25));
        let mut report = report(store.clone());
        report.table.set_current_page(2);

        report.query_page(10, true).await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            StoreCall::Count {
                certificate_id: 7,
                module: module(),
                group_mode: GroupMode::SeparateGroups,
            }
        );
        let (offset, limit) = fetch_window(&calls[1]);
        assert_eq!(offset, 20);
        assert_eq!(limit, Some(10));
        assert_eq!(offset % 10, 0);
        assert_eq!(report.rows().len(), 5);
    }

    #[tokio::test]
    async fn page_past_the_end_fetches_last_page() {
        let store = RecordingStore::with_records(records(25));
        let mut report = report(store.clone());
        report.table.set_current_page(7);

        report.query_page(10, true).await.unwrap();

        assert_eq!(fetch_window(&store.calls()[1]), (20, Some(10)));
    }

    #[tokio::test]
    async fn initials_bar_hidden_when_everything_fits() {
        let mut report = report(RecordingStore::with_records(records(5)));
        report.query_page(10, true).await.unwrap();
        assert!(!report.table().shows_initials_bar());
    }

    #[tokio::test]
    async fn initials_bar_shown_when_rows_span_pages() {
        let mut report = report(RecordingStore::with_records(records(25)));
        report.query_page(10, true).await.unwrap();
        assert!(report.table().shows_initials_bar());
    }

    #[tokio::test]
    async fn initials_bar_left_alone_when_not_requested() {
        let mut report = report(RecordingStore::with_records(records(25)));
        report.query_page(10, false).await.unwrap();
        assert!(!report.table().shows_initials_bar());
    }

    #[tokio::test]
    async fn no_issues_yields_empty_page_without_initials_bar() {
        let store = RecordingStore::with_records(Vec::new());
        let mut report = report(store.clone());

        report.query_page(10, true).await.unwrap();

        assert!(report.rows().is_empty());
        assert!(!report.table().shows_initials_bar());
        assert_eq!(store.calls().len(), 2);
        assert!(render_page(&report).contains("Nothing to display"));
    }

    #[tokio::test]
    async fn query_page_passes_only_sortable_columns() {
        let store = RecordingStore::with_records(records(3));
        let mut report = report(store.clone());
        report
            .table
            .set_sort_request("code,-timecreated".parse().unwrap());

        report.query_page(10, true).await.unwrap();

        match &store.calls()[1] {
            StoreCall::Fetch { sort, .. } => {
                let expected: SortSpec = "-timecreated".parse().unwrap();
                assert_eq!(sort, &expected);
            }
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected_before_any_read() {
        let store = RecordingStore::with_records(records(3));
        let mut report = report(store.clone());

        let err = report.query_page(0, true).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<ReportError>(),
            Some(&ReportError::ZeroPageSize)
        );
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn store_failure_aborts_without_retry() {
        let store = RecordingStore::failing("connection refused");
        let mut report = report(store.clone());

        let err = report.query_page(10, true).await.unwrap_err();

        assert!(err.to_string().contains("connection refused"));
        assert_eq!(store.calls().len(), 1);
        assert!(report.rows().is_empty());
    }

    #[test]
    fn full_name_is_picture_space_name() {
        let report = report(RecordingStore::default());
        let records = records(1);
        let record = &records[0];

        let cell = report.format_full_name(record);
        let picture = report.identity.user_picture(&record.user);

        assert!(cell.starts_with(&picture));
        assert!(cell.ends_with(" Ana Silva"));
        assert_eq!(cell, format!("{picture} Ana Silva"));
    }

    #[test]
    fn date_and_code_cells() {
        let report = report(RecordingStore::default());
        let records = records(1);
        let record = &records[0];

        assert_eq!(
            report.format_cell(record, COLUMN_TIMECREATED),
            "Tuesday, 5 March 2024, 2:07 PM"
        );
        assert_eq!(report.format_cell(record, COLUMN_CODE), "CODE000000");
        assert_eq!(report.format_cell(record, "email"), "");
    }

    #[tokio::test]
    async fn download_releases_session_then_exports_everything() {
        let store = RecordingStore::with_records(records(12));
        let mut session = RecordingSession::watching(&store);
        let mut report = report(store.clone());
        report.table.set_current_page(1);

        let mut output = Vec::new();
        let summary = report
            .download(&mut session, ExportFormat::Csv, &mut output)
            .await
            .unwrap();

        assert_eq!(session.released_after_calls, Some(0));
        assert_eq!(session.close_count, 1);

        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            StoreCall::Count {
                certificate_id: 7,
                module: module(),
                group_mode: GroupMode::SeparateGroups,
            }
        );
        assert_eq!(fetch_window(&calls[1]), (0, None));

        assert_eq!(summary.total, 12);
        assert_eq!(summary.rows, 12);

        let csv = String::from_utf8(output).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Full name,Date received,Code"));
        assert_eq!(
            lines.next(),
            Some("Ana Silva,\"Tuesday, 5 March 2024, 2:07 PM\",CODE000000")
        );
        assert_eq!(csv.lines().count(), 13);
        assert!(!csv.contains("<img"));
    }

    #[tokio::test]
    async fn download_counts_like_query_page() {
        let paged_store = RecordingStore::with_records(records(4));
        let mut paged = report(paged_store.clone());
        paged.query_page(2, true).await.unwrap();

        let export_store = RecordingStore::with_records(records(4));
        let mut exported = report(export_store.clone());
        let mut session = RecordingSession::watching(&export_store);
        exported
            .download(&mut session, ExportFormat::Json, std::io::sink())
            .await
            .unwrap();

        assert_eq!(paged_store.calls()[0], export_store.calls()[0]);
    }

    #[tokio::test]
    async fn download_failure_still_released_session() {
        let store = RecordingStore::failing("timeout");
        let mut session = RecordingSession::watching(&store);
        let mut report = report(store.clone());

        let result = report
            .download(&mut session, ExportFormat::Csv, std::io::sink())
            .await;

        assert!(result.is_err());
        assert_eq!(session.close_count, 1);
    }

    fn angle_bracket_record() -> IssuanceRecord {
        let mut record = records(1).remove(0);
        record.user.lastname = "<Silva>".to_string();
        record.code = "AB<12>CD".to_string();
        record
    }

    #[tokio::test]
    async fn angle_brackets_survive_csv_download() {
        let store = RecordingStore::with_records(vec![angle_bracket_record()]);
        let mut session = RecordingSession::watching(&store);
        let mut report = report(store);

        let mut output = Vec::new();
        report
            .download(&mut session, ExportFormat::Csv, &mut output)
            .await
            .unwrap();

        let csv = String::from_utf8(output).unwrap();
        assert_eq!(
            csv,
            "Full name,Date received,Code\nAna <Silva>,\"Tuesday, 5 March 2024, 2:07 PM\",AB<12>CD\n"
        );
    }

    #[tokio::test]
    async fn angle_brackets_are_escaped_on_the_page() {
        let mut report = report(RecordingStore::with_records(vec![angle_bracket_record()]));
        report.query_page(10, false).await.unwrap();

        let page = render_page(&report);

        assert!(!page.contains("<Silva>"));
        assert!(!page.contains("AB<12>CD"));
        assert!(page.contains(" Ana &lt;Silva&gt;</td>"));
        assert!(page.contains("<td class=\"cell c-code\">AB&lt;12&gt;CD</td>"));
        assert_eq!(report.format_code(&report.rows()[0]), "AB<12>CD");
    }

    #[tokio::test]
    async fn download_refused_when_table_not_downloadable() {
        let store = RecordingStore::with_records(records(3));
        let mut session = RecordingSession::watching(&store);
        let mut report = report(store.clone());
        report.table.is_downloadable(false);

        let err = report
            .download(&mut session, ExportFormat::Csv, std::io::sink())
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<ReportError>(),
            Some(&ReportError::NotDownloadable(REPORT_ID.to_string()))
        );
        assert_eq!(session.close_count, 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn export_summary_serializes_as_json() {
        let store = RecordingStore::with_records(records(3));
        let mut session = RecordingSession::watching(&store);
        let mut report = report(store);

        let summary = report
            .download(&mut session, ExportFormat::Json, std::io::sink())
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            serde_json::json!({ "format": "json", "total": 3, "rows": 3 })
        );
    }
}
