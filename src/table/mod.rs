//! Generic paged, sortable, downloadable table.
//!
//! A report owns a [`Table`] holding column metadata plus pagination and sort
//! state, and implements [`TabularReport`] so the renderers in [`html`] and
//! [`export`] can format it without knowing what the rows are.

use std::collections::BTreeSet;

use crate::error::ReportError;

pub mod export;
pub mod html;
pub mod sort;

pub use export::ExportFormat;
pub use sort::{SortDirection, SortSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub key: String,
    pub header: String,
    pub sortable: bool,
}

pub trait TabularReport {
    type Row;

    fn table(&self) -> &Table;

    fn rows(&self) -> &[Self::Row];

    /// Renders one cell. May return markup; text exporters strip it.
    fn format_cell(&self, row: &Self::Row, column: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct Table {
    unique_id: String,
    caption: String,
    column_keys: Vec<String>,
    headers: Vec<String>,
    collapsible: bool,
    sortable: bool,
    no_sorting: BTreeSet<String>,
    downloadable: bool,
    current_page: u64,
    page_size: u64,
    total_rows: u64,
    use_pages: bool,
    sort_request: SortSpec,
    initials_bar: bool,
    downloading: Option<ExportFormat>,
}

impl Table {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            caption: String::new(),
            column_keys: Vec::new(),
            headers: Vec::new(),
            collapsible: true,
            sortable: false,
            no_sorting: BTreeSet::new(),
            downloadable: false,
            current_page: 0,
            page_size: 0,
            total_rows: 0,
            use_pages: false,
            sort_request: SortSpec::default(),
            initials_bar: false,
            downloading: None,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn caption(&self) -> &str {
        &self.caption
    }

    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.caption = caption.into();
    }

    pub fn define_columns<I, S>(&mut self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_keys = keys.into_iter().map(Into::into).collect();
    }

    /// Headers pair with the columns positionally, so the counts must match.
    pub fn define_headers<I, S>(&mut self, headers: I) -> Result<(), ReportError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        if headers.len() != self.column_keys.len() {
            return Err(ReportError::HeaderMismatch {
                columns: self.column_keys.len(),
                headers: headers.len(),
            });
        }
        self.headers = headers;
        Ok(())
    }

    pub fn columns(&self) -> Vec<ColumnDefinition> {
        self.column_keys
            .iter()
            .zip(&self.headers)
            .map(|(key, header)| ColumnDefinition {
                key: key.clone(),
                header: header.clone(),
                sortable: self.is_sortable(key),
            })
            .collect()
    }

    pub fn collapsible(&mut self, collapsible: bool) {
        self.collapsible = collapsible;
    }

    pub fn is_collapsible(&self) -> bool {
        self.collapsible
    }

    pub fn sortable(&mut self, sortable: bool) {
        self.sortable = sortable;
    }

    pub fn no_sorting(&mut self, column: impl Into<String>) {
        self.no_sorting.insert(column.into());
    }

    pub fn is_sortable(&self, column: &str) -> bool {
        self.sortable
            && !self.no_sorting.contains(column)
            && self.column_keys.iter().any(|key| key == column)
    }

    pub fn is_downloadable(&mut self, downloadable: bool) {
        self.downloadable = downloadable;
    }

    pub fn downloadable(&self) -> bool {
        self.downloadable
    }

    pub fn set_downloading(&mut self, format: ExportFormat) {
        self.downloading = Some(format);
        self.use_pages = false;
    }

    pub fn set_current_page(&mut self, page: u64) {
        self.current_page = page;
    }

    pub fn current_page(&self) -> u64 {
        self.current_page
    }

    pub fn set_sort_request(&mut self, sort: SortSpec) {
        self.sort_request = sort;
    }

    /// Records the page size and row total and turns paging on unless the
    /// table is being downloaded. A current page past the end is pulled back
    /// to the last page.
    pub fn pagesize(&mut self, page_size: u64, total: u64) {
        self.page_size = page_size;
        self.total_rows = total;
        self.use_pages = self.downloading.is_none();

        if page_size > 0 && self.current_page.saturating_mul(page_size) >= total {
            self.current_page = total.div_ceil(page_size).saturating_sub(1);
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn uses_pages(&self) -> bool {
        self.use_pages
    }

    pub fn page_start(&self) -> u64 {
        if self.use_pages {
            self.current_page * self.page_size
        } else {
            0
        }
    }

    /// `None` means every row.
    pub fn page_limit(&self) -> Option<u64> {
        self.use_pages.then_some(self.page_size)
    }

    pub fn page_count(&self) -> u64 {
        if !self.use_pages || self.page_size == 0 {
            return 1;
        }
        self.total_rows.div_ceil(self.page_size).max(1)
    }

    /// The requested sort restricted to columns that may be sorted.
    pub fn sql_sort(&self) -> SortSpec {
        self.sort_request.filtered(|column| self.is_sortable(column))
    }

    pub fn initials_bar(&mut self, show: bool) {
        self.initials_bar = show;
    }

    pub fn shows_initials_bar(&self) -> bool {
        self.initials_bar
    }
}
