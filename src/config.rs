use std::env::vars;

use anyhow::Context;
use serde::Deserialize;

use crate::format::{DateFormatter, DEFAULT_DATE_FORMAT};
use crate::identity::NameFormat;
use crate::logging::LogFormat;

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const DEFAULT_SITE_URL: &str = "http://localhost";

#[derive(Debug, Deserialize)]
struct RawConfig {
    database_url: String,
    site_url: Option<String>,
    report_page_size: Option<u64>,
    report_date_format: Option<String>,
    report_utc_offset_minutes: Option<i32>,
    report_name_format: Option<String>,
    log_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    database_url: String,
    site_url: String,
    page_size: u64,
    dates: DateFormatter,
    name_format: NameFormat,
    log_format: LogFormat,
}

impl Config {
    /// Reads configuration from environment variables.
    pub fn init() -> anyhow::Result<Self> {
        let raw: RawConfig = serde_env::from_iter(vars())
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
        let RawConfig {
            database_url,
            site_url,
            report_page_size,
            report_date_format,
            report_utc_offset_minutes,
            report_name_format,
            log_format,
        } = raw;

        let page_size = report_page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            anyhow::bail!("REPORT_PAGE_SIZE must be greater than zero");
        }

        let dates = DateFormatter::new(
            report_date_format.unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
            report_utc_offset_minutes.unwrap_or(0),
        )
        .context("invalid REPORT_DATE_FORMAT or REPORT_UTC_OFFSET_MINUTES")?;

        let name_format = match report_name_format {
            Some(value) => value
                .parse::<NameFormat>()
                .context("invalid REPORT_NAME_FORMAT")?,
            None => NameFormat::default(),
        };

        Ok(Self {
            database_url,
            site_url: site_url.unwrap_or_else(|| DEFAULT_SITE_URL.to_string()),
            page_size,
            dates,
            name_format,
            log_format: log_format
                .as_deref()
                .map(LogFormat::parse)
                .unwrap_or(LogFormat::Compact),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn site_url(&self) -> &str {
        &self.site_url
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn dates(&self) -> &DateFormatter {
        &self.dates
    }

    pub fn name_format(&self) -> NameFormat {
        self.name_format
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
