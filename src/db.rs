use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::models::{GroupMode, IssuanceRecord, ModuleContext, UserIdentity};
use crate::report::{COLUMN_FULLNAME, COLUMN_TIMECREATED};
use crate::store::IssuanceStore;
use crate::table::SortSpec;

const CODE_LENGTH: usize = 10;

// $1 = certificate id, $2 = course id.
const ISSUES_FROM: &str = "FROM certificate_report.issues ci \
     JOIN certificate_report.users u ON u.id = ci.user_id \
     JOIN certificate_report.enrolments e \
       ON e.user_id = u.id AND e.course_id = $2 AND e.can_receive_issue \
     WHERE ci.certificate_id = $1 AND NOT u.deleted";

// $3 = group id.
const GROUP_FILTER: &str = " AND EXISTS (SELECT 1 FROM certificate_report.group_members gm \
     WHERE gm.user_id = u.id AND gm.group_id = $3)";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Opaque issue code: ten upper-case hex characters.
pub fn generate_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(CODE_LENGTH);
    code.to_uppercase()
}

/// Loads a demo course with one certificate module. Returns the module id.
pub async fn seed(pool: &PgPool) -> anyhow::Result<i64> {
    let course_id: i64 = sqlx::query(
        r#"
        INSERT INTO certificate_report.courses (shortname, fullname)
        VALUES ($1, $2)
        ON CONFLICT (shortname) DO UPDATE SET fullname = EXCLUDED.fullname
        RETURNING id
        "#,
    )
    .bind("SAFE101")
    .bind("Workplace Safety Fundamentals")
    .fetch_one(pool)
    .await?
    .get("id");

    let existing: Option<i64> = sqlx::query(
        r#"
        SELECT cm.id FROM certificate_report.course_modules cm
        WHERE cm.course_id = $1
        ORDER BY cm.id
        LIMIT 1
        "#,
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await?
    .map(|row| row.get("id"));

    let (cm_id, certificate_id) = match existing {
        Some(cm_id) => {
            let certificate_id: i64 = sqlx::query(
                "SELECT certificate_id FROM certificate_report.course_modules WHERE id = $1",
            )
            .bind(cm_id)
            .fetch_one(pool)
            .await?
            .get("certificate_id");
            (cm_id, certificate_id)
        }
        None => {
            let certificate_id: i64 = sqlx::query(
                r#"
                INSERT INTO certificate_report.certificates (course_id, name)
                VALUES ($1, $2)
                RETURNING id
                "#,
            )
            .bind(course_id)
            .bind("Certificate of completion")
            .fetch_one(pool)
            .await?
            .get("id");

            let cm_id: i64 = sqlx::query(
                r#"
                INSERT INTO certificate_report.course_modules (course_id, certificate_id, group_mode)
                VALUES ($1, $2, $3)
                RETURNING id
                "#,
            )
            .bind(course_id)
            .bind(certificate_id)
            .bind(GroupMode::SeparateGroups.as_i16())
            .fetch_one(pool)
            .await?
            .get("id");
            (cm_id, certificate_id)
        }
    };

    let mut group_ids = Vec::new();
    for name in ["Morning cohort", "Evening cohort"] {
        let group_id: i64 = sqlx::query(
            r#"
            INSERT INTO certificate_report.groups (course_id, name)
            VALUES ($1, $2)
            ON CONFLICT (course_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(course_id)
        .bind(name)
        .fetch_one(pool)
        .await?
        .get("id");
        group_ids.push(group_id);
    }

    // (first, last, email, group index, may receive, issued days ago, code)
    let learners = vec![
        ("Ana", "Silva", "ana.silva@example.edu", 0, true, Some(12), "3F9A1C77B2"),
        ("Bram", "de Vries", "bram.devries@example.edu", 0, true, Some(9), "8D04E6A1C5"),
        ("Chidi", "Okafor", "chidi.okafor@example.edu", 1, true, Some(6), "B71C29F0E4"),
        ("Dana", "Levi", "dana.levi@example.edu", 1, true, Some(2), "0A5E3D9B61"),
        ("Eun-ji", "Park", "eunji.park@example.edu", 0, true, None, ""),
        ("Farah", "Haddad", "farah.haddad@example.edu", 1, false, Some(20), "E2C8F5A03D"),
    ];

    let now = Utc::now();
    for (first, last, email, group, may_receive, issued_days_ago, code) in learners {
        let user_id: i64 = sqlx::query(
            r#"
            INSERT INTO certificate_report.users (firstname, lastname, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET firstname = EXCLUDED.firstname, lastname = EXCLUDED.lastname
            RETURNING id
            "#,
        )
        .bind(first)
        .bind(last)
        .bind(email)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO certificate_report.enrolments (course_id, user_id, can_receive_issue)
            VALUES ($1, $2, $3)
            ON CONFLICT (course_id, user_id) DO UPDATE
            SET can_receive_issue = EXCLUDED.can_receive_issue
            "#,
        )
        .bind(course_id)
        .bind(user_id)
        .bind(may_receive)
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO certificate_report.group_members (group_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_ids[group])
        .bind(user_id)
        .execute(pool)
        .await?;

        if let Some(days_ago) = issued_days_ago {
            sqlx::query(
                r#"
                INSERT INTO certificate_report.issues (certificate_id, user_id, code, emailed, time_created)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(certificate_id)
            .bind(user_id)
            .bind(code)
            .bind(days_ago > 7)
            .bind(now - Duration::days(days_ago))
            .execute(pool)
            .await?;
        }
    }

    Ok(cm_id)
}

/// Imports issues from CSV. Users are matched by email and enrolled in the
/// certificate's course; rows whose code or user already has an issue are
/// skipped. Returns the number of issues inserted.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        certificate_id: i64,
        email: String,
        firstname: String,
        lastname: String,
        code: Option<String>,
        time_created: Option<DateTime<Utc>>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let user_id: i64 = sqlx::query(
            r#"
            INSERT INTO certificate_report.users (firstname, lastname, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE
            SET firstname = EXCLUDED.firstname, lastname = EXCLUDED.lastname
            RETURNING id
            "#,
        )
        .bind(&row.firstname)
        .bind(&row.lastname)
        .bind(&row.email)
        .fetch_one(pool)
        .await?
        .get("id");

        sqlx::query(
            r#"
            INSERT INTO certificate_report.enrolments (course_id, user_id)
            SELECT c.course_id, $2 FROM certificate_report.certificates c WHERE c.id = $1
            ON CONFLICT (course_id, user_id) DO NOTHING
            "#,
        )
        .bind(row.certificate_id)
        .bind(user_id)
        .execute(pool)
        .await?;

        let code = row
            .code
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(generate_code);

        let result = sqlx::query(
            r#"
            INSERT INTO certificate_report.issues (certificate_id, user_id, code, time_created)
            VALUES ($1, $2, $3, COALESCE($4, NOW()))
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(row.certificate_id)
        .bind(user_id)
        .bind(&code)
        .bind(row.time_created)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn load_module_context(
    pool: &PgPool,
    cm_id: i64,
    active_group: Option<i64>,
) -> anyhow::Result<ModuleContext> {
    let row = sqlx::query(
        "SELECT id, course_id, certificate_id, group_mode \
         FROM certificate_report.course_modules WHERE id = $1",
    )
    .bind(cm_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("course module {cm_id} does not exist"))?;

    let group_mode: i16 = row.get("group_mode");
    Ok(ModuleContext {
        cm_id: row.get("id"),
        course_id: row.get("course_id"),
        certificate_id: row.get("certificate_id"),
        group_mode: GroupMode::try_from(group_mode)?,
        active_group,
    })
}

/// Group to restrict to, if any. Without a group mode the viewer's group
/// selection is ignored.
fn group_scope(group_mode: GroupMode, module: &ModuleContext) -> Option<i64> {
    match group_mode {
        GroupMode::NoGroups => None,
        GroupMode::SeparateGroups | GroupMode::VisibleGroups => module.active_group,
    }
}

fn scoped_query(select: &str, group: Option<i64>) -> String {
    let mut query = format!("SELECT {select} {ISSUES_FROM}");
    if group.is_some() {
        query.push_str(GROUP_FILTER);
    }
    query
}

/// Translates a validated sort into SQL through a fixed column whitelist.
/// The issue id always breaks ties so pages never overlap.
pub fn order_by_clause(sort: &SortSpec) -> String {
    let mut terms = Vec::new();
    for key in sort.keys() {
        let direction = key.direction.as_sql();
        match key.column.as_str() {
            COLUMN_FULLNAME => {
                terms.push(format!("u.firstname {direction}"));
                terms.push(format!("u.lastname {direction}"));
            }
            COLUMN_TIMECREATED => terms.push(format!("ci.time_created {direction}")),
            _ => {}
        }
    }
    if terms.is_empty() {
        terms.push("ci.time_created ASC".to_string());
    }
    terms.push("ci.id ASC".to_string());
    terms.join(", ")
}

#[derive(Clone)]
pub struct PgIssuanceStore {
    pool: PgPool,
}

impl PgIssuanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl IssuanceStore for PgIssuanceStore {
    async fn count_issues(
        &self,
        certificate_id: i64,
        module: &ModuleContext,
        group_mode: GroupMode,
    ) -> anyhow::Result<u64> {
        let group = group_scope(group_mode, module);
        let query = scoped_query("COUNT(ci.id) AS total", group);

        let mut rows = sqlx::query(&query)
            .bind(certificate_id)
            .bind(module.course_id);
        if let Some(group_id) = group {
            rows = rows.bind(group_id);
        }

        let total: i64 = rows.fetch_one(&self.pool).await?.get("total");
        debug!(certificate_id, ?group, total, "counted issues");
        u64::try_from(total).context("negative issue count")
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
        let group = group_scope(group_mode, module);
        let mut query = scoped_query(
            "u.id AS user_id, u.firstname, u.lastname, u.email, u.image_alt, \
             ci.id AS issue_id, ci.code, ci.emailed, ci.time_created",
            group,
        );
        let next_param = if group.is_some() { 4 } else { 3 };
        query.push_str(&format!(
            " ORDER BY {} OFFSET ${} LIMIT ${}",
            order_by_clause(sort),
            next_param,
            next_param + 1
        ));

        let offset = i64::try_from(offset).context("offset out of range")?;
        let limit = limit
            .map(i64::try_from)
            .transpose()
            .context("limit out of range")?;

        let mut rows = sqlx::query(&query)
            .bind(certificate_id)
            .bind(module.course_id);
        if let Some(group_id) = group {
            rows = rows.bind(group_id);
        }
        let records = rows.bind(offset).bind(limit).fetch_all(&self.pool).await?;

        let mut issues = Vec::with_capacity(records.len());
        for row in records {
            issues.push(IssuanceRecord {
                issue_id: row.get("issue_id"),
                user: UserIdentity {
                    id: row.get("user_id"),
                    firstname: row.get("firstname"),
                    lastname: row.get("lastname"),
                    email: row.get("email"),
                    image_alt: row.get("image_alt"),
                },
                code: row.get("code"),
                emailed: row.get("emailed"),
                time_created: row.get("time_created"),
            });
        }

        debug!(certificate_id, offset, ?limit, rows = issues.len(), "fetched issues");
        Ok(issues)
    }
}
