use std::fmt::Write;

use super::export::EMPTY_TABLE_NOTICE;
use super::{SortDirection, SortSpec, Table, TabularReport};
use crate::format::escape_html;

const INITIALS: std::ops::RangeInclusive<char> = 'A'..='Z';

/// Pages linked on either side of the current one.
const PAGE_WINDOW: u64 = 2;

fn query_string(table: &Table, page: u64, sort: &SortSpec) -> String {
    let mut query = format!("?page={}&perpage={}", page, table.page_size());
    if !sort.is_empty() {
        let _ = write!(query, "&sort={}", sort);
    }
    query
}

fn page_link(table: &Table, page: u64, sort: &SortSpec) -> String {
    escape_html(&query_string(table, page, sort))
}

fn write_initials_bar(output: &mut String, table: &Table, label: &str, param: &str) {
    let base = query_string(table, 0, &table.sql_sort());
    let _ = write!(
        output,
        "<div class=\"initialbar {param}\"><span>{}</span> <a href=\"{}\">All</a>",
        escape_html(label),
        escape_html(&format!("{base}&{param}=")),
    );
    for letter in INITIALS {
        let _ = write!(
            output,
            " <a href=\"{}\">{letter}</a>",
            escape_html(&format!("{base}&{param}={letter}")),
        );
    }
    let _ = writeln!(output, "</div>");
}

fn write_header(output: &mut String, table: &Table) {
    let current_sort = table.sql_sort();
    let _ = writeln!(output, "<thead><tr>");
    for column in table.columns() {
        let header = escape_html(&column.header);
        if !column.sortable {
            let _ = writeln!(output, "<th class=\"header c-{}\">{}</th>", column.key, header);
            continue;
        }
        let indicator = match current_sort.direction_of(&column.key) {
            Some(SortDirection::Asc) => " &#9650;",
            Some(SortDirection::Desc) => " &#9660;",
            None => "",
        };
        let next_sort = current_sort.toggled(&column.key);
        let _ = writeln!(
            output,
            "<th class=\"header c-{}\"><a href=\"{}\">{}</a>{}</th>",
            column.key,
            page_link(table, 0, &next_sort),
            header,
            indicator,
        );
    }
    let _ = writeln!(output, "</tr></thead>");
}

/// Pages to link: the first, the last and a window around `current`. `None`
/// marks a gap.
fn visible_pages(current: u64, pages: u64) -> Vec<Option<u64>> {
    let low = current.saturating_sub(PAGE_WINDOW);
    let high = (current + PAGE_WINDOW).min(pages - 1);

    let mut visible = Vec::new();
    if low > 0 {
        visible.push(Some(0));
        if low > 1 {
            visible.push(None);
        }
    }
    visible.extend((low..=high).map(Some));
    if high + 1 < pages {
        if high + 2 < pages {
            visible.push(None);
        }
        visible.push(Some(pages - 1));
    }
    visible
}

fn write_pagination(output: &mut String, table: &Table) {
    let pages = table.page_count();
    if !table.uses_pages() || pages <= 1 {
        return;
    }
    let current = table.current_page();
    let sort = table.sql_sort();

    let _ = write!(output, "<nav class=\"pagination\">");
    if current > 0 {
        let _ = write!(
            output,
            "<a class=\"previous\" href=\"{}\">Previous</a> ",
            page_link(table, current - 1, &sort)
        );
    }
    for page in visible_pages(current, pages) {
        match page {
            Some(page) if page == current => {
                let _ = write!(output, "<strong>{}</strong> ", page + 1);
            }
            Some(page) => {
                let _ = write!(
                    output,
                    "<a href=\"{}\">{}</a> ",
                    page_link(table, page, &sort),
                    page + 1
                );
            }
            None => {
                let _ = write!(output, "<span class=\"gap\">&hellip;</span> ");
            }
        }
    }
    if current + 1 < pages {
        let _ = write!(
            output,
            "<a class=\"next\" href=\"{}\">Next</a>",
            page_link(table, current + 1, &sort)
        );
    }
    let _ = writeln!(output, "</nav>");
}

/// Interactive page: initials bar, sortable headers, one page of rows and
/// pagination links.
pub fn render_page<R: TabularReport>(report: &R) -> String {
    let table = report.table();
    let columns = table.columns();
    let mut output = String::new();

    let _ = writeln!(
        output,
        "<div class=\"table-report\" id=\"{}\">",
        escape_html(table.unique_id())
    );
    if !table.caption().is_empty() {
        let _ = writeln!(output, "<h2>{}</h2>", escape_html(table.caption()));
    }

    if table.shows_initials_bar() {
        write_initials_bar(&mut output, table, "First name", "tifirst");
        write_initials_bar(&mut output, table, "Last name", "tilast");
    }

    if report.rows().is_empty() {
        let _ = writeln!(output, "<p class=\"notice\">{}</p>", EMPTY_TABLE_NOTICE);
    } else {
        let class = if table.is_collapsible() {
            "generaltable collapsible"
        } else {
            "generaltable"
        };
        let _ = writeln!(output, "<table class=\"{class}\">");
        write_header(&mut output, table);
        let _ = writeln!(output, "<tbody>");
        for row in report.rows() {
            let _ = write!(output, "<tr>");
            for column in &columns {
                let _ = write!(
                    output,
                    "<td class=\"cell c-{}\">{}</td>",
                    column.key,
                    report.format_cell(row, &column.key)
                );
            }
            let _ = writeln!(output, "</tr>");
        }
        let _ = writeln!(output, "</tbody>");
        let _ = writeln!(output, "</table>");
    }

    write_pagination(&mut output, table);
    let _ = writeln!(output, "</div>");

    output
}
