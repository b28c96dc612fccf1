use chrono::NaiveDate;

use crate::models::{
    format_date, parse_date, Application, CvVersion, Location, Platform, Status,
};

pub const HEADERS: [&str; 13] = [
    "Company",
    "Position",
    "Platform",
    "Location",
    "Date Applied",
    "Status",
    "Salary",
    "Job URL",
    "Contact Person",
    "CV Version",
    "Follow-up Date",
    "Notes",
    "Last Update",
];

/// How fields are quoted on export and split on import.
///
/// `Legacy` matches files written by older versions: only notes are quoted,
/// and import splits on every comma. `Standard` writes the same layout but
/// quotes any field that needs it and reads quoted fields properly, so
/// legacy files without embedded commas import identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Standard,
    Legacy,
}

pub fn export_file_name(today: NaiveDate) -> String {
    format!("job_applications_{}.csv", today.format("%Y-%m-%d"))
}

pub fn export(apps: &[Application], dialect: Dialect) -> String {
    let mut lines = Vec::with_capacity(apps.len() + 1);
    lines.push(HEADERS.join(","));
    for app in apps {
        lines.push(export_row(app, dialect));
    }
    lines.join("\n")
}

fn export_row(app: &Application, dialect: Dialect) -> String {
    let cells = [
        app.company.clone(),
        app.position.clone(),
        app.platform_or_default().to_string(),
        label(&app.location),
        format_date(app.date_applied),
        app.status.to_string(),
        app.salary.clone(),
        app.job_url.clone(),
        app.contact_person.clone(),
        label(&app.cv_version),
        format_date(app.follow_up_date),
        app.notes.clone(),
        format_date(app.last_update),
    ];

    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            if i == NOTES_COLUMN {
                quote(cell)
            } else {
                match dialect {
                    Dialect::Legacy => cell.clone(),
                    Dialect::Standard if needs_quoting(cell) => quote(cell),
                    Dialect::Standard => cell.clone(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

const NOTES_COLUMN: usize = 11;

fn label<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn needs_quoting(cell: &str) -> bool {
    cell.contains([',', '"', '\n', '\r'])
}

fn quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('"', "\"\""))
}

/// Parses exported text back into unsaved applications (id 0, `lastUpdate`
/// = `today`). Never fails: blank lines are skipped and short rows leave
/// their trailing fields empty.
pub fn import(text: &str, dialect: Dialect, today: NaiveDate) -> Vec<Application> {
    let text = text.trim_start_matches('\u{feff}');
    let records = match dialect {
        Dialect::Legacy => legacy_records(text),
        Dialect::Standard => standard_records(text),
    };

    records
        .into_iter()
        .skip(1)
        .filter(|cells| !is_blank_line(cells))
        .map(|cells| to_application(&cells, today))
        .collect()
}

/// Only a line with nothing but whitespace is blank; a row of empty
/// delimited cells still becomes a record.
fn is_blank_line(cells: &[String]) -> bool {
    matches!(cells, [only] if only.trim().is_empty())
}

fn legacy_records(text: &str) -> Vec<Vec<String>> {
    text.lines()
        .map(|line| line.split(',').map(strip_quotes).collect())
        .collect()
}

fn strip_quotes(cell: &str) -> String {
    if cell.len() >= 2 && cell.starts_with('"') && cell.ends_with('"') {
        cell[1..cell.len() - 1].replace("\"\"", "\"")
    } else {
        cell.replace('"', "")
    }
}

fn standard_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            // A quote only opens a quoted field at its start; elsewhere it
            // is literal text.
            '"' if field.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

fn to_application(cells: &[String], today: NaiveDate) -> Application {
    let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
    let choice = |i: usize| Some(cell(i).trim()).filter(|s| !s.is_empty()).map(str::to_string);

    Application {
        id: 0,
        company: cell(0).to_string(),
        position: cell(1).to_string(),
        platform: Some(choice(2).map(Platform::from).unwrap_or(Platform::LinkedIn)),
        location: choice(3).map(Location::from),
        date_applied: parse_date(cell(4)),
        status: choice(5).map(Status::from).unwrap_or_default(),
        salary: cell(6).to_string(),
        job_url: cell(7).to_string(),
        contact_person: cell(8).to_string(),
        cv_version: choice(9).map(CvVersion::from),
        follow_up_date: parse_date(cell(10)),
        notes: cell(11).to_string(),
        last_update: Some(today),
    }
}
