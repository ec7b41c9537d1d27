use crate::config::TableConfig;
use crate::error::{Result, UngradedError};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Columns kept from the `courseware_studentmodule` dump, in output order.
pub const STUDENT_MODULE_COLUMNS: [&str; 6] =
    ["module_id", "student_id", "state", "created", "modified", "done"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentModuleRecord {
    /// Position among the data rows of the source table (header excluded).
    pub row_index: usize,
    pub module_id: String,
    pub student_id: Option<String>,
    pub state: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub done: Option<String>,
}

impl StudentModuleRecord {
    /// Kept columns in `STUDENT_MODULE_COLUMNS` order.
    pub fn fields(&self) -> [Option<&str>; 6] {
        [
            Some(self.module_id.as_str()),
            self.student_id.as_deref(),
            self.state.as_deref(),
            self.created.as_deref(),
            self.modified.as_deref(),
            self.done.as_deref(),
        ]
    }
}

/// Rows retained from the table, grouped by module id.
#[derive(Debug, Default)]
pub struct StudentModuleTable {
    rows_by_module: HashMap<String, Vec<StudentModuleRecord>>,
    pub total_rows: usize,
    pub retained_rows: usize,
    pub warnings: Vec<String>,
}

impl StudentModuleTable {
    pub fn records_for(&self, module_id: &str) -> &[StudentModuleRecord] {
        self.rows_by_module
            .get(module_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn module_count(&self) -> usize {
        self.rows_by_module.len()
    }
}

pub struct StudentModuleReader {
    delimiter: char,
    null_markers: Vec<String>,
}

impl StudentModuleReader {
    pub fn new(config: &TableConfig) -> Self {
        Self {
            delimiter: config.delimiter,
            null_markers: config.null_markers.clone(),
        }
    }

    /// Parse the table, keeping only rows whose `module_id` is in `wanted`.
    pub fn read_filtered(&self, bytes: &[u8], wanted: &HashSet<String>) -> Result<StudentModuleTable> {
        let text = String::from_utf8_lossy(bytes);
        let mut lines = text.lines();

        let header = lines
            .by_ref()
            .find(|line| !line.trim().is_empty())
            .ok_or(UngradedError::EmptyTable)?;
        let columns = self.locate_columns(header)?;
        let width = header.split(self.delimiter).count();

        let mut table = StudentModuleTable::default();
        let mut row_index = 0;
        // physical lines of a record whose quoted field is still open
        let mut pending = String::new();

        for line in lines {
            if pending.is_empty() && line.trim().is_empty() {
                continue;
            }
            if !pending.is_empty() {
                pending.push('\n');
            }
            pending.push_str(line);

            match split_record(&pending, self.delimiter) {
                Some(fields) => {
                    table.total_rows += 1;
                    self.add_row(&mut table, row_index, &fields, width, &columns, wanted);
                }
                None => continue,
            }
            row_index += 1;
            pending.clear();
        }

        if !pending.is_empty() {
            table.total_rows += 1;
            table.warnings.push(format!(
                "Row {}: quoted field is never closed; row skipped",
                row_index
            ));
        }

        tracing::debug!(
            total = table.total_rows,
            retained = table.retained_rows,
            skipped = table.warnings.len(),
            "student module table read"
        );

        Ok(table)
    }

    fn add_row(
        &self,
        table: &mut StudentModuleTable,
        row_index: usize,
        fields: &[Cow<'_, str>],
        width: usize,
        columns: &[usize; 6],
        wanted: &HashSet<String>,
    ) {
        if fields.len() > width {
            table.warnings.push(format!(
                "Row {}: expected {} fields, found {}; row skipped",
                row_index,
                width,
                fields.len()
            ));
            return;
        }

        let Some(module_id) = self.field(fields, columns[0]) else {
            return;
        };
        if !wanted.contains(module_id) {
            return;
        }

        let record = StudentModuleRecord {
            row_index,
            module_id: module_id.to_string(),
            student_id: self.owned_field(fields, columns[1]),
            state: self.owned_field(fields, columns[2]),
            created: self.owned_field(fields, columns[3]),
            modified: self.owned_field(fields, columns[4]),
            done: self.owned_field(fields, columns[5]),
        };

        table.retained_rows += 1;
        table
            .rows_by_module
            .entry(record.module_id.clone())
            .or_default()
            .push(record);
    }

    fn locate_columns(&self, header: &str) -> Result<[usize; 6]> {
        let names: Vec<&str> = header.split(self.delimiter).map(str::trim).collect();
        let mut positions = [0usize; 6];

        for (slot, column) in positions.iter_mut().zip(STUDENT_MODULE_COLUMNS) {
            *slot = names
                .iter()
                .position(|name| *name == column)
                .ok_or_else(|| UngradedError::MissingColumn {
                    column: column.to_string(),
                })?;
        }

        Ok(positions)
    }

    fn field<'a>(&self, fields: &'a [Cow<'_, str>], index: usize) -> Option<&'a str> {
        fields
            .get(index)
            .map(|value| value.as_ref())
            .filter(|value| !self.is_null(value))
    }

    fn owned_field(&self, fields: &[Cow<'_, str>], index: usize) -> Option<String> {
        self.field(fields, index).map(str::to_string)
    }

    fn is_null(&self, value: &str) -> bool {
        self.null_markers.iter().any(|marker| marker == value)
    }
}

/// Split one record on `delimiter`. A field opening with `"` runs to its
/// closing quote and may hold delimiters and line breaks; `""` inside it
/// stands for one quote. `None` means a quoted field is still open.
fn split_record(record: &str, delimiter: char) -> Option<Vec<Cow<'_, str>>> {
    let mut fields = Vec::new();
    let mut rest = record;

    loop {
        let (value, after) = match rest.strip_prefix('"') {
            Some(quoted) => {
                let (unquoted, after) = unquote(quoted)?;
                // anything between the closing quote and the delimiter is kept
                let tail_end = after.find(delimiter).unwrap_or(after.len());
                let mut unquoted = unquoted;
                unquoted.push_str(&after[..tail_end]);
                (Cow::Owned(unquoted), &after[tail_end..])
            }
            None => {
                let end = rest.find(delimiter).unwrap_or(rest.len());
                (Cow::Borrowed(&rest[..end]), &rest[end..])
            }
        };
        fields.push(value);

        match after.strip_prefix(delimiter) {
            Some(next) => rest = next,
            None => return Some(fields),
        }
    }
}

/// Read a quoted field body up to its closing quote, returning the value and
/// the text after the quote.
fn unquote(quoted: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = quoted.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '"' {
            value.push(c);
        } else if matches!(chars.peek(), Some((_, '"'))) {
            value.push('"');
            chars.next();
        } else {
            return Some((value, &quoted[i + 1..]));
        }
    }

    None
}

impl Default for StudentModuleReader {
    fn default() -> Self {
        Self::new(&TableConfig::default())
    }
}
