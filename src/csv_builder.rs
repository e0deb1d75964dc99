//! Incremental CSV enrichment.
//!
//! [`CsvBuilder`] streams an input table row by row and appends enriched rows
//! to an output table whose header is the input header plus every declared
//! column. The output header is written by the first `append` and is frozen
//! from then on; declaring a new column afterwards is an error.
//!
//! ```ignore
//! let mut builder = CsvBuilder::open("input.csv", "output.csv")?;
//! builder.declare_headers(["title", "h1"])?;
//! for row in builder.rows()? {
//!     let row = row?;
//!     builder.append(row, [("title", "Home")])?;
//! }
//! ```

use crate::error::{EnrichError, Result};
use csv::StringRecord;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const BOM: char = '\u{feff}';

/// One table row: columns in order, each mapped to its text value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    fields: Vec<(String, String)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value of an existing column in place, or appends a new one.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

/// Rewrites line breaks as a literal `\n` so a value stays on one line.
pub fn escape_newlines(value: &str) -> String {
    value.replace("\r\n", "\n").replace('\n', "\\n")
}

fn open_reader(path: &Path) -> Result<(csv::Reader<File>, Vec<String>)> {
    if !path.exists() {
        return Err(EnrichError::NotFound(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches(BOM).to_string()
            } else {
                h.to_string()
            }
        })
        .collect();

    Ok((reader, headers))
}

/// Lazy rows of one pass over the input. The file is released when this is
/// dropped.
pub struct Rows {
    reader: csv::Reader<File>,
    headers: Vec<String>,
    record: StringRecord,
}

impl Iterator for Rows {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.record) {
            Ok(true) => {
                // short records read as empty cells, surplus cells are dropped
                let row = self
                    .headers
                    .iter()
                    .enumerate()
                    .map(|(i, h)| (h.clone(), self.record.get(i).unwrap_or_default().to_string()))
                    .collect();
                Some(Ok(row))
            }
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

pub struct CsvBuilder {
    input_path: PathBuf,
    output_path: PathBuf,
    headers: Vec<String>,
    output_created: bool,
}

impl CsvBuilder {
    /// Reads the input header. Fails with [`EnrichError::NotFound`] when the
    /// input does not exist.
    pub fn open(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<Self> {
        let input_path = input.as_ref().to_path_buf();
        let (_, headers) = open_reader(&input_path)?;
        info!("Opened {:?} with {} columns", input_path, headers.len());

        Ok(CsvBuilder {
            input_path,
            output_path: output.as_ref().to_path_buf(),
            headers,
            output_created: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_created(&self) -> bool {
        self.output_created
    }

    /// Adds columns not seen yet, keeping first-seen order. Once the output
    /// exists only already-known names are accepted.
    pub fn declare_headers<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unseen: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !self.headers.contains(&name) && !unseen.contains(&name) {
                unseen.push(name);
            }
        }

        if unseen.is_empty() {
            return Ok(());
        }
        if self.output_created {
            return Err(EnrichError::HeadersFrozen(unseen));
        }

        debug!("Declared columns: {:?}", unseen);
        self.headers.extend(unseen);
        Ok(())
    }

    /// A fresh pass over the input rows. Each call reopens the file.
    pub fn rows(&self) -> Result<Rows> {
        let (reader, headers) = open_reader(&self.input_path)?;
        Ok(Rows {
            reader,
            headers,
            record: StringRecord::new(),
        })
    }

    /// [`append_with`](Self::append_with) with line breaks escaped.
    pub fn append<I, K, V>(&mut self, row: Row, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.append_with(row, fields, true)
    }

    /// Merges `fields` into `row` (new values win) and writes it as one
    /// record. The first call creates the output and writes the header. The
    /// record is flushed and the file closed before returning.
    pub fn append_with<I, K, V>(&mut self, mut row: Row, fields: I, escape: bool) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if !self.output_created {
            self.create_output()?;
        }

        for (column, value) in fields {
            let value = value.into();
            let value = if escape { escape_newlines(&value) } else { value };
            row.insert(column, value);
        }

        let file = OpenOptions::new().append(true).open(&self.output_path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        // columns outside the frozen header are ignored
        writer.write_record(self.headers.iter().map(|h| row.get(h).unwrap_or_default()))?;
        writer.flush()?;
        Ok(())
    }

    fn create_output(&mut self) -> Result<()> {
        if self.headers.is_empty() {
            return Err(EnrichError::NoHeaders);
        }

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::WriterBuilder::new().from_path(&self.output_path)?;
        writer.write_record(&self.headers)?;
        writer.flush()?;

        self.output_created = true;
        info!("Created {:?} with {} columns", self.output_path, self.headers.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("input.csv");
        fs::write(&path, contents).unwrap();
        path
    }

    fn read_output(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn missing_input_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = CsvBuilder::open(dir.path().join("nope.csv"), dir.path().join("out.csv")).err();
        assert!(matches!(err, Some(EnrichError::NotFound(_))));
    }

    #[test]
    fn strips_byte_order_mark() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "\u{feff}id,url\n1,http://x\n");
        let builder = CsvBuilder::open(&input, dir.path().join("out.csv")).unwrap();

        assert_eq!(builder.headers(), ["id", "url"]);
        let row = builder.rows().unwrap().next().unwrap().unwrap();
        assert_eq!(row.get("id"), Some("1"));
    }

    #[test]
    fn declared_headers_are_deduplicated_in_first_seen_order() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id,url\n");
        let mut builder = CsvBuilder::open(&input, dir.path().join("out.csv")).unwrap();

        builder.declare_headers(["title", "url", "h1"]).unwrap();
        builder.declare_headers(vec!["h1".to_string(), "title".to_string(), "note".to_string()])
            .unwrap();

        assert_eq!(builder.headers(), ["id", "url", "title", "h1", "note"]);
    }

    #[test]
    fn rows_are_restartable() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id,url\n1,a\n2,b\n");
        let builder = CsvBuilder::open(&input, dir.path().join("out.csv")).unwrap();

        let first: Vec<Row> = builder.rows().unwrap().map(|r| r.unwrap()).collect();
        let second: Vec<Row> = builder.rows().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn short_records_read_as_empty_cells() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id,url,note\n1,a\n");
        let builder = CsvBuilder::open(&input, dir.path().join("out.csv")).unwrap();

        let row = builder.rows().unwrap().next().unwrap().unwrap();
        assert_eq!(row.get("url"), Some("a"));
        assert_eq!(row.get("note"), Some(""));
    }

    #[test]
    fn append_escapes_new_field_line_breaks() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id,url\n1,http://x\n");
        let output = dir.path().join("out.csv");
        let mut builder = CsvBuilder::open(&input, &output).unwrap();
        builder.declare_headers(["note"]).unwrap();

        for row in builder.rows().unwrap() {
            builder.append(row.unwrap(), [("note", "a\r\nb")]).unwrap();
        }

        let contents = fs::read_to_string(&output).unwrap();
        assert_eq!(contents, "id,url,note\n1,http://x,a\\nb\n");
    }

    #[test]
    fn append_without_escaping_keeps_breaks_quoted() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id\n1\n");
        let output = dir.path().join("out.csv");
        let mut builder = CsvBuilder::open(&input, &output).unwrap();
        builder.declare_headers(["note"]).unwrap();

        let row = builder.rows().unwrap().next().unwrap().unwrap();
        builder.append_with(row, [("note", "a\nb")], false).unwrap();

        assert_eq!(read_output(&output)[1], vec!["1", "a\nb"]);
    }

    #[test]
    fn new_values_win_and_unknown_columns_are_ignored() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id,url\n1,http://x\n");
        let output = dir.path().join("out.csv");
        let mut builder = CsvBuilder::open(&input, &output).unwrap();
        builder.declare_headers(["title"]).unwrap();

        let row = builder.rows().unwrap().next().unwrap().unwrap();
        builder
            .append(
                row,
                [("url", "https://x/"), ("title", "Home"), ("extra", "dropped")],
            )
            .unwrap();

        assert_eq!(
            read_output(&output),
            vec![
                vec!["id", "url", "title"],
                vec!["1", "https://x/", "Home"],
            ]
        );
    }

    #[test]
    fn header_freezes_at_first_append() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id\n1\n2\n");
        let output = dir.path().join("out.csv");
        let mut builder = CsvBuilder::open(&input, &output).unwrap();
        builder.declare_headers(["a"]).unwrap();

        let rows: Vec<Row> = builder.rows().unwrap().map(|r| r.unwrap()).collect();
        builder.append(rows[0].clone(), [("a", "1")]).unwrap();
        assert!(builder.output_created());

        let err = builder.declare_headers(["a", "late"]).err();
        assert!(matches!(err, Some(EnrichError::HeadersFrozen(ref names)) if names == &["late"]));
        // known names are still fine
        builder.declare_headers(["a"]).unwrap();

        builder.append(rows[1].clone(), [("a", "2"), ("late", "x")]).unwrap();
        assert_eq!(
            read_output(&output),
            vec![vec!["id", "a"], vec!["1", "1"], vec!["2", "2"]]
        );
    }

    #[test]
    fn first_append_creates_missing_output_directory() {
        let dir = TempDir::new().unwrap();
        let input = fixture(&dir, "id\n1\n");
        let output = dir.path().join("nested").join("out.csv");
        let mut builder = CsvBuilder::open(&input, &output).unwrap();
        assert_eq!(builder.output_path(), output.as_path());
        assert!(!builder.output_created());

        let row = builder.rows().unwrap().next().unwrap().unwrap();
        builder.append(row, Vec::<(String, String)>::new()).unwrap();
        assert!(builder.output_created());
        drop(builder);

        assert_eq!(fs::read_to_string(&output).unwrap(), "id\n1\n");
    }

    #[test]
    fn row_insert_replaces_in_place() {
        let mut row: Row = [("a", "1"), ("b", "2")].into_iter().collect();
        row.insert("a", "9");
        row.insert("c", "3");

        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(row.get("a"), Some("9"));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn escape_newlines_handles_both_styles() {
        assert_eq!(escape_newlines("a\r\nb\nc"), "a\\nb\\nc");
        assert_eq!(escape_newlines("plain"), "plain");
    }
}
