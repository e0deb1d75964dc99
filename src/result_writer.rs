use crate::error::Result;
use crate::query::QueryResult;
use log::info;
use std::fs::{self, File};
use std::path::Path;

/// One CSV record per provider result, flushed as it is written.
pub struct ResultWriter {
    writer: csv::Writer<File>,
    written: usize,
}

impl ResultWriter {
    pub fn create(path: impl AsRef<Path>, headers: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(headers)?;
        writer.flush()?;
        info!("Writing keyword results to {:?}", path);

        Ok(ResultWriter { writer, written: 0 })
    }

    pub fn write(&mut self, result: &QueryResult) -> Result<()> {
        self.writer.serialize(result)?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::RESULT_HEADERS;
    use tempfile::TempDir;

    #[test]
    fn writes_header_then_one_line_per_result() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keywords.csv");
        let mut writer = ResultWriter::create(&path, &RESULT_HEADERS).unwrap();

        writer
            .write(&QueryResult {
                keyword: "seo tools".to_string(),
                position: 1,
                position_diff: None,
                traffic_pct: 12.5,
                search_volume: 1000,
                estimated_traffic: 384,
                url: "https://example.com/".to_string(),
                trend: Some("0.8,1.0".to_string()),
            })
            .unwrap();
        assert_eq!(writer.written(), 1);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "Keyword,Position,Position Difference,Traffic (%),Search Volume,\
Estimated Monthly Traffic,Url,Trends\n\
seo tools,1,,12.5,1000,384,https://example.com/,\"0.8,1.0\"\n"
        );
    }
}
