use std::path::PathBuf;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{ErrorKind, IngestResult};
use crate::ingest_error;
use crate::landing::base::LandingStore;
use crate::types::{BatchId, DeltaRow, TableSchema};

/// Field delimiter used in landed files.
const DELIMITER: char = ';';

/// Name of the single part file inside a batch partition.
const PART_FILE: &str = "part-00000.csv";

/// Filesystem landing storage.
///
/// Batches land as semicolon-delimited files under
/// `<base>/<table>/batch_id=<batch_id>/part-00000.csv`. The header is written
/// when the part file is created; writing into an existing partition appends
/// rows without repeating the header.
#[derive(Debug, Clone)]
pub struct CsvLandingStore {
    base_path: PathBuf,
}

impl CsvLandingStore {
    /// Creates a landing store rooted at the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn partition_dir(&self, table: &str, batch_id: &BatchId) -> PathBuf {
        self.base_path
            .join(table)
            .join(format!("batch_id={batch_id}"))
    }
}

/// Quotes a field when it contains the delimiter, a quote, or a line break.
fn escape_field(field: &str) -> String {
    if field.contains(DELIMITER) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders one delimited line from a list of fields.
fn render_line(fields: impl Iterator<Item = String>) -> String {
    let mut line = fields.collect::<Vec<_>>().join(&DELIMITER.to_string());
    line.push('\n');
    line
}

impl LandingStore for CsvLandingStore {
    async fn write_batch(
        &self,
        schema: &TableSchema,
        rows: &[DeltaRow],
        table: &str,
        batch_id: &BatchId,
    ) -> IngestResult<String> {
        let partition_dir = self.partition_dir(table, batch_id);
        let part_path = partition_dir.join(PART_FILE);

        let map_io = |err: std::io::Error| {
            ingest_error!(
                ErrorKind::LandingIoError,
                "Failed to write landing batch",
                format!("path `{}`: {err}", part_path.display()),
                source: err
            )
        };

        fs::create_dir_all(&partition_dir).await.map_err(|err| map_io(err))?;

        let write_header = !fs::try_exists(&part_path).await.map_err(|err| map_io(err))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&part_path)
            .await
            .map_err(|err| map_io(err))?;

        let mut contents = String::new();
        if write_header {
            contents.push_str(&render_line(
                schema.columns.iter().map(|column| escape_field(&column.name)),
            ));
        }

        for row in rows {
            contents.push_str(&render_line(row.row.values().iter().map(|cell| {
                cell.to_field().map(|field| escape_field(&field)).unwrap_or_default()
            })));
        }

        file.write_all(contents.as_bytes()).await.map_err(|err| map_io(err))?;
        file.flush().await.map_err(|err| map_io(err))?;

        info!(
            table,
            batch_id = %batch_id,
            rows = rows.len(),
            location = %part_path.display(),
            "landed delta batch"
        );

        Ok(part_path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_with_delimiter_are_quoted() {
        assert_eq!(escape_field("GRU;CGH"), "\"GRU;CGH\"");
        assert_eq!(escape_field("plain"), "plain");
    }

    #[test]
    fn quotes_inside_fields_are_doubled() {
        assert_eq!(escape_field("voo \"direto\""), "\"voo \"\"direto\"\"\"");
    }

    #[test]
    fn line_joins_fields_with_semicolons() {
        let line = render_line(["a".to_string(), "b".to_string(), "".to_string()].into_iter());
        assert_eq!(line, "a;b;\n");
    }
}
