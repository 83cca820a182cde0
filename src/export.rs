//! Export of extraction results as JSON or CSV.
//!
//! The model may return keys the schema never asked for, or omit some that
//! it did. JSON export keeps every key, requested fields first in schema
//! order and extra keys after them alphabetically. CSV export reconciles
//! records against the schema: one column per requested field in schema
//! order, missing or null values as empty cells, extra keys dropped.

use crate::error::FieldScanError;
use crate::output::{ExtractedRecord, ImageResult};
use crate::schema::FieldSchema;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Header of the column identifying the source image in CSV output.
pub const IMAGE_COLUMN: &str = "image";

#[derive(Serialize)]
struct ExportedImage<'a> {
    image: &'a str,
    records: Vec<OrderedRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// A record whose keys serialise in schema order, then the extras.
struct OrderedRecord<'a> {
    schema: &'a FieldSchema,
    record: &'a ExtractedRecord,
}

impl Serialize for OrderedRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.record.len()))?;
        for field in self.schema.iter() {
            if let Some(value) = self.record.get(field) {
                map.serialize_entry(field, value)?;
            }
        }
        for (key, value) in self.record.iter() {
            if !self.schema.iter().any(|field| field == key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// Pretty JSON array with one `{image, records, error?}` object per image.
pub fn records_to_json(schema: &FieldSchema, results: &[ImageResult]) -> Result<String, FieldScanError> {
    let exported: Vec<ExportedImage<'_>> = results
        .iter()
        .map(|r| ExportedImage {
            image: &r.label,
            records: r
                .records
                .iter()
                .map(|record| OrderedRecord { schema, record })
                .collect(),
            error: r.error.as_ref().map(|e| e.message.as_str()),
        })
        .collect();
    serde_json::to_string_pretty(&exported)
        .map_err(|e| FieldScanError::Internal(format!("JSON export: {e}")))
}

/// One row of display text per record: image label followed by each schema
/// field. Failed images contribute no rows.
pub fn table_rows(schema: &FieldSchema, results: &[ImageResult]) -> Vec<Vec<String>> {
    results
        .iter()
        .flat_map(|result| {
            result.records.iter().map(move |record| {
                std::iter::once(result.label.clone())
                    .chain(schema.iter().map(|field| {
                        record
                            .get(field)
                            .map(|v| v.display_text())
                            .unwrap_or_default()
                    }))
                    .collect()
            })
        })
        .collect()
}

/// CSV with a header of `image` plus the schema fields.
pub fn records_to_csv(schema: &FieldSchema, results: &[ImageResult]) -> Result<String, FieldScanError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let header = std::iter::once(IMAGE_COLUMN).chain(schema.iter());
    writer.write_record(header).map_err(csv_error)?;
    for row in table_rows(schema, results) {
        writer.write_record(&row).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| FieldScanError::Internal(format!("CSV export: {e}")))?;
    String::from_utf8(bytes).map_err(|e| FieldScanError::Internal(format!("CSV export: {e}")))
}

fn csv_error(e: csv::Error) -> FieldScanError {
    FieldScanError::Internal(format!("CSV export: {e}"))
}

/// Write `contents` to `path` atomically, creating parent directories as
/// needed.
///
/// The data goes to a uniquely named temp file in the target directory which
/// is then renamed over `path`. Concurrent writers never share a temp file,
/// and a failed rename removes it.
pub async fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), FieldScanError> {
    let path = path.as_ref().to_path_buf();
    let write_failed = |path: &Path, e: std::io::Error| FieldScanError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| write_failed(&path, e))?;

    let contents = contents.as_ref().to_vec();
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&contents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| write_failed(&path, std::io::Error::other(e)))?
    .map_err(|e| write_failed(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ImageError;
    use crate::output::FieldValue;

    fn result(index: usize, label: &str, records: Vec<ExtractedRecord>) -> ImageResult {
        ImageResult {
            index,
            label: label.to_string(),
            records,
            attempts: 1,
            duration_ms: 10,
            error: None,
        }
    }

    fn receipts() -> Vec<ImageResult> {
        vec![
            result(
                0,
                "r1.jpg",
                vec![ExtractedRecord::from_pairs([
                    ("name", FieldValue::from("Cafe, Inc")),
                    ("amount", FieldValue::Number(serde_json::Number::from_f64(12.5).unwrap())),
                    ("surprise", FieldValue::from("dropped")),
                ])],
            ),
            result(
                1,
                "r2.jpg",
                vec![ExtractedRecord::from_pairs([
                    ("name", FieldValue::from("Deli")),
                    ("amount", FieldValue::Absent),
                ])],
            ),
        ]
    }

    #[test]
    fn csv_follows_schema_order() {
        let schema = FieldSchema::parse_list("name, amount");
        let csv = records_to_csv(&schema, &receipts()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "image,name,amount");
        assert_eq!(lines[1], "r1.jpg,\"Cafe, Inc\",12.5");
        assert_eq!(lines[2], "r2.jpg,Deli,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn csv_missing_field_is_empty_cell() {
        let schema = FieldSchema::parse_list("amount, date");
        let csv = records_to_csv(&schema, &receipts()).unwrap();
        assert!(csv.lines().any(|l| l == "r1.jpg,12.5,"));
    }

    #[test]
    fn failed_images_have_no_rows() {
        let mut failed = result(2, "bad.jpg", Vec::new());
        failed.error = Some(ImageError {
            label: "bad.jpg".into(),
            kind: "no_response".into(),
            message: "The model returned no response for this image.".into(),
            retryable: false,
        });
        let schema = FieldSchema::parse_list("name");
        let rows = table_rows(&schema, &[failed.clone()]);
        assert!(rows.is_empty());

        let json = records_to_json(&schema, &[failed]).unwrap();
        assert!(json.contains("no response"));
    }

    #[test]
    fn json_keeps_extra_keys() {
        let schema = FieldSchema::parse_list("name, amount");
        let json = records_to_json(&schema, &receipts()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["image"], "r1.jpg");
        assert_eq!(value[0]["records"][0]["surprise"], "dropped");
        assert!(value[1]["records"][0]["amount"].is_null());
        assert!(value[0].get("error").is_none());
    }

    #[test]
    fn json_keys_follow_schema_order_then_extras() {
        let schema = FieldSchema::parse_list("name, amount");
        let json = records_to_json(&schema, &receipts()).unwrap();
        let name = json.find("\"name\"").unwrap();
        let amount = json.find("\"amount\"").unwrap();
        let surprise = json.find("\"surprise\"").unwrap();
        assert!(name < amount, "{json}");
        assert!(amount < surprise, "{json}");
    }

    #[tokio::test]
    async fn atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        write_atomic(&path, "a,b\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
        assert_eq!(entries(&dir.path().join("nested")), ["out.csv"]);
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_share_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let a = "a".repeat(64 * 1024);
        let b = "b".repeat(64 * 1024);

        let (ra, rb) = tokio::join!(write_atomic(&path, &a), write_atomic(&path, &b));
        ra.unwrap();
        rb.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written == a || written == b, "interleaved output");
        assert_eq!(entries(dir.path()), ["out.json"]);
    }

    #[tokio::test]
    async fn failed_rename_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = dir.path().join("out.csv");
        std::fs::create_dir(&occupied).unwrap();
        std::fs::write(occupied.join("keep"), "x").unwrap();

        let err = write_atomic(&occupied, "a,b\n").await.unwrap_err();
        assert!(matches!(err, FieldScanError::OutputWriteFailed { .. }));
        assert_eq!(entries(dir.path()), ["out.csv"]);
    }
}
