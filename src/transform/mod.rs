// graph_ingest/src/transform/mod.rs
// Rewrites a delimited source table into vertex and edge files.

pub mod dates;

use std::collections::HashMap;

use csv::{ReaderBuilder, StringRecord, Writer};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::schema::GraphSchema;

pub const LABEL_COLUMN: &str = ":LABEL";
pub const EDGE_HEADER: [&str; 3] = [":START_ID", ":TYPE", ":END_ID"];
pub const VERTEX_PREFIX: &str = "output/v/";
pub const EDGE_PREFIX: &str = "output-edges/";

#[derive(Debug, Clone, PartialEq,)]
pub struct TransformOutput {
    pub vertex_csv: String,
    pub row_count:  usize,
    /// `None` when no edge was produced; no edge file is written then.
    pub edge_csv:   Option<String,>,
    pub edge_count: usize,
}

pub fn vertex_key(label: &str, row_count: usize,) -> String {
    format!("{}v_{}_{}.csv", VERTEX_PREFIX, label, row_count)
}

pub fn edge_key(label: &str, edge_count: usize,) -> String {
    format!("{}e_{}_{}.csv", EDGE_PREFIX, label, edge_count)
}

/// Stateless; one call per source file.
#[derive(Debug, Default, Clone, Copy,)]
pub struct RecordTransformer;

impl RecordTransformer {
    pub fn transform(&self, content: &str, schema: &GraphSchema,) -> Result<TransformOutput,> {
        schema.validate()?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true,)
            .flexible(true,)
            .from_reader(content.as_bytes(),);
        let file_headers = reader.headers()?.clone();
        let rows = reader
            .records()
            .collect::<std::result::Result<Vec<StringRecord,>, csv::Error,>>()?;

        let (vertex_csv, row_count,) = self.write_vertices(&rows, schema,)?;
        let (edge_csv, edge_count,) = self.write_edges(&file_headers, &rows, schema,)?;

        debug!(
            label = %schema.label,
            row_count,
            edge_count,
            "Transformed source table"
        );

        Ok(TransformOutput {
            vertex_csv,
            row_count,
            edge_csv: (edge_count > 0).then_some(edge_csv,),
            edge_count,
        },)
    }

    /// The schema either names the label column as its last header or leaves it to be appended.
    fn vertex_header(&self, schema: &GraphSchema,) -> Result<Vec<String,>,> {
        let original = schema.original_headers.len();
        let transformed = schema.transformed_headers.len();
        let names_label = schema.transformed_headers.last().is_some_and(|h| is_label_column(h,),);
        match (names_label, transformed,) {
            (true, n,) if n == original + 1 => Ok(schema.transformed_headers.clone(),),
            (false, n,) if n == original => {
                let mut header = schema.transformed_headers.clone();
                header.push(LABEL_COLUMN.to_string(),);
                Ok(header,)
            }
            _ => Err(IngestError::Transform(format!(
                "{} transformed headers (label column present: {}) cannot describe {} source columns",
                transformed, names_label, original
            ),),),
        }
    }

    fn write_vertices(&self, rows: &[StringRecord], schema: &GraphSchema,) -> Result<(String, usize,),> {
        let mut writer = Writer::from_writer(vec![],);
        writer.write_record(self.vertex_header(schema,)?,)?;

        let mut row_count = 0;
        for (line, row,) in rows.iter().enumerate() {
            if row.iter().all(str::is_empty,) {
                continue;
            }
            if row.len() != schema.original_headers.len() {
                return Err(IngestError::Transform(format!(
                    "Row {} has {} fields, expected {}",
                    line + 2,
                    row.len(),
                    schema.original_headers.len()
                ),),);
            }

            let formatted = dates::identify_and_format_dates(
                schema
                    .original_headers
                    .iter()
                    .map(String::as_str,)
                    .zip(row.iter(),),
            );
            let mut fields: Vec<String,> = formatted
                .into_iter()
                .map(|(_, value,)| value.unwrap_or_default(),)
                .collect();
            fields.push(schema.label.clone(),);
            writer.write_record(&fields,)?;
            row_count += 1;
        }

        Ok((into_string(writer,)?, row_count,),)
    }

    fn write_edges(
        &self,
        file_headers: &StringRecord,
        rows: &[StringRecord],
        schema: &GraphSchema,
    ) -> Result<(String, usize,),> {
        let positions: HashMap<&str, usize,> =
            file_headers.iter().enumerate().map(|(i, h,)| (h, i,),).collect();

        let mut writer = Writer::from_writer(vec![],);
        writer.write_record(EDGE_HEADER,)?;

        let mut edge_count = 0;
        for row in rows {
            for edge in &schema.edge_definitions {
                let (Some(&source,), Some(&target,),) = (
                    positions.get(edge.source_column.as_str(),),
                    positions.get(edge.target_column.as_str(),),
                ) else {
                    continue;
                };
                match (non_empty(row.get(source,),), non_empty(row.get(target,),),) {
                    (Some(start,), Some(end,),) => {
                        writer.write_record([start, edge.relationship_type.as_str(), end,],)?;
                        edge_count += 1;
                    },
                    _ => continue,
                }
            }
        }

        Ok((into_string(writer,)?, edge_count,),)
    }
}

fn is_label_column(header: &str,) -> bool {
    let header = header.trim();
    header.eq_ignore_ascii_case(LABEL_COLUMN,) || header.eq_ignore_ascii_case("~label",)
}

fn non_empty(value: Option<&str,>,) -> Option<&str,> {
    value.filter(|v| !v.is_empty(),)
}

fn into_string(writer: Writer<Vec<u8,>,>,) -> Result<String,> {
    let bytes = writer
        .into_inner()
        .map_err(|e| IngestError::Transform(format!("Failed to flush CSV: {}", e),),)?;
    String::from_utf8(bytes,)
        .map_err(|e| IngestError::Transform(format!("CSV output is not UTF-8: {}", e),),)
}
