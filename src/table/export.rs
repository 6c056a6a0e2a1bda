//! Delimited-text export of table contents.

use std::ops::Range;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{TableError, TableViewer, CHUNK_SIZE};

/// Write `rows` of the table as delimiter-separated text, header first.
///
/// Cell values come from the viewer's chunk cache; missing chunks are
/// fetched on demand. Fields containing the delimiter, quotes or line
/// breaks are quoted with doubled inner quotes.
///
/// # Errors
///
/// Returns a `TableError` for fetch failures or write errors.
pub async fn export_delimited<W>(
    viewer: &TableViewer,
    writer: &mut W,
    delimiter: char,
    rows: Option<Range<usize>>,
) -> Result<(), TableError>
where
    W: AsyncWrite + Unpin,
{
    let row_count = viewer.row_count();
    let column_count = viewer.column_count();
    let rows = match rows {
        Some(range) => range.start.min(row_count)..range.end.min(row_count),
        None => 0..row_count,
    };

    let header = (0..column_count)
        .map(|c| quote_field(&viewer.column_name(c).unwrap_or_default(), delimiter))
        .collect::<Vec<_>>()
        .join(&delimiter.to_string());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut line = String::new();
    for row in rows {
        let chunk = viewer.chunk_for_row(row).await?;
        line.clear();
        for column in 0..column_count {
            if column > 0 {
                line.push(delimiter);
            }
            let text = chunk
                .value(column, row % CHUNK_SIZE)
                .map(format_cell)
                .unwrap_or_default();
            line.push_str(&quote_field(&text, delimiter));
        }
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Render one cell for export. NA cells become empty fields.
fn format_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote_field(field: &str, delimiter: char) -> String {
    if field.contains(delimiter) || field.contains('"') || field.contains('\n') || field.contains('\r')
    {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
