//! Tabular bridges: row-of-map encodings for generic tabular sources
//! and count-unknown row streams.

use std::io;

use itertools::Itertools;

use super::{FieldKind, Pack, Unpack, Value};
use crate::{error::Error, marker::PackType, reader::PackReader, writer::PackWriter};

/// A table of rows with named columns.
///
/// The wire form is an array of row maps (`{column -> value}`); absent
/// cells travel as nil. Decoding reconstructs the schema as the
/// union-of-keys across all rows, in first-seen order, and re-aligns
/// every row against it with nil fills, so producers whose rows carry
/// different column subsets still decode into one rectangular table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new<I, S>(columns: I) -> Table
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Appends a row; it must carry one cell per column.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), Error> {
        if row.len() != self.columns.len() {
            return Err(Error::UnsupportedTarget(format!(
                "row of {} cells against {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Returns the cell at `row` under the named column.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let at = self.columns.iter().position(|name| name == column)?;
        self.rows.get(row)?.get(at)
    }
}

impl Pack for Table {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_array_header(self.rows.len())?;
        for row in &self.rows {
            writer.write_map_header(self.columns.len())?;
            for (column, cell) in self.columns.iter().zip(row) {
                writer.write_key(column)?;
                cell.pack(writer)?;
            }
        }
        Ok(())
    }
}

impl Unpack for Table {
    const KIND: FieldKind = FieldKind::Array;

    /// Accepts both counted and BEGIN-framed row arrays.
    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.enter()?;
        let mut raw_rows = Vec::new();
        match reader.read_array_header()? {
            Some(count) => {
                for _ in 0..count {
                    raw_rows.push(read_row(reader)?);
                }
            }
            None => {
                while reader.next_type()? != PackType::End {
                    raw_rows.push(read_row(reader)?);
                }
                reader.read_end()?;
            }
        }
        reader.leave();

        let columns: Vec<String> = raw_rows
            .iter()
            .flat_map(|row| row.iter().map(|(column, _)| column.clone()))
            .unique()
            .collect();
        let rows = raw_rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| {
                        row.iter()
                            .find(|(name, _)| name == column)
                            .map(|(_, value)| value.clone())
                            .unwrap_or(Value::Nil)
                    })
                    .collect()
            })
            .collect();
        Ok(Table { columns, rows })
    }
}

/// A set of tables; an array of [`Table`] encodings on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSet {
    tables: Vec<Table>,
}

impl TableSet {
    pub fn new() -> TableSet {
        TableSet::default()
    }

    pub fn push(&mut self, table: Table) {
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }
}

impl Pack for TableSet {
    fn pack<W: io::Write>(&self, writer: &mut PackWriter<W>) -> Result<(), Error> {
        writer.write_array_header(self.tables.len())?;
        for table in &self.tables {
            table.pack(writer)?;
        }
        Ok(())
    }
}

impl Unpack for TableSet {
    const KIND: FieldKind = FieldKind::Array;

    fn unpack<R: io::Read>(reader: &mut PackReader<R>) -> Result<Self, Error> {
        reader.enter()?;
        let mut tables = Vec::new();
        match reader.read_array_header()? {
            Some(count) => {
                for _ in 0..count {
                    tables.push(Table::unpack(reader)?);
                }
            }
            None => {
                while reader.next_type()? != PackType::End {
                    tables.push(Table::unpack(reader)?);
                }
                reader.read_end()?;
            }
        }
        reader.leave();
        Ok(TableSet { tables })
    }
}

/// Producer side of a row stream: rows are emitted as they arrive,
/// framed by `BEGIN_ARRAY` / `END`, so the row count never needs to be
/// known upfront.
///
/// # Example
/// ```
/// use keypack::types::{RowWriter, Value};
/// use keypack::writer::PackWriter;
///
/// let mut buf = Vec::new();
/// let mut writer = PackWriter::new(&mut buf);
/// let mut rows = RowWriter::begin(&mut writer).unwrap();
/// rows.row(&[("event_id", Value::Int(1))]).unwrap();
/// rows.row(&[("event_id", Value::Int(2))]).unwrap();
/// rows.finish().unwrap();
/// ```
pub struct RowWriter<'a, W: io::Write> {
    writer: &'a mut PackWriter<W>,
}

impl<'a, W: io::Write> RowWriter<'a, W> {
    /// Opens the stream, emitting `BEGIN_ARRAY`.
    pub fn begin(writer: &'a mut PackWriter<W>) -> Result<RowWriter<'a, W>, Error> {
        writer.begin_array()?;
        Ok(RowWriter { writer })
    }

    /// Emits one row as a counted map. Column names go through the key
    /// table and intern across rows.
    pub fn row(&mut self, cells: &[(&str, Value)]) -> Result<(), Error> {
        self.writer.write_map_header(cells.len())?;
        for (column, value) in cells {
            self.writer.write_key(column)?;
            value.pack(self.writer)?;
        }
        Ok(())
    }

    /// Closes the stream, emitting `END`.
    pub fn finish(self) -> Result<(), Error> {
        self.writer.write_end()
    }
}

/// Consumer side of a row stream; accepts both counted and unbounded
/// framings.
pub struct RowReader<'a, R: io::Read> {
    reader: &'a mut PackReader<R>,
    /// `Some(n)` = rows left in a counted stream; `None` = unbounded.
    remaining: Option<usize>,
}

impl<'a, R: io::Read> RowReader<'a, R> {
    /// Opens the stream by reading its array header.
    pub fn begin(reader: &'a mut PackReader<R>) -> Result<RowReader<'a, R>, Error> {
        let remaining = reader.read_array_header()?;
        Ok(RowReader { reader, remaining })
    }

    /// Reads the next row, or `None` once the stream is exhausted.
    pub fn next_row(&mut self) -> Result<Option<Vec<(String, Value)>>, Error> {
        match self.remaining {
            Some(0) => Ok(None),
            Some(left) => {
                self.remaining = Some(left - 1);
                Ok(Some(read_row(self.reader)?))
            }
            None => {
                if self.reader.next_type()? == PackType::End {
                    self.reader.read_end()?;
                    self.remaining = Some(0);
                    return Ok(None);
                }
                Ok(Some(read_row(self.reader)?))
            }
        }
    }
}

/// Reads one row map (counted or unbounded) into an ordered pair list.
fn read_row<R: io::Read>(reader: &mut PackReader<R>) -> Result<Vec<(String, Value)>, Error> {
    if reader.next_type()? != PackType::Map {
        return Err(reader_row_mismatch(reader));
    }
    reader.enter()?;
    let mut row = Vec::new();
    match reader.read_map_header()? {
        Some(count) => {
            for _ in 0..count {
                let column = reader.read_key()?;
                row.push((column, Value::unpack(reader)?));
            }
        }
        None => {
            while reader.next_type()? != PackType::End {
                let column = reader.read_key()?;
                row.push((column, Value::unpack(reader)?));
            }
            reader.read_end()?;
        }
    }
    reader.leave();
    Ok(row)
}

fn reader_row_mismatch<R: io::Read>(reader: &mut PackReader<R>) -> Error {
    match reader.peek_type() {
        Ok(found) => Error::TypeMismatch(format!("expected row map, found {}", found)),
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{from_bytes, to_bytes};
    use crate::PackReader;

    #[test]
    fn table_roundtrip() {
        let mut table = Table::new(["id", "name"]);
        table
            .push_row(vec![Value::Int(1), Value::Str("a".into())])
            .unwrap();
        table.push_row(vec![Value::Int(2), Value::Nil]).unwrap();

        let back: Table = from_bytes(&to_bytes(&table).unwrap()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn row_arity_is_checked() {
        let mut table = Table::new(["only"]);
        assert!(matches!(
            table.push_row(vec![Value::Int(1), Value::Int(2)]),
            Err(Error::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn schema_is_union_of_keys_across_rows() {
        let mut buf = Vec::new();
        let mut writer = crate::PackWriter::new(&mut buf);
        writer.write_array_header(2).unwrap();
        writer.write_map_header(1).unwrap();
        writer.write_key("a").unwrap();
        writer.write_int(1).unwrap();
        writer.write_map_header(1).unwrap();
        writer.write_key("b").unwrap();
        writer.write_int(2).unwrap();
        drop(writer);

        let table: Table = from_bytes(&buf).unwrap();
        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.rows()[0], vec![Value::Int(1), Value::Nil]);
        assert_eq!(table.rows()[1], vec![Value::Nil, Value::Int(2)]);
        assert_eq!(table.cell(1, "b"), Some(&Value::Int(2)));
    }

    #[test]
    fn table_set_roundtrip() {
        let mut first = Table::new(["x"]);
        first.push_row(vec![Value::Int(1)]).unwrap();
        let mut set = TableSet::new();
        set.push(first);
        set.push(Table::new(["y"]));

        let back: TableSet = from_bytes(&to_bytes(&set).unwrap()).unwrap();
        assert_eq!(back, set);
        assert_eq!(back.tables().len(), 2);
    }

    #[test]
    fn row_stream_roundtrip() {
        let mut buf = Vec::new();
        let mut writer = crate::PackWriter::new(&mut buf);
        let mut rows = RowWriter::begin(&mut writer).unwrap();
        for i in 0..3 {
            rows.row(&[("event_id", Value::Int(i))]).unwrap();
        }
        rows.finish().unwrap();
        drop(writer);

        let mut slice = buf.as_slice();
        let mut reader = PackReader::new(&mut slice);
        let mut stream = RowReader::begin(&mut reader).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = stream.next_row().unwrap() {
            seen.push(row);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2], vec![("event_id".to_string(), Value::Int(2))]);
        // exhausted stream keeps answering None
        assert!(stream.next_row().unwrap().is_none());
    }

    #[test]
    fn row_reader_accepts_counted_streams() {
        let mut table = Table::new(["k"]);
        table.push_row(vec![Value::Int(9)]).unwrap();
        let bytes = to_bytes(&table).unwrap();

        let mut slice = bytes.as_slice();
        let mut reader = PackReader::new(&mut slice);
        let mut stream = RowReader::begin(&mut reader).unwrap();
        assert_eq!(
            stream.next_row().unwrap(),
            Some(vec![("k".to_string(), Value::Int(9))])
        );
        assert!(stream.next_row().unwrap().is_none());
    }
}
