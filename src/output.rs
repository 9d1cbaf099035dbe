use std::io::{self, Write};

use serde::Serialize;

use crate::export::{DatasetExport, TableExport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }

    /// Tables go to stdout verbatim; file references are printed as JSON.
    pub fn print_export(export: &DatasetExport) -> io::Result<()> {
        match export {
            DatasetExport::Table(table) => Self::print_table(table),
            DatasetExport::File(_) => Self::print(export),
        }
    }

    fn print_table(table: &TableExport) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(&table.content)?;
        stdout.flush()
    }
}
