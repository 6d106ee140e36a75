use std::path::PathBuf;

use csv_core::WriteResult;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum Format {
    Table,
    Jsonl,
    Csv,
}

#[derive(clap::Parser, Clone)]
#[group(id = "output::Args")]
pub struct Args {
    /// Write the results to this file instead of the terminal.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not open the specified output file at {1:?}")]
    OpenOutputFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the output file at {1:?}")]
    WriteFile(#[source] std::io::Error, PathBuf),
    #[error("could not write data to the terminal")]
    WriteStdout(#[source] std::io::Error),
    #[error("could not serialize a record to JSON")]
    SerializeJson(#[source] serde_json::Error),
}

impl Args {
    pub fn to_output(self, headers: &'static [&'static str]) -> Result<Output, Error> {
        let io = match &self.output {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };
        Ok(Output::new(io, self.format, self.output, headers))
    }
}

/// Writes out one record per register, either as a table, JSON lines or CSV.
///
/// Tables are only written out on [`Output::commit`], the other formats are streamed.
pub struct Output {
    path: Option<PathBuf>,
    io: Box<dyn std::io::Write>,
    formatter: Formatter,
    headers: &'static [&'static str],
}

enum Formatter {
    Csv { wrote_headers: bool },
    Table { comfy: comfy_table::Table },
    Jsonl,
}

impl Output {
    pub fn new(
        io: Box<dyn std::io::Write>,
        format: Format,
        path: Option<PathBuf>,
        headers: &'static [&'static str],
    ) -> Self {
        let formatter = match format {
            Format::Table => {
                let mut comfy = comfy_table::Table::new();
                comfy.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                comfy.set_header(headers.to_vec());
                Formatter::Table { comfy }
            }
            Format::Jsonl => Formatter::Jsonl,
            Format::Csv => Formatter::Csv { wrote_headers: false },
        };
        Self { path, io, formatter, headers }
    }

    pub fn record<R: serde::Serialize>(
        &mut self,
        row: impl FnOnce() -> Vec<String>,
        record: impl FnOnce() -> R,
    ) -> Result<(), Error> {
        match &mut self.formatter {
            Formatter::Csv { wrote_headers } => {
                if !*wrote_headers {
                    *wrote_headers = true;
                    self.write_csv_row(self.headers)?;
                }
                let values = row();
                self.write_csv_row(&values)?;
            }
            Formatter::Table { comfy } => {
                comfy.add_row(row());
            }
            Formatter::Jsonl => {
                serde_json::to_writer(&mut self.io, &record()).map_err(Error::SerializeJson)?;
                writeln!(self.io).map_err(|e| self.write_error(e))?
            }
        }
        Ok(())
    }

    fn write_csv_row<V: AsRef<str>>(&mut self, values: &[V]) -> Result<(), Error> {
        // Quoting at most doubles the field, plus the enclosing quotes.
        let max_len = 2 + 2 * values.iter().map(|v| v.as_ref().len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for (index, value) in values.iter().enumerate() {
            if index != 0 {
                let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                    unreachable!("delimiter always fits the output buffer");
                };
                self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
            }
            let input = value.as_ref().as_bytes();
            let (WriteResult::InputEmpty, ib, ob) = writer.field(input, &mut output) else {
                unreachable!("output buffer is sized for the longest field");
            };
            debug_assert_eq!(input.len(), ib);
            self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))?;
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            unreachable!("terminator always fits the output buffer");
        };
        self.io.write_all(&output[..ob]).map_err(|e| self.write_error(e))
    }

    fn write_error(&self, e: std::io::Error) -> Error {
        match &self.path {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p.clone()),
        }
    }

    pub fn commit(mut self) -> Result<(), Error> {
        if let Formatter::Table { comfy } = &self.formatter {
            writeln!(self.io, "{comfy}").map_err(|e| self.write_error(e))?;
        }
        self.io.flush().map_err(|e| self.write_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(serde::Serialize)]
    struct Record {
        register: &'static str,
        raw: i32,
    }

    fn write(format: Format) -> String {
        let buffer = Shared::default();
        let mut output =
            Output::new(Box::new(buffer.clone()), format, None, &["Register", "Raw"]);
        for (register, raw) in [("valueA", 225), ("with, comma", -1)] {
            output
                .record(|| vec![register.to_string(), raw.to_string()], || Record { register, raw })
                .unwrap();
        }
        output.commit().unwrap();
        String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn csv_quotes_fields_and_writes_headers_once() {
        assert_eq!(write(Format::Csv), "Register,Raw\nvalueA,225\n\"with, comma\",-1\n");
    }

    #[test]
    fn jsonl_writes_a_line_per_record() {
        assert_eq!(
            write(Format::Jsonl),
            "{\"register\":\"valueA\",\"raw\":225}\n{\"register\":\"with, comma\",\"raw\":-1}\n"
        );
    }

    #[test]
    fn table_contains_every_cell() {
        let table = write(Format::Table);
        for cell in ["Register", "Raw", "valueA", "225", "with, comma", "-1"] {
            assert!(table.contains(cell), "{cell} missing from {table}");
        }
    }
}
