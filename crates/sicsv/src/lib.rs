//! CSV ↔ serialization tree.
//!
//! A tree headed for CSV is an Array of rows. Object rows serialize their
//! members as titled columns (titles from the first row's member names);
//! Array rows serialize positionally. Quoting of embedded delimiters,
//! quotes and newlines is handled by the csv crate and is reversible.

use sinfo::{Category, SerializationInfo};

#[derive(Debug, thiserror::Error)]
pub enum CsvError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("root node is not an array of rows")]
    NotAnArray,
    #[error("row {0} is neither an object nor an array")]
    BadRow(usize),
    #[error("cell {row}/{column} is not a scalar")]
    BadCell { row: usize, column: usize },
    #[error("failed to flush csv writer")]
    Flush,
    #[error("csv output is not utf-8")]
    BadUtf8,
}

/// Delimiter, quote and title handling. Defaults follow the common comma
/// dialect with a title row.
#[derive(Clone, Copy, Debug)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub quote: u8,
    pub titles: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        CsvOptions {
            delimiter: b',',
            quote: b'"',
            titles: true,
        }
    }
}

impl CsvOptions {
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn titles(mut self, titles: bool) -> Self {
        self.titles = titles;
        self
    }
}

/// Renders an Array-of-rows tree as CSV text.
pub fn to_csv(si: &SerializationInfo, options: CsvOptions) -> Result<String, CsvError> {
    if !matches!(si.category(), Category::Array | Category::Void) {
        return Err(CsvError::NotAnArray);
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .from_writer(Vec::new());

    let mut titles_written = false;
    for (row_index, row) in si.members().enumerate() {
        match row.category() {
            Category::Object => {
                if options.titles && !titles_written {
                    writer.write_record(row.members().map(|cell| cell.name()))?;
                    titles_written = true;
                }
                let cells = row
                    .members()
                    .enumerate()
                    .map(|(column, cell)| {
                        cell.get_value::<String>().map_err(|_| CsvError::BadCell {
                            row: row_index,
                            column,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                writer.write_record(&cells)?;
            }
            Category::Array => {
                let cells = row
                    .members()
                    .enumerate()
                    .map(|(column, cell)| {
                        cell.get_value::<String>().map_err(|_| CsvError::BadCell {
                            row: row_index,
                            column,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                writer.write_record(&cells)?;
            }
            _ => return Err(CsvError::BadRow(row_index)),
        }
    }

    let bytes = writer.into_inner().map_err(|_| CsvError::Flush)?;
    String::from_utf8(bytes).map_err(|_| CsvError::BadUtf8)
}

/// Parses CSV text into an Array-of-rows tree. With titles enabled the rows
/// are Objects named after the title row; without, rows are Arrays.
pub fn from_csv(text: &str, options: CsvOptions) -> Result<SerializationInfo, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .quote(options.quote)
        .has_headers(options.titles)
        .flexible(true)
        .from_reader(text.as_bytes());

    let titles: Vec<String> = if options.titles {
        reader.headers()?.iter().map(str::to_owned).collect()
    } else {
        Vec::new()
    };

    let mut root = SerializationInfo::new();
    root.set_category(Category::Array);
    root.set_type_name("array");

    for record in reader.records() {
        let record = record?;
        let row = root.add_member("");
        for (column, cell) in record.iter().enumerate() {
            let member = if options.titles {
                let name = titles
                    .get(column)
                    .map(String::as_str)
                    .unwrap_or("");
                row.add_member(name)
            } else {
                row.add_member("")
            };
            member.set_value(cell);
            member.set_type_name("string");
        }
    }
    Ok(root)
}
