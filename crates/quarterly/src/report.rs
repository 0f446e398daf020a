//! Spreadsheet output.
//!
//! Writes exactly four sheets: Income Statement, Balance Sheet, Cash Flow
//! Statement and Summary. Statement sheets have a `Line Item` column followed
//! by one column per fiscal quarter.

use quarterly_core::{QuarterlyError, Result};
use quarterly_engine::{Cell, StatementTable};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};
use std::path::Path;

use crate::pipeline::Extraction;

const INDETERMINATE_TEXT: &str = "Indeterminate";

const LEGEND_TEXT: &str =
    "Italic values are derived from year-to-date or annual totals; all others are reported directly.";

const FORMAT_DESCRIPTION: &str = "Quarters as columns (e.g., 1Q22, 2Q22, 3Q22, etc.)";

const LABEL_COLUMN_WIDTH: f64 = 48.0;
const QUARTER_COLUMN_WIDTH: f64 = 20.0;

/// Presentation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Render derived values in italics and add a legend.
    pub annotate_provenance: bool,
}

fn xlsx_error(e: XlsxError) -> QuarterlyError {
    QuarterlyError::Report(e.to_string())
}

/// Cell formats shared by every sheet.
#[derive(Debug)]
struct Formats {
    header: Format,
    whole: Format,
    fractional: Format,
    whole_derived: Format,
    fractional_derived: Format,
    missing: Format,
    legend: Format,
}

impl Formats {
    fn new() -> Self {
        let whole = Format::new().set_num_format("#,##0");
        let fractional = Format::new().set_num_format("#,##0.00");
        Self {
            header: Format::new().set_bold(),
            whole_derived: whole.clone().set_italic(),
            fractional_derived: fractional.clone().set_italic(),
            whole,
            fractional,
            missing: Format::new().set_font_color(Color::Gray),
            legend: Format::new().set_italic(),
        }
    }

    fn number(&self, value: Decimal, derived: bool) -> &Format {
        match (value.fract().is_zero(), derived) {
            (true, false) => &self.whole,
            (false, false) => &self.fractional,
            (true, true) => &self.whole_derived,
            (false, true) => &self.fractional_derived,
        }
    }
}

/// Writes `extraction` to `path` as an xlsx workbook.
///
/// # Errors
/// Returns [`QuarterlyError::Report`] if a sheet cannot be built or the file
/// cannot be saved.
pub fn write_report(extraction: &Extraction, path: &Path, options: ReportOptions) -> Result<()> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();

    for table in &extraction.statements {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(&table.title).map_err(xlsx_error)?;
        write_table(&mut worksheet, table, 0, &formats, options)?;
        workbook.push_worksheet(worksheet);
    }

    let mut summary = Worksheet::new();
    summary
        .set_name(&extraction.summary.title)
        .map_err(xlsx_error)?;
    write_summary(&mut summary, extraction, &formats, options)?;
    workbook.push_worksheet(summary);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| QuarterlyError::Report(e.to_string()))?;
    }
    workbook.save(path).map_err(xlsx_error)?;
    Ok(())
}

/// Metadata rows at the top of the Summary sheet.
fn metadata(extraction: &Extraction) -> Vec<(&'static str, String)> {
    vec![
        ("Company", extraction.filer.name.clone()),
        ("Ticker", extraction.filer.symbol.to_string()),
        ("CIK", extraction.filer.cik.clone()),
        ("Data Source", extraction.source_name.clone()),
        (
            "Extract Date",
            extraction
                .extracted_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        ("Currency", extraction.currency.clone()),
        ("Format", FORMAT_DESCRIPTION.to_string()),
        ("Taxonomy Version", extraction.taxonomy_version.clone()),
    ]
}

fn write_summary(
    worksheet: &mut Worksheet,
    extraction: &Extraction,
    formats: &Formats,
    options: ReportOptions,
) -> Result<()> {
    worksheet
        .write_string_with_format(0, 0, "Field", &formats.header)
        .map_err(xlsx_error)?;
    worksheet
        .write_string_with_format(0, 1, "Value", &formats.header)
        .map_err(xlsx_error)?;

    let mut row = 1;
    for (field, value) in metadata(extraction) {
        worksheet.write_string(row, 0, field).map_err(xlsx_error)?;
        worksheet.write_string(row, 1, value).map_err(xlsx_error)?;
        row += 1;
    }

    write_table(worksheet, &extraction.summary, row + 1, formats, options)?;
    Ok(())
}

/// Writes a table starting at `first_row`; returns the next free row.
fn write_table(
    worksheet: &mut Worksheet,
    table: &StatementTable,
    first_row: u32,
    formats: &Formats,
    options: ReportOptions,
) -> Result<u32> {
    worksheet
        .set_column_width(0, LABEL_COLUMN_WIDTH)
        .map_err(xlsx_error)?;
    worksheet
        .write_string_with_format(
            first_row,
            0,
            quarterly_engine::assembler::LINE_ITEM_HEADER,
            &formats.header,
        )
        .map_err(xlsx_error)?;
    for (i, header) in table.headers().into_iter().enumerate() {
        let col = column(i)?;
        worksheet
            .set_column_width(col, QUARTER_COLUMN_WIDTH)
            .map_err(xlsx_error)?;
        worksheet
            .write_string_with_format(first_row, col, header, &formats.header)
            .map_err(xlsx_error)?;
    }

    let mut row = first_row + 1;
    for table_row in &table.rows {
        if table_row.is_heading() {
            worksheet
                .write_string_with_format(row, 0, &table_row.label, &formats.header)
                .map_err(xlsx_error)?;
            row += 1;
            continue;
        }
        worksheet
            .write_string(row, 0, &table_row.label)
            .map_err(xlsx_error)?;
        for (i, cell) in table_row.cells.iter().enumerate() {
            write_cell(worksheet, row, column(i)?, cell, formats, options)?;
        }
        row += 1;
    }

    if options.annotate_provenance && table.has_derived() {
        row += 1;
        worksheet
            .write_string_with_format(row, 0, LEGEND_TEXT, &formats.legend)
            .map_err(xlsx_error)?;
        row += 1;
    }

    Ok(row)
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &Cell,
    formats: &Formats,
    options: ReportOptions,
) -> Result<()> {
    match cell {
        Cell::Value { value, .. } => {
            let derived = options.annotate_provenance && cell.is_derived();
            let number = value.to_f64().ok_or_else(|| {
                QuarterlyError::Report(format!("{} does not fit a spreadsheet number", value))
            })?;
            worksheet
                .write_number_with_format(row, col, number, formats.number(*value, derived))
                .map_err(xlsx_error)?;
        }
        Cell::Indeterminate { .. } => {
            worksheet
                .write_string_with_format(row, col, INDETERMINATE_TEXT, &formats.missing)
                .map_err(xlsx_error)?;
        }
    }
    Ok(())
}

/// Spreadsheet column for quarter `index` (column 0 holds the labels).
fn column(index: usize) -> Result<u16> {
    u16::try_from(index + 1)
        .map_err(|_| QuarterlyError::Report(format!("too many columns ({})", index + 1)))
}
