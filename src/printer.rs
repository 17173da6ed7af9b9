use std::io::Write;

/// Renders fixed-width tables for the catalog's `show`/`desc` operations.
pub struct Printer {
    column_widths: Vec<usize>,
}

impl Printer {
    const MIN_WIDTH: usize = 10;

    pub fn new(captions: &[&str]) -> Self {
        let column_widths = captions
            .iter()
            .map(|caption| caption.chars().count().max(Self::MIN_WIDTH))
            .collect();
        Self { column_widths }
    }

    pub fn write_separator(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        let line = self
            .column_widths
            .iter()
            .map(|width| "-".repeat(width + 2))
            .collect::<Vec<String>>()
            .join("+");
        writeln!(writer, "+{}+", line)
    }

    pub fn write_record(&self, values: &[&str], writer: &mut dyn Write) -> std::io::Result<()> {
        let line = self
            .column_widths
            .iter()
            .zip(values)
            .map(|(width, value)| format!(" {:<1$} ", value, *width))
            .collect::<Vec<String>>()
            .join("|");
        writeln!(writer, "|{}|", line)
    }
}
