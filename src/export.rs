use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::models::FinalizedData;
use crate::table::Table;

/// Writes `table` as CSV: one header row, then every row in column order.
pub fn write_csv_to<W: Write>(table: &Table, writer: W) -> anyhow::Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(table.columns())?;
    for row in table.rows() {
        csv.write_record(table.columns().iter().map(|column| row.get(column).to_string()))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_csv(table: &Table, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_csv_to(table, file).with_context(|| format!("failed to write {}", path.display()))
}

/// Writes the five finalized tables as `<name>.csv` under `dir`.
pub fn write_finalized(data: &FinalizedData, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut written = Vec::new();
    for (name, table) in data.tables() {
        let path = dir.join(format!("{name}.csv"));
        write_csv(table, &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Record, Value};

    #[test]
    fn renders_header_and_cells_in_column_order() {
        let mut table = Table::new(&["email", "total_score", "unit"]);
        table.push(
            Record::new()
                .with("unit", Value::NotAvailable)
                .with("email", "a@x.com")
                .with("total_score", 87.5),
        );
        table.push(Record::new().with("email", "b, c@x.com").with("total_score", 90.0));

        let mut out = Vec::new();
        write_csv_to(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "email,total_score,unit\na@x.com,87.5,N/A\n\"b, c@x.com\",90,\n"
        );
    }

    #[test]
    fn finalized_tables_land_in_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested");
        let mut data = FinalizedData::default();
        data.registry = Table::new(&["email", "nik"]);
        data.registry
            .push(Record::new().with("email", "a@x.com").with("nik", "000123"));

        let written = write_finalized(&data, &out).unwrap();
        assert_eq!(written.len(), 5);
        let registry = std::fs::read_to_string(out.join("registry.csv")).unwrap();
        assert_eq!(registry, "email,nik\na@x.com,000123\n");
        assert!(out.join("capture_schedule.csv").exists());
    }
}
