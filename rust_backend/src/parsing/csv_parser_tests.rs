#[cfg(test)]
mod tests {
    use crate::core::domain::MetadataValue;
    use crate::parsing::csv_parser::{parse_record_csv, row_to_record};
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper to create a temp CSV file
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut temp_file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write!(temp_file, "{}", content).unwrap();
        temp_file
    }

    /// Test parsing CSV with all record columns
    #[test]
    fn test_parse_record_csv_basic() {
        let csv_content = "subject_id,timestamp,activity_type,duration_s,load\nA,2024-01-01T08:00:00Z,running,1800,42.5\nB,2024-01-02T08:00:00Z,cycling,3600,80\n";

        let temp_file = create_temp_csv(csv_content);
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        assert_eq!(df.height(), 2);

        let record = row_to_record(&df, 1, 1).unwrap();
        assert_eq!(record.subject_id.as_deref(), Some("B"));
        assert_eq!(record.activity_type.as_deref(), Some("cycling"));
        assert_eq!(record.duration_s, Some(3600.0));
        assert_eq!(record.load, Some(80.0));
    }

    /// Test that identifiers keep leading zeros because every column is text
    #[test]
    fn test_subject_ids_are_not_coerced() {
        let csv_content = "subject_id,timestamp,activity_type,duration_s,load\n007,2024-01-01T08:00:00Z,running,60,1\n";

        let temp_file = create_temp_csv(csv_content);
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        let record = row_to_record(&df, 0, 0).unwrap();
        assert_eq!(record.subject_id.as_deref(), Some("007"));
    }

    /// Test extra columns become metadata
    #[test]
    fn test_extra_columns_become_metadata() {
        let csv_content = "subject_id,timestamp,activity_type,duration_s,load,device,indoor,hr_avg\nA,2024-01-01T08:00:00Z,indoor_cycling,3667,561,instinct2,true,150\n";

        let temp_file = create_temp_csv(csv_content);
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        let record = row_to_record(&df, 0, 0).unwrap();

        assert_eq!(
            record.metadata.get("device"),
            Some(&MetadataValue::String("instinct2".to_string()))
        );
        assert_eq!(record.metadata.get("indoor"), Some(&MetadataValue::Bool(true)));
        assert_eq!(record.metadata.get("hr_avg"), Some(&MetadataValue::Number(150.0)));
    }

    /// Test empty cells map to missing fields rather than errors
    #[test]
    fn test_empty_cells_are_missing() {
        let csv_content = "subject_id,timestamp,activity_type,duration_s,load\nA,,running,,5\n";

        let temp_file = create_temp_csv(csv_content);
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        let record = row_to_record(&df, 0, 0).unwrap();
        assert!(record.timestamp.is_none());
        assert!(record.duration_s.is_none());
        assert_eq!(record.load, Some(5.0));
    }

    /// Test cells that cannot be coerced make the row an error
    #[test]
    fn test_invalid_cells_are_errors() {
        let csv_content = "subject_id,timestamp,activity_type,duration_s,load\nA,2024-01-01T08:00:00Z,running,abc,5\nA,someday,running,60,5\n";

        let temp_file = create_temp_csv(csv_content);
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        assert!(row_to_record(&df, 0, 0).is_err());
        assert!(row_to_record(&df, 1, 1).is_err());
    }

    /// Test an empty file parses to an empty frame
    #[test]
    fn test_empty_file() {
        let temp_file = create_temp_csv("");
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        assert_eq!(df.height(), 0);
    }

    /// Test a header-only file has no rows
    #[test]
    fn test_header_only_file() {
        let temp_file = create_temp_csv("subject_id,timestamp,activity_type,duration_s,load\n");
        let df = parse_record_csv(temp_file.path()).unwrap().frame;
        assert_eq!(df.height(), 0);
    }

    /// Test a row Polars cannot read is counted and the other rows are kept
    #[test]
    fn test_unreadable_row_is_counted() {
        let mut temp_file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        temp_file
            .write_all(b"subject_id,timestamp,activity_type,duration_s,load\nA,2024-01-01T08:00:00Z,running,1800,10\nB,2024-01-01T09:00:00Z,\xff\xfe,600,5\nC,2024-01-02T08:00:00Z,cycling,3600,30\n")
            .unwrap();

        let table = parse_record_csv(temp_file.path()).unwrap();
        assert_eq!(table.malformed, 1);
        assert_eq!(table.frame.height(), 2);

        let last = row_to_record(&table.frame, 1, 1).unwrap();
        assert_eq!(last.subject_id.as_deref(), Some("C"));
        assert_eq!(last.load, Some(30.0));
    }
}
