//! `keyParams.csv`: one `key_index,key_down_adc,key_up_adc` row per key, `-9999` for unset values.

use hammerkey_ports::storage::{KeyParamRecord, KeyParamTable, StorageError, ADC_VALUE_NOT_SET};
use hammerkey_ports::types::KeyIndex;

pub const HEADER: [&str; 3] = ["key_index", "key_down_adc", "key_up_adc"];

pub fn parse(text: &str) -> Result<KeyParamTable, StorageError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header)) = lines.next() else {
        return Ok(KeyParamTable::default());
    };
    let names: Vec<&str> = header.split(',').map(str::trim).collect();
    let mut columns = [0usize; 3];
    for (slot, wanted) in columns.iter_mut().zip(HEADER) {
        *slot = names.iter().position(|name| *name == wanted).ok_or_else(|| {
            StorageError::Serde(format!("key parameter header lacks column {wanted}"))
        })?;
    }

    let mut table = KeyParamTable::default();
    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let value = |column: usize| -> Result<i64, StorageError> {
            let field = fields.get(column).ok_or_else(|| {
                StorageError::Serde(format!("line {line_no}: expected {} fields", names.len()))
            })?;
            field
                .parse::<i64>()
                .map_err(|e| StorageError::Serde(format!("line {line_no}: {field:?}: {e}")))
        };

        let index = value(columns[0])?;
        let Ok(index) = KeyIndex::try_from(index) else {
            log::warn!("line {line_no}: ignoring negative key index {index}");
            continue;
        };
        table.insert(
            index,
            KeyParamRecord {
                adc_down: adc_value(value(columns[1])?, line_no)?,
                adc_up: adc_value(value(columns[2])?, line_no)?,
            },
        );
    }
    Ok(table)
}

pub fn format(table: &KeyParamTable) -> String {
    let mut out = HEADER.join(",");
    out.push('\n');
    for (index, record) in table.iter() {
        out.push_str(&format!(
            "{},{},{}\n",
            index,
            record.adc_down.unwrap_or(ADC_VALUE_NOT_SET),
            record.adc_up.unwrap_or(ADC_VALUE_NOT_SET)
        ));
    }
    out
}

fn adc_value(raw: i64, line_no: usize) -> Result<Option<i32>, StorageError> {
    let value = i32::try_from(raw)
        .map_err(|_| StorageError::Serde(format!("line {line_no}: {raw} out of range")))?;
    Ok((value != ADC_VALUE_NOT_SET).then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_rows_and_sentinels() {
        let table = parse("key_index,key_down_adc,key_up_adc\n0,430,50\n1,-9999,61\n\n").unwrap();
        assert_eq!(table.range(0), Some((430, 50)));
        assert_eq!(
            table.get(1),
            KeyParamRecord {
                adc_down: None,
                adc_up: Some(61)
            }
        );
    }

    #[test]
    fn columns_are_found_by_name() {
        let table = parse("key_up_adc, key_index, key_down_adc\r\n40, 3, 500\r\n").unwrap();
        assert_eq!(table.range(3), Some((500, 40)));
    }

    #[test]
    fn negative_index_is_skipped() {
        let table = parse("key_index,key_down_adc,key_up_adc\n-1,430,50\n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_rows_are_errors() {
        assert!(parse("key_index,key_down_adc\n0,1\n").is_err());
        assert!(parse("key_index,key_down_adc,key_up_adc\n0,abc,50\n").is_err());
        assert!(parse("key_index,key_down_adc,key_up_adc\n0,430\n").is_err());
    }

    #[test]
    fn writes_sentinel_for_unset_values() {
        let mut table = KeyParamTable::default();
        table.set_adc_up(2, 55);
        table.set_adc_down(0, 430);
        table.set_adc_up(0, 50);
        assert_eq!(
            format(&table),
            "key_index,key_down_adc,key_up_adc\n0,430,50\n2,-9999,55\n"
        );
    }

    #[test]
    fn empty_file_is_an_empty_table() {
        assert!(parse("").unwrap().is_empty());
    }
}
