use std::sync::OnceLock;

use regex::Regex;

use crate::error::{FleetError, Result};
use crate::models::{ColumnSpec, FieldKind};
use crate::repair::field::repair_field;

/// A data row after structural repair.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstructed {
    pub fields: Vec<String>,
    pub repairs: Vec<String>,
    /// The following physical line was merged into this row and must be skipped.
    pub consumed_next: bool,
    /// Source text the row was built from (both lines when merged).
    pub raw: String,
}

// ---------------------------------------------------------------------------
// Quote repair
// ---------------------------------------------------------------------------

/// True when a quote at `pos` is followed, after optional spaces, by a delimiter or end of line.
fn closes_field(chars: &[char], pos: usize) -> bool {
    chars[pos + 1..]
        .iter()
        .find(|c| !c.is_whitespace())
        .map_or(true, |&c| c == ',')
}

/// Index of the last quote on the line that could close a field.
fn last_closer(chars: &[char]) -> Option<usize> {
    (0..chars.len())
        .rev()
        .find(|&i| chars[i] == '"' && closes_field(chars, i))
}

/// Fix unbalanced or improperly escaped quotes so the line parses as intended.
pub fn repair_quotes(line: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len() + 2);
    let mut repairs = Vec::new();
    let last_closer = last_closer(&chars);
    let mut i = 0;
    let mut field_no = 1;

    loop {
        let start = i;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }

        if i < chars.len() && chars[i] == '"' {
            if i > start {
                repairs.push(format!("Removed padding before quoted field {field_no}"));
            }
            out.push('"');
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let c = chars[i];
                if c != '"' {
                    out.push(c);
                    i += 1;
                    continue;
                }
                if chars.get(i + 1) == Some(&'"') {
                    out.push_str("\"\"");
                    i += 2;
                } else if closes_field(&chars, i) || last_closer.map_or(true, |last| last <= i) {
                    out.push('"');
                    i += 1;
                    closed = true;
                    break;
                } else {
                    out.push_str("\"\"");
                    repairs.push(format!("Escaped embedded quote in field {field_no}"));
                    i += 1;
                }
            }
            if !closed {
                out.push('"');
                repairs.push(format!("Closed unterminated quote in field {field_no}"));
            }
            // Anything between the closing quote and the delimiter is left for the parser.
            while i < chars.len() && chars[i] != ',' {
                out.push(chars[i]);
                i += 1;
            }
        } else {
            let content: String = chars[start..]
                .iter()
                .take_while(|&&c| c != ',')
                .collect();
            i = start + content.chars().count();
            if content.contains('"') {
                out.push('"');
                out.push_str(&content.replace('"', "\"\""));
                out.push('"');
                repairs.push(format!("Escaped stray quote in field {field_no}"));
            } else {
                out.push_str(&content);
            }
        }

        if i >= chars.len() {
            break;
        }
        // chars[i] is the delimiter
        out.push(',');
        i += 1;
        field_no += 1;
    }

    (out, repairs)
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

fn parse_with(line: &str, delimiter: char) -> (Vec<String>, Vec<String>) {
    let chars: Vec<char> = line.chars().collect();
    let mut fields = Vec::new();
    let mut repairs = Vec::new();
    let mut i = 0;

    loop {
        let field_no = fields.len() + 1;
        let start = i;
        while i < chars.len() && chars[i].is_whitespace() && chars[i] != delimiter {
            i += 1;
        }

        let mut value = String::new();
        if i < chars.len() && chars[i] == '"' {
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == '"' {
                    if chars.get(i + 1) == Some(&'"') {
                        value.push('"');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    closed = true;
                    break;
                }
                value.push(chars[i]);
                i += 1;
            }
            if !closed {
                repairs.push(format!("Unterminated quote in field {field_no}"));
            }
            let trailing: String = chars[i..]
                .iter()
                .take_while(|&&c| c != delimiter)
                .collect();
            i += trailing.chars().count();
            if !trailing.trim().is_empty() {
                value.push_str(trailing.trim_end());
                repairs.push(format!("Kept text after closing quote in field {field_no}"));
            }
        } else {
            i = start;
            while i < chars.len() && chars[i] != delimiter {
                value.push(chars[i]);
                i += 1;
            }
        }
        fields.push(value);

        if i >= chars.len() {
            break;
        }
        i += 1;
    }

    (fields, repairs)
}

/// Split a comma-delimited line into field values, honouring quotes and `""` escapes.
pub fn parse_line(line: &str) -> (Vec<String>, Vec<String>) {
    parse_with(line, ',')
}

/// Serialize field values back into one comma-delimited line.
pub fn join_fields(fields: &[String]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(fields)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| FleetError::Other(format!("Failed to serialize row: {e}")))?;
    let line = String::from_utf8(bytes)
        .map_err(|e| FleetError::Other(format!("Serialized row is not UTF-8: {e}")))?;
    Ok(line.trim_end_matches('\n').to_string())
}

// ---------------------------------------------------------------------------
// Delimiter repair
// ---------------------------------------------------------------------------

fn thousands_head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-+(]?\s*([A-Za-z]{2,3}\.?)?\s*[$€£]?\s*\d{1,3}$").unwrap())
}

fn thousands_tail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{3}(\.\d+)?\)?(\s*[A-Za-z]{2,3}\.?)?\s*$").unwrap())
}

fn typed_columns_valid(fields: &[String], columns: &[ColumnSpec]) -> bool {
    columns
        .iter()
        .zip(fields)
        .filter(|(c, _)| c.kind != FieldKind::Text)
        .all(|(c, v)| repair_field(v, c).error.is_none())
}

/// Normalize delimiters that break a record into the wrong number of fields.
pub fn repair_delimiters(line: &str, columns: &[ColumnSpec]) -> Result<(String, Vec<String>)> {
    normalize_delimiters(line, columns, true)
}

fn normalize_delimiters(
    line: &str,
    columns: &[ColumnSpec],
    absorb_surplus: bool,
) -> Result<(String, Vec<String>)> {
    let width = columns.len();
    let (mut fields, _) = parse_line(line);
    let mut repairs = Vec::new();

    if width > 1 && fields.len() == 1 {
        for (delimiter, label) in [(';', "semicolon"), ('\t', "tab")] {
            let (alt, _) = parse_with(line, delimiter);
            if alt.len() == width {
                fields = alt;
                repairs.push(format!("Converted {label} delimiters to commas"));
                break;
            }
        }
    }

    if fields.len() > width {
        let mut i = 0;
        while fields.len() > width && i + 1 < fields.len() {
            let numeric = columns.get(i).is_some_and(|c| c.kind == FieldKind::Numeric);
            if numeric
                && thousands_head_re().is_match(&fields[i])
                && thousands_tail_re().is_match(&fields[i + 1])
            {
                let tail = fields.remove(i + 1);
                fields[i] = format!("{},{}", fields[i], tail);
                repairs.push(format!("Rejoined thousands separator in {}", columns[i].name));
            } else {
                i += 1;
            }
        }
    }

    if absorb_surplus && fields.len() > width {
        // Surplus fields are rejoined with the comma they were split on.
        let surplus = fields.len() - width;
        let text_columns: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == FieldKind::Text)
            .map(|(i, _)| i)
            .rev()
            .collect();
        let absorb = |t: usize| -> Vec<String> {
            let mut trial = fields[..t].to_vec();
            trial.push(fields[t..=t + surplus].join(","));
            trial.extend_from_slice(&fields[t + surplus + 1..]);
            trial
        };
        let chosen = text_columns
            .iter()
            .copied()
            .find(|&t| typed_columns_valid(&absorb(t), columns))
            .or_else(|| text_columns.first().copied());
        if let Some(t) = chosen {
            fields = absorb(t);
            repairs.push(format!(
                "Kept {} stray comma(s) inside {}",
                surplus, columns[t].name
            ));
        }
    }

    if repairs.is_empty() {
        return Ok((line.to_string(), repairs));
    }
    Ok((join_fields(&fields)?, repairs))
}

// ---------------------------------------------------------------------------
// Reconstruction with single-line lookahead
// ---------------------------------------------------------------------------

fn rebuild(
    line: &str,
    columns: &[ColumnSpec],
    absorb_surplus: bool,
) -> Result<(Vec<String>, Vec<String>)> {
    let (quoted, mut repairs) = repair_quotes(line);
    let (delimited, delimiter_repairs) = normalize_delimiters(&quoted, columns, absorb_surplus)?;
    repairs.extend(delimiter_repairs);
    let (fields, parse_repairs) = parse_line(&delimited);
    repairs.extend(parse_repairs);
    Ok((fields, repairs))
}

/// Repair one raw line, merging it with `next` when both look like halves of one record.
pub fn reconstruct(line: &str, next: Option<&str>, columns: &[ColumnSpec]) -> Result<Reconstructed> {
    let width = columns.len();
    let (fields, repairs) = rebuild(line, columns, true)?;

    if width > 0 && fields.len() < width {
        if let Some(next) = next {
            if let Some(merged) = merge_continuation(line, &fields, next, columns)? {
                return Ok(merged);
            }
        }
    }

    Ok(Reconstructed {
        fields,
        repairs,
        consumed_next: false,
        raw: line.to_string(),
    })
}

/// The joined row, when `next` carries on the last field(s) of the short row `fields`.
fn merge_continuation(
    line: &str,
    fields: &[String],
    next: &str,
    columns: &[ColumnSpec],
) -> Result<Option<Reconstructed>> {
    let width = columns.len();
    let (next_fields, _) = rebuild(next, columns, true)?;
    if next_fields.len() >= width {
        return Ok(None);
    }
    // Two short lines that each hold well-typed values are separate records.
    let independent =
        typed_columns_valid(fields, columns) && typed_columns_valid(&next_fields, columns);

    for joiner in [" ", ","] {
        let candidate = format!("{}{}{}", line.trim_end(), joiner, next.trim_start());
        let (merged, merged_repairs) = rebuild(&candidate, columns, false)?;
        if merged.len() != width || (independent && !typed_columns_valid(&merged, columns)) {
            continue;
        }
        return Ok(Some(Reconstructed {
            fields: merged,
            repairs: merged_repairs,
            consumed_next: true,
            raw: format!("{line}\n{next}"),
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImportSchema, ImportType};

    fn text_columns(n: usize) -> Vec<ColumnSpec> {
        (0..n)
            .map(|i| ColumnSpec::new(&format!("c{i}"), FieldKind::Text, false))
            .collect()
    }

    #[test]
    fn test_parse_line_plain_and_quoted() {
        let (fields, repairs) = parse_line("1,\"Doha, Qatar\",\"say \"\"hi\"\"\",");
        assert_eq!(fields, vec!["1", "Doha, Qatar", "say \"hi\"", ""]);
        assert!(repairs.is_empty());
    }

    #[test]
    fn test_parse_line_text_after_closing_quote() {
        let (fields, repairs) = parse_line("\"abc\"def,x");
        assert_eq!(fields, vec!["abcdef", "x"]);
        assert_eq!(repairs.len(), 1);
    }

    #[test]
    fn test_quote_repair_leaves_clean_lines_alone() {
        let line = "1,\"a, b\",c";
        let (fixed, repairs) = repair_quotes(line);
        assert_eq!(fixed, line);
        assert!(repairs.is_empty());
    }

    #[test]
    fn test_quote_repair_closes_unterminated_field() {
        let (fixed, repairs) = repair_quotes("1,\"Main street");
        assert_eq!(fixed, "1,\"Main street\"");
        assert_eq!(repairs, vec!["Closed unterminated quote in field 2".to_string()]);
    }

    #[test]
    fn test_quote_repair_escapes_stray_quote() {
        let (fixed, repairs) = repair_quotes("1,12\" rims,x");
        assert_eq!(fixed, "1,\"12\"\" rims\",x");
        assert_eq!(repairs.len(), 1);
        let (fields, _) = parse_line(&fixed);
        assert_eq!(fields, vec!["1", "12\" rims", "x"]);
    }

    #[test]
    fn test_quote_repair_escapes_embedded_quotes() {
        let (fixed, repairs) = repair_quotes("\"He said \"stop\" twice\",2");
        let (fields, _) = parse_line(&fixed);
        assert_eq!(fields, vec!["He said \"stop\" twice", "2"]);
        assert_eq!(repairs.len(), 2);
    }

    #[test]
    fn test_quote_repair_removes_padding() {
        let (fixed, repairs) = repair_quotes("1,  \"x\"");
        assert_eq!(fixed, "1,\"x\"");
        assert_eq!(repairs.len(), 1);
    }

    #[test]
    fn test_semicolon_delimiters_are_converted() {
        let (fixed, repairs) = repair_delimiters("a;b;c", &text_columns(3)).unwrap();
        assert_eq!(fixed, "a,b,c");
        assert_eq!(repairs.len(), 1);
    }

    #[test]
    fn test_thousands_separator_is_rejoined() {
        let schema = ImportSchema::from_headers(&["agreement_number", "amount", "note"]);
        let (fixed, repairs) = repair_delimiters("AG-1,1,000.50,rent", &schema.columns).unwrap();
        assert_eq!(fixed, "AG-1,\"1,000.50\",rent");
        assert!(repairs[0].contains("amount"));
    }

    #[test]
    fn test_stray_comma_is_absorbed_by_text_column() {
        let schema = ImportSchema::from_headers(&["name", "address", "amount"]);
        let (fixed, repairs) =
            repair_delimiters("Ali,Street 5, Doha,100", &schema.columns).unwrap();
        let (fields, _) = parse_line(&fixed);
        assert_eq!(fields, vec!["Ali", "Street 5, Doha", "100"]);
        assert_eq!(repairs.len(), 1);
    }

    #[test]
    fn test_matching_width_is_untouched() {
        let (fixed, repairs) = repair_delimiters("a,b", &text_columns(2)).unwrap();
        assert_eq!(fixed, "a,b");
        assert!(repairs.is_empty());
    }

    #[test]
    fn test_reconstruct_merges_split_record() {
        let columns = text_columns(3);
        let row = reconstruct("1,Main", Some("street,x"), &columns).unwrap();
        assert!(row.consumed_next);
        assert_eq!(row.fields, vec!["1", "Main street", "x"]);
        assert_eq!(row.fields.len(), columns.len());
    }

    #[test]
    fn test_reconstruct_merges_split_quoted_field() {
        let columns = text_columns(3);
        let row = reconstruct("1,\"Main street", Some("Doha\",x"), &columns).unwrap();
        assert!(row.consumed_next);
        assert_eq!(row.fields, vec!["1", "Main street Doha", "x"]);
    }

    #[test]
    fn test_reconstruct_does_not_swallow_complete_next_row() {
        let columns = text_columns(3);
        let row = reconstruct("1,a", Some("2,b,c"), &columns).unwrap();
        assert!(!row.consumed_next);
        assert_eq!(row.fields.len(), 2);
    }

    #[test]
    fn test_reconstruct_keeps_two_short_records_apart() {
        let columns = ImportType::Payments.schema().columns;
        let row = reconstruct(
            "AG-1,01/02/2025,100,cash,rent",
            Some("AG-2,02/02/2025,200,card,rent"),
            &columns,
        )
        .unwrap();
        assert!(!row.consumed_next);
        assert_eq!(row.fields, vec!["AG-1", "01/02/2025", "100", "cash", "rent"]);
    }

    #[test]
    fn test_reconstruct_rejects_merge_that_breaks_typed_columns() {
        let columns = ImportType::Payments.schema().columns;
        let row = reconstruct("AG-1,01/02/2025,100", Some("AG-2,02/02/2025,200"), &columns).unwrap();
        assert!(!row.consumed_next);
        assert_eq!(row.fields.len(), 3);
    }

    #[test]
    fn test_reconstruct_merges_typed_split_record() {
        let columns = ImportType::Payments.schema().columns;
        let row = reconstruct("AG-1,01/02/2025,100,cash,Main", Some("street,completed"), &columns).unwrap();
        assert!(row.consumed_next);
        assert_eq!(row.fields[4], "Main street");
        assert_eq!(row.fields[5], "completed");
    }

    #[test]
    fn test_quote_repair_handles_many_embedded_quotes() {
        let line = format!("\"{}b\",x", "a\"".repeat(20_000));
        let (fixed, _) = repair_quotes(&line);
        let (fields, _) = parse_line(&fixed);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1], "x");
    }

    #[test]
    fn test_join_fields_quotes_when_needed() {
        let fields = vec!["a".to_string(), "b, c".to_string(), "d\"e".to_string()];
        assert_eq!(join_fields(&fields).unwrap(), "a,\"b, c\",\"d\"\"e\"");
    }
}
