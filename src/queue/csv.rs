//! Minimal RFC 4180 reader and writer for keyword lists.

use crate::queue::QueueError;

/// Quote a field when it contains a separator, quote, line break or edge spaces
pub fn escape_field(field: &str) -> String {
    let needs_quotes = field.contains([',', '"', '\n', '\r'])
        || field.starts_with(' ')
        || field.ends_with(' ');
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_record(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| escape_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

/// Split text into records. Quoted fields may contain commas, doubled quotes and
/// line breaks. Blank lines are skipped. Returns `(line_number, fields)` pairs.
pub fn parse_records(text: &str) -> Result<Vec<(usize, Vec<String>)>, QueueError> {
    let mut records = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() && !quoted => {
                in_quotes = true;
                quoted = true;
            }
            '"' => {
                return Err(QueueError::Csv {
                    line,
                    message: "unexpected quote inside unquoted field".to_string(),
                })
            }
            ',' => {
                fields.push(std::mem::take(&mut field));
                quoted = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                fields.push(std::mem::take(&mut field));
                quoted = false;
                if !(fields.len() == 1 && fields[0].is_empty()) {
                    records.push((record_line, std::mem::take(&mut fields)));
                } else {
                    fields.clear();
                }
                line += 1;
                record_line = line;
            }
            _ if quoted => {
                return Err(QueueError::Csv {
                    line,
                    message: "text after closing quote".to_string(),
                })
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(QueueError::Csv {
            line: record_line,
            message: "unterminated quoted field".to_string(),
        });
    }

    if !field.is_empty() || !fields.is_empty() || quoted {
        fields.push(field);
        records.push((record_line, fields));
    }

    Ok(records)
}
