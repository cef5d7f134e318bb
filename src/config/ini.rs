//! Minimal line-oriented `.ini` parser: `[section]` headers, `key = value`
//! lines, `;`/`#` comments. Intentionally thin — this exists only so the
//! daemon has something real to load at startup.

use std::collections::HashMap;

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum IniError {
    #[snafu(display("line {}: key/value line outside any section", line))]
    KeyOutsideSection { line: usize },
    #[snafu(display("line {}: malformed key=value line: {:?}", line, text))]
    Malformed { line: usize, text: String },
}

/// A parsed `.ini` document: section name (empty string for anything before
/// the first header) to an ordered map of key/value pairs.
#[derive(Debug, Default, Clone)]
pub struct Document {
    pub sections: Vec<(String, HashMap<String, String>)>,
}

impl Document {
    pub fn section(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kv)| kv)
    }

    pub fn sections_named(&self, name: &str) -> impl Iterator<Item = &HashMap<String, String>> {
        self.sections
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, kv)| kv)
    }
}

pub fn parse(input: &str) -> Result<Document, IniError> {
    let mut doc = Document::default();
    let mut current: Option<(String, HashMap<String, String>)> = None;

    for (idx, raw_line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let name = rest
                .strip_suffix(']')
                .ok_or_else(|| IniError::Malformed {
                    line: line_no,
                    text: line.to_string(),
                })?
                .trim()
                .to_string();
            if let Some(section) = current.take() {
                doc.sections.push(section);
            }
            current = Some((name, HashMap::new()));
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| IniError::Malformed {
                line: line_no,
                text: line.to_string(),
            })?;
        let key = key.trim().to_string();
        let value = value.trim().to_string();

        match current.as_mut() {
            Some((_, kv)) => {
                kv.insert(key, value);
            }
            None => return Err(IniError::KeyOutsideSection { line: line_no }),
        }
    }

    if let Some(section) = current.take() {
        doc.sections.push(section);
    }

    Ok(doc)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_sections_and_keys() {
        let input = r#"
            ; comment
            [pgexporter]
            host = *
            metrics = 5002

            [primary]
            host = 127.0.0.1
            port = 5432
        "#;
        let doc = parse(input).unwrap();
        assert_eq!(doc.sections.len(), 2);
        assert_eq!(doc.section("pgexporter").unwrap()["metrics"], "5002");
        assert_eq!(doc.section("primary").unwrap()["port"], "5432");
    }

    #[test]
    fn rejects_key_before_any_section() {
        let err = parse("key = value").unwrap_err();
        assert!(matches!(err, IniError::KeyOutsideSection { line: 1 }));
    }
}
