//! Answer composer.

use serde::Serialize;
use tcm_core::{CellValue, ResultSet};

/// Fixed reply for an empty result.
pub const EMPTY_ANSWER: &str = "没有找到符合条件的结果。";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Text,
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub format: AnswerFormat,
    /// Sentence for `text` answers. Tables are the rows themselves.
    pub text: Option<String>,
}

/// A sentence for empty and single-value results; anything else is a table.
pub fn compose(question: &str, result: &ResultSet) -> Answer {
    let answer = sentence(result).map_or(
        Answer {
            format: AnswerFormat::Table,
            text: None,
        },
        |text| Answer {
            format: AnswerFormat::Text,
            text: Some(text),
        },
    );
    tracing::debug!(question, format = ?answer.format, rows = result.len(), "Answer composed");
    answer
}

fn sentence(result: &ResultSet) -> Option<String> {
    if result.is_empty() {
        return Some(EMPTY_ANSWER.to_string());
    }
    match (result.rows.as_slice(), result.columns.as_slice()) {
        ([row], [column]) => match row.get(column) {
            Some(cell @ CellValue::Scalar(_)) => Some(format!("{column}为{cell}。")),
            _ => None,
        },
        _ => None,
    }
}

/// Markdown table of a result set, for terminal display.
pub fn render_markdown(result: &ResultSet) -> String {
    if result.columns.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&markdown_line(result.columns.iter().map(|c| escape(c))));
    out.push_str(&markdown_line(result.columns.iter().map(|_| "---".to_string())));
    for row in &result.rows {
        out.push_str(&markdown_line(result.columns.iter().map(|column| {
            row.get(column)
                .map(|cell| escape(&cell.to_string()))
                .unwrap_or_default()
        })));
    }
    out
}

fn markdown_line(cells: impl Iterator<Item = String>) -> String {
    let cells: Vec<String> = cells.collect();
    format!("| {} |\n", cells.join(" | "))
}

fn escape(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcm_core::{ResultRow, Scalar};

    fn result(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ResultSet {
        ResultSet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|cells| {
                    let mut row = ResultRow::new();
                    for (column, cell) in columns.iter().zip(cells) {
                        row.push(*column, cell);
                    }
                    row
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_result_uses_fallback() {
        let answer = compose("有哪些？", &ResultSet::empty(vec!["中药".into()]));
        assert_eq!(answer.format, AnswerFormat::Text);
        assert_eq!(answer.text.as_deref(), Some(EMPTY_ANSWER));
    }

    #[test]
    fn test_single_scalar_is_a_sentence() {
        let answer = compose("有多少个？", &result(&["数量"], vec![vec![CellValue::integer(42)]]));
        assert_eq!(answer.text.as_deref(), Some("数量为42。"));
        assert_eq!(answer.format, AnswerFormat::Text);
    }

    #[test]
    fn test_everything_else_is_a_table() {
        let two_rows = result(
            &["中药"],
            vec![vec![CellValue::text("白芍")], vec![CellValue::text("杏仁")]],
        );
        assert_eq!(compose("", &two_rows).format, AnswerFormat::Table);

        let one_list = result(
            &["舌象"],
            vec![vec![CellValue::List(vec![Scalar::Text("舌红".into())])]],
        );
        assert_eq!(compose("", &one_list).format, AnswerFormat::Table);

        let two_columns = result(
            &["中药", "剂量"],
            vec![vec![CellValue::text("白芍"), CellValue::text("10g")]],
        );
        assert_eq!(compose("", &two_columns).format, AnswerFormat::Table);
    }

    #[test]
    fn test_markdown_escapes_cells() {
        let table = result(
            &["中药", "剂量"],
            vec![vec![CellValue::text("白芍"), CellValue::text("10g|15g")]],
        );
        assert_eq!(
            render_markdown(&table),
            "| 中药 | 剂量 |\n| --- | --- |\n| 白芍 | 10g\\|15g |\n"
        );
    }
}
