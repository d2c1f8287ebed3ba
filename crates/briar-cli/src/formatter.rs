//! Result rendering for the shell.

use comfy_table::{Cell, ContentArrangement, Table};

use crate::connection::Response;

/// Renders a response for the terminal.
pub fn render(response: &Response) -> String {
    if let Some(error) = &response.error {
        return format!("error: {}", error);
    }
    let mut out = String::new();
    for message in &response.messages {
        out.push_str(message);
        out.push('\n');
    }
    if !response.columns.is_empty() {
        out.push_str(&render_table(&response.columns, &response.rows));
        out.push('\n');
        out.push_str(&format!(
            "({} row{})\n",
            response.rows.len(),
            if response.rows.len() == 1 { "" } else { "s" }
        ));
    }
    out
}

fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut table = Table::new();
    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table.set_header(columns.iter().map(Cell::new));
    for row in rows {
        table.add_row(row.iter().map(Cell::new));
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rendering() {
        let response = Response {
            error: Some("schema: table 'x' not found".to_string()),
            ..Response::default()
        };
        assert_eq!(render(&response), "error: schema: table 'x' not found");
    }

    #[test]
    fn test_table_rendering() {
        let response = Response {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![vec!["1".to_string(), "ada".to_string()]],
            ..Response::default()
        };
        let text = render(&response);
        assert!(text.contains("id"));
        assert!(text.contains("ada"));
        assert!(text.contains("(1 row)"));
    }
}
