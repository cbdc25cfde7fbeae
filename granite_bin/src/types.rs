/// What a statement produced.
#[derive(Debug)]
pub enum ExecuteResult {
    Message(String),
    ResultSet(ResultSet),
    Insert(usize),
    Update(usize),
    Delete(usize),
}

#[derive(Clone, Debug)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExecuteResult {
    /// Renders the result the way the shell prints it.
    pub fn render(&self) -> String {
        match self {
            ExecuteResult::Message(msg) => msg.clone(),
            ExecuteResult::Insert(n) => format!("{n} row(s) inserted."),
            ExecuteResult::Update(n) => format!("{n} row(s) updated."),
            ExecuteResult::Delete(n) => format!("{n} row(s) deleted."),
            ExecuteResult::ResultSet(rs) => {
                let mut out = render_table(rs);
                out.push_str(&format!("{} row(s) in set.", rs.rows.len()));
                out
            }
        }
    }
}

fn render_table(rs: &ResultSet) -> String {
    let mut widths: Vec<usize> = rs.columns.iter().map(String::len).collect();
    for row in &rs.rows {
        for (i, cell) in row.iter().enumerate() {
            if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }
    let border = {
        let mut b = String::from("+");
        for w in &widths {
            b.push_str(&"-".repeat(w + 2));
            b.push('+');
        }
        b.push('\n');
        b
    };
    let render_row = |cells: &[String]| {
        let mut line = String::from("|");
        for (i, cell) in cells.iter().enumerate() {
            line.push_str(&format!(" {:<width$} |", cell, width = widths[i]));
        }
        line.push('\n');
        line
    };
    let mut out = String::new();
    out.push_str(&border);
    out.push_str(&render_row(&rs.columns));
    out.push_str(&border);
    for row in &rs.rows {
        out.push_str(&render_row(row));
    }
    out.push_str(&border);
    out
}
