//! Statement grammar for the shell.
//!
//! Keywords are lowercase. A query string holds zero or more statements
//! separated by semicolons; the executor runs them in order.

use chumsky::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateDatabase(String),
    DropDatabase(String),
    ShowDatabases,
    UseDatabase(String),
    ShowTables,
    ShowIndexes,
    CreateTable(CreateTableStatement),
    DropTable(String),
    CreateIndex(CreateIndexStatement),
    DropIndex(String),
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    ExecFile(String),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    /// Column sets from table-level `unique(...)` clauses.
    pub unique_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub unique: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataType {
    Int,
    Float,
    Char(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStatement {
    pub index_name: String,
    pub table_name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub projection: Projection,
    pub table_name: String,
    pub selection: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: String,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub assignments: Vec<(String, Literal)>,
    pub selection: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub selection: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Compare {
        column: String,
        op: CompareOp,
        value: Literal,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

const KEYWORDS: &[&str] = &[
    "select", "from", "where", "and", "or", "not", "null", "is", "insert", "into", "values",
    "update", "set", "delete", "create", "drop", "show", "use", "table", "tables", "index",
    "indexes", "database", "databases", "on", "primary", "key", "unique", "int", "float", "char",
    "execfile", "quit",
];

fn statement_parser() -> impl Parser<char, Vec<Statement>, Error = Simple<char>> {
    let ident = text::ident()
        .try_map(|s: String, span| {
            if KEYWORDS.contains(&s.as_str()) {
                Err(Simple::custom(span, "keyword in identifier position"))
            } else {
                Ok(s)
            }
        })
        .padded();

    let integer = just('-')
        .or_not()
        .then(text::int(10))
        .map(|(neg, digits): (Option<char>, String)| {
            let value: i64 = digits.parse().unwrap_or(i64::MAX);
            if neg.is_some() {
                -value
            } else {
                value
            }
        });

    let literal = just('-')
        .or_not()
        .then(text::int(10))
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .map(|((neg, int_part), frac): ((Option<char>, String), Option<String>)| {
            let sign = if neg.is_some() { "-" } else { "" };
            match frac {
                Some(frac) => {
                    Literal::Float(format!("{sign}{int_part}.{frac}").parse().unwrap_or(0.0))
                }
                None => Literal::Int(format!("{sign}{int_part}").parse().unwrap_or(0)),
            }
        })
        .or(just('\'')
            .ignore_then(filter(|c: &char| *c != '\'').repeated().collect::<String>())
            .then_ignore(just('\''))
            .map(Literal::Str))
        .or(text::keyword("null").to(Literal::Null))
        .padded();

    let column_list = ident
        .separated_by(just(',').padded())
        .at_least(1)
        .delimited_by(just('(').padded(), just(')').padded());

    let comparison_op = just("!=")
        .to(CompareOp::NotEq)
        .or(just("<>").to(CompareOp::NotEq))
        .or(just("<=").to(CompareOp::LtEq))
        .or(just(">=").to(CompareOp::GtEq))
        .or(just('<').to(CompareOp::Lt))
        .or(just('>').to(CompareOp::Gt))
        .or(just('=').to(CompareOp::Eq))
        .padded();

    let predicate = ident
        .then_ignore(text::keyword("is").padded())
        .then(text::keyword("not").padded().or_not())
        .then_ignore(text::keyword("null").padded())
        .map(|(column, not)| Expression::IsNull {
            column,
            negated: not.is_some(),
        })
        .or(ident
            .then(comparison_op)
            .then(literal.clone())
            .map(|((column, op), value)| Expression::Compare { column, op, value }));

    let conjunction = predicate
        .clone()
        .then(
            text::keyword("and")
                .padded()
                .ignore_then(predicate)
                .repeated(),
        )
        .foldl(|left, right| Expression::And(Box::new(left), Box::new(right)));

    let expression = conjunction
        .clone()
        .then(
            text::keyword("or")
                .padded()
                .ignore_then(conjunction)
                .repeated(),
        )
        .foldl(|left, right| Expression::Or(Box::new(left), Box::new(right)));

    let where_clause = text::keyword("where")
        .padded()
        .ignore_then(expression)
        .or_not();

    let data_type = text::keyword("int")
        .to(DataType::Int)
        .or(text::keyword("float").to(DataType::Float))
        .or(text::keyword("char")
            .ignore_then(
                integer
                    .clone()
                    .padded()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(|len| DataType::Char(len.max(0) as u32)))
        .padded();

    #[derive(Clone)]
    enum TableElement {
        Col(ColumnDef),
        PrimaryKey(Vec<String>),
        Unique(Vec<String>),
    }

    let column_attr = text::keyword("unique")
        .padded()
        .to((true, false))
        .or(text::keyword("not")
            .padded()
            .then(text::keyword("null").padded())
            .to((false, true)));

    let column_def = ident
        .then(data_type)
        .then(column_attr.repeated())
        .map(|((name, data_type), attrs)| {
            let unique = attrs.iter().any(|(u, _)| *u);
            let not_null = attrs.iter().any(|(_, n)| *n);
            TableElement::Col(ColumnDef {
                name,
                data_type,
                unique,
                not_null,
            })
        });

    let table_element = text::keyword("primary")
        .padded()
        .ignore_then(text::keyword("key").padded())
        .ignore_then(column_list.clone())
        .map(TableElement::PrimaryKey)
        .or(text::keyword("unique")
            .padded()
            .ignore_then(column_list.clone())
            .map(TableElement::Unique))
        .or(column_def);

    let create_table = text::keyword("table")
        .padded()
        .ignore_then(ident)
        .then(
            table_element
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, elements)| {
            let mut columns = Vec::new();
            let mut primary_key = Vec::new();
            let mut unique_columns = Vec::new();
            for element in elements {
                match element {
                    TableElement::Col(def) => columns.push(def),
                    TableElement::PrimaryKey(cols) => primary_key = cols,
                    TableElement::Unique(cols) => unique_columns.extend(cols),
                }
            }
            Statement::CreateTable(CreateTableStatement {
                table_name,
                columns,
                primary_key,
                unique_columns,
            })
        });

    let create_index = text::keyword("index")
        .padded()
        .ignore_then(ident)
        .then_ignore(text::keyword("on").padded())
        .then(ident)
        .then(column_list.clone())
        .map(|((index_name, table_name), columns)| {
            Statement::CreateIndex(CreateIndexStatement {
                index_name,
                table_name,
                columns,
            })
        });

    let create = text::keyword("create").padded().ignore_then(
        text::keyword("database")
            .padded()
            .ignore_then(ident)
            .map(Statement::CreateDatabase)
            .or(create_table)
            .or(create_index),
    );

    let drop = text::keyword("drop").padded().ignore_then(
        text::keyword("database")
            .padded()
            .ignore_then(ident)
            .map(Statement::DropDatabase)
            .or(text::keyword("table")
                .padded()
                .ignore_then(ident)
                .map(Statement::DropTable))
            .or(text::keyword("index")
                .padded()
                .ignore_then(ident)
                .map(Statement::DropIndex)),
    );

    let show = text::keyword("show").padded().ignore_then(
        text::keyword("databases")
            .padded()
            .to(Statement::ShowDatabases)
            .or(text::keyword("tables").padded().to(Statement::ShowTables))
            .or(text::keyword("indexes").padded().to(Statement::ShowIndexes)),
    );

    let use_db = text::keyword("use")
        .padded()
        .ignore_then(ident)
        .map(Statement::UseDatabase);

    let select = text::keyword("select")
        .padded()
        .ignore_then(
            just('*')
                .padded()
                .to(Projection::All)
                .or(ident
                    .separated_by(just(',').padded())
                    .at_least(1)
                    .map(Projection::Columns)),
        )
        .then_ignore(text::keyword("from").padded())
        .then(ident)
        .then(where_clause.clone())
        .map(|((projection, table_name), selection)| {
            Statement::Select(SelectStatement {
                projection,
                table_name,
                selection,
            })
        });

    let insert = text::keyword("insert")
        .padded()
        .ignore_then(text::keyword("into").padded())
        .ignore_then(ident)
        .then_ignore(text::keyword("values").padded())
        .then(
            literal
                .clone()
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, values)| Statement::Insert(InsertStatement { table_name, values }));

    let update = text::keyword("update")
        .padded()
        .ignore_then(ident)
        .then_ignore(text::keyword("set").padded())
        .then(
            ident
                .then_ignore(just('=').padded())
                .then(literal.clone())
                .separated_by(just(',').padded())
                .at_least(1),
        )
        .then(where_clause.clone())
        .map(|((table_name, assignments), selection)| {
            Statement::Update(UpdateStatement {
                table_name,
                assignments,
                selection,
            })
        });

    let delete = text::keyword("delete")
        .padded()
        .ignore_then(text::keyword("from").padded())
        .ignore_then(ident)
        .then(where_clause)
        .map(|(table_name, selection)| Statement::Delete(DeleteStatement { table_name, selection }));

    let file_path = just('"')
        .ignore_then(filter(|c: &char| *c != '"').repeated().collect::<String>())
        .then_ignore(just('"'))
        .or(filter(|c: &char| !c.is_whitespace() && *c != ';')
            .repeated()
            .at_least(1)
            .collect::<String>())
        .padded();

    let execfile = text::keyword("execfile")
        .padded()
        .ignore_then(file_path)
        .map(Statement::ExecFile);

    let quit = text::keyword("quit").padded().to(Statement::Quit);

    let statement = create
        .or(drop)
        .or(show)
        .or(use_db)
        .or(select)
        .or(insert)
        .or(update)
        .or(delete)
        .or(execfile)
        .or(quit);

    statement
        .padded()
        .separated_by(just(';').padded())
        .allow_trailing()
        .then_ignore(end())
}

pub fn sql_parser(input: &str) -> Result<Vec<Statement>, Vec<Simple<char>>> {
    statement_parser().parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_drop_database_parse() {
        let parsed = sql_parser("create database shop; drop database shop;").expect("parse");
        assert_eq!(
            parsed,
            vec![
                Statement::CreateDatabase("shop".to_string()),
                Statement::DropDatabase("shop".to_string()),
            ]
        );
    }

    #[test]
    fn create_table_collects_constraints() {
        let parsed = sql_parser(
            "create table t(id int, name char(32), score float not null, unique(id), primary key(id, name));",
        )
        .expect("parse");
        let Statement::CreateTable(stmt) = &parsed[0] else {
            panic!("expected create table");
        };
        assert_eq!(stmt.table_name, "t");
        assert_eq!(stmt.columns.len(), 3);
        assert_eq!(stmt.columns[1].data_type, DataType::Char(32));
        assert!(stmt.columns[2].not_null);
        assert_eq!(stmt.unique_columns, vec!["id".to_string()]);
        assert_eq!(stmt.primary_key, vec!["id".to_string(), "name".to_string()]);
    }

    #[test]
    fn column_level_unique_is_parsed() {
        let parsed = sql_parser("create table t(id int unique, name char(8));").expect("parse");
        let Statement::CreateTable(stmt) = &parsed[0] else {
            panic!("expected create table");
        };
        assert!(stmt.columns[0].unique);
        assert!(!stmt.columns[1].unique);
    }

    #[test]
    fn select_wildcard_and_column_projections() {
        let parsed = sql_parser("select * from t; select id, name from t;").expect("parse");
        let Statement::Select(all) = &parsed[0] else {
            panic!()
        };
        assert_eq!(all.projection, Projection::All);
        let Statement::Select(cols) = &parsed[1] else {
            panic!()
        };
        assert_eq!(
            cols.projection,
            Projection::Columns(vec!["id".to_string(), "name".to_string()])
        );
    }

    #[test]
    fn where_clause_builds_boolean_tree() {
        let parsed =
            sql_parser("select * from t where id >= 3 and name = 'bob' or score < 1.5;").expect("parse");
        let Statement::Select(stmt) = &parsed[0] else {
            panic!()
        };
        let Some(Expression::Or(left, right)) = &stmt.selection else {
            panic!("expected or at the top");
        };
        assert!(matches!(**left, Expression::And(_, _)));
        assert!(matches!(
            **right,
            Expression::Compare {
                op: CompareOp::Lt,
                ..
            }
        ));
    }

    #[test]
    fn is_null_predicates_parse() {
        let parsed = sql_parser("select * from t where name is null and id is not null;")
            .expect("parse");
        let Statement::Select(stmt) = &parsed[0] else {
            panic!()
        };
        let Some(Expression::And(left, right)) = &stmt.selection else {
            panic!("expected and");
        };
        assert_eq!(
            **left,
            Expression::IsNull {
                column: "name".to_string(),
                negated: false
            }
        );
        assert_eq!(
            **right,
            Expression::IsNull {
                column: "id".to_string(),
                negated: true
            }
        );
    }

    #[test]
    fn insert_parses_every_literal_kind() {
        let parsed =
            sql_parser("insert into t values (1, -2.5, 'text', null);").expect("parse");
        let Statement::Insert(stmt) = &parsed[0] else {
            panic!()
        };
        assert_eq!(
            stmt.values,
            vec![
                Literal::Int(1),
                Literal::Float(-2.5),
                Literal::Str("text".to_string()),
                Literal::Null,
            ]
        );
    }

    #[test]
    fn update_and_delete_parse() {
        let parsed =
            sql_parser("update t set name = 'x', score = 2 where id = 1; delete from t where id = 1;")
                .expect("parse");
        let Statement::Update(update) = &parsed[0] else {
            panic!()
        };
        assert_eq!(update.assignments.len(), 2);
        assert!(update.selection.is_some());
        let Statement::Delete(delete) = &parsed[1] else {
            panic!()
        };
        assert!(delete.selection.is_some());
    }

    #[test]
    fn create_index_parses_key_columns() {
        let parsed = sql_parser("create index idx_name on t(name, id);").expect("parse");
        assert_eq!(
            parsed[0],
            Statement::CreateIndex(CreateIndexStatement {
                index_name: "idx_name".to_string(),
                table_name: "t".to_string(),
                columns: vec!["name".to_string(), "id".to_string()],
            })
        );
    }

    #[test]
    fn execfile_accepts_quoted_and_bare_paths() {
        let parsed = sql_parser("execfile \"scripts/load.sql\"; execfile init.sql;").expect("parse");
        assert_eq!(
            parsed,
            vec![
                Statement::ExecFile("scripts/load.sql".to_string()),
                Statement::ExecFile("init.sql".to_string()),
            ]
        );
    }

    #[test]
    fn quit_and_show_statements_parse() {
        let parsed =
            sql_parser("show databases; show tables; show indexes; quit;").expect("parse");
        assert_eq!(
            parsed,
            vec![
                Statement::ShowDatabases,
                Statement::ShowTables,
                Statement::ShowIndexes,
                Statement::Quit,
            ]
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(sql_parser("explain everything;").is_err());
        assert!(sql_parser("select from;").is_err());
    }
}
