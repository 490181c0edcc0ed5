use std::collections::HashMap;
use std::sync::Mutex;

use joinery::{
    Adapter, ColumnDefinition, Command, CommandKind, ContextOptions, Datatype, Execution, Result,
    Row, SortDirection, Statement, Value,
};

/// Prints every command and answers from canned data
struct PrintingAdapter {
    tables: HashMap<&'static str, Vec<ColumnDefinition>>,
    rows: Mutex<Vec<Row>>,
}

impl PrintingAdapter {
    fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            "Author",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary().identity(),
                ColumnDefinition::new("Name", Datatype::String).not_null(),
            ],
        );
        tables.insert(
            "Book",
            vec![
                ColumnDefinition::new("Id", Datatype::Integer).primary().identity(),
                ColumnDefinition::new("AuthorId", Datatype::Integer),
                ColumnDefinition::new("Title", Datatype::String),
            ],
        );
        Self {
            tables,
            rows: Mutex::new(Vec::new()),
        }
    }

    fn stage(&self, rows: Vec<Row>) {
        if let Ok(mut staged) = self.rows.lock() {
            *staged = rows;
        }
    }
}

impl Adapter for PrintingAdapter {
    fn serialize(&self, command: &Command) -> Result<Statement> {
        let sql = match command {
            Command::Describe { table } => table.clone(),
            other => format!("{:?}", other),
        };
        Ok(Statement::new(command.kind(), sql, Vec::new()))
    }

    async fn execute(&self, statement: &Statement) -> Result<Execution> {
        if statement.kind == CommandKind::Describe {
            let columns = self.tables.get(statement.sql.as_str()).cloned().unwrap_or_default();
            return Ok(Execution::Described(columns));
        }
        println!("   {} -> {}", statement.kind, statement.sql);
        let rows = self
            .rows
            .lock()
            .map(|mut staged| std::mem::take(&mut *staged))
            .unwrap_or_default();
        Ok(match statement.kind {
            CommandKind::Select => Execution::Rows(rows),
            CommandKind::Insert => Execution::Inserted(vec![Value::I64(1)]),
            _ => Execution::Affected(1),
        })
    }
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Joinery - Basic Usage ===\n");

    let authors = joinery::context(PrintingAdapter::new(), "Author")
        .has_many("Books", |b| b.from_table("Book").with_keys("Id", "AuthorId"))?;

    println!("1. Insert with identity backfill:");
    let inserted = authors
        .insert(vec![row(&[("Name", Value::from("Ursula"))])])
        .await?;
    println!("   stored: {:?}\n", inserted);

    println!("2. Joined select folded into nested records:");
    authors.adapter().stage(vec![
        row(&[
            ("Id", Value::I64(1)),
            ("Name", Value::from("Ursula")),
            ("Books<|Id", Value::I64(10)),
            ("Books<|AuthorId", Value::I64(1)),
            ("Books<|Title", Value::from("The Dispossessed")),
        ]),
        row(&[
            ("Id", Value::I64(1)),
            ("Name", Value::from("Ursula")),
            ("Books<|Id", Value::I64(11)),
            ("Books<|AuthorId", Value::I64(1)),
            ("Books<|Title", Value::from("The Lathe of Heaven")),
        ]),
    ]);
    let records = authors
        .include("Books")?
        .where_(|q| q.where_("Books.Title").starts_with("The"))?
        .sort_by([("Name", SortDirection::Asc)])?
        .fetch_all()
        .await?;
    println!("   {}\n", serde_json::Value::Array(records.iter().map(|r| r.to_json()).collect()));

    println!("3. Explicit update:");
    let changed = authors
        .where_(|q| q.where_("Id").equals(1))?
        .update_where(|set| set.set("Name", "Ursula K."))
        .await?;
    println!("   {} row(s)\n", changed);

    println!("4. Guarded truncate:");
    match authors.truncate().await {
        Ok(()) => println!("   truncated"),
        Err(err) => println!("   {}", err),
    }
    let permissive = joinery::Context::with_options(
        PrintingAdapter::new(),
        "Author",
        ContextOptions::default().allow_truncation(true),
    );
    permissive.truncate().await?;

    Ok(())
}
