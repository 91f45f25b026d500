//! Execution of CLI queries and the read-eval-print loop.

use crate::cli::format::{format_as_table, format_output};
use crate::cli::{CliError, cast_param};
use crate::db::Database;
use crate::error::DbError;
use crate::models::{ParamInput, QueryOutput};
use std::io::Write;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

/// Output switches of a single CLI run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Print unshaped rows as a table
    pub raw: bool,
    /// Only render the query text
    pub print_query: bool,
}

fn summary(rows_affected: u64, rows_returned: Option<usize>, started: Instant) -> String {
    let elapsed = format!("{:.3} seconds.", started.elapsed().as_secs_f64());
    if rows_affected > 0 {
        format!("Rows affected: {} in {}\n", rows_affected, elapsed)
    } else {
        let returned = rows_returned.map_or_else(|| "1".to_string(), |n| n.to_string());
        format!("Rows returned: {} in {}\n", returned, elapsed)
    }
}

/// Run a named query or a `.sql` script and render its output.
///
/// Everything runs inside one scope so the affected-row count refers to
/// the statement that just ran.
pub async fn run_query(
    database: &Database,
    query: &str,
    params: &[String],
    options: RunOptions,
) -> Result<String, CliError> {
    let scope = database.scope().await?;
    let result = run_in_scope(database, query, params, options).await;
    scope.release().await;
    result
}

async fn run_in_scope(
    database: &Database,
    query: &str,
    params: &[String],
    options: RunOptions,
) -> Result<String, CliError> {
    let started = Instant::now();

    let (mut text, rows_returned) = if query.ends_with(".sql") {
        let script = tokio::fs::read_to_string(query)
            .await
            .map_err(DbError::from)?;
        database.execute_script(&script).await?;
        (String::new(), Some(0))
    } else {
        let params: Vec<ParamInput> = params.iter().map(|p| cast_param(p)).collect();
        let named = database
            .named_query(query, params)
            .ok_or_else(|| CliError::UnsupportedQuery(query.to_string()))?;

        if options.print_query {
            return Ok(format!("{}\n", named));
        }

        debug!(query = %named, raw = options.raw, "Running named query");
        let output = named.call(true, options.raw).await?;
        format_output(&output)
    };

    let rows_affected = database.last_changes().await?;
    text.push_str(&summary(rows_affected, rows_returned, started));
    Ok(text)
}

async fn run_sql(database: &Database, sql: &str) -> Result<String, CliError> {
    let started = Instant::now();
    let output = database.query(sql, Vec::new()).call(true, true).await?;
    let QueryOutput::Raw(rows) = output else {
        return Ok(String::new());
    };

    let mut text = String::new();
    if !rows.is_empty() {
        text.push_str(&format_as_table(&rows.columns, &rows.rows));
        text.push_str(&summary(0, Some(rows.row_count()), started));
    } else {
        let affected = database.last_changes().await?;
        let elapsed = started.elapsed().as_secs_f64();
        text.push_str(&format!("Rows affected: {} in {:.3} seconds.\n", affected, elapsed));
    }
    Ok(text)
}

/// What a single prompt line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Empty,
    Run { query: &'a str, params: Vec<String> },
    Sql(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "q" | "quit" | "exit" => Command::Quit,
        _ => {
            let mut words = line.split_whitespace();
            if words.next() == Some("run") {
                if let Some(query) = words.next() {
                    return Command::Run {
                        query,
                        params: words.map(str::to_string).collect(),
                    };
                }
            }
            Command::Sql(line)
        }
    }
}

/// Read SQL statements or `run <name> [params]` lines until `q`, `quit`,
/// `exit` or end of input. Failed statements are reported and the loop
/// continues.
pub async fn repl<R, W>(database: &Database, input: R, out: &mut W) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let scope = database.scope().await?;
    let result = repl_in_scope(database, input, out).await;
    scope.release().await;
    result
}

async fn repl_in_scope<R, W>(database: &Database, input: R, out: &mut W) -> Result<(), CliError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, ">")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let result = match parse_command(&line) {
            Command::Quit => break,
            Command::Empty => continue,
            Command::Run { query, params } => {
                let options = RunOptions {
                    raw: true,
                    print_query: false,
                };
                run_in_scope(database, query, &params, options).await
            }
            Command::Sql(sql) => run_sql(database, sql).await,
        };

        match result {
            Ok(text) => write!(out, "{}", text)?,
            Err(CliError::Io(e)) => return Err(CliError::Io(e)),
            Err(e) => writeln!(out, "Error during query: {}", e)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  quit "), Command::Quit);
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(
            parse_command("run get_user_id alice"),
            Command::Run {
                query: "get_user_id",
                params: vec!["alice".to_string()]
            }
        );
        assert_eq!(parse_command("SELECT 1"), Command::Sql("SELECT 1"));
        assert_eq!(parse_command("runner"), Command::Sql("runner"));
    }

    #[test]
    fn test_summary_lines() {
        let started = Instant::now();
        assert!(summary(3, Some(0), started).starts_with("Rows affected: 3 in "));
        assert!(summary(0, Some(2), started).starts_with("Rows returned: 2 in "));
        assert!(summary(0, Some(2), started).ends_with(" seconds.\n"));
    }
}
