#![cfg(feature = "postgres")]
//! Runs against a live server named by `SQL_COMMAND_PG_URL`, e.g.
//! `host=localhost user=postgres password=postgres dbname=postgres`.
//! Without it every test returns early.

use std::sync::Arc;

use sql_command::prelude::*;
use tokio::runtime::Runtime;

fn executor() -> Result<Option<CommandExecutor>, SqlCommandError> {
    let Ok(url) = std::env::var("SQL_COMMAND_PG_URL") else {
        eprintln!("SQL_COMMAND_PG_URL not set, skipping postgres test");
        return Ok(None);
    };
    let provider = PostgresProvider::new(url)?;
    Ok(Some(CommandExecutor::new(
        Arc::new(provider),
        Arc::new(ParameterCache::new()),
    )))
}

#[test]
fn procedure_parameters_are_discovered_and_outputs_read() -> Result<(), Box<dyn std::error::Error>> {
    let Some(executor) = executor()? else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        executor
            .execute_command(&Command::new(
                "CREATE OR REPLACE PROCEDURE sql_command_add(p_a integer, p_b integer, INOUT p_sum integer) \
                 LANGUAGE plpgsql AS $$ BEGIN p_sum := p_a + p_b; END $$",
            ))
            .await?;

        let result = executor
            .execute_procedure(
                "sql_command_add",
                &[2i64.into(), 3i64.into(), ProcedureArg::absent()],
            )
            .await?;
        assert_eq!(result.output("p_sum"), Some(&DbValue::Int(5)));

        let row = DataRow::from_pairs([("p_a", DbValue::Int(10)), ("p_b", DbValue::Int(4))]);
        let result = executor
            .execute_procedure_with_row("sql_command_add", &row)
            .await?;
        assert_eq!(result.output("p_sum"), Some(&DbValue::Int(14)));

        let err = executor
            .execute_procedure("sql_command_add", &[1i64.into()])
            .await
            .unwrap_err();
        assert!(matches!(err, SqlCommandError::ArgumentMismatch { expected: 3, actual: 1 }));
        assert_eq!(executor.cache().len(), 1);
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn functions_run_from_discovery_through_execution() -> Result<(), Box<dyn std::error::Error>> {
    let Some(executor) = executor()? else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        executor
            .execute_batch(&CommandBatch::new(vec![
                Command::new(
                    "CREATE OR REPLACE FUNCTION sql_command_mul(p_a integer, p_b integer) \
                     RETURNS integer LANGUAGE sql AS $$ SELECT p_a * p_b $$",
                ),
                Command::new(
                    "CREATE OR REPLACE FUNCTION sql_command_split(p_total integer, \
                     OUT p_half integer, OUT p_rest integer) LANGUAGE sql \
                     AS $$ SELECT p_total / 2, p_total - p_total / 2 $$",
                ),
                Command::new(
                    "CREATE OR REPLACE FUNCTION sql_command_is_null(p_value numeric) \
                     RETURNS boolean LANGUAGE sql AS $$ SELECT p_value IS NULL $$",
                ),
            ]))
            .await?;

        let result = executor
            .execute_function("sql_command_mul", &[3i64.into(), 4i64.into()])
            .await?;
        assert_eq!(result.return_value(), Some(&DbValue::Int(12)));

        // without the return value the function is still selected, not called
        executor
            .execute_procedure("sql_command_mul", &[3i64.into(), 4i64.into()])
            .await?;

        let result = executor
            .execute_procedure(
                "sql_command_split",
                &[7i64.into(), ProcedureArg::absent(), ProcedureArg::absent()],
            )
            .await?;
        assert_eq!(result.output("p_half"), Some(&DbValue::Int(3)));
        assert_eq!(result.output("p_rest"), Some(&DbValue::Int(4)));

        let result = executor
            .execute_function("sql_command_is_null", &[ProcedureArg::absent()])
            .await?;
        assert_eq!(result.return_value(), Some(&DbValue::Bool(true)));
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn batch_continues_inside_one_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let Some(executor) = executor()? else {
        return Ok(());
    };
    let rt = Runtime::new()?;
    rt.block_on(async {
        executor
            .execute_command(&Command::new("DROP TABLE IF EXISTS sql_command_batch"))
            .await?;
        executor
            .execute_command(&Command::new(
                "CREATE TABLE sql_command_batch (id BIGINT PRIMARY KEY, name TEXT)",
            ))
            .await?;

        let insert = |id: i64| {
            Command::new("INSERT INTO sql_command_batch (id, name) VALUES ($1, $2)")
                .with_param("id", id)
                .with_param("name", format!("row{id}"))
        };
        let outcome = executor
            .execute_batch(
                &CommandBatch::new(vec![insert(1), insert(1), insert(2)]).continue_on_error(true),
            )
            .await?;
        assert_eq!(outcome.succeeded(), 2);

        let table = executor
            .fill_table(&Command::new("SELECT id, name FROM sql_command_batch ORDER BY id"))
            .await?;
        let ids: Vec<_> = table
            .rows()
            .iter()
            .filter_map(|r| r.get("id").and_then(DbValue::as_int).copied())
            .collect();
        assert_eq!(ids, [1, 2]);

        let err = executor
            .execute_batch(&CommandBatch::new(vec![insert(3), insert(1)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        let table = executor
            .fill_table(&Command::new("SELECT id FROM sql_command_batch WHERE id = 3"))
            .await?;
        assert!(table.is_empty());
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}
