#![cfg(feature = "sqlite")]

use std::sync::Arc;

use sql_command::prelude::*;
use tokio::runtime::Runtime;

fn setup(dir: &tempfile::TempDir) -> Result<CommandExecutor, SqlCommandError> {
    let path = dir.path().join("commands.db");
    let provider = SqliteProvider::new(path.to_string_lossy())?;
    Ok(CommandExecutor::new(
        Arc::new(provider),
        Arc::new(ParameterCache::new()),
    ))
}

async fn create_users(executor: &CommandExecutor) -> Result<(), SqlCommandError> {
    executor
        .execute_command(&Command::new(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, active BOOLEAN)",
        ))
        .await?;
    Ok(())
}

fn insert(id: i64, name: &str) -> Command {
    Command::new("INSERT INTO users (id, name) VALUES (:id, :name)")
        .with_param("id", id)
        .with_param("name", name)
}

async fn ids(executor: &CommandExecutor) -> Result<Vec<i64>, SqlCommandError> {
    let table = executor
        .fill_table(&Command::new("SELECT id FROM users ORDER BY id"))
        .await?;
    Ok(table
        .rows()
        .iter()
        .filter_map(|row| row.get("id").and_then(DbValue::as_int).copied())
        .collect())
}

#[test]
fn insert_reports_one_row_and_stores_nulls() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;

        assert_eq!(executor.execute_command(&insert(1, "alice")).await?, 1);
        let rows = executor
            .execute_command(
                &Command::new(
                    "INSERT INTO users (id, name, score, active) VALUES (@id, @name, $score, ?4)",
                )
                .with_param("id", 2)
                .with_optional_param("name", None)
                .with_param("score", 9.5)
                .with_param("active", true),
            )
            .await?;
        assert_eq!(rows, 1);

        let table = executor
            .fill_table(
                &Command::new("SELECT name, score, active FROM users WHERE id = :id")
                    .with_param("id", 2),
            )
            .await?;
        assert_eq!(table.len(), 1);
        let row = &table.rows()[0];
        assert_eq!(row.get("name"), Some(&DbValue::Null));
        assert_eq!(row.get("score"), Some(&DbValue::Float(9.5)));
        assert_eq!(row.get("active"), Some(&DbValue::Int(1)));
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn update_reports_affected_rows() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;
        for id in 1..=3 {
            executor.execute_command(&insert(id, "same")).await?;
        }

        let rows = executor
            .execute_command(
                &Command::new("UPDATE users SET name = :new WHERE name = :old")
                    .with_param("new", "changed")
                    .with_param("old", "same"),
            )
            .await?;
        assert_eq!(rows, 3);
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn batch_rolls_back_on_constraint_violation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;

        let batch = CommandBatch::new(vec![insert(10, "a"), insert(10, "dup"), insert(11, "b")]);
        let err = executor.execute_batch(&batch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(ids(&executor).await?.is_empty());
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn batch_can_continue_past_constraint_violation() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;

        let batch = CommandBatch::new(vec![insert(10, "a"), insert(10, "dup"), insert(11, "b")])
            .continue_on_error(true);
        let outcome = executor.execute_batch(&batch).await?;
        assert_eq!(outcome.succeeded(), 2);
        assert!(matches!(
            outcome.results()[1],
            Err(SqlCommandError::SqliteError(_))
        ));
        assert_eq!(ids(&executor).await?, [10, 11]);
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn missing_placeholder_value_is_an_argument_error() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;

        let err = executor
            .execute_command(
                &Command::new("INSERT INTO users (id, name) VALUES (:id, :name)")
                    .with_param("id", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SqlCommandError::ArgumentError(msg) if msg.contains(":name")));
        assert!(ids(&executor).await?.is_empty());
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn stored_procedures_are_unsupported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;

        let err = executor
            .execute_procedure("add_user", &[1i64.into()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let err = executor.execute_procedure("add_user", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(executor.cache().is_empty());
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn caller_transaction_spans_several_commands() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = setup(&dir)?;
        create_users(&executor).await?;

        let mut conn = executor.provider().create_connection()?;
        conn.open().await?;
        let tx = Transaction::begin(conn.as_mut()).await?;
        executor
            .execute_command_in(conn.as_mut(), Some(&tx), &insert(1, "a"))
            .await?;
        executor
            .execute_command_in(conn.as_mut(), Some(&tx), &insert(2, "b"))
            .await?;
        tx.rollback(conn.as_mut()).await?;
        assert!(ids(&executor).await?.is_empty());

        let tx = Transaction::begin(conn.as_mut()).await?;
        executor
            .execute_command_in(conn.as_mut(), Some(&tx), &insert(3, "c"))
            .await?;
        tx.commit(conn.as_mut()).await?;
        conn.close().await?;
        assert_eq!(ids(&executor).await?, [3]);
        Ok::<(), SqlCommandError>(())
    })?;
    Ok(())
}

#[test]
fn providers_resolve_from_a_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let db_path = dir.path().join("aliased.db");
    let config_path = dir.path().join("providers.json");
    let config = serde_json::json!({
        "providers": {
            "main": { "type": "sqlite", "connectionString": db_path.to_string_lossy() }
        }
    });
    std::fs::write(&config_path, config.to_string())?;

    let registry =
        ProviderRegistry::with_builtin_backends().with_lookup(ProvidersConfig::from_path(&config_path)?);
    let provider = registry.create_provider("main")?;
    assert_eq!(provider.backend_name(), "sqlite");

    let rt = Runtime::new()?;
    rt.block_on(async {
        let executor = CommandExecutor::new(provider, Arc::new(ParameterCache::new()));
        executor
            .execute_command(&Command::new("CREATE TABLE t (x INTEGER)"))
            .await?;
        assert_eq!(
            executor
                .execute_command(&Command::new("INSERT INTO t VALUES (?)").with_param("x", 1))
                .await?,
            1
        );
        Ok::<(), SqlCommandError>(())
    })?;

    let err = match registry.create_provider("UnknownAlias") {
        Ok(_) => panic!("unknown alias resolved"),
        Err(err) => err,
    };
    assert!(matches!(
        err,
        SqlCommandError::ConfigError {
            source: ConfigError::AliasNotFound(_),
            ..
        }
    ));
    Ok(())
}
