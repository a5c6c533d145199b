use fixflow_db::{connect_with_config, migrations};

use crate::commands::{current_thread_runtime, load_config, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    match apply() {
        Ok(versions) => {
            let listed = versions.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            CommandResult::success("migrate", format!("schema at versions [{listed}]"))
        }
        Err(failure) => failure.into_result("migrate"),
    }
}

fn apply() -> Result<Vec<i64>, CommandFailure> {
    let config = load_config()?;
    let runtime = current_thread_runtime()?;

    runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
        let versions = migrations::applied_versions(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error.to_string(), 5));
        pool.close().await;
        versions
    })
}
