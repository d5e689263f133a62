use super::SqliteStore;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::params;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

impl SqliteStore {
    /// Applies every `.sql` script under `dir` whose filename is not yet
    /// recorded in `schema_migrations`, in filename order, inside a single
    /// transaction. Returns the number of scripts applied.
    pub fn run_migrations(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            bail!("migrations directory not found: {}", dir.display());
        }

        let mut scripts: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to read migrations dir {}", dir.display()))?
        {
            let path = entry
                .with_context(|| format!("failed to read entry in {}", dir.display()))?
                .path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                return Err(anyhow!("invalid migration filename: {}", path.display()));
            };
            if name.ends_with(".sql") {
                scripts.push((name.to_string(), path));
            }
        }
        scripts.sort();

        let tx = self
            .conn
            .transaction()
            .context("failed to open migration transaction")?;

        let already_applied: BTreeSet<String> = {
            let mut stmt = tx
                .prepare("SELECT version FROM schema_migrations")
                .context("failed to query applied migrations")?;
            let versions = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .context("failed to read applied migrations")?;
            versions
                .collect::<rusqlite::Result<BTreeSet<String>>>()
                .context("failed to collect applied migrations")?
        };

        let mut applied = 0usize;
        for (version, path) in scripts {
            if already_applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)
                .with_context(|| format!("failed reading migration {}", path.display()))?;
            tx.execute_batch(&sql)
                .with_context(|| format!("failed applying migration {}", version))?;
            tx.execute(
                "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, datetime('now'))",
                params![version],
            )
            .with_context(|| format!("failed recording migration {}", version))?;
            info!(version, "applied schema migration");
            applied += 1;
        }

        tx.commit().context("failed to commit migrations")?;
        Ok(applied)
    }
}
