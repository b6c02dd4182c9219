// SPDX-License-Identifier: Apache-2.0

use crate::settings::{engine_config, locate_config_file, read_file_config, FileConfig};
use crate::{emit_ok, to_payload, CliError, OutputMode, RequestArgs};
use bijux_wiggle_batch::{run_task as run_stage_task, task_index_from_env, SystemRunner};
use bijux_wiggle_core::{resolve_bijux_cache_dir, resolve_bijux_config_path, ConfigPathScope};
use bijux_wiggle_engine::{read_context, Engine, RequestSpec};
use bijux_wiggle_model::{DatasetSelector, JobId, JobStatus};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Process-wide inputs resolved from global flags.
pub(crate) struct Context {
    config_file: Option<PathBuf>,
    database: Option<PathBuf>,
    output: OutputMode,
}

impl Context {
    pub(crate) fn new(explicit_config: Option<&Path>, database: Option<PathBuf>, output: OutputMode) -> Self {
        Self {
            config_file: locate_config_file(explicit_config),
            database,
            output,
        }
    }

    fn file_config(&self) -> Result<FileConfig, CliError> {
        read_file_config(self.config_file.as_deref())
    }

    fn open_engine_at(&self, database: Option<&Path>) -> Result<Engine, CliError> {
        let config = engine_config(&self.file_config()?, self.config_file.as_deref(), database)?;
        Ok(Engine::open(config)?)
    }

    fn open_engine(&self) -> Result<Engine, CliError> {
        self.open_engine_at(self.database.as_deref())
    }
}

fn selector(constraints: &[String]) -> Result<DatasetSelector, CliError> {
    DatasetSelector::from_constraints(constraints).map_err(|e| CliError::validation(e.to_string()))
}

pub(crate) fn request(ctx: &Context, args: RequestArgs) -> Result<(), CliError> {
    let spec = RequestSpec {
        left: selector(&args.a)?,
        left_operator: args.wa,
        right: if args.b.is_empty() {
            None
        } else {
            Some(selector(&args.b)?)
        },
        right_operator: args.wb,
        merge: args.merge,
        assembly: args.assembly,
        pinned: args.remember,
        emails: args.emails,
    };
    let mut engine = ctx.open_engine()?;
    if args.dry_run {
        return emit_ok(ctx.output, to_payload(&engine.plan(&spec)?)?);
    }
    let envelope = engine.request(&spec)?;
    emit_ok(ctx.output, to_payload(&envelope)?)
}

pub(crate) fn result(ctx: &Context, id: i64) -> Result<(), CliError> {
    let envelope = ctx.open_engine()?.result(JobId(id))?;
    emit_ok(ctx.output, to_payload(&envelope)?)
}

pub(crate) fn clean(ctx: &Context, days: i64) -> Result<(), CliError> {
    let report = ctx.open_engine()?.clean(days)?;
    emit_ok(ctx.output, to_payload(&report)?)
}

pub(crate) fn cache(ctx: &Context) -> Result<(), CliError> {
    let rows = ctx.open_engine()?.store().list_cache()?;
    emit_ok(ctx.output, to_payload(&rows)?)
}

pub(crate) fn clear_cache(ctx: &Context, ids: &[i64]) -> Result<(), CliError> {
    let ids: Vec<JobId> = ids.iter().copied().map(JobId).collect();
    let reports = ctx.open_engine()?.purge(&ids)?;
    emit_ok(ctx.output, to_payload(&reports)?)
}

pub(crate) fn jobs(ctx: &Context, ids: &[i64]) -> Result<(), CliError> {
    let engine = ctx.open_engine()?;
    let store = engine.store();
    let jobs = if ids.is_empty() {
        store.list_jobs()?
    } else {
        let mut found = Vec::new();
        for id in ids {
            match store.get_job(JobId(*id))? {
                Some(job) => found.push(job),
                None => warn!(job_id = id, "no such job"),
            }
        }
        found
    };
    emit_ok(ctx.output, to_payload(&jobs)?)
}

pub(crate) fn datasets(ctx: &Context) -> Result<(), CliError> {
    let table = ctx.open_engine()?.store().datasets()?;
    emit_ok(ctx.output, to_payload(&table)?)
}

pub(crate) fn attributes(ctx: &Context) -> Result<(), CliError> {
    let attributes = ctx.open_engine()?.store().attributes()?;
    emit_ok(ctx.output, to_payload(&attributes)?)
}

pub(crate) fn annotations(ctx: &Context, assembly: &str) -> Result<(), CliError> {
    let table = ctx.open_engine()?.store().annotations(assembly)?;
    emit_ok(ctx.output, to_payload(&table)?)
}

pub(crate) fn load_datasets(ctx: &Context, tsv: &Path) -> Result<(), CliError> {
    let mut engine = ctx.open_engine()?;
    let loaded = engine.store_mut().load_datasets(tsv)?;
    emit_ok(
        ctx.output,
        json!({"command": "load-datasets", "status": "ok", "datasets": loaded}),
    )
}

pub(crate) fn load_assembly(ctx: &Context, name: &str, chrom_sizes: &Path) -> Result<(), CliError> {
    ctx.open_engine()?.store().load_assembly(name, chrom_sizes)?;
    emit_ok(
        ctx.output,
        json!({"command": "load-assembly", "status": "ok", "assembly": name}),
    )
}

/// Needs no database: compute nodes only read the task file.
pub(crate) fn run_task(ctx: &Context, tasks: &Path, index: Option<usize>) -> Result<(), CliError> {
    let index = index.or_else(task_index_from_env).ok_or_else(|| {
        CliError::usage("no task index; pass --index or run inside a scheduler array job")
    })?;
    let code = run_stage_task(&SystemRunner, tasks, index)
        .map_err(|e| CliError::validation(e.to_string()))?;
    if code != 0 {
        return Err(CliError::dependency(format!("task {index} exited with {code}")));
    }
    emit_ok(
        ctx.output,
        json!({"command": "run-task", "status": "ok", "index": index}),
    )
}

/// Opens the database the job was recorded in, whatever `--db` says.
pub(crate) fn finish(ctx: &Context, context_file: &Path) -> Result<(), CliError> {
    let context = read_context(context_file)?;
    let mut engine = ctx.open_engine_at(Some(&context.database))?;
    let status = engine.finish(&context, Some(context_file))?;
    if status == JobStatus::Error {
        return Err(CliError::dependency(format!(
            "job {} finished with {status}",
            context.job_id
        )));
    }
    emit_ok(
        ctx.output,
        json!({"ID": context.job_id, "status": status}),
    )
}

pub(crate) fn show_config(ctx: &Context) -> Result<(), CliError> {
    let engine = ctx
        .file_config()
        .and_then(|file| engine_config(&file, ctx.config_file.as_deref(), ctx.database.as_deref()));
    let engine = match engine {
        Ok(config) => to_payload(&config)?,
        Err(e) => json!({"error": e.machine}),
    };
    emit_ok(
        ctx.output,
        json!({
            "config_file": ctx.config_file,
            "user_config": resolve_bijux_config_path(ConfigPathScope::User),
            "workspace_config": resolve_bijux_config_path(ConfigPathScope::Workspace),
            "cache_dir": resolve_bijux_cache_dir(),
            "engine": engine,
        }),
    )
}
