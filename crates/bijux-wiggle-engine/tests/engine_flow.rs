// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_batch::{BatchError, CommandOutput, CommandRunner};
use bijux_wiggle_core::FixedClock;
use bijux_wiggle_engine::{
    Engine, EngineConfig, EngineErrorCode, Notifier, PlanOutcome, RequestSpec, S3Target,
};
use bijux_wiggle_model::{
    BatchBackend, DatasetSelector, JobContext, JobId, JobStatus, NormalizedQuery, ResultStatus,
};
use bijux_wiggle_store::WiggleStore;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const DATASETS: &str = "location\tname\ttype\tannotation\tassembly\tcell\tmark
/d/f1.bw\tK562 a\tsignal\t0\tGRCh38\tK562\tH3K4me3
/d/f2.bw\tK562 b\tsignal\t0\tGRCh38\tK562\tH3K4me3
/d/r1.bed\tregions 1\tregions\t1\tGRCh38\tnone\tpeaks
/d/r2.bed\tregions 2\tregions\t1\tGRCh38\tnone\tpeaks
/d/r3.bed\tregions 3\tregions\t1\tGRCh38\tnone\tpeaks
/d/g1.bed\tgenes\tregions\t1\tGRCh38\tnone\tgenes
";

/// Stands in for wiggletools, the SGE and LSF client tools and the aws CLI.
struct FakeTools {
    calls: Mutex<Vec<Vec<String>>>,
    empty_output: bool,
    next_handle: AtomicU32,
    /// Submissions still accepted before `qsub`/`bsub` start rejecting.
    accepted_submissions: AtomicU32,
    bjobs: Mutex<BTreeMap<String, String>>,
    qstat_running: AtomicBool,
    qacct: Mutex<String>,
    failing_wiggletools: AtomicBool,
}

impl FakeTools {
    fn new(empty_output: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::default(),
            empty_output,
            next_handle: AtomicU32::new(100),
            accepted_submissions: AtomicU32::new(u32::MAX),
            bjobs: Mutex::default(),
            qstat_running: AtomicBool::new(true),
            qacct: Mutex::default(),
            failing_wiggletools: AtomicBool::new(false),
        })
    }

    fn count(&self, program: &str) -> usize {
        self.calls
            .lock()
            .expect("calls")
            .iter()
            .filter(|c| c[0] == program)
            .count()
    }

    fn reject_submissions_after(&self, accepted: u32) {
        self.accepted_submissions.store(accepted, Ordering::SeqCst);
    }

    /// Next handle, or `None` once the submission budget is spent.
    fn accept_submission(&self) -> Option<u32> {
        self.accepted_submissions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .ok()
            .map(|_| self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn wiggletools(&self, args: &[String]) -> std::io::Result<i32> {
        if self.failing_wiggletools.load(Ordering::SeqCst) {
            return Ok(1);
        }
        let out = Path::new(&args[1]);
        match args[0].as_str() {
            "histogram" => {
                let columns = 1 + args.iter().filter(|a| *a == "mult").count();
                let mut table = String::new();
                for bin in 0..4 {
                    table.push_str(&format!("{}", bin * 10));
                    for col in 0..columns {
                        table.push_str(&format!("\t{}", 12 - col * 3 - bin));
                    }
                    table.push('\n');
                }
                std::fs::write(out, table)?;
            }
            _ if self.empty_output => std::fs::write(out, b"")?,
            _ => std::fs::write(out, b"signal")?,
        }
        Ok(0)
    }
}

impl CommandRunner for FakeTools {
    fn run(
        &self,
        program: &str,
        args: &[String],
        _env: &[(String, String)],
    ) -> Result<CommandOutput, BatchError> {
        let mut line = vec![program.to_string()];
        line.extend(args.iter().cloned());
        self.calls.lock().expect("calls").push(line);
        let reply = |status: i32, stdout: String| CommandOutput {
            status,
            stdout,
            stderr: String::new(),
        };
        let rejected = || CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr: "queue is closed".to_string(),
        };
        Ok(match program {
            "wiggletools" => reply(self.wiggletools(args).expect("fake output"), String::new()),
            "qsub" => match self.accept_submission() {
                Some(handle) => reply(0, format!("{handle}\n")),
                None => rejected(),
            },
            "bsub" => match self.accept_submission() {
                Some(handle) => reply(
                    0,
                    format!("Job <{handle}> is submitted to default queue <normal>.\n"),
                ),
                None => rejected(),
            },
            "bjobs" => {
                let handle = args.last().expect("handle");
                let states = self.bjobs.lock().expect("bjobs");
                reply(0, states.get(handle).cloned().unwrap_or_default())
            }
            "qstat" => reply(i32::from(!self.qstat_running.load(Ordering::SeqCst)), String::new()),
            "qacct" => reply(0, self.qacct.lock().expect("qacct").clone()),
            _ => reply(0, String::new()),
        })
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    tools: Arc<FakeTools>,
    clock: Arc<FixedClock>,
    engine: Engine,
}

fn fixture(backend: BatchBackend, empty_output: bool) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let database = dir.path().join("wiggle.sqlite3");
    let tsv = dir.path().join("datasets.tsv");
    std::fs::write(&tsv, DATASETS).expect("datasets");
    let clock = Arc::new(FixedClock::new(1_700_000_000));
    let mut store = WiggleStore::open(&database)
        .expect("store")
        .with_clock(clock.clone());
    store.load_datasets(&tsv).expect("load");
    let mut config = EngineConfig::new(database, dir.path().join("work"), backend);
    config.stage_program = "/opt/bin/bijux-wiggle".to_string();
    let tools = FakeTools::new(empty_output);
    let engine = Engine::with_store(config, store, tools.clone());
    Fixture {
        dir,
        tools,
        clock,
        engine,
    }
}

fn selector(constraints: &[&str]) -> DatasetSelector {
    DatasetSelector::from_constraints(constraints).expect("selector")
}

fn mean_spec() -> RequestSpec {
    RequestSpec {
        left: selector(&["cell=K562"]),
        left_operator: "mean".to_string(),
        assembly: "GRCh38".to_string(),
        ..RequestSpec::default()
    }
}

#[test]
fn mean_request_misses_then_hits() {
    let mut fx = fixture(BatchBackend::Synchronous, false);
    let first = fx.engine.request(&mean_spec()).expect("first");
    assert_eq!(first.status, ResultStatus::Done);
    assert_eq!(first.id, Some(JobId(1)));
    let location = first.location.clone().expect("location");
    assert_eq!(fx.tools.count("wiggletools"), 1);

    let key = NormalizedQuery::new("mean /d/f1.bw /d/f2.bw").expect("key");
    let before = fx.engine.store().lookup(&key).expect("lookup").expect("row");
    fx.clock.advance_days(2);

    let second = fx.engine.request(&mean_spec()).expect("second");
    assert_eq!(second.status, ResultStatus::Done);
    assert_eq!(second.id, Some(JobId(1)));
    assert_eq!(second.location.as_deref(), Some(location.as_str()));
    assert_eq!(fx.tools.count("wiggletools"), 1);
    assert_eq!(fx.engine.store().list_jobs().expect("jobs").len(), 1);
    let after = fx.engine.store().lookup(&key).expect("lookup").expect("row");
    assert!(after.last_access > before.last_access);
}

#[test]
fn zero_dataset_selection_is_invalid_and_leaves_no_rows() {
    let mut fx = fixture(BatchBackend::Synchronous, false);
    let spec = RequestSpec {
        left: selector(&["cell=HeLa"]),
        ..mean_spec()
    };
    let envelope = fx.engine.request(&spec).expect("request");
    assert_eq!(envelope.status, ResultStatus::Invalid);
    assert_eq!(envelope.id, None);

    let right_empty = RequestSpec {
        right: Some(selector(&["mark=nothing"])),
        merge: Some("diff".to_string()),
        ..mean_spec()
    };
    assert_eq!(
        fx.engine.request(&right_empty).expect("request").status,
        ResultStatus::Invalid
    );
    assert!(fx.engine.store().list_jobs().expect("jobs").is_empty());
    assert!(fx.engine.store().list_cache().expect("cache").is_empty());
}

#[test]
fn apply_paste_against_two_datasets_fails_before_submission() {
    let mut fx = fixture(BatchBackend::Sge, false);
    let spec = RequestSpec {
        right: Some(selector(&["mark=peaks", "name=regions 1", "name=regions 2"])),
        merge: Some("apply_paste".to_string()),
        ..mean_spec()
    };
    let err = fx.engine.request(&spec).expect_err("arity");
    assert_eq!(err.code, EngineErrorCode::Validation);
    assert_eq!(fx.tools.count("qsub"), 0);
    assert!(fx.engine.store().list_jobs().expect("jobs").is_empty());
}

#[test]
fn empty_output_is_cached_as_empty() {
    let mut fx = fixture(BatchBackend::Synchronous, true);
    let first = fx.engine.request(&mean_spec()).expect("first");
    assert_eq!(first.status, ResultStatus::Empty);
    assert_eq!(first.location, None);
    let second = fx.engine.request(&mean_spec()).expect("second");
    assert_eq!(second.status, ResultStatus::Empty);
    assert_eq!(second.id, first.id);
    assert_eq!(fx.tools.count("wiggletools"), 1);
}

#[test]
fn histogram_over_three_regions_summarises_four_rows() {
    let mut fx = fixture(BatchBackend::Synchronous, false);
    let spec = RequestSpec {
        right: Some(selector(&["mark=peaks"])),
        merge: Some("histogram  10".to_string()),
        ..mean_spec()
    };
    let envelope = fx.engine.request(&spec).expect("request");
    assert_eq!(envelope.status, ResultStatus::Done);
    let location = envelope.location.expect("location");
    assert!(location.ends_with(".txt"));

    let summary = std::fs::read_to_string(format!("{location}.summary.tsv")).expect("summary");
    let rows: Vec<(String, f64)> = summary
        .lines()
        .map(|l| {
            let (label, total) = l.split_once('\t').expect("row");
            (label.to_string(), total.parse().expect("total"))
        })
        .collect();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].0, "ALL");
    assert_eq!(
        rows[1..].iter().map(|r| r.0.as_str()).collect::<Vec<_>>(),
        vec!["r1", "r2", "r3"]
    );
    assert!(rows[1..].iter().all(|(_, total)| *total <= rows[0].1));
    // The left branch was materialized as a reusable secondary row.
    let branch = NormalizedQuery::new("mean /d/f1.bw /d/f2.bw :").expect("branch");
    assert!(fx.engine.store().lookup(&branch).expect("lookup").is_some());
}

#[test]
fn sge_job_moves_through_waiting_to_done() {
    let mut fx = fixture(BatchBackend::Sge, false);
    fx.engine = {
        let mut config = fx.engine.config().clone();
        config.s3 = Some(S3Target {
            bucket: "results".to_string(),
            region: "eu-west-1".to_string(),
            aws_config: None,
        });
        let store = WiggleStore::open(&config.database).expect("store");
        Engine::with_store(config, store, fx.tools.clone())
    };

    let launched = fx.engine.request(&mean_spec()).expect("request");
    assert_eq!(launched.status, ResultStatus::Launched);
    assert_eq!(launched.handle.as_ref().map(|h| h.as_str()), Some("100"));
    let job = fx.engine.store().require_job(JobId(1)).expect("job");
    assert_eq!(job.stage2_handle.as_ref().map(|h| h.as_str()), Some("101"));
    assert!(job.temp.is_some());

    let waiting = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(waiting.status, ResultStatus::Waiting);

    let work = fx.dir.path().join("work");
    let tasks = work.join("wiggle-job-1.tasks.json");
    assert_eq!(fx.engine.run_task(&tasks, 1).expect("task"), 0);
    let status = fx
        .engine
        .finish_from_file(&work.join("wiggle-job-1.context.json"))
        .expect("finish");
    assert_eq!(status, JobStatus::Done);
    assert!(!tasks.exists());
    assert!(!work.join("wiggle-job-1.context.json").exists());
    assert_eq!(fx.tools.count("aws"), 1);

    let done = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(done.status, ResultStatus::Done);
    let location = done.location.expect("location");
    let basename = Path::new(&location)
        .file_name()
        .expect("name")
        .to_string_lossy()
        .into_owned();
    assert_eq!(
        done.url.as_deref(),
        Some(format!("https://s3-eu-west-1.amazonaws.com/results/{basename}").as_str())
    );
}

#[test]
fn failed_stage_is_persisted_as_error_and_not_repolled() {
    let mut fx = fixture(BatchBackend::Sge, false);
    fx.engine.request(&mean_spec()).expect("request");
    fx.tools.qstat_running.store(false, Ordering::SeqCst);
    *fx.tools.qacct.lock().expect("qacct") = "failed 0\nexit_status 1\n".to_string();

    let failed = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(failed.return_values, vec![1]);
    let polls = fx.tools.count("qstat");
    let again = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(again.status, ResultStatus::Error);
    assert_eq!(fx.tools.count("qstat"), polls);
    assert_eq!(
        fx.engine.store().require_job(JobId(1)).expect("job").status,
        JobStatus::Error
    );
}

#[test]
fn failed_task_blocks_sign_off_and_clean_allows_retry() {
    let mut fx = fixture(BatchBackend::Sge, false);
    fx.engine.request(&mean_spec()).expect("request");
    let work = fx.dir.path().join("work");
    fx.tools.failing_wiggletools.store(true, Ordering::SeqCst);
    assert_eq!(
        fx.engine
            .run_task(&work.join("wiggle-job-1.tasks.json"), 1)
            .expect("task"),
        1
    );
    let status = fx
        .engine
        .finish_from_file(&work.join("wiggle-job-1.context.json"))
        .expect("finish");
    assert_eq!(status, JobStatus::Error);

    let report = fx.engine.clean(30).expect("clean");
    assert_eq!(report.purged_error_jobs, vec![JobId(1)]);
    fx.tools.failing_wiggletools.store(false, Ordering::SeqCst);
    let retry = fx.engine.request(&mean_spec()).expect("retry");
    assert_eq!(retry.status, ResultStatus::Launched);
    assert_eq!(retry.id, Some(JobId(2)));
}

#[test]
fn unknown_job_reports_unknown() {
    let mut fx = fixture(BatchBackend::Sge, false);
    let envelope = fx.engine.result(JobId(77)).expect("poll");
    assert_eq!(envelope.status, ResultStatus::Unknown);
    assert_eq!(envelope.id, Some(JobId(77)));
}

#[test]
fn dry_run_plans_without_side_effects() {
    let fx = fixture(BatchBackend::Sge, false);
    let spec = RequestSpec {
        right: Some(selector(&["mark=genes"])),
        merge: Some("profile 20".to_string()),
        ..mean_spec()
    };
    let PlanOutcome::Planned { plan } = fx.engine.plan(&spec).expect("plan") else {
        panic!("expected a plan");
    };
    assert_eq!(plan.stage1.len(), 1);
    assert_eq!(plan.stage1[0][0], "wiggletools");
    assert_eq!(plan.stage1[0][1], "profile");
    assert!(plan.finish_command.is_none());
    assert_eq!(fx.tools.count("qsub"), 0);
    assert!(fx.engine.store().list_jobs().expect("jobs").is_empty());
    assert!(!fx.dir.path().join("work").exists());

    let invalid = RequestSpec {
        left: selector(&["cell=HeLa"]),
        ..mean_spec()
    };
    assert!(matches!(
        fx.engine.plan(&invalid).expect("plan"),
        PlanOutcome::Invalid { .. }
    ));
}

#[test]
fn collected_result_is_not_reported_done() {
    let mut fx = fixture(BatchBackend::Synchronous, false);
    let first = fx.engine.request(&mean_spec()).expect("first");
    assert_eq!(first.status, ResultStatus::Done);
    let location = first.location.expect("location");

    fx.clock.advance_days(40);
    let report = fx.engine.clean(30).expect("clean");
    assert!(report.removed_files.contains(&location));
    assert!(!Path::new(&location).exists());
    assert_eq!(
        fx.engine.store().require_job(JobId(1)).expect("job").status,
        JobStatus::Done
    );

    let expired = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(expired.status, ResultStatus::Unknown);
    assert_eq!(expired.location, None);
    assert_eq!(expired.url, None);

    let again = fx.engine.request(&mean_spec()).expect("recompute");
    assert_eq!(again.status, ResultStatus::Done);
    assert_eq!(again.id, Some(JobId(2)));
    assert!(Path::new(&again.location.expect("location")).is_file());
}

#[test]
fn cache_hit_on_a_deleted_file_recomputes() {
    let mut fx = fixture(BatchBackend::Synchronous, false);
    let first = fx.engine.request(&mean_spec()).expect("first");
    std::fs::remove_file(first.location.expect("location")).expect("remove");

    let second = fx.engine.request(&mean_spec()).expect("second");
    assert_eq!(second.status, ResultStatus::Done);
    assert_eq!(second.id, Some(JobId(2)));
    assert_eq!(fx.tools.count("wiggletools"), 2);
    let key = NormalizedQuery::new("mean /d/f1.bw /d/f2.bw").expect("key");
    let row = fx.engine.store().lookup(&key).expect("lookup").expect("row");
    assert_eq!(row.job_id, Some(JobId(2)));
}

#[test]
fn rejected_submission_is_an_immediate_error() {
    let mut fx = fixture(BatchBackend::Sge, false);
    fx.tools.reject_submissions_after(0);
    let envelope = fx.engine.request(&mean_spec()).expect("request");
    assert_eq!(envelope.status, ResultStatus::Error);
    assert_eq!(envelope.id, Some(JobId(1)));
    assert_eq!(fx.tools.count("qsub"), 1);
    let job = fx.engine.store().require_job(JobId(1)).expect("job");
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.stage1_handle.is_none());
    assert!(job.stage2_handle.is_none());

    // Errors are not resubmitted by a repeat request.
    let repeat = fx.engine.request(&mean_spec()).expect("repeat");
    assert_eq!(repeat.status, ResultStatus::Error);
    assert_eq!(fx.tools.count("qsub"), 1);
}

#[test]
fn rejected_finish_stage_keeps_the_compute_handle() {
    let mut fx = fixture(BatchBackend::Sge, false);
    fx.tools.reject_submissions_after(1);
    let envelope = fx.engine.request(&mean_spec()).expect("request");
    assert_eq!(envelope.status, ResultStatus::Error);
    assert_eq!(fx.tools.count("qsub"), 2);
    let job = fx.engine.store().require_job(JobId(1)).expect("job");
    assert_eq!(job.status, JobStatus::Error);
    assert_eq!(job.stage1_handle.as_ref().map(|h| h.as_str()), Some("100"));
    assert!(job.stage2_handle.is_none());
}

#[test]
fn lsf_job_is_polled_until_its_compute_stage_fails() {
    let mut fx = fixture(BatchBackend::Lsf, false);
    let launched = fx.engine.request(&mean_spec()).expect("request");
    assert_eq!(launched.status, ResultStatus::Launched);
    assert_eq!(launched.handle.as_ref().map(|h| h.as_str()), Some("100"));
    let job = fx.engine.store().require_job(JobId(1)).expect("job");
    assert_eq!(job.stage2_handle.as_ref().map(|h| h.as_str()), Some("101"));

    {
        let mut states = fx.tools.bjobs.lock().expect("bjobs");
        states.insert("100".to_string(), "RUN -\n".to_string());
        states.insert("101".to_string(), "PEND -\n".to_string());
    }
    let waiting = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(waiting.status, ResultStatus::Waiting);

    fx.tools
        .bjobs
        .lock()
        .expect("bjobs")
        .insert("100".to_string(), "EXIT 2\n".to_string());
    let failed = fx.engine.result(JobId(1)).expect("poll");
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(failed.return_values, vec![2]);
    assert_eq!(failed.handle.as_ref().map(|h| h.as_str()), Some("100"));
    assert_eq!(
        fx.engine.store().require_job(JobId(1)).expect("job").status,
        JobStatus::Error
    );
}

#[derive(Default)]
struct RecordingNotifier {
    acknowledged: Mutex<Vec<JobId>>,
}

impl Notifier for RecordingNotifier {
    fn acknowledged(&self, job_id: JobId, _description: &str, _emails: &[String]) {
        self.acknowledged.lock().expect("acknowledged").push(job_id);
    }

    fn finished(&self, _context: &JobContext, _status: JobStatus, _url: Option<&str>) {}
}

#[test]
fn cache_hits_acknowledge_only_jobs_still_in_flight() {
    let mut fx = fixture(BatchBackend::Sge, false);
    let notifier = Arc::new(RecordingNotifier::default());
    fx.engine = {
        let config = fx.engine.config().clone();
        let store = WiggleStore::open(&config.database).expect("store");
        Engine::with_store(config, store, fx.tools.clone()).with_notifier(notifier.clone())
    };

    fx.engine.request(&mean_spec()).expect("request");
    let in_flight = fx.engine.request(&mean_spec()).expect("hit");
    assert_eq!(in_flight.status, ResultStatus::Waiting);
    assert_eq!(
        *notifier.acknowledged.lock().expect("acknowledged"),
        vec![JobId(1), JobId(1)]
    );

    fx.tools.qstat_running.store(false, Ordering::SeqCst);
    *fx.tools.qacct.lock().expect("qacct") = "failed 0\nexit_status 3\n".to_string();
    let failed = fx.engine.request(&mean_spec()).expect("hit");
    assert_eq!(failed.status, ResultStatus::Error);
    assert_eq!(notifier.acknowledged.lock().expect("acknowledged").len(), 2);
}
