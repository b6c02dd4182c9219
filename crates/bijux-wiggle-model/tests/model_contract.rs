// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_model::{
    DatasetSelector, JobContext, JobId, JobStatus, NormalizedQuery, OutputKind, ResultEnvelope,
    ResultStatus,
};
use proptest::prelude::*;
use std::path::PathBuf;

#[test]
fn job_context_survives_the_stage_boundary() {
    let ctx = JobContext {
        job_id: JobId(7),
        database: PathBuf::from("/data/wiggle.sqlite"),
        destination: "/work/tmpab12.txt".to_string(),
        output_kind: OutputKind::Table,
        finish_command: Some(vec![
            "histogram".to_string(),
            "/work/tmpab12.txt".to_string(),
            "10".to_string(),
        ]),
        labels: vec!["ALL".to_string(), "enhancers".to_string()],
        temps: vec![PathBuf::from("/work/tasks.json")],
        emails: Vec::new(),
        description: "(tissue=liver)".to_string(),
    };
    let raw = serde_json::to_string(&ctx).expect("encode");
    let back: JobContext = serde_json::from_str(&raw).expect("decode");
    assert_eq!(back, ctx);
}

#[test]
fn job_context_rejects_unknown_fields() {
    let raw = r#"{"job_id":1,"database":"/d","destination":"/o.bw","output_kind":"track","verbose":true}"#;
    assert!(serde_json::from_str::<JobContext>(raw).is_err());
}

#[test]
fn envelope_status_tracks_ledger_status() {
    let env = ResultEnvelope::for_job(JobId(4), JobStatus::Empty);
    assert_eq!(env.status, ResultStatus::Empty);
    assert_eq!(env.id, Some(JobId(4)));
}

#[test]
fn normalized_query_rejects_padding() {
    assert!(NormalizedQuery::new("mean f1 f2").is_ok());
    assert!(NormalizedQuery::new(" mean f1").is_err());
    assert!(NormalizedQuery::new("").is_err());
}

proptest! {
    #[test]
    fn selector_description_mentions_every_value(values in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
        let constraints: Vec<String> = values.iter().map(|v| format!("tissue={v}")).collect();
        let selector = DatasetSelector::from_constraints(&constraints).expect("selector");
        let text = selector.describe();
        for v in &values {
            let needle = format!("tissue={v}");
            prop_assert!(text.contains(&needle));
        }
    }
}
