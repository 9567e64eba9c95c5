// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in offerings shipped with the daemon.

use acp_core::{ExecuteJobResult, JobContext};
use acp_delivery::{
    INTAKE_FILE, JobDirs, REPORT_FILE, file_ref, missing_required_fields, needs_info_value,
    write_text_file, written_value,
};
use acp_offering::{JobFeeType, OfferingConfig, OfferingHandlers, OfferingRegistry};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Fields a buyer must provide before a report can be written.
const REQUIRED_FIELDS: [&str; 1] = ["topic"];

/// Reference offering: writes a markdown report for a requested topic.
///
/// Incomplete requirements produce a needs-info deliverable with an on-disk
/// intake request instead of failing the job.
pub struct ReportWriterHandlers;

#[async_trait]
impl OfferingHandlers for ReportWriterHandlers {
    async fn execute_job(
        &self,
        requirements: &Map<String, Value>,
        ctx: &JobContext,
    ) -> anyhow::Result<ExecuteJobResult> {
        let dirs = JobDirs {
            delivery_root: ctx.delivery_root.clone(),
            job_dir: ctx.job_dir.clone(),
        };

        let missing = missing_required_fields(requirements, &REQUIRED_FIELDS);
        if !missing.is_empty() {
            let intake = render_intake(&missing);
            let intake_path = write_text_file(&ctx.job_dir, INTAKE_FILE, &intake)?;
            let intake_ref = file_ref(&intake_path);
            let value = needs_info_value(
                ctx.job_id,
                &ctx.offering_name,
                &dirs,
                &missing,
                &intake_ref,
                &[intake_ref.clone()],
            );
            return Ok(ExecuteJobResult::typed("application/json", value));
        }

        let topic = requirements
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let report = render_report(topic, requirements);
        let report_path = write_text_file(&ctx.job_dir, REPORT_FILE, &report)?;
        let report_ref = file_ref(&report_path);
        let value = written_value(
            ctx.job_id,
            &ctx.offering_name,
            &dirs,
            &report_ref,
            &[report_ref.clone()],
        );
        Ok(ExecuteJobResult::typed("application/json", value))
    }
}

fn render_intake(missing: &[String]) -> String {
    let mut out = String::from("# Intake Request\n\nThis job needs more information before it can run.\n\nMissing fields:\n");
    for field in missing {
        out.push_str(&format!("- `{field}`\n"));
    }
    out.push_str("\nReply with the missing fields to continue.\n");
    out
}

fn render_report(topic: &str, requirements: &Map<String, Value>) -> String {
    let mut out = format!("# Report: {topic}\n\n");
    if let Some(notes) = requirements.get("notes").and_then(Value::as_str) {
        out.push_str(&format!("Notes from the buyer:\n\n{notes}\n\n"));
    }
    out.push_str("## Summary\n\nGenerated by the report_writer offering.\n");
    out
}

/// Register every offering the daemon ships out of the box.
pub fn register_builtin_offerings(registry: &mut OfferingRegistry) {
    let config = OfferingConfig {
        name: "report_writer".into(),
        description: "Writes a markdown report on a requested topic".into(),
        job_fee: 0.0,
        job_fee_type: JobFeeType::Fixed,
        required_funds: false,
        extra: Map::new(),
    };
    registry.register_builtin(config, ReportWriterHandlers);
}
