// Run specs for a run profile

use crate::profile::RunProfile;
use codegrade_common::builder::build_run_spec;
use codegrade_common::types::RunSpec;
use codegrade_common::GradeResult;

/// Run spec for a student's submission under `profile`.
pub fn build_for_profile(
    profile: &RunProfile,
    student_id: &str,
    source_code: &str,
    config_file_id: Option<&str>,
) -> GradeResult<RunSpec> {
    let spec = build_run_spec(
        &profile.language_id,
        source_code,
        profile.aux_files(student_id, config_file_id),
        profile.limits.clone(),
    )?;
    Ok(spec
        .with_source_filename(profile.source_filename.clone())
        .with_debug(profile.debug))
}
