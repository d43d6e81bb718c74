// Run request assembly shared by every binary that talks to the sandbox

use crate::types::{FileRef, ResourceLimits, RunSpec};
use crate::{GradeError, GradeResult};

/// Assemble a run spec. `aux_files` is kept exactly as given: compile and
/// link arguments refer to those files by name and position.
pub fn build_run_spec(
    language_id: &str,
    source_code: &str,
    aux_files: Vec<FileRef>,
    limits: ResourceLimits,
) -> GradeResult<RunSpec> {
    if language_id.trim().is_empty() {
        return Err(GradeError::MissingRequiredField("language_id"));
    }
    if source_code.trim().is_empty() {
        return Err(GradeError::MissingRequiredField("sourcecode"));
    }

    Ok(RunSpec {
        language_id: language_id.to_string(),
        source_code: source_code.to_string(),
        source_filename: None,
        input: None,
        file_list: aux_files,
        parameters: limits,
        debug: false,
    })
}
